//! Core document record and its attribute enums
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fmt;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Default, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum DocumentStatus {
    #[default]
    #[n(0)]
    Draft,
    #[n(1)]
    InReview,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Withdrawn,
    #[n(5)]
    Archived,
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Default, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum ConfidentialityLevel {
    #[default]
    #[n(0)]
    Public,
    #[n(1)]
    Internal,
    #[n(2)]
    Restricted,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct TimeStamp(DateTime<Utc>);

// Documents are keyed by their id in the `documents` tree
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Document {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub status: DocumentStatus,
    #[n(3)]
    pub confidentiality: Option<ConfidentialityLevel>, // unset reads as Public
    #[n(4)]
    pub author: String,
    #[n(5)]
    pub owner_department: Option<String>,
    #[n(6)]
    pub current_version_id: Option<String>,
    #[n(7)]
    pub head_version: Option<crate::version::VersionNumber>, // highest number issued so far
    #[n(8)]
    pub version: u64, // optimistic lock counter
    #[n(9)]
    pub effective_date: Option<TimeStamp>,
    #[n(10)]
    pub expiry_date: Option<TimeStamp>,
    #[n(11)]
    pub created_at: TimeStamp,
    #[n(12)]
    pub updated_at: TimeStamp,
}

/// Caller-supplied attributes for a brand new document.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub title: String,
    pub confidentiality: Option<ConfidentialityLevel>,
    pub owner_department: Option<String>,
    pub effective_date: Option<TimeStamp>,
    pub expiry_date: Option<TimeStamp>,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::InReview => "IN_REVIEW",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Withdrawn => "WITHDRAWN",
            Self::Archived => "ARCHIVED",
        }
    }

    /// IN_REVIEW, APPROVED and REJECTED are only ever set by a review.
    pub fn is_workflow_owned(&self) -> bool {
        matches!(self, Self::InReview | Self::Approved | Self::Rejected)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConfidentialityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Internal => "INTERNAL",
            Self::Restricted => "RESTRICTED",
        }
    }
}

impl fmt::Display for ConfidentialityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
            .unwrap_or_else(|| Self(DateTime::<Utc>::UNIX_EPOCH))
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn plus_secs(&self, secs: u64) -> Self {
        let later = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delta| self.0.checked_add_signed(delta));
        Self(later.unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl Document {
    pub(crate) fn draft(id: String, author: String, new: NewDocument) -> Self {
        let now = TimeStamp::new();
        Self {
            id,
            title: new.title,
            status: DocumentStatus::Draft,
            confidentiality: new.confidentiality,
            author,
            owner_department: new.owner_department,
            current_version_id: None,
            head_version: None,
            version: 0,
            effective_date: new.effective_date,
            expiry_date: new.expiry_date,
            created_at: now,
            updated_at: now,
        }
    }

    /// Confidentiality with the unset case resolved to `Public`.
    pub fn confidentiality_level(&self) -> ConfidentialityLevel {
        self.confidentiality.unwrap_or_default()
    }

    /// Whether `at` falls inside the effective/expiry window, when one is set.
    pub fn is_effective_at(&self, at: &TimeStamp) -> bool {
        if self.effective_date.is_some_and(|from| at < &from) {
            return false;
        }
        if self.expiry_date.is_some_and(|until| at > &until) {
            return false;
        }
        true
    }

    // every mutation goes through here so the lock counter always moves
    pub(crate) fn touch(&mut self) {
        self.version += 1;
        self.updated_at = TimeStamp::new();
    }
}
