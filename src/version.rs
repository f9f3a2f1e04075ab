//! Version records and the semver-like numbering scheme
use crate::document::TimeStamp;
use std::fmt;
use std::str::FromStr;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct VersionNumber {
    #[n(0)]
    pub major: u32,
    #[n(1)]
    pub minor: u32,
    #[n(2)]
    pub patch: u32,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionType {
    #[n(0)]
    Major,
    #[n(1)]
    Minor,
    #[n(2)]
    Patch,
}

// Versions are keyed by their id in the `versions` tree. Only `is_current` ever changes.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DocumentVersion {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub document_id: String,
    #[n(2)]
    pub version_number: VersionNumber,
    #[n(3)]
    pub version_type: VersionType,
    #[n(4)]
    pub checksum: String, // hex sha256 of the stored bytes
    #[n(5)]
    pub size: u64,
    #[n(6)]
    pub blob_key: String,
    #[n(7)]
    pub change_reason: String,
    #[n(8)]
    pub is_current: bool,
    #[n(9)]
    pub created_by: String,
    #[n(10)]
    pub created_at: TimeStamp,
    #[n(11)]
    pub restored_from: Option<String>, // set when issued by a rollback
    #[n(12)]
    pub file_name: Option<String>,
    #[n(13)]
    pub content_type: Option<String>,
}

/// What the uploader said about the file. Stored as given, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

/// Outcome of comparing two versions by checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionComparison {
    Identical {
        checksum: String,
    },
    Different {
        from: VersionNumber,
        to: VersionNumber,
        size_delta: i64,
    },
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("malformed version number: {0}")]
pub struct ParseVersionError(String);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("version {0} cannot take another {1:?} bump")]
pub struct VersionOverflow(pub VersionNumber, pub VersionType);

impl VersionNumber {
    pub const FIRST: VersionNumber = VersionNumber::new(1, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Bump the requested component and zero everything below it.
    pub fn next(&self, version_type: VersionType) -> Result<Self, VersionOverflow> {
        let bumped = match version_type {
            VersionType::Major => self.major.checked_add(1).map(|major| Self::new(major, 0, 0)),
            VersionType::Minor => self
                .minor
                .checked_add(1)
                .map(|minor| Self::new(self.major, minor, 0)),
            VersionType::Patch => self
                .patch
                .checked_add(1)
                .map(|patch| Self::new(self.major, self.minor, patch)),
        };
        bumped.ok_or(VersionOverflow(*self, version_type))
    }

    /// Number for the next version after `latest`; the first version is always 1.0.0.
    pub fn following(
        latest: Option<&VersionNumber>,
        version_type: VersionType,
    ) -> Result<Self, VersionOverflow> {
        match latest {
            Some(latest) => latest.next(version_type),
            None => Ok(Self::FIRST),
        }
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for VersionNumber {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let [major, minor, patch] = parts[..] else {
            return Err(ParseVersionError(s.to_string()));
        };
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| ParseVersionError(s.to_string()))
        };
        Ok(Self::new(parse(major)?, parse(minor)?, parse(patch)?))
    }
}

impl VersionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Major => "MAJOR",
            Self::Minor => "MINOR",
            Self::Patch => "PATCH",
        }
    }
}

impl FileInfo {
    pub fn named(file_name: &str, content_type: &str) -> Self {
        Self {
            file_name: Some(file_name.to_string()),
            content_type: Some(content_type.to_string()),
        }
    }
}

impl VersionComparison {
    pub fn is_identical(&self) -> bool {
        matches!(self, Self::Identical { .. })
    }
}
