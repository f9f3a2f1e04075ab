//! Approval instances and their step history
use crate::document::{DocumentStatus, TimeStamp};
use crate::error::{DocumentError, Result};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    InProgress,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Withdrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum HistoryAction {
    #[n(0)]
    Submitted {
        #[n(0)]
        version_id: Option<String>, // current version when review started
    },
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Transferred {
        #[n(0)]
        to: String,
    },
    #[n(4)]
    Withdrawn,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct HistoryEntry {
    #[n(0)]
    pub actor: String,
    #[n(1)]
    pub step: Option<String>,
    #[n(2)]
    pub action: HistoryAction,
    #[n(3)]
    pub comment: Option<String>,
    #[n(4)]
    pub timestamp: TimeStamp,
}

// Instances are keyed by id in the `instances` tree. `revision` is the optimistic lock.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct ApprovalInstance {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub document_id: String,
    #[n(2)]
    pub workflow_code: String,
    #[n(3)]
    pub current_step: Option<String>,
    #[n(4)]
    pub current_approver: Option<String>,
    #[n(5)]
    pub status: ApprovalStatus,
    #[n(6)]
    pub initiator: String,
    #[n(7)]
    pub history: Vec<HistoryEntry>,
    #[n(8)]
    pub revision: u64,
    #[n(9)]
    pub approved_version_id: Option<String>,
    #[n(10)]
    pub created_at: TimeStamp,
    #[n(11)]
    pub completed_at: Option<TimeStamp>,
}

/// The step an instance is waiting on, as shown in a task inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepView {
    pub instance_id: String,
    pub document_id: String,
    pub workflow_code: String,
    pub step: String,
    pub approver: String,
    pub since: TimeStamp,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Withdrawn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }

    /// Status the owning document takes when an instance ends this way.
    pub fn document_status(&self) -> Option<DocumentStatus> {
        match self {
            Self::Approved => Some(DocumentStatus::Approved),
            Self::Rejected => Some(DocumentStatus::Rejected),
            Self::Withdrawn => Some(DocumentStatus::Withdrawn),
            Self::Pending | Self::InProgress => None,
        }
    }
}

impl HistoryEntry {
    pub fn new(
        actor: impl Into<String>,
        step: Option<String>,
        action: HistoryAction,
        comment: Option<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            step,
            action,
            comment,
            timestamp: TimeStamp::new(),
        }
    }

    /// sha256 over the encoded entry, returned with the encoding itself.
    pub fn build(&self) -> Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self).map_err(|e| DocumentError::Codec(e.to_string()))?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

impl ApprovalInstance {
    pub fn new(
        id: String,
        document_id: String,
        workflow_code: String,
        initiator: String,
    ) -> Self {
        Self {
            id,
            document_id,
            workflow_code,
            current_step: None,
            current_approver: None,
            status: ApprovalStatus::Pending,
            initiator,
            history: vec![],
            revision: 0,
            approved_version_id: None,
            created_at: TimeStamp::new(),
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn record(&mut self, actor: &str, action: HistoryAction, comment: Option<String>) {
        let entry = HistoryEntry::new(actor, self.current_step.clone(), action, comment);
        self.history.push(entry);
    }

    /// Make `step` current with `approver` as its only actor.
    pub fn assign(&mut self, step: &str, approver: String) {
        self.current_step = Some(step.to_string());
        self.current_approver = Some(approver);
        self.status = ApprovalStatus::InProgress;
    }

    pub fn finish(&mut self, status: ApprovalStatus) {
        self.status = status;
        self.current_step = None;
        self.current_approver = None;
        self.completed_at = Some(TimeStamp::new());
    }

    pub(crate) fn bump(&mut self) {
        self.revision += 1;
    }

    pub fn step_view(&self) -> Option<StepView> {
        if !self.is_active() {
            return None;
        }
        let step = self.current_step.clone()?;
        let approver = self.current_approver.clone()?;
        // the step became current with the most recent history entry
        let since = self
            .history
            .last()
            .map(|h| h.timestamp)
            .unwrap_or(self.created_at);
        Some(StepView {
            instance_id: self.id.clone(),
            document_id: self.document_id.clone(),
            workflow_code: self.workflow_code.clone(),
            step,
            approver,
            since,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> ApprovalInstance {
        ApprovalInstance::new(
            "appr_1".into(),
            "doc_1".into(),
            "DOC_REVIEW".into(),
            "alice".into(),
        )
    }

    #[test]
    fn lifecycle_of_an_instance() {
        let mut inst = instance();
        assert_eq!(inst.status, ApprovalStatus::Pending);
        assert!(inst.step_view().is_none());

        inst.assign("MANAGER_REVIEW", "bob".into());
        inst.record("alice", HistoryAction::Submitted { version_id: None }, None);
        let view = inst.step_view().unwrap();
        assert_eq!(view.approver, "bob");
        assert_eq!(view.step, "MANAGER_REVIEW");

        inst.record("bob", HistoryAction::Rejected, Some("typo".into()));
        inst.finish(ApprovalStatus::Rejected);
        assert!(!inst.is_active());
        assert!(inst.current_approver.is_none());
        assert!(inst.completed_at.is_some());
        assert_eq!(inst.history[1].step.as_deref(), Some("MANAGER_REVIEW"));
    }

    #[test]
    fn instance_round_trips_through_cbor() {
        let mut inst = instance();
        inst.assign("QA_APPROVAL", "quinn".into());
        inst.record(
            "quinn",
            HistoryAction::Transferred { to: "quentin".into() },
            None,
        );

        let bytes = minicbor::to_vec(&inst).unwrap();
        let decoded: ApprovalInstance = minicbor::decode(&bytes).unwrap();
        assert_eq!(inst, decoded);
    }

    #[test]
    fn entry_hash_covers_content() {
        let a = HistoryEntry::new("bob", None, HistoryAction::Approved, None);
        let mut b = a.clone();
        b.comment = Some("ok".into());

        let (hash_a, _) = a.build().unwrap();
        let (hash_b, _) = b.build().unwrap();
        assert_ne!(hash_a, hash_b);
        assert_eq!(hash_a.len(), 64);
    }

    #[test]
    fn terminal_statuses_map_onto_documents() {
        assert_eq!(
            ApprovalStatus::Approved.document_status(),
            Some(DocumentStatus::Approved)
        );
        assert_eq!(ApprovalStatus::InProgress.document_status(), None);
        assert!(ApprovalStatus::Withdrawn.is_terminal());
        assert!(!ApprovalStatus::Pending.is_terminal());
    }
}
