//! Audit trail of lifecycle events
use crate::document::{DocumentStatus, TimeStamp};
use crate::version::VersionNumber;
use parking_lot::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    VersionUploaded {
        document_id: String,
        version_id: String,
        number: VersionNumber,
        actor: String,
    },
    CurrentVersionChanged {
        document_id: String,
        version_id: String,
        actor: String,
    },
    RolledBack {
        document_id: String,
        restored_from: String,
        version_id: String,
        actor: String,
    },
    ReviewStarted {
        document_id: String,
        instance_id: String,
        actor: String,
    },
    StepDecided {
        instance_id: String,
        step: String,
        actor: String,
        approved: bool,
        /// sha256 of the history entry that records the decision
        entry_hash: String,
    },
    Transferred {
        instance_id: String,
        from: String,
        to: String,
    },
    Withdrawn {
        instance_id: String,
        actor: String,
    },
    Urged {
        instance_id: String,
        approver: String,
        actor: String,
    },
    StatusChanged {
        document_id: String,
        from: DocumentStatus,
        to: DocumentStatus,
        actor: String,
    },
    DocumentDeleted {
        document_id: String,
        versions: usize,
        actor: String,
    },
}

/// Receives events after the change they describe has committed.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

/// Keeps events in memory, stamped on arrival.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<(TimeStamp, AuditEvent)>>,
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VersionUploaded { .. } => "version_uploaded",
            Self::CurrentVersionChanged { .. } => "current_version_changed",
            Self::RolledBack { .. } => "rolled_back",
            Self::ReviewStarted { .. } => "review_started",
            Self::StepDecided { .. } => "step_decided",
            Self::Transferred { .. } => "transferred",
            Self::Withdrawn { .. } => "withdrawn",
            Self::Urged { .. } => "urged",
            Self::StatusChanged { .. } => "status_changed",
            Self::DocumentDeleted { .. } => "document_deleted",
        }
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(target: "audit", kind = event.kind(), ?event);
    }
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| e.kind() == kind)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push((TimeStamp::new(), event));
    }
}
