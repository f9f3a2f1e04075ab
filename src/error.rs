use crate::version::VersionOverflow;
use sled::transaction::TransactionError;

pub type Result<T, E = DocumentError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum DocumentError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("content with checksum {checksum} already exists in the store")]
    DuplicateContent { checksum: String },
    #[error("document {document_id} already has an active approval instance {instance_id}")]
    ConflictingInstance {
        document_id: String,
        instance_id: String,
    },
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("{actual} is not the current approver of {instance_id}")]
    NotCurrentApprover { instance_id: String, actual: String },
    #[error("{principal} may not {action} {resource}")]
    PermissionDenied {
        principal: String,
        action: String,
        resource: String,
    },
    #[error("{kind} {id} was modified concurrently, re-read and retry")]
    ConcurrentModification { kind: &'static str, id: String },
    #[error("storage failure: {0}")]
    StorageFailure(#[from] BlobError),
    #[error("refusing to store an empty version")]
    EmptyContent,
    #[error("version {version_id} does not belong to document {document_id}")]
    ForeignVersion {
        version_id: String,
        document_id: String,
    },
    #[error(transparent)]
    VersionOverflow(#[from] VersionOverflow),
    #[error("no approver could be resolved for step {step}")]
    ApproverUnresolved { step: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("record codec error: {0}")]
    Codec(String),
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum BlobError {
    #[error("blob {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("blob {key} failed checksum verification")]
    Corrupted { key: String },
    #[error("blob backend error: {0}")]
    Backend(String),
    #[error("blob database error: {0}")]
    Database(#[from] sled::Error),
}

impl DocumentError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Only optimistic-lock failures are safe to retry automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

impl From<TransactionError<DocumentError>> for DocumentError {
    fn from(value: TransactionError<DocumentError>) -> Self {
        match value {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => DocumentError::Database(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_concurrent_modification_is_retryable() {
        let stale = DocumentError::ConcurrentModification {
            kind: "document",
            id: "doc_1".into(),
        };
        assert!(stale.is_retryable());
        assert!(!DocumentError::EmptyContent.is_retryable());
        assert!(!DocumentError::not_found("document", "doc_1").is_retryable());
    }

    #[test]
    fn transaction_abort_unwraps_inner_error() {
        let err: DocumentError =
            TransactionError::Abort(DocumentError::InvalidTransition("done".into())).into();
        assert!(matches!(err, DocumentError::InvalidTransition(_)));
    }
}
