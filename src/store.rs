//! sled-backed metadata ledger shared by the version store and the approval engine
use crate::approval::ApprovalInstance;
use crate::document::{Document, NewDocument};
use crate::error::{DocumentError, Result};
use crate::utils::{DOCUMENT_HRP, new_id};
use crate::version::DocumentVersion;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const DOCUMENTS: &str = "documents";
const VERSIONS: &str = "versions";
const CHECKSUMS: &str = "checksums";
const DOCUMENT_VERSIONS: &str = "document_versions";
const INSTANCES: &str = "instances";
const ACTIVE_INSTANCES: &str = "active_instances";
const DOCUMENT_INSTANCES: &str = "document_instances";

/// Named trees over one sled database. Cloning is cheap and shares the database.
#[derive(Clone)]
pub struct Ledger {
    instance: Arc<Db>,
    pub(crate) documents: Tree,
    pub(crate) versions: Tree,
    /// checksum -> id of the version that introduced the content
    pub(crate) checksums: Tree,
    /// `{document_id}/{version_id}` -> ()
    pub(crate) document_versions: Tree,
    pub(crate) instances: Tree,
    /// document_id -> id of its single non-terminal instance
    pub(crate) active_instances: Tree,
    /// `{document_id}/{instance_id}` -> ()
    pub(crate) document_instances: Tree,
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| DocumentError::Codec(e.to_string()))
}

pub(crate) fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T> {
    minicbor::decode(bytes).map_err(|e| DocumentError::Codec(e.to_string()))
}

pub(crate) fn abort(e: DocumentError) -> ConflictableTransactionError<DocumentError> {
    ConflictableTransactionError::Abort(e)
}

pub(crate) fn index_key(parent: &str, child: &str) -> String {
    format!("{parent}/{child}")
}

/// Abort with `ConflictingInstance` while `document_id` has a live review.
pub(crate) fn ensure_idle(
    active: &TransactionalTree,
    document_id: &str,
) -> ConflictableTransactionResult<(), DocumentError> {
    match active.get(document_id.as_bytes())? {
        Some(existing) => Err(abort(DocumentError::ConflictingInstance {
            document_id: document_id.to_string(),
            instance_id: String::from_utf8_lossy(&existing).into_owned(),
        })),
        None => Ok(()),
    }
}

impl Ledger {
    pub fn new(instance: Arc<Db>) -> Result<Self> {
        Ok(Self {
            documents: instance.open_tree(DOCUMENTS)?,
            versions: instance.open_tree(VERSIONS)?,
            checksums: instance.open_tree(CHECKSUMS)?,
            document_versions: instance.open_tree(DOCUMENT_VERSIONS)?,
            instances: instance.open_tree(INSTANCES)?,
            active_instances: instance.open_tree(ACTIVE_INSTANCES)?,
            document_instances: instance.open_tree(DOCUMENT_INSTANCES)?,
            instance,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::new(Arc::new(db))
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.instance
    }

    pub fn create_document(&self, author: &str, new: NewDocument) -> Result<Document> {
        let document = Document::draft(new_id(DOCUMENT_HRP)?, author.to_string(), new);
        self.documents
            .insert(document.id.as_bytes(), encode(&document)?)?;
        debug!(document_id = %document.id, %author, "document created");
        Ok(document)
    }

    pub fn document(&self, id: &str) -> Result<Document> {
        match self.documents.get(id.as_bytes())? {
            Some(raw) => decode(&raw),
            None => Err(DocumentError::not_found("document", id)),
        }
    }

    pub fn documents(&self) -> Result<Vec<Document>> {
        self.documents
            .iter()
            .values()
            .map(|raw| decode(&raw?))
            .collect()
    }

    pub fn version(&self, id: &str) -> Result<DocumentVersion> {
        match self.versions.get(id.as_bytes())? {
            Some(raw) => decode(&raw),
            None => Err(DocumentError::not_found("version", id)),
        }
    }

    /// Versions of a document in version-number order.
    pub fn versions_of(&self, document_id: &str) -> Result<Vec<DocumentVersion>> {
        let prefix = index_key(document_id, "");
        let mut versions = self
            .document_versions
            .scan_prefix(prefix.as_bytes())
            .keys()
            .map(|key| {
                let key = key?;
                let version_id = std::str::from_utf8(&key[prefix.len()..])
                    .map_err(|e| DocumentError::Codec(e.to_string()))?;
                self.version(version_id)
            })
            .collect::<Result<Vec<_>>>()?;
        versions.sort_by(|a, b| a.version_number.cmp(&b.version_number));
        Ok(versions)
    }

    pub fn instance(&self, id: &str) -> Result<ApprovalInstance> {
        match self.instances.get(id.as_bytes())? {
            Some(raw) => decode(&raw),
            None => Err(DocumentError::not_found("approval instance", id)),
        }
    }

    pub fn instances(&self) -> Result<Vec<ApprovalInstance>> {
        self.instances
            .iter()
            .values()
            .map(|raw| decode(&raw?))
            .collect()
    }

    pub fn instances_of(&self, document_id: &str) -> Result<Vec<ApprovalInstance>> {
        let prefix = index_key(document_id, "");
        self.document_instances
            .scan_prefix(prefix.as_bytes())
            .keys()
            .map(|key| {
                let key = key?;
                let instance_id = std::str::from_utf8(&key[prefix.len()..])
                    .map_err(|e| DocumentError::Codec(e.to_string()))?;
                self.instance(instance_id)
            })
            .collect()
    }

    pub fn active_instance_id(&self, document_id: &str) -> Result<Option<String>> {
        let Some(raw) = self.active_instances.get(document_id.as_bytes())? else {
            return Ok(None);
        };
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|e| DocumentError::Codec(e.to_string()))
    }

    pub fn flush(&self) -> Result<usize> {
        Ok(self.instance.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn documents_round_trip() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        let created = ledger
            .create_document(
                "alice",
                NewDocument {
                    title: "SOP-001".into(),
                    ..NewDocument::default()
                },
            )
            .unwrap();

        assert!(created.id.starts_with(DOCUMENT_HRP));
        assert_eq!(ledger.document(&created.id).unwrap(), created);
        assert_eq!(ledger.documents().unwrap().len(), 1);
    }

    #[test]
    fn missing_records_are_not_found() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        assert!(matches!(
            ledger.document("doc_missing"),
            Err(DocumentError::NotFound { kind: "document", .. })
        ));
        assert!(ledger.versions_of("doc_missing").unwrap().is_empty());
        assert!(ledger.active_instance_id("doc_missing").unwrap().is_none());
    }
}
