//! Content-addressed version control for documents
//!
//! Every upload is keyed by the sha256 of its bytes. A checksum may be
//! introduced only once across the whole store, so byte-identical re-uploads
//! are refused. Rollbacks restore old content as a new version, which never
//! claims the checksum index since the content was introduced earlier. While a
//! review is open the current version is frozen, so the approved version is
//! always the one the reviewers saw.
use crate::audit::{AuditEvent, AuditSink};
use crate::blob::{BlobStore, checksum};
use crate::config::StorageConfig;
use crate::document::{Document, TimeStamp};
use crate::error::{BlobError, DocumentError, Result};
use crate::indexer::{SearchIndexer, notify};
use crate::store::{Ledger, abort, decode, encode, ensure_idle, index_key};
use crate::utils::{VERSION_HRP, new_id};
use crate::version::{DocumentVersion, FileInfo, VersionComparison, VersionNumber, VersionType};
use sled::Transactional;
use std::sync::Arc;
use tracing::{debug, info, warn};

// held in the checksum index between reservation and commit
const RESERVED: &[u8] = b"reserved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageStats {
    pub versions: u64,
    pub bytes: u64,
}

pub struct VersionStore {
    ledger: Ledger,
    blobs: Arc<dyn BlobStore>,
    bucket: String,
    presign_ttl_secs: u64,
    audit: Arc<dyn AuditSink>,
    indexer: Arc<dyn SearchIndexer>,
}

/// Everything needed to write one new version row.
struct PendingVersion<'a> {
    document_id: &'a str,
    content: &'a [u8],
    checksum: String,
    version_type: VersionType,
    change_reason: String,
    created_by: &'a str,
    restored_from: Option<String>,
    file: FileInfo,
}

impl VersionStore {
    pub fn new(
        ledger: Ledger,
        blobs: Arc<dyn BlobStore>,
        storage: &StorageConfig,
        audit: Arc<dyn AuditSink>,
        indexer: Arc<dyn SearchIndexer>,
    ) -> Self {
        Self {
            ledger,
            blobs,
            bucket: storage.bucket.clone(),
            presign_ttl_secs: storage.presign_ttl_secs,
            audit,
            indexer,
        }
    }

    /// Store `content` as the new current version of a document.
    pub fn upload(
        &self,
        document_id: &str,
        content: &[u8],
        version_type: VersionType,
        change_reason: &str,
        author: &str,
    ) -> Result<DocumentVersion> {
        self.upload_file(
            document_id,
            content,
            FileInfo::default(),
            version_type,
            change_reason,
            author,
        )
    }

    /// Like [`upload`](Self::upload), keeping the file name and content type.
    pub fn upload_file(
        &self,
        document_id: &str,
        content: &[u8],
        file: FileInfo,
        version_type: VersionType,
        change_reason: &str,
        author: &str,
    ) -> Result<DocumentVersion> {
        if content.is_empty() {
            return Err(DocumentError::EmptyContent);
        }
        let checksum = checksum(content);
        self.ledger.document(document_id)?;

        // claim the checksum before any bytes are written
        let reserved = self.ledger.checksums.compare_and_swap(
            checksum.as_bytes(),
            None::<&[u8]>,
            Some(RESERVED),
        )?;
        if reserved.is_err() {
            return Err(DocumentError::DuplicateContent { checksum });
        }

        let pending = PendingVersion {
            document_id,
            content,
            checksum: checksum.clone(),
            version_type,
            change_reason: change_reason.to_string(),
            created_by: author,
            restored_from: None,
            file,
        };
        let version = match self.commit_version(pending) {
            Ok(version) => version,
            Err(e) => {
                self.release(&checksum);
                return Err(e);
            }
        };

        info!(
            %document_id,
            version_id = %version.id,
            number = %version.version_number,
            size = version.size,
            %author,
            "version uploaded"
        );
        self.audit.record(AuditEvent::VersionUploaded {
            document_id: document_id.to_string(),
            version_id: version.id.clone(),
            number: version.version_number,
            actor: author.to_string(),
        });
        notify(self.indexer.as_ref(), document_id, "version_uploaded");
        Ok(version)
    }

    pub fn get_current(&self, document_id: &str) -> Result<DocumentVersion> {
        let document = self.ledger.document(document_id)?;
        match document.current_version_id {
            Some(version_id) => self.ledger.version(&version_id),
            None => Err(DocumentError::not_found("current version", document_id)),
        }
    }

    pub fn get_version(&self, version_id: &str) -> Result<DocumentVersion> {
        self.ledger.version(version_id)
    }

    /// Versions of a document, oldest first.
    pub fn list_versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>> {
        self.ledger.document(document_id)?;
        self.ledger.versions_of(document_id)
    }

    pub fn version_count(&self, document_id: &str) -> Result<usize> {
        Ok(self.list_versions(document_id)?.len())
    }

    /// Point the document at one of its existing versions.
    pub fn set_current(
        &self,
        document_id: &str,
        version_id: &str,
        actor: &str,
    ) -> Result<DocumentVersion> {
        let target = self.ledger.version(version_id)?;
        if target.document_id != document_id {
            return Err(DocumentError::ForeignVersion {
                version_id: version_id.to_string(),
                document_id: document_id.to_string(),
            });
        }

        let ledger = &self.ledger;
        let changed = (&ledger.documents, &ledger.versions, &ledger.active_instances)
            .transaction(|(documents, versions, active)| {
                ensure_idle(active, document_id)?;
                let raw = documents
                    .get(document_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("document", document_id)))?;
                let mut document: Document = decode(&raw).map_err(abort)?;
                if document.current_version_id.as_deref() == Some(version_id) {
                    return Ok(None);
                }

                if let Some(previous_id) = &document.current_version_id {
                    if let Some(raw) = versions.get(previous_id.as_bytes())? {
                        let mut previous: DocumentVersion = decode(&raw).map_err(abort)?;
                        previous.is_current = false;
                        versions.insert(previous_id.as_bytes(), encode(&previous).map_err(abort)?)?;
                    }
                }
                let raw = versions
                    .get(version_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("version", version_id)))?;
                let mut current: DocumentVersion = decode(&raw).map_err(abort)?;
                current.is_current = true;
                versions.insert(version_id.as_bytes(), encode(&current).map_err(abort)?)?;

                document.current_version_id = Some(version_id.to_string());
                document.touch();
                documents.insert(document_id.as_bytes(), encode(&document).map_err(abort)?)?;
                Ok(Some(current))
            })?;

        let Some(current) = changed else {
            debug!(%document_id, %version_id, "version already current");
            return Ok(target);
        };
        info!(%document_id, %version_id, %actor, "current version changed");
        self.audit.record(AuditEvent::CurrentVersionChanged {
            document_id: document_id.to_string(),
            version_id: version_id.to_string(),
            actor: actor.to_string(),
        });
        notify(self.indexer.as_ref(), document_id, "current_version_changed");
        Ok(current)
    }

    /// Re-issue the content of `version_id` as a new current version.
    pub fn rollback(&self, version_id: &str, requested_by: &str) -> Result<DocumentVersion> {
        let source = self.ledger.version(version_id)?;
        let content = self.read_verified(&source)?;

        let pending = PendingVersion {
            document_id: &source.document_id,
            content: &content,
            checksum: source.checksum.clone(),
            version_type: VersionType::Minor,
            change_reason: format!("rollback to v{}", source.version_number),
            created_by: requested_by,
            restored_from: Some(source.id.clone()),
            file: FileInfo {
                file_name: source.file_name.clone(),
                content_type: source.content_type.clone(),
            },
        };
        let version = self.commit_version(pending)?;

        info!(
            document_id = %source.document_id,
            restored_from = %source.id,
            version_id = %version.id,
            number = %version.version_number,
            %requested_by,
            "version rolled back"
        );
        self.audit.record(AuditEvent::RolledBack {
            document_id: source.document_id.clone(),
            restored_from: source.id,
            version_id: version.id.clone(),
            actor: requested_by.to_string(),
        });
        notify(self.indexer.as_ref(), &version.document_id, "rolled_back");
        Ok(version)
    }

    pub fn compare(&self, first_id: &str, second_id: &str) -> Result<VersionComparison> {
        let first = self.ledger.version(first_id)?;
        let second = self.ledger.version(second_id)?;

        if first.checksum == second.checksum {
            return Ok(VersionComparison::Identical {
                checksum: first.checksum,
            });
        }
        Ok(VersionComparison::Different {
            from: first.version_number,
            to: second.version_number,
            size_delta: second.size as i64 - first.size as i64,
        })
    }

    /// Bytes of a version, verified against its recorded checksum.
    pub fn download(&self, version_id: &str) -> Result<Vec<u8>> {
        let version = self.ledger.version(version_id)?;
        self.read_verified(&version)
    }

    pub fn presigned_url(&self, version_id: &str) -> Result<String> {
        let version = self.ledger.version(version_id)?;
        Ok(self
            .blobs
            .presigned_url(&self.bucket, &version.blob_key, self.presign_ttl_secs)?)
    }

    pub fn usage_stats(&self) -> Result<UsageStats> {
        let mut stats = UsageStats::default();
        for raw in self.ledger.versions.iter().values() {
            let version: DocumentVersion = decode(&raw?)?;
            stats.versions += 1;
            stats.bytes += version.size;
        }
        Ok(stats)
    }

    /// Remove a document together with its versions and stored content.
    /// Refused while a review of the document is open. Past reviews stay on
    /// record.
    pub fn delete_document(&self, document_id: &str, actor: &str) -> Result<Document> {
        let snapshot = self.ledger.document(document_id)?;
        let owned = self.ledger.versions_of(document_id)?;

        let ledger = &self.ledger;
        let removed = (
            &ledger.documents,
            &ledger.active_instances,
            &ledger.versions,
            &ledger.checksums,
            &ledger.document_versions,
        )
            .transaction(|(documents, active, versions, checksums, document_versions)| {
                ensure_idle(active, document_id)?;
                let raw = documents
                    .get(document_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("document", document_id)))?;
                let document: Document = decode(&raw).map_err(abort)?;
                // a version added since the scan would be left dangling
                if document.version != snapshot.version {
                    return Err(abort(DocumentError::ConcurrentModification {
                        kind: "document",
                        id: document_id.to_string(),
                    }));
                }

                for version in &owned {
                    versions.remove(version.id.as_bytes())?;
                    document_versions.remove(version.blob_key.as_bytes())?;
                    let claimed = checksums.get(version.checksum.as_bytes())?;
                    if claimed.as_deref() == Some(version.id.as_bytes()) {
                        checksums.remove(version.checksum.as_bytes())?;
                    }
                }
                documents.remove(document_id.as_bytes())?;
                Ok(document)
            })?;

        for version in &owned {
            if let Err(e) = self.blobs.delete(&self.bucket, &version.blob_key) {
                warn!(%document_id, key = %version.blob_key, error = %e, "orphaned blob left behind");
            }
        }
        info!(%document_id, versions = owned.len(), %actor, "document deleted");
        self.audit.record(AuditEvent::DocumentDeleted {
            document_id: document_id.to_string(),
            versions: owned.len(),
            actor: actor.to_string(),
        });
        notify(self.indexer.as_ref(), document_id, "document_deleted");
        Ok(removed)
    }

    fn read_verified(&self, version: &DocumentVersion) -> Result<Vec<u8>> {
        let bytes = self.blobs.get(&self.bucket, &version.blob_key)?;
        if checksum(&bytes) != version.checksum {
            warn!(version_id = %version.id, key = %version.blob_key, "checksum mismatch on read");
            return Err(BlobError::Corrupted {
                key: version.blob_key.clone(),
            }
            .into());
        }
        Ok(bytes)
    }

    // Writes the blob, then the metadata in one transaction. A failed
    // transaction removes the blob again.
    fn commit_version(&self, pending: PendingVersion<'_>) -> Result<DocumentVersion> {
        let document_id = pending.document_id;
        let version_id = new_id(VERSION_HRP)?;
        let blob_key = index_key(document_id, &version_id);
        let claims_checksum = pending.restored_from.is_none();

        self.blobs.put(&self.bucket, &blob_key, pending.content)?;

        let ledger = &self.ledger;
        let committed = (
            &ledger.documents,
            &ledger.versions,
            &ledger.checksums,
            &ledger.document_versions,
            &ledger.active_instances,
        )
            .transaction(|(documents, versions, checksums, document_versions, active)| {
                ensure_idle(active, document_id)?;
                let raw = documents
                    .get(document_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("document", document_id)))?;
                let mut document: Document = decode(&raw).map_err(abort)?;

                if let Some(previous_id) = &document.current_version_id {
                    if let Some(raw) = versions.get(previous_id.as_bytes())? {
                        let mut previous: DocumentVersion = decode(&raw).map_err(abort)?;
                        previous.is_current = false;
                        versions
                            .insert(previous_id.as_bytes(), encode(&previous).map_err(abort)?)?;
                    }
                }

                let number =
                    VersionNumber::following(document.head_version.as_ref(), pending.version_type)
                        .map_err(|e| abort(e.into()))?;
                let version = DocumentVersion {
                    id: version_id.clone(),
                    document_id: document_id.to_string(),
                    version_number: number,
                    version_type: pending.version_type,
                    checksum: pending.checksum.clone(),
                    size: pending.content.len() as u64,
                    blob_key: blob_key.clone(),
                    change_reason: pending.change_reason.clone(),
                    is_current: true,
                    created_by: pending.created_by.to_string(),
                    created_at: TimeStamp::new(),
                    restored_from: pending.restored_from.clone(),
                    file_name: pending.file.file_name.clone(),
                    content_type: pending.file.content_type.clone(),
                };
                versions.insert(version.id.as_bytes(), encode(&version).map_err(abort)?)?;
                document_versions.insert(blob_key.as_bytes(), Vec::<u8>::new())?;
                if claims_checksum {
                    checksums.insert(version.checksum.as_bytes(), version.id.as_bytes())?;
                }

                document.current_version_id = Some(version.id.clone());
                document.head_version = Some(number);
                document.touch();
                documents.insert(document_id.as_bytes(), encode(&document).map_err(abort)?)?;
                Ok(version)
            });

        committed.map_err(|e| {
            if let Err(cleanup) = self.blobs.delete(&self.bucket, &blob_key) {
                warn!(%document_id, key = %blob_key, error = %cleanup, "orphaned blob left behind");
            }
            DocumentError::from(e)
        })
    }

    fn release(&self, checksum: &str) {
        let released = self.ledger.checksums.compare_and_swap(
            checksum.as_bytes(),
            Some(RESERVED),
            None::<&[u8]>,
        );
        if let Err(e) = released {
            warn!(%checksum, error = %e, "checksum reservation not released");
        }
    }
}
