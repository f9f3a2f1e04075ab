//! Permission-checked entry points over the version store and approval engine
use crate::approval::{ApprovalInstance, Decision, StepView};
use crate::audit::{AuditSink, TracingAuditSink};
use crate::blob::{BlobStore, SledBlobStore};
use crate::config::Config;
use crate::directory::{Directory, Principal};
use crate::document::{Document, NewDocument, TimeStamp};
use crate::engine::ApprovalEngine;
use crate::error::{DocumentError, Result};
use crate::indexer::{NoopIndexer, SearchIndexer};
use crate::permission::{Action, PermissionEvaluator};
use crate::store::Ledger;
use crate::version::{DocumentVersion, FileInfo, VersionType};
use crate::versioning::VersionStore;
use crate::workflow::WorkflowCatalog;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct DocumentControl {
    ledger: Ledger,
    evaluator: Arc<PermissionEvaluator>,
    directory: Arc<dyn Directory>,
    versions: VersionStore,
    engine: ApprovalEngine,
}

impl DocumentControl {
    /// Open the database named in `config` with sled-backed blobs, tracing
    /// audit output and no search index.
    pub fn open(config: &Config, directory: Arc<dyn Directory>) -> Result<Self> {
        let ledger = Ledger::open(&config.storage.path)?;
        let blobs = Arc::new(SledBlobStore::new(
            ledger.db().clone(),
            config.storage.presign_secret.clone(),
        ));
        info!(path = %config.storage.path.display(), bucket = %config.storage.bucket, "document control opened");
        Self::with_collaborators(
            config,
            ledger,
            directory,
            blobs,
            Arc::new(TracingAuditSink),
            Arc::new(NoopIndexer),
        )
    }

    pub fn with_collaborators(
        config: &Config,
        ledger: Ledger,
        directory: Arc<dyn Directory>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        indexer: Arc<dyn SearchIndexer>,
    ) -> Result<Self> {
        let catalog = WorkflowCatalog::new(config.workflows.clone())?;
        let evaluator = Arc::new(PermissionEvaluator::new(&config.permissions));
        let versions = VersionStore::new(
            ledger.clone(),
            blobs,
            &config.storage,
            audit.clone(),
            indexer.clone(),
        );
        let engine = ApprovalEngine::new(
            ledger.clone(),
            catalog,
            evaluator.clone(),
            directory.clone(),
            audit,
            indexer,
        );
        Ok(Self {
            ledger,
            evaluator,
            directory,
            versions,
            engine,
        })
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn engine(&self) -> &ApprovalEngine {
        &self.engine
    }

    pub fn evaluator(&self) -> &PermissionEvaluator {
        &self.evaluator
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Principal context for `id` as the directory sees it right now.
    pub fn principal(&self, id: &str) -> Principal {
        Principal::from_directory(id, self.directory.as_ref())
    }

    pub fn create_document(&self, author: &Principal, new: NewDocument) -> Result<Document> {
        self.ledger.create_document(&author.id, new)
    }

    fn guard(&self, principal: &Principal, document_id: &str, action: Action) -> Result<Document> {
        let document = self.ledger.document(document_id)?;
        if !self.evaluator.authorize(principal, &document, action) {
            debug!(principal = %principal.id, %document_id, %action, "denied");
            return Err(DocumentError::PermissionDenied {
                principal: principal.id.clone(),
                action: action.to_string(),
                resource: document_id.to_string(),
            });
        }
        Ok(document)
    }

    pub fn view_document(&self, principal: &Principal, document_id: &str) -> Result<Document> {
        self.guard(principal, document_id, Action::View)
    }

    pub fn permissions(&self, principal: &Principal, document_id: &str) -> Result<BTreeSet<Action>> {
        let document = self.ledger.document(document_id)?;
        Ok(self.evaluator.expanded_permissions(principal, &document))
    }

    pub fn accessible_documents(&self, principal: &Principal, action: Action) -> Result<Vec<Document>> {
        let documents = self.ledger.documents()?;
        Ok(self
            .evaluator
            .accessible(principal, &documents, action)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn upload_version(
        &self,
        principal: &Principal,
        document_id: &str,
        content: &[u8],
        version_type: VersionType,
        change_reason: &str,
    ) -> Result<DocumentVersion> {
        self.guard(principal, document_id, Action::Edit)?;
        self.versions
            .upload(document_id, content, version_type, change_reason, &principal.id)
    }

    pub fn upload_file(
        &self,
        principal: &Principal,
        document_id: &str,
        content: &[u8],
        file: FileInfo,
        version_type: VersionType,
        change_reason: &str,
    ) -> Result<DocumentVersion> {
        self.guard(principal, document_id, Action::Edit)?;
        self.versions.upload_file(
            document_id,
            content,
            file,
            version_type,
            change_reason,
            &principal.id,
        )
    }

    pub fn set_current_version(
        &self,
        principal: &Principal,
        document_id: &str,
        version_id: &str,
    ) -> Result<DocumentVersion> {
        self.guard(principal, document_id, Action::Edit)?;
        self.versions.set_current(document_id, version_id, &principal.id)
    }

    pub fn rollback(&self, principal: &Principal, version_id: &str) -> Result<DocumentVersion> {
        let source = self.versions.get_version(version_id)?;
        self.guard(principal, &source.document_id, Action::Edit)?;
        self.versions.rollback(version_id, &principal.id)
    }

    pub fn delete_document(&self, principal: &Principal, document_id: &str) -> Result<Document> {
        self.guard(principal, document_id, Action::Delete)?;
        self.versions.delete_document(document_id, &principal.id)
    }

    /// Current content of a document. Released content is only handed out
    /// inside its effective window.
    pub fn download_current(
        &self,
        principal: &Principal,
        document_id: &str,
    ) -> Result<(DocumentVersion, Vec<u8>)> {
        let document = self.ledger.document(document_id)?;
        if !self
            .evaluator
            .authorize_at(principal, &document, Action::Download, &TimeStamp::new())
        {
            return Err(DocumentError::PermissionDenied {
                principal: principal.id.clone(),
                action: Action::Download.to_string(),
                resource: document_id.to_string(),
            });
        }
        let version = self.versions.get_current(document_id)?;
        let bytes = self.versions.download(&version.id)?;
        Ok((version, bytes))
    }

    pub fn start_review(
        &self,
        principal: &Principal,
        document_id: &str,
        workflow_code: &str,
    ) -> Result<ApprovalInstance> {
        self.guard(principal, document_id, Action::Edit)?;
        self.engine.start(document_id, workflow_code, &principal.id)
    }

    pub fn decide(
        &self,
        principal: &Principal,
        instance_id: &str,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<ApprovalInstance> {
        self.engine
            .execute_step(instance_id, principal, decision, comment)
    }

    pub fn withdraw(
        &self,
        principal: &Principal,
        instance_id: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalInstance> {
        self.engine.withdraw(instance_id, &principal.id, reason)
    }

    pub fn transfer(
        &self,
        principal: &Principal,
        instance_id: &str,
        to: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalInstance> {
        self.engine.transfer(instance_id, &principal.id, to, reason)
    }

    pub fn urge(&self, principal: &Principal, instance_id: &str) -> Result<StepView> {
        self.engine.urge(instance_id, &principal.id)
    }
}
