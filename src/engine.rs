//! Service layer API for approval workflow operations
use crate::approval::{ApprovalInstance, ApprovalStatus, Decision, HistoryAction, StepView};
use crate::audit::{AuditEvent, AuditSink};
use crate::directory::{Directory, Principal};
use crate::document::{Document, DocumentStatus};
use crate::error::{DocumentError, Result};
use crate::indexer::{SearchIndexer, notify};
use crate::permission::{Action, PermissionEvaluator};
use crate::store::{Ledger, abort, decode, encode, ensure_idle, index_key};
use crate::utils::{INSTANCE_HRP, new_id};
use crate::workflow::{WorkflowCatalog, WorkflowDefinition};
use sled::Transactional;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ApprovalEngine {
    ledger: Ledger,
    catalog: WorkflowCatalog,
    evaluator: Arc<PermissionEvaluator>,
    directory: Arc<dyn Directory>,
    audit: Arc<dyn AuditSink>,
    indexer: Arc<dyn SearchIndexer>,
}

// What a decision does to the instance, worked out before the write.
enum Outcome {
    Advance { step: String, approver: String },
    Finish(ApprovalStatus),
}

fn denied(principal: &str, action: Action, resource: &str) -> DocumentError {
    DocumentError::PermissionDenied {
        principal: principal.to_string(),
        action: action.to_string(),
        resource: resource.to_string(),
    }
}

fn terminal(instance: &ApprovalInstance) -> DocumentError {
    DocumentError::InvalidTransition(format!(
        "instance {} is already {}",
        instance.id,
        instance.status.as_str()
    ))
}

fn stale(kind: &'static str, id: &str) -> DocumentError {
    DocumentError::ConcurrentModification {
        kind,
        id: id.to_string(),
    }
}

impl ApprovalEngine {
    pub fn new(
        ledger: Ledger,
        catalog: WorkflowCatalog,
        evaluator: Arc<PermissionEvaluator>,
        directory: Arc<dyn Directory>,
        audit: Arc<dyn AuditSink>,
        indexer: Arc<dyn SearchIndexer>,
    ) -> Self {
        Self {
            ledger,
            catalog,
            evaluator,
            directory,
            audit,
            indexer,
        }
    }

    /// Open a review of `document_id` under `workflow_code`.
    pub fn start(
        &self,
        document_id: &str,
        workflow_code: &str,
        initiator: &str,
    ) -> Result<ApprovalInstance> {
        let definition = self.catalog.get(workflow_code)?;
        let first = definition.first_step().ok_or_else(|| {
            DocumentError::Config(format!("workflow {workflow_code} declares no steps"))
        })?;
        let snapshot = self.ledger.document(document_id)?;
        let approver = first.resolve_approver(&snapshot, initiator, self.directory.as_ref())?;
        let instance_id = new_id(INSTANCE_HRP)?;

        let ledger = &self.ledger;
        let instance = (
            &ledger.documents,
            &ledger.instances,
            &ledger.active_instances,
            &ledger.document_instances,
        )
            .transaction(|(documents, instances, active, by_document)| {
                ensure_idle(active, document_id)?;
                let raw = documents
                    .get(document_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("document", document_id)))?;
                let mut document: Document = decode(&raw).map_err(abort)?;
                if document.version != snapshot.version {
                    return Err(abort(stale("document", document_id)));
                }
                if document.status == DocumentStatus::Archived {
                    return Err(abort(DocumentError::InvalidTransition(format!(
                        "document {document_id} is archived"
                    ))));
                }

                let mut instance = ApprovalInstance::new(
                    instance_id.clone(),
                    document_id.to_string(),
                    workflow_code.to_string(),
                    initiator.to_string(),
                );
                instance.assign(&first.name, approver.clone());
                instance.record(
                    initiator,
                    HistoryAction::Submitted {
                        version_id: document.current_version_id.clone(),
                    },
                    None,
                );

                instances.insert(instance.id.as_bytes(), encode(&instance).map_err(abort)?)?;
                active.insert(document_id.as_bytes(), instance.id.as_bytes())?;
                by_document.insert(
                    index_key(document_id, &instance.id).as_bytes(),
                    Vec::<u8>::new(),
                )?;

                document.status = DocumentStatus::InReview;
                document.touch();
                documents.insert(document_id.as_bytes(), encode(&document).map_err(abort)?)?;
                Ok(instance)
            })?;

        info!(
            %document_id,
            instance_id = %instance.id,
            workflow = %workflow_code,
            step = %first.name,
            %approver,
            "review started"
        );
        self.audit.record(AuditEvent::ReviewStarted {
            document_id: document_id.to_string(),
            instance_id: instance.id.clone(),
            actor: initiator.to_string(),
        });
        self.audit.record(AuditEvent::StatusChanged {
            document_id: document_id.to_string(),
            from: snapshot.status,
            to: DocumentStatus::InReview,
            actor: initiator.to_string(),
        });
        Ok(instance)
    }

    /// Apply `decision` to the current step on behalf of `acting`.
    pub fn execute_step(
        &self,
        instance_id: &str,
        acting: &Principal,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<ApprovalInstance> {
        let snapshot = self.ledger.instance(instance_id)?;
        if !snapshot.is_active() {
            return Err(terminal(&snapshot));
        }
        let document = self.ledger.document(&snapshot.document_id)?;
        if !self.evaluator.authorize(acting, &document, Action::Approve) {
            return Err(denied(&acting.id, Action::Approve, &document.id));
        }
        if snapshot.current_approver.as_deref() != Some(acting.id.as_str()) {
            return Err(DocumentError::NotCurrentApprover {
                instance_id: instance_id.to_string(),
                actual: acting.id.clone(),
            });
        }
        let step = snapshot
            .current_step
            .clone()
            .ok_or_else(|| DocumentError::InvalidTransition(format!("{instance_id} has no step")))?;

        let outcome = match decision {
            Decision::Reject => Outcome::Finish(ApprovalStatus::Rejected),
            Decision::Approve => {
                let definition = self.catalog.get(&snapshot.workflow_code)?;
                match definition.next_step(&step)? {
                    Some(next) => Outcome::Advance {
                        step: next.name.clone(),
                        // resolved now, against the document as it stands
                        approver: next.resolve_approver(
                            &document,
                            &snapshot.initiator,
                            self.directory.as_ref(),
                        )?,
                    },
                    None => Outcome::Finish(ApprovalStatus::Approved),
                }
            }
        };
        let action = match decision {
            Decision::Approve => HistoryAction::Approved,
            Decision::Reject => HistoryAction::Rejected,
        };
        let comment = comment.map(str::to_string);
        let document_id = snapshot.document_id.as_str();

        let ledger = &self.ledger;
        let updated = (&ledger.documents, &ledger.instances, &ledger.active_instances)
            .transaction(|(documents, instances, active)| {
                let raw = instances
                    .get(instance_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("approval instance", instance_id)))?;
                let mut instance: ApprovalInstance = decode(&raw).map_err(abort)?;
                if !instance.is_active() {
                    return Err(abort(terminal(&instance)));
                }
                if instance.current_approver.as_deref() != Some(acting.id.as_str())
                    || instance.current_step.as_deref() != Some(step.as_str())
                {
                    return Err(abort(DocumentError::NotCurrentApprover {
                        instance_id: instance_id.to_string(),
                        actual: acting.id.clone(),
                    }));
                }
                if instance.revision != snapshot.revision {
                    return Err(abort(stale("approval instance", instance_id)));
                }
                let raw = documents
                    .get(document_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("document", document_id)))?;
                let mut current: Document = decode(&raw).map_err(abort)?;
                if current.version != document.version {
                    return Err(abort(stale("document", document_id)));
                }

                instance.record(&acting.id, action.clone(), comment.clone());
                match &outcome {
                    Outcome::Advance { step, approver } => instance.assign(step, approver.clone()),
                    Outcome::Finish(status) => {
                        if *status == ApprovalStatus::Approved {
                            instance.approved_version_id = current.current_version_id.clone();
                        }
                        instance.finish(*status);
                        active.remove(document_id.as_bytes())?;
                        if let Some(next) = status.document_status() {
                            current.status = next;
                        }
                        current.touch();
                        documents
                            .insert(document_id.as_bytes(), encode(&current).map_err(abort)?)?;
                    }
                }
                instance.bump();
                instances.insert(instance_id.as_bytes(), encode(&instance).map_err(abort)?)?;
                Ok(instance)
            })?;

        let entry_hash = match updated.history.last() {
            Some(entry) => entry.build()?.0,
            None => String::new(),
        };
        info!(
            %instance_id,
            %document_id,
            %step,
            approver = %acting.id,
            approved = decision == Decision::Approve,
            status = updated.status.as_str(),
            "step decided"
        );
        self.audit.record(AuditEvent::StepDecided {
            instance_id: instance_id.to_string(),
            step,
            actor: acting.id.clone(),
            approved: decision == Decision::Approve,
            entry_hash,
        });
        if let Outcome::Finish(status) = outcome {
            self.finalized(&updated, document.status, status, &acting.id);
        }
        Ok(updated)
    }

    /// Cancel a review. Only the initiator may do this.
    pub fn withdraw(
        &self,
        instance_id: &str,
        requester: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalInstance> {
        let snapshot = self.ledger.instance(instance_id)?;
        if snapshot.initiator != requester {
            return Err(DocumentError::PermissionDenied {
                principal: requester.to_string(),
                action: "WITHDRAW".to_string(),
                resource: instance_id.to_string(),
            });
        }
        if !snapshot.is_active() {
            return Err(terminal(&snapshot));
        }
        let document_id = snapshot.document_id.as_str();
        let reason = reason.map(str::to_string);

        let ledger = &self.ledger;
        let (updated, previous) = (&ledger.documents, &ledger.instances, &ledger.active_instances)
            .transaction(|(documents, instances, active)| {
                let raw = instances
                    .get(instance_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("approval instance", instance_id)))?;
                let mut instance: ApprovalInstance = decode(&raw).map_err(abort)?;
                if !instance.is_active() {
                    return Err(abort(terminal(&instance)));
                }
                if instance.revision != snapshot.revision {
                    return Err(abort(stale("approval instance", instance_id)));
                }

                instance.record(requester, HistoryAction::Withdrawn, reason.clone());
                instance.finish(ApprovalStatus::Withdrawn);
                instance.bump();
                instances.insert(instance_id.as_bytes(), encode(&instance).map_err(abort)?)?;
                active.remove(document_id.as_bytes())?;

                let raw = documents
                    .get(document_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("document", document_id)))?;
                let mut document: Document = decode(&raw).map_err(abort)?;
                let previous = document.status;
                document.status = DocumentStatus::Withdrawn;
                document.touch();
                documents.insert(document_id.as_bytes(), encode(&document).map_err(abort)?)?;
                Ok((instance, previous))
            })?;

        info!(%instance_id, %document_id, %requester, "review withdrawn");
        self.audit.record(AuditEvent::Withdrawn {
            instance_id: instance_id.to_string(),
            actor: requester.to_string(),
        });
        self.finalized(&updated, previous, ApprovalStatus::Withdrawn, requester);
        Ok(updated)
    }

    /// Hand the current step to another approver without advancing it.
    pub fn transfer(
        &self,
        instance_id: &str,
        from: &str,
        to: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalInstance> {
        let snapshot = self.ledger.instance(instance_id)?;
        if !snapshot.is_active() {
            return Err(terminal(&snapshot));
        }
        if snapshot.current_approver.as_deref() != Some(from) {
            return Err(DocumentError::NotCurrentApprover {
                instance_id: instance_id.to_string(),
                actual: from.to_string(),
            });
        }
        let document = self.ledger.document(&snapshot.document_id)?;
        let target = Principal::from_directory(to, self.directory.as_ref());
        if !self.evaluator.authorize(&target, &document, Action::Approve) {
            return Err(denied(to, Action::Approve, &document.id));
        }
        let reason = reason.map(str::to_string);

        let updated = self.ledger.instances.transaction(|instances| {
            let raw = instances
                .get(instance_id.as_bytes())?
                .ok_or_else(|| abort(DocumentError::not_found("approval instance", instance_id)))?;
            let mut instance: ApprovalInstance = decode(&raw).map_err(abort)?;
            if !instance.is_active() {
                return Err(abort(terminal(&instance)));
            }
            if instance.current_approver.as_deref() != Some(from) {
                return Err(abort(DocumentError::NotCurrentApprover {
                    instance_id: instance_id.to_string(),
                    actual: from.to_string(),
                }));
            }
            if instance.revision != snapshot.revision {
                return Err(abort(stale("approval instance", instance_id)));
            }

            instance.record(
                from,
                HistoryAction::Transferred { to: to.to_string() },
                reason.clone(),
            );
            instance.current_approver = Some(to.to_string());
            instance.bump();
            instances.insert(instance_id.as_bytes(), encode(&instance).map_err(abort)?)?;
            Ok(instance)
        })?;

        info!(%instance_id, %from, %to, "step transferred");
        self.audit.record(AuditEvent::Transferred {
            instance_id: instance_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(updated)
    }

    /// Nudge the current approver. Changes nothing.
    pub fn urge(&self, instance_id: &str, requester: &str) -> Result<StepView> {
        let instance = self.ledger.instance(instance_id)?;
        if instance.initiator != requester {
            return Err(DocumentError::PermissionDenied {
                principal: requester.to_string(),
                action: "URGE".to_string(),
                resource: instance_id.to_string(),
            });
        }
        let view = instance.step_view().ok_or_else(|| terminal(&instance))?;

        info!(%instance_id, approver = %view.approver, %requester, "approver urged");
        self.audit.record(AuditEvent::Urged {
            instance_id: instance_id.to_string(),
            approver: view.approver.clone(),
            actor: requester.to_string(),
        });
        Ok(view)
    }

    /// Administrative status change outside any workflow.
    pub fn override_status(
        &self,
        admin: &Principal,
        document_id: &str,
        expected_version: u64,
        status: DocumentStatus,
    ) -> Result<Document> {
        if !self.evaluator.is_admin(admin) {
            return Err(DocumentError::PermissionDenied {
                principal: admin.id.clone(),
                action: "OVERRIDE_STATUS".to_string(),
                resource: document_id.to_string(),
            });
        }
        if status.is_workflow_owned() {
            return Err(DocumentError::InvalidTransition(format!(
                "{status} can only be reached through a review"
            )));
        }

        let ledger = &self.ledger;
        let (document, previous) = (&ledger.documents, &ledger.active_instances)
            .transaction(|(documents, active)| {
                ensure_idle(active, document_id)?;
                let raw = documents
                    .get(document_id.as_bytes())?
                    .ok_or_else(|| abort(DocumentError::not_found("document", document_id)))?;
                let mut document: Document = decode(&raw).map_err(abort)?;
                if document.version != expected_version {
                    return Err(abort(stale("document", document_id)));
                }
                let previous = document.status;
                document.status = status;
                document.touch();
                documents.insert(document_id.as_bytes(), encode(&document).map_err(abort)?)?;
                Ok((document, previous))
            })?;

        warn!(%document_id, admin = %admin.id, from = %previous, to = %status, "status overridden");
        self.audit.record(AuditEvent::StatusChanged {
            document_id: document_id.to_string(),
            from: previous,
            to: status,
            actor: admin.id.clone(),
        });
        notify(self.indexer.as_ref(), document_id, "status_overridden");
        Ok(document)
    }

    /// Workflows a review can be started under, ordered by code.
    pub fn workflows(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.catalog.definitions()
    }

    pub fn instance(&self, instance_id: &str) -> Result<ApprovalInstance> {
        self.ledger.instance(instance_id)
    }

    pub fn active_instance(&self, document_id: &str) -> Result<Option<ApprovalInstance>> {
        match self.ledger.active_instance_id(document_id)? {
            Some(id) => self.ledger.instance(&id).map(Some),
            None => Ok(None),
        }
    }

    pub fn current_step(&self, instance_id: &str) -> Result<Option<StepView>> {
        Ok(self.ledger.instance(instance_id)?.step_view())
    }

    /// Steps waiting on `approver_id`, oldest first.
    pub fn pending_tasks(&self, approver_id: &str) -> Result<Vec<StepView>> {
        let mut tasks: Vec<StepView> = self
            .ledger
            .active_instances
            .iter()
            .values()
            .map(|id| {
                let id = id?;
                let id = std::str::from_utf8(&id).map_err(|e| DocumentError::Codec(e.to_string()))?;
                self.ledger.instance(id)
            })
            .filter_map(|instance| match instance {
                Ok(instance) => instance
                    .step_view()
                    .filter(|view| view.approver == approver_id)
                    .map(Ok),
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<_>>()?;
        tasks.sort_by(|a, b| a.since.cmp(&b.since));
        Ok(tasks)
    }

    /// Every review the document has been through, newest first.
    pub fn document_history(&self, document_id: &str) -> Result<Vec<ApprovalInstance>> {
        self.ledger.document(document_id)?;
        let mut instances = self.ledger.instances_of(document_id)?;
        instances.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(instances)
    }

    fn finalized(
        &self,
        instance: &ApprovalInstance,
        from: DocumentStatus,
        status: ApprovalStatus,
        actor: &str,
    ) {
        let Some(to) = status.document_status() else {
            return;
        };
        debug!(
            instance_id = %instance.id,
            document_id = %instance.document_id,
            approved_version = ?instance.approved_version_id,
            "review finalized"
        );
        self.audit.record(AuditEvent::StatusChanged {
            document_id: instance.document_id.clone(),
            from,
            to,
            actor: actor.to_string(),
        });
        notify(self.indexer.as_ref(), &instance.document_id, "review_finalized");
    }
}
