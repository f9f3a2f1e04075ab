//! Workflow definitions and approver resolution
use crate::directory::Directory;
use crate::document::Document;
use crate::error::{DocumentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a step's approver is found. Resolved when the step becomes current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRule {
    Principal(String),
    /// First member holding the role, in directory order, who is neither
    /// the document's author nor the review's initiator
    Role(String),
    AuthorManager,
    InitiatorManager,
    /// Head of the document's owning department
    DepartmentHead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    #[serde(default)]
    pub approver: Option<ApproverRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    definitions: BTreeMap<String, WorkflowDefinition>,
}

// steps that declare no rule go to the initiator's manager
static FALLBACK: ApproverRule = ApproverRule::InitiatorManager;

impl ApproverRule {
    pub fn resolve(
        &self,
        document: &Document,
        initiator: &str,
        directory: &dyn Directory,
    ) -> Option<String> {
        match self {
            ApproverRule::Principal(id) => Some(id.clone()),
            ApproverRule::Role(role) => directory
                .members_with_role(role)
                .into_iter()
                .find(|member| member != initiator && *member != document.author),
            ApproverRule::AuthorManager => directory.manager_of(&document.author),
            ApproverRule::InitiatorManager => directory.manager_of(initiator),
            ApproverRule::DepartmentHead => document
                .owner_department
                .as_deref()
                .and_then(|dept| directory.department_head(dept)),
        }
    }
}

impl WorkflowStep {
    pub fn rule(&self) -> &ApproverRule {
        self.approver.as_ref().unwrap_or(&FALLBACK)
    }

    /// Resolve against the document as it is now.
    pub fn resolve_approver(
        &self,
        document: &Document,
        initiator: &str,
        directory: &dyn Directory,
    ) -> Result<String> {
        self.rule()
            .resolve(document, initiator, directory)
            .ok_or_else(|| DocumentError::ApproverUnresolved {
                step: self.name.clone(),
            })
    }
}

impl WorkflowDefinition {
    pub fn first_step(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }

    /// The step after `current`, or `None` when `current` is the last one.
    pub fn next_step(&self, current: &str) -> Result<Option<&WorkflowStep>> {
        let position = self
            .steps
            .iter()
            .position(|s| s.name == current)
            .ok_or_else(|| {
                DocumentError::InvalidTransition(format!(
                    "step {current} is not part of workflow {}",
                    self.code
                ))
            })?;
        Ok(self.steps.get(position + 1))
    }

    fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(DocumentError::Config("workflow with empty code".into()));
        }
        if self.steps.is_empty() {
            return Err(DocumentError::Config(format!(
                "workflow {} declares no steps",
                self.code
            )));
        }
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(DocumentError::Config(format!(
                    "workflow {} repeats step {}",
                    self.code, step.name
                )));
            }
        }
        Ok(())
    }
}

impl WorkflowCatalog {
    pub fn new(definitions: impl IntoIterator<Item = WorkflowDefinition>) -> Result<Self> {
        let mut catalog = BTreeMap::new();
        for definition in definitions {
            definition.validate()?;
            let code = definition.code.clone();
            if catalog.insert(code.clone(), definition).is_some() {
                return Err(DocumentError::Config(format!(
                    "workflow code {code} defined twice"
                )));
            }
        }
        Ok(Self {
            definitions: catalog,
        })
    }

    pub fn get(&self, code: &str) -> Result<&WorkflowDefinition> {
        self.definitions
            .get(code)
            .ok_or_else(|| DocumentError::not_found("workflow", code))
    }

    /// Every definition, ordered by code.
    pub fn definitions(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.definitions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::document::NewDocument;

    fn review() -> WorkflowDefinition {
        WorkflowDefinition {
            code: "DOC_REVIEW".into(),
            name: String::new(),
            steps: vec![
                WorkflowStep {
                    name: "MANAGER_REVIEW".into(),
                    approver: Some(ApproverRule::AuthorManager),
                },
                WorkflowStep {
                    name: "QA_APPROVAL".into(),
                    approver: Some(ApproverRule::Role("QA".into())),
                },
            ],
        }
    }

    #[test]
    fn walks_steps_in_order() {
        let def = review();
        assert_eq!(def.first_step().unwrap().name, "MANAGER_REVIEW");
        assert_eq!(
            def.next_step("MANAGER_REVIEW").unwrap().unwrap().name,
            "QA_APPROVAL"
        );
        assert!(def.next_step("QA_APPROVAL").unwrap().is_none());
    }

    #[test]
    fn unknown_step_is_invalid_transition() {
        assert!(matches!(
            review().next_step("NOPE"),
            Err(DocumentError::InvalidTransition(_))
        ));
    }

    #[test]
    fn catalog_rejects_duplicates_and_empty() {
        assert!(WorkflowCatalog::new([review(), review()]).is_err());

        let empty = WorkflowDefinition {
            code: "EMPTY".into(),
            name: String::new(),
            steps: vec![],
        };
        assert!(WorkflowCatalog::new([empty]).is_err());

        let catalog = WorkflowCatalog::new([review()]).unwrap();
        assert!(catalog.get("DOC_REVIEW").is_ok());
        assert_eq!(catalog.definitions().count(), 1);
        assert!(matches!(
            catalog.get("MISSING"),
            Err(DocumentError::NotFound { .. })
        ));
    }

    #[test]
    fn rules_resolve_against_directory() {
        let dir = StaticDirectory::new()
            .with_person("alice", &["editor"], Some("PRODUCTION"), Some("bob"))
            .with_person("ivan", &[], None, Some("ian"))
            .with_person("quinn", &["QA"], Some("QUALITY"), None)
            .with_department_head("PRODUCTION", "hank");
        let doc = Document::draft(
            "doc_x".into(),
            "alice".into(),
            NewDocument {
                owner_department: Some("PRODUCTION".into()),
                ..NewDocument::default()
            },
        );

        let resolve = |rule: ApproverRule| rule.resolve(&doc, "ivan", &dir);
        assert_eq!(resolve(ApproverRule::AuthorManager).as_deref(), Some("bob"));
        assert_eq!(resolve(ApproverRule::InitiatorManager).as_deref(), Some("ian"));
        assert_eq!(resolve(ApproverRule::DepartmentHead).as_deref(), Some("hank"));
        assert_eq!(resolve(ApproverRule::Role("QA".into())).as_deref(), Some("quinn"));
        assert_eq!(resolve(ApproverRule::Role("CEO".into())), None);

        let bare = WorkflowStep {
            name: "SIGNOFF".into(),
            approver: None,
        };
        assert_eq!(bare.resolve_approver(&doc, "ivan", &dir).unwrap(), "ian");
    }

    #[test]
    fn role_rule_never_picks_author_or_initiator() {
        let dir = StaticDirectory::new()
            .with_person("amy", &["QA"], Some("QUALITY"), None)
            .with_person("ben", &["QA"], Some("QUALITY"), None)
            .with_person("cat", &["QA"], Some("QUALITY"), None);
        let doc = Document::draft("doc_y".into(), "amy".into(), NewDocument::default());
        let qa = ApproverRule::Role("QA".into());

        assert_eq!(qa.resolve(&doc, "ben", &dir).as_deref(), Some("cat"));
        assert_eq!(qa.resolve(&doc, "dan", &dir).as_deref(), Some("ben"));

        let step = WorkflowStep {
            name: "QA_APPROVAL".into(),
            approver: Some(qa),
        };
        let solo = StaticDirectory::new().with_person("amy", &["QA"], None, None);
        assert!(matches!(
            step.resolve_approver(&doc, "amy", &solo),
            Err(DocumentError::ApproverUnresolved { .. })
        ));
    }
}
