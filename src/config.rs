//! Configuration for document-control

use crate::error::{DocumentError, Result};
use crate::permission::Action;
use crate::workflow::{ApproverRule, WorkflowDefinition, WorkflowStep};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub permissions: PermissionConfig,

    /// Workflow catalog, read-only at runtime
    #[serde(default = "default_workflows")]
    pub workflows: Vec<WorkflowDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// sled database directory
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Bucket holding version content
    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,

    /// Key mixed into presigned URL signatures
    #[serde(default)]
    pub presign_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Holding any of these roles bypasses the policy chain
    #[serde(default = "default_admin_roles")]
    pub admin_roles: Vec<String>,

    /// Actions each role may take when a policy lets role grants count
    #[serde(default = "default_role_grants")]
    pub role_grants: BTreeMap<String, Vec<Action>>,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("document-control.db")
}

fn default_bucket() -> String {
    "edms-documents".to_string()
}

fn default_presign_ttl() -> u64 {
    60
}

fn default_admin_roles() -> Vec<String> {
    ["ADMIN", "ROLE_SYSTEM_ADMIN", "ROLE_GMP_ADMIN"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_role_grants() -> BTreeMap<String, Vec<Action>> {
    use Action::*;
    BTreeMap::from([
        ("operator".to_string(), vec![View, Download]),
        ("editor".to_string(), vec![View, Edit, Download]),
        ("manager".to_string(), vec![View, Download, Approve]),
        ("QA".to_string(), vec![View, Download, Approve]),
    ])
}

fn default_workflows() -> Vec<WorkflowDefinition> {
    vec![WorkflowDefinition {
        code: "DOC_REVIEW".to_string(),
        name: "Document review".to_string(),
        steps: vec![
            WorkflowStep {
                name: "MANAGER_REVIEW".to_string(),
                approver: Some(ApproverRule::AuthorManager),
            },
            WorkflowStep {
                name: "QA_APPROVAL".to_string(),
                approver: Some(ApproverRule::Role("QA".to_string())),
            },
        ],
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            permissions: PermissionConfig::default(),
            workflows: default_workflows(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            bucket: default_bucket(),
            presign_ttl_secs: default_presign_ttl(),
            presign_secret: String::new(),
        }
    }
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            admin_roles: default_admin_roles(),
            role_grants: default_role_grants(),
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| DocumentError::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DocumentError::Config(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Default configuration rooted at a specific database directory.
    pub fn at_path<P: AsRef<Path>>(path: P) -> Self {
        let mut config = Self::default();
        config.storage.path = path.as_ref().to_path_buf();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config.storage.bucket, "edms-documents");
        assert_eq!(config.storage.presign_ttl_secs, 60);
        assert!(config.permissions.admin_roles.contains(&"ADMIN".to_string()));
        assert_eq!(config.workflows.len(), 1);
        assert_eq!(config.workflows[0].code, "DOC_REVIEW");
    }

    #[test]
    fn parses_workflows_and_grants() {
        let raw = r#"
            [storage]
            path = "/tmp/dc"
            bucket = "regulated"

            [permissions]
            admin_roles = ["root"]
            [permissions.role_grants]
            auditor = ["VIEW", "DOWNLOAD"]

            [[workflows]]
            code = "SOP_CHANGE"
            name = "SOP change control"

            [[workflows.steps]]
            name = "HEAD_SIGNOFF"
            approver = "department_head"

            [[workflows.steps]]
            name = "QA_RELEASE"
            approver = { role = "QA" }

            [[workflows.steps]]
            name = "FINAL"
        "#;
        let config = Config::from_toml_str(raw).unwrap();

        assert_eq!(config.storage.bucket, "regulated");
        assert_eq!(config.permissions.admin_roles, vec!["root".to_string()]);
        assert_eq!(
            config.permissions.role_grants["auditor"],
            vec![Action::View, Action::Download]
        );

        let steps = &config.workflows[0].steps;
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].approver, Some(ApproverRule::DepartmentHead));
        assert_eq!(steps[1].approver, Some(ApproverRule::Role("QA".into())));
        assert_eq!(steps[2].approver, None);
    }

    #[test]
    fn rejects_unknown_action() {
        let raw = r#"
            [permissions.role_grants]
            auditor = ["FLY"]
        "#;
        assert!(matches!(
            Config::from_toml_str(raw),
            Err(DocumentError::Config(_))
        ));
    }
}
