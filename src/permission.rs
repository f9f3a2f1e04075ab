//! Attribute-based authorization over documents
//!
//! Evaluation runs in three stages: an admin override, an authorship override,
//! then a fixed chain of four policies. A policy either allows, vetoes or
//! abstains. A veto ends evaluation with a deny; otherwise the request is
//! allowed only if some policy allowed it.
use crate::config::PermissionConfig;
use crate::directory::Principal;
use crate::document::{ConfidentialityLevel, Document, DocumentStatus, TimeStamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    View,
    Edit,
    Delete,
    Approve,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Veto,
    Abstain,
}

// Constructed per request from the document snapshot, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy<'a> {
    Owner { author: &'a str },
    Department { department: Option<&'a str> },
    Confidentiality { level: ConfidentialityLevel },
    Status { status: DocumentStatus },
}

#[derive(Debug, Clone)]
pub struct PermissionEvaluator {
    admin_roles: BTreeSet<String>,
    role_grants: BTreeMap<String, BTreeSet<Action>>,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::View,
        Action::Edit,
        Action::Delete,
        Action::Approve,
        Action::Download,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "VIEW",
            Self::Edit => "EDIT",
            Self::Delete => "DELETE",
            Self::Approve => "APPROVE",
            Self::Download => "DOWNLOAD",
        }
    }

    fn is_read(&self) -> bool {
        matches!(self, Self::View | Self::Download)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'a> Policy<'a> {
    /// The chain in evaluation order.
    pub fn chain(document: &'a Document) -> [Policy<'a>; 4] {
        [
            Policy::Owner {
                author: &document.author,
            },
            Policy::Department {
                department: document.owner_department.as_deref(),
            },
            Policy::Confidentiality {
                level: document.confidentiality_level(),
            },
            Policy::Status {
                status: document.status,
            },
        ]
    }

    pub fn evaluate(
        &self,
        principal: &Principal,
        granted: &BTreeSet<Action>,
        action: Action,
    ) -> Verdict {
        match self {
            Policy::Owner { author } => {
                if principal.id == *author {
                    Verdict::Allow
                } else {
                    Verdict::Abstain
                }
            }
            Policy::Department { department } => {
                let same = matches!(
                    (department, principal.department.as_deref()),
                    (Some(owner), Some(member)) if *owner == member
                );
                // colleagues may always read, anything else needs a role grant
                if same && (action.is_read() || granted.contains(&action)) {
                    Verdict::Allow
                } else {
                    Verdict::Abstain
                }
            }
            Policy::Confidentiality { level } => match level {
                ConfidentialityLevel::Restricted => Verdict::Veto,
                ConfidentialityLevel::Internal
                    if principal.department.is_some() && granted.contains(&action) =>
                {
                    Verdict::Allow
                }
                ConfidentialityLevel::Public if granted.contains(&action) => Verdict::Allow,
                _ => Verdict::Abstain,
            },
            Policy::Status { status } => match (status, action) {
                (DocumentStatus::Withdrawn, Action::View) => Verdict::Abstain,
                (DocumentStatus::Withdrawn, _) => Verdict::Veto,
                (DocumentStatus::Archived, a) if !a.is_read() => Verdict::Veto,
                (s, Action::Approve) if *s != DocumentStatus::InReview => Verdict::Veto,
                _ => Verdict::Abstain,
            },
        }
    }
}

impl PermissionEvaluator {
    pub fn new(config: &PermissionConfig) -> Self {
        Self {
            admin_roles: config.admin_roles.iter().cloned().collect(),
            role_grants: config
                .role_grants
                .iter()
                .map(|(role, actions)| (role.clone(), actions.iter().copied().collect()))
                .collect(),
        }
    }

    pub fn is_admin(&self, principal: &Principal) -> bool {
        principal.roles.iter().any(|r| self.admin_roles.contains(r))
    }

    /// Union of the actions granted by every role the principal holds.
    pub fn granted_actions(&self, principal: &Principal) -> BTreeSet<Action> {
        principal
            .roles
            .iter()
            .filter_map(|role| self.role_grants.get(role))
            .flatten()
            .copied()
            .collect()
    }

    pub fn authorize(&self, principal: &Principal, document: &Document, action: Action) -> bool {
        if self.is_admin(principal) {
            return true;
        }
        if principal.id == document.author {
            return true;
        }

        let granted = self.granted_actions(principal);
        let mut allowed = false;
        for policy in Policy::chain(document) {
            match policy.evaluate(principal, &granted, action) {
                Verdict::Veto => return false,
                Verdict::Allow => allowed = true,
                Verdict::Abstain => {}
            }
        }
        allowed
    }

    /// Like [`authorize`](Self::authorize), but also denies outside the
    /// document's effective window. Admins are not exempt from the window.
    pub fn authorize_at(
        &self,
        principal: &Principal,
        document: &Document,
        action: Action,
        at: &TimeStamp,
    ) -> bool {
        document.is_effective_at(at) && self.authorize(principal, document, action)
    }

    pub fn expanded_permissions(
        &self,
        principal: &Principal,
        document: &Document,
    ) -> BTreeSet<Action> {
        Action::ALL
            .into_iter()
            .filter(|action| self.authorize(principal, document, *action))
            .collect()
    }

    pub fn accessible<'d>(
        &self,
        principal: &Principal,
        documents: impl IntoIterator<Item = &'d Document>,
        action: Action,
    ) -> Vec<&'d Document> {
        documents
            .into_iter()
            .filter(|doc| self.authorize(principal, doc, action))
            .collect()
    }
}
