//! Property-based tests for the permission evaluator
//!
//! Documents and principals are generated across every status, confidentiality
//! level and role mix so the override rules and hard vetoes are checked against
//! combinations nobody would write out by hand.

use document_control::config::PermissionConfig;
use document_control::document::TimeStamp;
use document_control::{
    Action, ConfidentialityLevel, Document, DocumentStatus, PermissionEvaluator, Principal,
};
use proptest::prelude::*;

const ROLES: [&str; 5] = ["operator", "editor", "manager", "QA", "auditor"];
const DEPARTMENTS: [&str; 3] = ["PRODUCTION", "QUALITY", "WAREHOUSE"];
const PEOPLE: [&str; 4] = ["alice", "bob", "oscar", "quinn"];

fn status_strategy() -> impl Strategy<Value = DocumentStatus> {
    prop_oneof![
        Just(DocumentStatus::Draft),
        Just(DocumentStatus::InReview),
        Just(DocumentStatus::Approved),
        Just(DocumentStatus::Rejected),
        Just(DocumentStatus::Withdrawn),
        Just(DocumentStatus::Archived),
    ]
}

fn level_strategy() -> impl Strategy<Value = Option<ConfidentialityLevel>> {
    prop_oneof![
        Just(None),
        Just(Some(ConfidentialityLevel::Public)),
        Just(Some(ConfidentialityLevel::Internal)),
        Just(Some(ConfidentialityLevel::Restricted)),
    ]
}

fn department_strategy() -> impl Strategy<Value = Option<String>> {
    proptest::option::of(proptest::sample::select(DEPARTMENTS.to_vec()).prop_map(String::from))
}

fn action_strategy() -> impl Strategy<Value = Action> {
    proptest::sample::select(Action::ALL.to_vec())
}

fn document_strategy() -> impl Strategy<Value = Document> {
    (
        proptest::sample::select(PEOPLE.to_vec()),
        status_strategy(),
        level_strategy(),
        department_strategy(),
    )
        .prop_map(|(author, status, confidentiality, owner_department)| {
            let now = TimeStamp::new();
            Document {
                id: "doc_prop".into(),
                title: "generated".into(),
                status,
                confidentiality,
                author: author.to_string(),
                owner_department,
                current_version_id: None,
                head_version: None,
                version: 0,
                effective_date: None,
                expiry_date: None,
                created_at: now,
                updated_at: now,
            }
        })
}

fn principal_strategy() -> impl Strategy<Value = Principal> {
    (
        proptest::sample::select(PEOPLE.to_vec()),
        proptest::sample::subsequence(ROLES.to_vec(), 0..=ROLES.len()),
        department_strategy(),
    )
        .prop_map(|(id, roles, department)| {
            let mut principal = Principal::new(id);
            for role in roles {
                principal = principal.with_role(role);
            }
            principal.department = department;
            principal
        })
}

fn evaluator() -> PermissionEvaluator {
    PermissionEvaluator::new(&PermissionConfig::default())
}

proptest! {
    #[test]
    fn authorize_is_deterministic(
        principal in principal_strategy(),
        document in document_strategy(),
        action in action_strategy(),
    ) {
        let eval = evaluator();
        let first = eval.authorize(&principal, &document, action);
        for _ in 0..4 {
            prop_assert_eq!(eval.authorize(&principal, &document, action), first);
        }
        // a second evaluator built from the same config agrees
        prop_assert_eq!(evaluator().authorize(&principal, &document, action), first);
    }

    #[test]
    fn admin_wins_over_every_policy(
        principal in principal_strategy(),
        document in document_strategy(),
    ) {
        let admin = principal.with_role("ADMIN");
        prop_assert_eq!(
            evaluator().expanded_permissions(&admin, &document).len(),
            Action::ALL.len()
        );
    }

    #[test]
    fn restricted_is_closed_to_everyone_else(
        principal in principal_strategy(),
        mut document in document_strategy(),
        action in action_strategy(),
    ) {
        document.confidentiality = Some(ConfidentialityLevel::Restricted);
        prop_assume!(principal.id != document.author);
        prop_assert!(!evaluator().authorize(&principal, &document, action));
    }

    #[test]
    fn withdrawn_allows_at_most_view(
        principal in principal_strategy(),
        mut document in document_strategy(),
    ) {
        document.status = DocumentStatus::Withdrawn;
        prop_assume!(principal.id != document.author);
        let granted = evaluator().expanded_permissions(&principal, &document);
        prop_assert!(granted.iter().all(|a| *a == Action::View));
    }

    #[test]
    fn expanded_permissions_match_authorize(
        principal in principal_strategy(),
        document in document_strategy(),
    ) {
        let eval = evaluator();
        let expanded = eval.expanded_permissions(&principal, &document);
        for action in Action::ALL {
            prop_assert_eq!(
                expanded.contains(&action),
                eval.authorize(&principal, &document, action)
            );
        }
    }

    #[test]
    fn unset_confidentiality_behaves_as_public(
        principal in principal_strategy(),
        mut document in document_strategy(),
        action in action_strategy(),
    ) {
        document.confidentiality = None;
        let unset = evaluator().authorize(&principal, &document, action);
        document.confidentiality = Some(ConfidentialityLevel::Public);
        prop_assert_eq!(unset, evaluator().authorize(&principal, &document, action));
    }
}
