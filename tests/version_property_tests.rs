//! Property-based tests for version numbering and the current-version pointer
//!
//! The numbering tests are pure. The store tests run a generated sequence of
//! uploads, promotions and rollbacks against a fresh sled database per case,
//! so they use fewer cases.

use document_control::audit::MemoryAuditSink;
use document_control::blob::SledBlobStore;
use document_control::config::StorageConfig;
use document_control::indexer::NoopIndexer;
use document_control::store::Ledger;
use document_control::{NewDocument, VersionNumber, VersionStore, VersionType};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::tempdir;

fn version_type_strategy() -> impl Strategy<Value = VersionType> {
    prop_oneof![
        Just(VersionType::Major),
        Just(VersionType::Minor),
        Just(VersionType::Patch),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Upload(VersionType),
    Promote(usize),
    Rollback(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => version_type_strategy().prop_map(Op::Upload),
        1 => any::<usize>().prop_map(Op::Promote),
        1 => any::<usize>().prop_map(Op::Rollback),
    ]
}

proptest! {
    #[test]
    fn numbers_strictly_increase_from_first(types in prop::collection::vec(version_type_strategy(), 1..40)) {
        let mut latest: Option<VersionNumber> = None;
        for version_type in types {
            let next = VersionNumber::following(latest.as_ref(), version_type).unwrap();
            match latest {
                None => prop_assert_eq!(next, VersionNumber::FIRST),
                Some(previous) => prop_assert!(next > previous),
            }
            latest = Some(next);
        }
    }

    #[test]
    fn display_parses_back(major in 0u32..1000, minor in 0u32..1000, patch in 0u32..1000) {
        let number = VersionNumber::new(major, minor, patch);
        prop_assert_eq!(number.to_string().parse::<VersionNumber>().unwrap(), number);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn exactly_one_current_version(ops in prop::collection::vec(op_strategy(), 1..20)) {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let store = VersionStore::new(
            ledger.clone(),
            Arc::new(SledBlobStore::new(ledger.db().clone(), "k")),
            &StorageConfig::default(),
            Arc::new(MemoryAuditSink::new()),
            Arc::new(NoopIndexer),
        );
        let doc = ledger.create_document("alice", NewDocument::default()).unwrap();

        let mut uploads = 0usize;
        for op in ops {
            let versions = store.list_versions(&doc.id).unwrap();
            match op {
                Op::Upload(version_type) => {
                    let content = format!("content #{uploads}");
                    store.upload(&doc.id, content.as_bytes(), version_type, "", "alice").unwrap();
                    uploads += 1;
                }
                Op::Promote(i) if !versions.is_empty() => {
                    let target = &versions[i % versions.len()];
                    store.set_current(&doc.id, &target.id, "alice").unwrap();
                }
                Op::Rollback(i) if !versions.is_empty() => {
                    let target = &versions[i % versions.len()];
                    store.rollback(&target.id, "alice").unwrap();
                }
                _ => {}
            }

            let versions = store.list_versions(&doc.id).unwrap();
            if versions.is_empty() {
                continue;
            }
            let current: Vec<_> = versions.iter().filter(|v| v.is_current).collect();
            prop_assert_eq!(current.len(), 1);
            prop_assert_eq!(&store.get_current(&doc.id).unwrap().id, &current[0].id);

            // history stays strictly ordered by number
            for pair in versions.windows(2) {
                prop_assert!(pair[0].version_number < pair[1].version_number);
            }
        }
    }
}
