//! Races against one shared sled database
//!
//! Each test lines its threads up on a barrier and then lets them hit the same
//! document at once. sled retries conflicting transactions, so the outcomes
//! checked here are the ones that survive any interleaving.

use document_control::{
    Config, ConfidentialityLevel, Decision, DocumentControl, DocumentError, NewDocument,
    StaticDirectory, VersionType,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

fn control(dir: &std::path::Path) -> anyhow::Result<DocumentControl> {
    let directory = Arc::new(
        StaticDirectory::new()
            .with_person("alice", &["editor"], Some("PRODUCTION"), Some("bob"))
            .with_person("bob", &["manager"], Some("PRODUCTION"), None)
            .with_person("carol", &["manager"], Some("PRODUCTION"), None)
            .with_person("quinn", &["QA"], Some("QUALITY"), None),
    );
    let config = Config::at_path(dir.join("db"));
    Ok(DocumentControl::open(&config, directory)?)
}

fn document(control: &DocumentControl) -> anyhow::Result<String> {
    let alice = control.principal("alice");
    Ok(control
        .create_document(
            &alice,
            NewDocument {
                title: "WI-7".into(),
                confidentiality: Some(ConfidentialityLevel::Internal),
                owner_department: Some("PRODUCTION".into()),
                ..NewDocument::default()
            },
        )?
        .id)
}

#[test]
fn concurrent_starts_leave_one_instance() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let control = control(temp_dir.path())?;

    for _ in 0..8 {
        let doc_id = document(&control)?;
        let alice = control.principal("alice");
        let barrier = Barrier::new(2);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        control.start_review(&alice, &doc_id, "DOC_REVIEW")
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("start thread panicked"))
                .collect()
        });

        let started = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(DocumentError::ConflictingInstance { .. })))
            .count();
        assert_eq!((started, conflicts), (1, 1), "{results:?}");
        assert_eq!(control.engine().document_history(&doc_id)?.len(), 1);
    }

    Ok(())
}

#[test]
fn concurrent_uploads_keep_one_current_version() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let control = control(temp_dir.path())?;
    let doc_id = document(&control)?;
    let alice = control.principal("alice");
    let writers = 6;
    let barrier = Barrier::new(writers);

    thread::scope(|s| {
        for n in 0..writers {
            let (control, alice, doc_id, barrier) = (&control, &alice, &doc_id, &barrier);
            s.spawn(move || {
                barrier.wait();
                let content = format!("revision from writer {n}");
                control
                    .upload_version(alice, doc_id, content.as_bytes(), VersionType::Patch, "")
                    .expect("upload failed");
            });
        }
    });

    let versions = control.versions().list_versions(&doc_id)?;
    assert_eq!(versions.len(), writers);

    let current: Vec<_> = versions.iter().filter(|v| v.is_current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(control.versions().get_current(&doc_id)?.id, current[0].id);

    let numbers: BTreeSet<_> = versions.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers.len(), writers);

    Ok(())
}

#[test]
fn decision_racing_a_transfer_applies_once() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let control = control(temp_dir.path())?;
    let doc_id = document(&control)?;
    let alice = control.principal("alice");
    let bob = control.principal("bob");
    let instance = control.start_review(&alice, &doc_id, "DOC_REVIEW")?;
    let barrier = Barrier::new(2);

    let (decided, transferred) = thread::scope(|s| {
        let decide = s.spawn(|| {
            barrier.wait();
            control.decide(&bob, &instance.id, Decision::Approve, None)
        });
        let transfer = s.spawn(|| {
            barrier.wait();
            control.transfer(&bob, &instance.id, "carol", None)
        });
        (
            decide.join().expect("decide thread panicked"),
            transfer.join().expect("transfer thread panicked"),
        )
    });

    assert!(decided.is_ok() != transferred.is_ok());
    let loser = if decided.is_ok() { transferred } else { decided };
    assert!(matches!(loser, Err(DocumentError::NotCurrentApprover { .. })));

    Ok(())
}
