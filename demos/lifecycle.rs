//! Walks one SOP from first draft to approval.
//!
//! cargo run --example lifecycle [config.toml]
use anyhow::Context;
use document_control::{
    ConfidentialityLevel, Config, Decision, DocumentControl, FileInfo, NewDocument,
    StaticDirectory, VersionType,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "document_control=info,audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let scratch = tempfile::tempdir()?;
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {path}"))?,
        None => Config::at_path(scratch.path().join("document-control.db")),
    };

    let directory = Arc::new(
        StaticDirectory::new()
            .with_person("alice", &["editor"], Some("PRODUCTION"), Some("bob"))
            .with_person("bob", &["manager"], Some("PRODUCTION"), None)
            .with_person("quinn", &["QA"], Some("QUALITY"), None)
            .with_person("oscar", &["operator"], Some("WAREHOUSE"), None),
    );
    let control = DocumentControl::open(&config, directory)?;
    for workflow in control.engine().workflows() {
        info!(code = %workflow.code, steps = workflow.steps.len(), "workflow available");
    }

    let alice = control.principal("alice");
    let document = control.create_document(
        &alice,
        NewDocument {
            title: "SOP-014 Line clearance".into(),
            confidentiality: Some(ConfidentialityLevel::Internal),
            owner_department: Some("PRODUCTION".into()),
            ..NewDocument::default()
        },
    )?;

    control.upload_file(
        &alice,
        &document.id,
        b"Clear the line.",
        FileInfo::named("SOP-014.md", "text/markdown"),
        VersionType::Major,
        "first issue",
    )?;
    let current = control.upload_version(
        &alice,
        &document.id,
        b"Clear the line and sign the log.",
        VersionType::Minor,
        "add sign-off",
    )?;
    info!(version = %current.version_number, "drafted");

    let review = control.start_review(&alice, &document.id, "DOC_REVIEW")?;
    let review = control.decide(&control.principal("bob"), &review.id, Decision::Approve, Some("ok"))?;
    let review = control.decide(&control.principal("quinn"), &review.id, Decision::Approve, None)?;

    let released = control.view_document(&alice, &document.id)?;
    info!(status = %released.status, approved_version = ?review.approved_version_id, "review closed");

    let oscar = control.principal("oscar");
    let allowed = control.permissions(&oscar, &document.id)?;
    info!(principal = %oscar.id, ?allowed, "operator permissions");

    let stats = control.versions().usage_stats()?;
    info!(versions = stats.versions, bytes = stats.bytes, "storage usage");
    control.ledger().flush()?;
    Ok(())
}
