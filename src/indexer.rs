//! Hook for an external search index
use parking_lot::Mutex;
use tracing::warn;

/// Told about committed changes. Failures are logged by the caller and never
/// undo the change.
pub trait SearchIndexer: Send + Sync {
    fn document_changed(&self, document_id: &str, reason: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndexer;

/// Notify `indexer`, logging instead of returning any failure.
pub(crate) fn notify(indexer: &dyn SearchIndexer, document_id: &str, reason: &str) {
    if let Err(e) = indexer.document_changed(document_id, reason) {
        warn!(%document_id, reason, error = %e, "search index notification failed");
    }
}

impl SearchIndexer for NoopIndexer {
    fn document_changed(&self, _document_id: &str, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Remembers every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingIndexer {
    seen: Mutex<Vec<(String, String)>>,
}

impl RecordingIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().clone()
    }
}

impl SearchIndexer for RecordingIndexer {
    fn document_changed(&self, document_id: &str, reason: &str) -> anyhow::Result<()> {
        self.seen
            .lock()
            .push((document_id.to_string(), reason.to_string()));
        Ok(())
    }
}
