use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::SinkError;
use crate::normalize::CanonicalRecord;

pub mod file;
pub mod s3;

pub use file::FileSink;
pub use s3::S3Sink;

/// Durable destination for flushed windows. Implementations either persist
/// the whole batch under `label` or report failure; partial writes must not be visible.
#[async_trait]
pub trait FlushSink: Send + Sync {
    async fn persist(&self, label: &str, records: &[CanonicalRecord]) -> Result<(), SinkError>;
}

pub(crate) fn object_name(label: &str) -> String {
    format!("{label}.json")
}

/// In-memory sink for tests: keeps every persisted batch and can be told to fail.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkState>>,
}

#[derive(Default)]
struct MemorySinkState {
    batches: Vec<(String, Vec<CanonicalRecord>)>,
    failing: bool,
    attempts: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    pub fn batches(&self) -> Vec<(String, Vec<CanonicalRecord>)> {
        self.state().batches.clone()
    }

    pub fn attempts(&self) -> usize {
        self.state().attempts
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemorySinkState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl FlushSink for MemorySink {
    async fn persist(&self, label: &str, records: &[CanonicalRecord]) -> Result<(), SinkError> {
        let mut state = self.state();
        state.attempts += 1;
        if state.failing {
            return Err(SinkError::ObjectStore("memory sink set to fail".to_string()));
        }
        state.batches.push((label.to_owned(), records.to_vec()));
        Ok(())
    }
}
