use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::SinkError;
use crate::normalize::CanonicalRecord;
use crate::sink::FlushSink;
use crate::timestamp::local_iso;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// The records gathered since the window opened.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchWindow {
    pub window_start_time: i64,
    pub window_label: String,
    pub records: Vec<CanonicalRecord>,
}

impl BatchWindow {
    fn open(at: DateTime<Utc>) -> Self {
        Self {
            window_start_time: at.timestamp(),
            window_label: local_iso(at),
            records: Vec::new(),
        }
    }

    /// Record count per type name, for the flush report.
    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            let name = record.type_name.as_deref().unwrap_or("unknown");
            *counts.entry(name.to_owned()).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushSummary {
    pub label: String,
    pub records: usize,
    pub type_counts: BTreeMap<String, usize>,
}

/// Owns the current window. Flushing is purely time-triggered: appends never flush.
pub struct BatchAccumulator {
    window: BatchWindow,
    window_length: i64,
}

impl BatchAccumulator {
    pub fn new(opened_at: DateTime<Utc>, window_length: Duration) -> Self {
        Self {
            window: BatchWindow::open(opened_at),
            window_length: i64::try_from(window_length.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub fn append(&mut self, record: CanonicalRecord) {
        self.window.records.push(record);
        metrics::gauge!("rail_feed_window_records").set(self.window.records.len() as f64);
    }

    pub fn should_flush(&self, now_epoch_seconds: i64) -> bool {
        now_epoch_seconds - self.window.window_start_time >= self.window_length
    }

    pub fn window(&self) -> &BatchWindow {
        &self.window
    }

    pub fn len(&self) -> usize {
        self.window.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.records.is_empty()
    }

    /// Hand the window to `sink`. Only a successful write clears it and opens
    /// a new window at `now`; on failure the window is kept for the next attempt.
    pub async fn flush<S>(&mut self, sink: &S, now: DateTime<Utc>) -> Result<FlushSummary, SinkError>
    where
        S: FlushSink + ?Sized,
    {
        let summary = FlushSummary {
            label: self.window.window_label.clone(),
            records: self.window.records.len(),
            type_counts: self.window.type_counts(),
        };
        info!(
            window = summary.label,
            records = summary.records,
            "Dumping messages: {:?}",
            summary.type_counts
        );

        if let Err(e) = sink
            .persist(&self.window.window_label, &self.window.records)
            .await
        {
            error!(window = summary.label, error = %e, "Error saving batch, keeping window for retry");
            metrics::counter!("rail_feed_flushes_total", "outcome" => "failed").increment(1);
            return Err(e);
        }

        metrics::counter!("rail_feed_flushes_total", "outcome" => "ok").increment(1);
        metrics::counter!("rail_feed_records_flushed_total").increment(summary.records as u64);
        self.window = BatchWindow::open(now);
        metrics::gauge!("rail_feed_window_records").set(0.0);
        Ok(summary)
    }
}
