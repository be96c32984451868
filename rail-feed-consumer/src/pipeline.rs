use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::batch::{BatchAccumulator, FlushSummary};
use crate::clock::Clock;
use crate::connection::DeliveryHandler;
use crate::error::SinkError;
use crate::normalize::{parse_envelope, Normalized, Normalizer};
use crate::sink::FlushSink;
use crate::timestamp::local_iso;

/// What one delivery contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub events: usize,
    pub records: usize,
    pub skipped: usize,
    pub rejected: usize,
}

/// Normalizer, accumulator and sink wired together. Owned by the task that
/// drives the connection, so nothing here needs a lock.
pub struct IngestPipeline {
    normalizer: Normalizer,
    accumulator: BatchAccumulator,
    sink: Arc<dyn FlushSink>,
    clock: Arc<dyn Clock>,
}

impl IngestPipeline {
    pub fn new(
        normalizer: Normalizer,
        sink: Arc<dyn FlushSink>,
        clock: Arc<dyn Clock>,
        window_length: Duration,
    ) -> Self {
        let accumulator = BatchAccumulator::new(clock.now(), window_length);
        Self {
            normalizer,
            accumulator,
            sink,
            clock,
        }
    }

    pub fn accumulator(&self) -> &BatchAccumulator {
        &self.accumulator
    }

    /// Normalize every event in a delivery and append the records. Bad events
    /// are logged and counted; they never stop the rest of the delivery.
    pub fn process_envelope(&mut self, payload: &[u8]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let events = match parse_envelope(payload) {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, bytes = payload.len(), "Delivery is not a JSON array of events");
                metrics::counter!("rail_feed_invalid_deliveries_total").increment(1);
                return report;
            }
        };
        report.events = events.len();

        for event in events {
            let formed_time = local_iso(self.clock.now());
            let outcome = event.and_then(|event| self.normalizer.normalize(&event, &formed_time));

            match outcome {
                Ok(Normalized::Record(record)) => {
                    let type_name = record.type_name.clone().unwrap_or_else(|| "unknown".to_string());
                    metrics::counter!("rail_feed_records_total", "type_name" => type_name).increment(1);
                    self.accumulator.append(*record);
                    report.records += 1;
                }
                Ok(Normalized::Skip { type_code }) => {
                    warn!(type_code, "Unknown message type");
                    metrics::counter!("rail_feed_skipped_events_total").increment(1);
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(error = %e, "Rejected feed event");
                    metrics::counter!("rail_feed_rejected_events_total", "kind" => e.kind()).increment(1);
                    report.rejected += 1;
                }
            }
        }

        report
    }

    /// Flush if the window has run its course. A failed flush is logged by
    /// the accumulator and retried at the next check.
    pub async fn flush_if_due(&mut self) -> Option<FlushSummary> {
        let now = self.clock.now();
        if !self.accumulator.should_flush(now.timestamp()) {
            return None;
        }
        self.accumulator.flush(self.sink.as_ref(), now).await.ok()
    }

    /// Flush whatever is buffered regardless of the window, for shutdown.
    pub async fn flush_remaining(&mut self) -> Result<FlushSummary, SinkError> {
        let now = self.clock.now();
        self.accumulator.flush(self.sink.as_ref(), now).await
    }
}

#[async_trait]
impl DeliveryHandler for IngestPipeline {
    async fn handle(&mut self, payload: &[u8]) {
        let report = self.process_envelope(payload);
        debug!(
            events = report.events,
            records = report.records,
            skipped = report.skipped,
            rejected = report.rejected,
            "Processed delivery"
        );

        if let Some(summary) = self.flush_if_due().await {
            debug!(window = summary.label, records = summary.records, "Window flushed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::reference::ReferenceLookup;
    use crate::sink::MemorySink;

    fn pipeline(clock: &ManualClock, sink: &MemorySink) -> IngestPipeline {
        IngestPipeline::new(
            Normalizer::new(Arc::new(ReferenceLookup::default())),
            Arc::new(sink.clone()),
            Arc::new(clock.clone()),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn test_invalid_json_contributes_nothing() {
        let clock = ManualClock::at_epoch_seconds(1_000);
        let sink = MemorySink::new();
        let mut pipeline = pipeline(&clock, &sink);

        let report = pipeline.process_envelope(b"not json at all");

        assert_eq!(report, DeliveryReport::default());
        assert!(pipeline.accumulator().is_empty());
    }

    #[test]
    fn test_element_that_is_not_an_event_is_rejected_alone() {
        let clock = ManualClock::at_epoch_seconds(1_000);
        let sink = MemorySink::new();
        let mut pipeline = pipeline(&clock, &sink);

        let payload = br#"[
            "garbage",
            {
                "header": {"msg_type": "0008", "source_dev_id": "", "original_data_source": "TRUST"},
                "body": {"train_id": "172M27MN19"}
            }
        ]"#;
        let report = pipeline.process_envelope(payload);

        assert_eq!(report.events, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.records, 1);
        assert_eq!(pipeline.accumulator().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_waits_for_the_window() {
        let clock = ManualClock::at_epoch_seconds(1_000);
        let sink = MemorySink::new();
        let mut pipeline = pipeline(&clock, &sink);

        clock.advance(Duration::from_secs(299));
        assert!(pipeline.flush_if_due().await.is_none());
        assert_eq!(sink.attempts(), 0);

        clock.advance(Duration::from_secs(1));
        let summary = pipeline.flush_if_due().await.unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(sink.attempts(), 1);
        assert_eq!(pipeline.accumulator().window().window_start_time, 1_300);
    }
}
