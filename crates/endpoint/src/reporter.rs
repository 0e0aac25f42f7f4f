//! Periodic endpoint statistics
//!
//! Logs an endpoint's counters at a fixed interval, together with the deltas
//! since the previous report. Runs as its own task so a slow or blocked send
//! path never delays reporting.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::endpoint::MIN_INTERVAL;
use crate::metrics::EndpointMetricsSnapshot;

/// Per-endpoint statistics reporter
pub struct StatsReporter {
    name: String,
    address: String,
    interval: Duration,
    previous: Option<EndpointMetricsSnapshot>,
}

impl StatsReporter {
    /// Create a new reporter
    pub fn new(name: String, address: String, interval: Duration) -> Self {
        Self {
            name,
            address,
            interval: interval.max(MIN_INTERVAL),
            previous: None,
        }
    }

    /// Run the reporter until cancellation
    pub async fn run<F>(mut self, snapshot: F, cancel: CancellationToken)
    where
        F: Fn() -> EndpointMetricsSnapshot,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately; nothing to report yet
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.report(snapshot()),
            }
        }
    }

    fn report(&mut self, current: EndpointMetricsSnapshot) {
        let previous = self.previous.unwrap_or_default();
        info!(
            endpoint = %self.name,
            address = %self.address,
            interval_secs = self.interval.as_secs(),
            batches_sent = current.batches_sent,
            events_sent = current.events_sent,
            bytes_sent = current.bytes_sent,
            events_delta = current.events_sent.saturating_sub(previous.events_sent),
            bytes_delta = current.bytes_sent.saturating_sub(previous.bytes_sent),
            failures = current.batches_failed,
            retries = current.retries,
            reconnects = current.reconnect_count,
            queue_depth = current.queue_depth,
            "endpoint stats"
        );
        self.previous = Some(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_reports_each_interval_until_cancelled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let reporter = StatsReporter::new("e".into(), "h:1".into(), Duration::from_secs(10));

        let task = {
            let calls = Arc::clone(&calls);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                reporter
                    .run(
                        || {
                            calls.fetch_add(1, Ordering::Relaxed);
                            EndpointMetricsSnapshot::default()
                        },
                        cancel,
                    )
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let reporter = StatsReporter::new("e".into(), "h:1".into(), Duration::ZERO);
        assert_eq!(reporter.interval, MIN_INTERVAL);
    }
}
