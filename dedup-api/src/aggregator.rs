use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use dedup_common::health::HealthHandle;
use dedup_common::messages::UniqueCountMessage;

use crate::dedup::Deduplicator;
use crate::sinks::CountSink;
use crate::time::TimeSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The window was counted, cleared and its count published.
    Published(u64),
    /// The window was counted and cleared, but the count was dropped.
    PublishFailed(u64),
    /// The claims could not be enumerated, the window is left untouched.
    Skipped,
}

/// Ends aggregation windows: counts the claimed ids, clears them and
/// publishes the count.
///
/// A drain only deletes the claims it enumerated. A claim written after the
/// enumeration survives the drain and is counted by the next one, so no
/// identifier is lost or counted twice because of a concurrent drain.
pub struct Aggregator {
    dedup: Deduplicator,
    sink: Arc<dyn CountSink + Send + Sync>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl Aggregator {
    pub fn new(
        dedup: Deduplicator,
        sink: Arc<dyn CountSink + Send + Sync>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
    ) -> Self {
        Self {
            dedup,
            sink,
            timesource,
        }
    }

    /// Run one drain. Never fails: every error is logged and converted into
    /// the conservative outcome.
    pub async fn drain(&self) -> DrainOutcome {
        let store = self.dedup.store();

        let keys = match store.scan_prefix(self.dedup.key_prefix()).await {
            Ok(keys) => keys,
            Err(e) => {
                error!("failed to enumerate claims, skipping window: {}", e);
                metrics::counter!("dedup_store_errors_total", "op" => "scan").increment(1);
                metrics::counter!("aggregator_skipped_ticks_total").increment(1);
                return DrainOutcome::Skipped;
            }
        };

        let count = keys.len() as u64;
        let captured_at = self.timesource.current_time();

        if !keys.is_empty() {
            if let Err(e) = store.delete(keys).await {
                // Leftover claims expire with their TTL, or get counted again by the next drain
                warn!("failed to clear {} claims after counting them: {}", count, e);
                metrics::counter!("dedup_store_errors_total", "op" => "delete").increment(1);
            }
        }

        info!("unique requests in the last window: {}", count);
        metrics::counter!("aggregator_drains_total").increment(1);
        metrics::gauge!("aggregator_window_count").set(count as f64);

        match self
            .sink
            .send(UniqueCountMessage::new(count, captured_at))
            .await
        {
            Ok(()) => DrainOutcome::Published(count),
            Err(e) => {
                error!("failed to publish window count {}, dropping it: {}", count, e);
                metrics::counter!("publish_failures_total").increment(1);
                DrainOutcome::PublishFailed(count)
            }
        }
    }

    /// Drain once per `period`, the first time one full period after start.
    pub async fn run(&self, period: Duration, liveness: HealthHandle) {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        liveness.report_healthy().await;
        loop {
            interval.tick().await;
            self.drain().await;
            liveness.report_healthy().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::PublishError;
    use crate::time::tests::FixedTime;
    use async_trait::async_trait;
    use dedup_common::health::HealthRegistry;
    use dedup_common::store::{DedupStore, MemoryStore};
    use std::sync::Mutex;
    use time::macros::datetime;

    #[derive(Default)]
    struct MemorySink {
        messages: Mutex<Vec<UniqueCountMessage>>,
        failing: bool,
    }

    impl MemorySink {
        fn counts(&self) -> Vec<u64> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.unique_request_count)
                .collect()
        }
    }

    #[async_trait]
    impl CountSink for MemorySink {
        async fn send(&self, message: UniqueCountMessage) -> Result<(), PublishError> {
            if self.failing {
                return Err(PublishError::Canceled);
            }
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn setup(store: &MemoryStore, sink: Arc<MemorySink>) -> (Deduplicator, Aggregator) {
        let dedup = Deduplicator::new(
            Arc::new(store.clone()),
            "unique-id:",
            Duration::from_secs(60),
        );
        let aggregator = Aggregator::new(
            dedup.clone(),
            sink,
            Arc::new(FixedTime {
                time: datetime!(2024-05-01 12:00:00 UTC),
            }),
        );
        (dedup, aggregator)
    }

    #[tokio::test]
    async fn drain_publishes_count_and_resets_window() {
        let store = MemoryStore::new();
        let sink = Arc::new(MemorySink::default());
        let (dedup, aggregator) = setup(&store, sink.clone());

        for id in [1, 2, 3, 2, 1] {
            dedup.claim(id).await;
        }

        assert_eq!(aggregator.drain().await, DrainOutcome::Published(3));
        assert_eq!(sink.counts(), vec![3]);
        assert_eq!(
            sink.messages.lock().unwrap()[0].timestamp,
            datetime!(2024-05-01 12:00:00 UTC)
        );

        assert!(dedup.claim(1).await);
    }

    #[tokio::test]
    async fn empty_window_publishes_zero() {
        let store = MemoryStore::new();
        let sink = Arc::new(MemorySink::default());
        let (_, aggregator) = setup(&store, sink.clone());

        assert_eq!(aggregator.drain().await, DrainOutcome::Published(0));
        assert_eq!(sink.counts(), vec![0]);
    }

    #[tokio::test]
    async fn drain_leaves_other_keyspaces_alone() {
        let store = MemoryStore::new();
        store
            .set_if_absent("sessions:abc".to_owned(), Duration::from_secs(60))
            .await
            .unwrap();
        let sink = Arc::new(MemorySink::default());
        let (dedup, aggregator) = setup(&store, sink.clone());
        dedup.claim(1).await;

        assert_eq!(aggregator.drain().await, DrainOutcome::Published(1));
        assert_eq!(store.scan_prefix("sessions:").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_store_skips_the_tick() {
        let store = MemoryStore::new();
        let sink = Arc::new(MemorySink::default());
        let (dedup, aggregator) = setup(&store, sink.clone());
        dedup.claim(1).await;

        store.set_available(false);
        assert_eq!(aggregator.drain().await, DrainOutcome::Skipped);
        assert!(sink.counts().is_empty());

        // The window is intact and gets counted once the store is back
        store.set_available(true);
        assert_eq!(aggregator.drain().await, DrainOutcome::Published(1));
    }

    #[tokio::test]
    async fn failed_publish_is_dropped() {
        let store = MemoryStore::new();
        let sink = Arc::new(MemorySink {
            failing: true,
            ..Default::default()
        });
        let (dedup, aggregator) = setup(&store, sink);
        dedup.claim(1).await;
        dedup.claim(2).await;

        assert_eq!(aggregator.drain().await, DrainOutcome::PublishFailed(2));
        // The count is not retried, the next window starts from scratch
        assert_eq!(dedup.window_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_drains_every_period_and_reports_liveness() {
        let store = MemoryStore::new();
        let sink = Arc::new(MemorySink::default());
        let (dedup, aggregator) = setup(&store, sink.clone());
        let registry = HealthRegistry::new("liveness");
        let liveness = registry
            .register("aggregator".to_string(), Duration::from_secs(30))
            .await;

        dedup.claim(1).await;
        let run = tokio::spawn(async move {
            aggregator.run(Duration::from_millis(50), liveness).await;
        });

        tokio::time::sleep(Duration::from_millis(180)).await;
        run.abort();

        let counts = sink.counts();
        assert!(counts.len() >= 2, "expected several drains, got {:?}", counts);
        assert_eq!(counts[0], 1);
        assert!(counts[1..].iter().all(|count| *count == 0));
        assert!(registry.get_status().healthy);
    }
}
