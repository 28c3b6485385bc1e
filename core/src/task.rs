use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::commit::{CommitCoordinator, CommitSchedule, CommitTrigger};
use crate::config::BridgeConfig;
use crate::errors::{Result, SourceError};
use crate::partition::OwnedPartitions;
use crate::position::PositionStore;
use crate::rebalance::RebalanceListener;
use crate::reconcile::OffsetReconciler;
use crate::source::{SourceClient, SourceConnector};
use crate::telemetry::TaskMetrics;
use crate::transcode::{TranscodedEntry, transcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// The read wait elapsed with nothing to read.
    Empty,
    /// A cursor could not be moved to its confirmed position.
    ReconcileFailed,
    ReadFailed,
    /// Reads are paused and nothing came from newly assigned partitions.
    Paused,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Batch(Vec<TranscodedEntry>),
    /// No progress this cycle. Call `poll` again.
    Idle(IdleReason),
    /// The task is shutting down. Stop calling `poll`.
    Stopped,
}

impl PollOutcome {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PollOutcome::Stopped)
    }
}

/// Fires the task's stop signal from anywhere.
///
/// An in-flight read returns as soon as the signal fires.
#[derive(Debug, Clone)]
pub struct StopHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.signal.borrow()
    }
}

/// A source task bridging the owned partitions of one consumer group member.
///
/// All broker client calls happen from `poll`, `pause`, `resume` and `stop`,
/// which take `&mut self` or run on the same owner. Other tasks interact only
/// through a [`StopHandle`] or a [`CommitTrigger`].
pub struct SourceTask<C: SourceClient> {
    client: Option<C>,
    listener: Arc<RebalanceListener>,
    reconciler: OffsetReconciler,
    committer: CommitCoordinator,
    schedule: CommitSchedule,
    metrics: Arc<TaskMetrics>,
    stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
    batch_size: usize,
    poll_timeout: Duration,
    paused: bool,
}

impl<C: SourceClient> SourceTask<C> {
    /// Validates `config`, connects and subscribes.
    ///
    /// This is the only fallible entry point of the task.
    pub fn start<K>(
        config: &BridgeConfig,
        store: Arc<dyn PositionStore>,
        connector: &K,
    ) -> Result<Self>
    where
        K: SourceConnector<Client = C>,
    {
        config.validate()?;

        let metrics = Arc::new(TaskMetrics::default());
        let listener = Arc::new(RebalanceListener::new(
            OwnedPartitions::new(),
            Arc::clone(&store),
            Arc::clone(&metrics),
        ));

        let client = connector.connect(&config.kafka, Arc::clone(&listener))?;
        let topics = config.kafka.topic_list();
        client.subscribe(&topics)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        info!(
            "Source task started for group {} on topics {}",
            config.kafka.consumer_group,
            topics.join(",")
        );

        Ok(Self {
            client: Some(client),
            listener,
            reconciler: OffsetReconciler::new(Arc::clone(&store), Arc::clone(&metrics)),
            committer: CommitCoordinator::new(store, Arc::clone(&metrics)),
            schedule: CommitSchedule::new(config.task.commit_interval()),
            metrics,
            stop: StopHandle {
                signal: Arc::new(stop_tx),
            },
            stop_rx,
            batch_size: config.task.batch_size,
            poll_timeout: config.task.poll_timeout(),
            paused: false,
        })
    }

    /// Runs one cycle: commit when due, reconcile, read, transcode.
    pub async fn poll(&mut self) -> PollOutcome {
        if self.stop.is_stopped() {
            return PollOutcome::Stopped;
        }
        let Some(client) = self.client.as_ref() else {
            return PollOutcome::Stopped;
        };

        let owned = self.listener.owned().snapshot();
        let now = Instant::now();
        if self.schedule.is_due(now) {
            self.committer.commit(client, &owned);
            self.schedule.mark_committed(now);
        }

        let report = self.reconciler.reconcile(client, &owned);
        if !report.is_clean() {
            warn!(
                "Reconciliation failed for {} partitions, skipping this cycle",
                report.failures.len()
            );
            return PollOutcome::Idle(IdleReason::ReconcileFailed);
        }

        let mut stop = self.stop_rx.clone();
        let read = tokio::select! {
            result = client.poll_batch(self.batch_size, self.poll_timeout) => result,
            _ = stop.wait_for(|stopped| *stopped) => return PollOutcome::Stopped,
        };

        let records = match read {
            Ok(records) => records,
            Err(SourceError::Closed) => return PollOutcome::Stopped,
            Err(e) => {
                warn!("Failed to read from source: {}", e);
                return PollOutcome::Idle(IdleReason::ReadFailed);
            }
        };

        self.metrics.record_poll(records.len());
        if records.is_empty() {
            let reason = if self.paused {
                IdleReason::Paused
            } else {
                IdleReason::Empty
            };
            return PollOutcome::Idle(reason);
        }

        let at = Utc::now();
        let entries = records
            .into_iter()
            .map(|record| {
                debug!(
                    "Received record at offset {} from {}",
                    record.offset, record.partition
                );
                transcode(record, at)
            })
            .collect();
        PollOutcome::Batch(entries)
    }

    /// Stops reads from the currently owned partitions.
    pub fn pause(&mut self) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        let owned = self.listener.owned().snapshot();
        match client.pause(&owned) {
            Ok(()) => info!("Paused {} partitions", owned.len()),
            Err(e) => warn!("Failed to pause partitions: {}", e),
        }
        self.paused = true;
    }

    pub fn resume(&mut self) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        let owned = self.listener.owned().snapshot();
        match client.resume(&owned) {
            Ok(()) => info!("Resumed {} partitions", owned.len()),
            Err(e) => warn!("Failed to resume partitions: {}", e),
        }
        self.paused = false;
    }

    /// Commits confirmed offsets of the owned partitions, fires the stop
    /// signal and releases the client. Later calls do nothing.
    pub async fn stop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        let owned = self.listener.owned().snapshot();
        self.committer.commit(&client, &owned);
        self.stop.stop();

        if let Err(e) = client.close().await {
            warn!("Failed to close source client: {}", e);
        }
        info!("Source task stopped");
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn commit_trigger(&self) -> CommitTrigger {
        self.schedule.trigger()
    }

    pub fn owned_partitions(&self) -> &OwnedPartitions {
        self.listener.owned()
    }

    pub fn metrics(&self) -> Arc<TaskMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KafkaOptions, TaskOptions};
    use crate::errors::BridgeError;
    use crate::partition::PartitionKey;
    use crate::position::MemoryPositionStore;
    use crate::source::memory::{MemoryBroker, OffsetReset};

    fn config(poll_timeout_ms: u64) -> BridgeConfig {
        BridgeConfig {
            kafka: KafkaOptions {
                bootstrap_servers: "memory".to_string(),
                consumer_group: "bridge".to_string(),
                topics: "orders".to_string(),
                security_protocol: None,
                sasl_mechanisms: None,
                sasl_username: None,
                sasl_password: None,
                ssl_ca_location: None,
                auto_offset_reset: None,
                session_timeout_ms: None,
                heartbeat_interval_ms: None,
            },
            task: TaskOptions {
                poll_timeout_ms,
                ..TaskOptions::default()
            },
        }
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let mut config = config(10);
        config.kafka.topics = String::new();

        let result = SourceTask::start(
            &config,
            Arc::new(MemoryPositionStore::new()),
            &MemoryBroker::default(),
        );
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_subscribes_to_topic_list() {
        let broker = MemoryBroker::new(OffsetReset::Earliest);
        let mut config = config(10);
        config.kafka.topics = "orders, payments".to_string();

        SourceTask::start(&config, Arc::new(MemoryPositionStore::new()), &broker).unwrap();
        assert_eq!(broker.subscriptions(), vec!["orders", "payments"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_handle_interrupts_read() {
        let broker = MemoryBroker::new(OffsetReset::Earliest);
        let mut task =
            SourceTask::start(&config(60_000), Arc::new(MemoryPositionStore::new()), &broker)
                .unwrap();
        let handle = task.stop_handle();

        let (outcome, _) = tokio::join!(task.poll(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.stop();
        });

        assert_eq!(outcome, PollOutcome::Stopped);
        assert!(!outcome.is_retryable());
        assert_eq!(task.poll().await, PollOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_commits_closes_and_is_idempotent() {
        let broker = MemoryBroker::new(OffsetReset::Earliest);
        let store = Arc::new(MemoryPositionStore::new());
        let p0 = PartitionKey::new("orders", 0);
        broker.append(&p0, None, b"v");
        broker.assign(&[p0.clone()]);

        let mut task = SourceTask::start(&config(10), store.clone(), &broker).unwrap();
        task.poll().await;
        store.confirm(&p0, 0);

        task.stop().await;
        task.stop().await;

        assert!(task.is_stopped());
        assert!(broker.is_closed());
        assert_eq!(broker.committed(&p0), Some(0));
        assert_eq!(task.poll().await, PollOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_reports_paused_idle() {
        let broker = MemoryBroker::new(OffsetReset::Earliest);
        let p0 = PartitionKey::new("orders", 0);
        broker.assign(&[p0.clone()]);

        let mut task =
            SourceTask::start(&config(10), Arc::new(MemoryPositionStore::new()), &broker).unwrap();
        assert_eq!(task.poll().await, PollOutcome::Idle(IdleReason::Empty));

        task.pause();
        broker.append(&p0, None, b"v");
        assert!(broker.is_paused(&p0));
        assert_eq!(task.poll().await, PollOutcome::Idle(IdleReason::Paused));

        task.resume();
        assert!(!task.is_paused());
        assert!(matches!(task.poll().await, PollOutcome::Batch(entries) if entries.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_is_idle_not_fatal() {
        let broker = MemoryBroker::new(OffsetReset::Earliest);
        let mut task =
            SourceTask::start(&config(10), Arc::new(MemoryPositionStore::new()), &broker).unwrap();

        broker.fail_next_poll("broker unreachable");
        let outcome = task.poll().await;
        assert_eq!(outcome, PollOutcome::Idle(IdleReason::ReadFailed));
        assert!(outcome.is_retryable());
        assert_eq!(task.poll().await, PollOutcome::Idle(IdleReason::Empty));
    }
}
