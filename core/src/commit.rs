use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::errors::SourceError;
use crate::partition::{CommitBatch, PartitionKey};
use crate::position::{PositionStore, confirmed_offsets};
use crate::source::PartitionControl;
use crate::telemetry::TaskMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing confirmed for the given partitions, no request was sent.
    Skipped,
    Committed(CommitBatch),
    Failed(CommitBatch),
}

/// Commits confirmed offsets to the source broker.
///
/// The broker-side commit only speeds up restarts. Cursor placement is
/// always decided by [`crate::reconcile::OffsetReconciler`], so failures here
/// are logged and swallowed.
pub struct CommitCoordinator {
    store: Arc<dyn PositionStore>,
    metrics: Arc<TaskMetrics>,
}

impl CommitCoordinator {
    pub fn new(store: Arc<dyn PositionStore>, metrics: Arc<TaskMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Confirmed offsets for exactly `partitions`, skipping the ones without
    /// a usable confirmed position.
    pub fn batch_for(&self, partitions: &[PartitionKey]) -> CommitBatch {
        confirmed_offsets(self.store.as_ref(), partitions)
            .into_iter()
            .collect()
    }

    pub fn commit(&self, client: &dyn PartitionControl, partitions: &[PartitionKey]) -> CommitOutcome {
        let batch = self.batch_for(partitions);
        if batch.is_empty() {
            return CommitOutcome::Skipped;
        }

        let result = client.commit_sync(&batch);
        self.on_complete(&batch, result.as_ref().err());
        match result {
            Ok(()) => CommitOutcome::Committed(batch),
            Err(_) => CommitOutcome::Failed(batch),
        }
    }

    fn on_complete(&self, batch: &CommitBatch, error: Option<&SourceError>) {
        match error {
            None => {
                self.metrics.record_commit(true);
                for (partition, offset) in batch.iter() {
                    debug!("Committed offset {} for partition {}", offset, partition);
                }
            }
            Some(e) => {
                self.metrics.record_commit(false);
                for (partition, offset) in batch.iter() {
                    warn!("Failed to commit offset {} for partition {}", offset, partition);
                }
                error!("Offset commit of {} partitions failed: {}", batch.len(), e);
            }
        }
    }
}

/// Decides when the poll loop runs a periodic commit.
///
/// Other threads may request an early commit through a [`CommitTrigger`];
/// the request is only a flag, the commit itself still runs on the poll loop.
#[derive(Debug)]
pub struct CommitSchedule {
    interval: Duration,
    next_deadline: Option<Instant>,
    requested: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct CommitTrigger {
    requested: Arc<AtomicBool>,
}

impl CommitTrigger {
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }
}

impl CommitSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_deadline: None,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) -> CommitTrigger {
        CommitTrigger {
            requested: Arc::clone(&self.requested),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        if self.requested.load(Ordering::Acquire) {
            return true;
        }
        match self.next_deadline {
            None => true,
            Some(deadline) => now >= deadline,
        }
    }

    pub fn mark_committed(&mut self, now: Instant) {
        self.requested.store(false, Ordering::Release);
        self.next_deadline = Some(now + self.interval);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_deadline
    }
}
