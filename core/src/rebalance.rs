use std::sync::Arc;

use tracing::{info, warn};

use crate::commit::{CommitCoordinator, CommitOutcome};
use crate::partition::{OwnedPartitions, PartitionKey};
use crate::position::PositionStore;
use crate::reconcile::{OffsetReconciler, ReconcileReport};
use crate::source::PartitionControl;
use crate::telemetry::TaskMetrics;

/// Reacts to group membership changes.
///
/// Invoked by the source client from within its poll call, never concurrently
/// with the poll loop's own client calls.
///
/// ```text
/// Assigned(p)
///     ├─► owned += p
///     └─► reconcile(p)           - next read starts after the confirmed offset
///
/// Revoked(p)
///     ├─► commit(p)              - best effort, ownership is still held
///     └─► owned -= p             - even when the commit failed
/// ```
pub struct RebalanceListener {
    owned: OwnedPartitions,
    reconciler: OffsetReconciler,
    committer: CommitCoordinator,
    metrics: Arc<TaskMetrics>,
}

impl RebalanceListener {
    pub fn new(
        owned: OwnedPartitions,
        store: Arc<dyn PositionStore>,
        metrics: Arc<TaskMetrics>,
    ) -> Self {
        Self {
            owned,
            reconciler: OffsetReconciler::new(Arc::clone(&store), Arc::clone(&metrics)),
            committer: CommitCoordinator::new(store, Arc::clone(&metrics)),
            metrics,
        }
    }

    pub fn owned(&self) -> &OwnedPartitions {
        &self.owned
    }

    pub fn on_assigned(
        &self,
        client: &dyn PartitionControl,
        partitions: &[PartitionKey],
    ) -> ReconcileReport {
        // cooperative protocols deliver empty assignments on every membership change
        if partitions.is_empty() {
            return ReconcileReport::default();
        }

        self.metrics.record_assignment();
        self.owned.add_all(partitions);
        info!("Partitions assigned: {}", display_list(partitions));

        let report = self.reconciler.reconcile(client, partitions);
        if !report.is_clean() {
            warn!(
                "{} newly assigned partitions keep their broker position until the next cycle",
                report.failures.len()
            );
        }
        report
    }

    pub fn on_revoked(
        &self,
        client: &dyn PartitionControl,
        partitions: &[PartitionKey],
    ) -> CommitOutcome {
        if partitions.is_empty() {
            return CommitOutcome::Skipped;
        }

        self.metrics.record_revocation();
        info!("Partitions revoked: {}", display_list(partitions));

        let outcome = self.committer.commit(client, partitions);
        if let CommitOutcome::Failed(_) = outcome {
            warn!("Commit on revocation failed, dropping ownership anyway");
        }
        self.owned.remove_all(partitions);
        outcome
    }
}

fn display_list(partitions: &[PartitionKey]) -> String {
    partitions
        .iter()
        .map(PartitionKey::encode)
        .collect::<Vec<_>>()
        .join(",")
}
