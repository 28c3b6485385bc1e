use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::SourceError;
use crate::partition::PartitionKey;
use crate::position::{PositionStore, confirmed_offsets};
use crate::source::PartitionControl;
use crate::telemetry::TaskMetrics;

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Partitions whose cursor was moved, with the offset of the next read.
    pub repositioned: Vec<(PartitionKey, i64)>,
    pub failures: Vec<(PartitionKey, SourceError)>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Moves read cursors back to just after the last confirmed delivery.
///
/// Partitions with no confirmed position keep the broker-default cursor.
pub struct OffsetReconciler {
    store: Arc<dyn PositionStore>,
    metrics: Arc<TaskMetrics>,
}

impl OffsetReconciler {
    pub fn new(store: Arc<dyn PositionStore>, metrics: Arc<TaskMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Seeks every partition of `partitions` that has a confirmed offset to
    /// `confirmed + 1`.
    ///
    /// A failed seek does not stop the pass, the remaining partitions are
    /// still repositioned.
    pub fn reconcile(
        &self,
        client: &dyn PartitionControl,
        partitions: &[PartitionKey],
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for (partition, confirmed) in confirmed_offsets(self.store.as_ref(), partitions) {
            let next = confirmed.saturating_add(1);
            match client.seek(&partition, next) {
                Ok(()) => {
                    debug!("Seeked {} to offset {}", partition, next);
                    self.metrics.record_seek(true);
                    report.repositioned.push((partition, next));
                }
                Err(e) => {
                    // usually the partition was revoked mid-cycle, the next rebalance fixes it
                    warn!(
                        "Failed to seek {} to offset {}, will retry: {}",
                        partition, next, e
                    );
                    self.metrics.record_seek(false);
                    report.failures.push((partition, e));
                }
            }
        }

        report
    }
}
