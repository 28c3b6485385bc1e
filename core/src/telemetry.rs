use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge_core=info,runner_container=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Counters shared by the poll loop and the rebalance listener.
#[derive(Debug, Default)]
pub struct TaskMetrics {
    polls: AtomicU64,
    empty_polls: AtomicU64,
    entries_emitted: AtomicU64,
    seeks: AtomicU64,
    seek_failures: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
    assignments: AtomicU64,
    revocations: AtomicU64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub empty_polls: u64,
    pub entries_emitted: u64,
    pub seeks: u64,
    pub seek_failures: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub assignments: u64,
    pub revocations: u64,
}

impl TaskMetrics {
    pub fn record_poll(&self, entries: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if entries == 0 {
            self.empty_polls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.entries_emitted
                .fetch_add(entries as u64, Ordering::Relaxed);
        }
    }

    pub fn record_seek(&self, ok: bool) {
        if ok {
            self.seeks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.seek_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_commit(&self, ok: bool) {
        if ok {
            self.commits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commit_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_assignment(&self) {
        self.assignments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revocation(&self) {
        self.revocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            entries_emitted: self.entries_emitted.load(Ordering::Relaxed),
            seeks: self.seeks.load(Ordering::Relaxed),
            seek_failures: self.seek_failures.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            assignments: self.assignments.load(Ordering::Relaxed),
            revocations: self.revocations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_counters() {
        let metrics = TaskMetrics::default();
        metrics.record_poll(0);
        metrics.record_poll(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.polls, 2);
        assert_eq!(snapshot.empty_polls, 1);
        assert_eq!(snapshot.entries_emitted, 3);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = TaskMetrics::default();
        metrics.record_commit(false);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["commit_failures"], 1);
        assert_eq!(json["commits"], 0);
    }
}
