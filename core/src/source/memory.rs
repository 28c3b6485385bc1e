//! In-process partitioned log with single-member group semantics.
//!
//! Stands in for a broker in tests and local runs. Group membership changes
//! are scripted with [`MemoryBroker::assign`] and [`MemoryBroker::revoke`]
//! and delivered to the rebalance listener at the start of the next
//! [`SourceClient::poll_batch`], on the polling call path.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::warn;

use crate::config::KafkaOptions;
use crate::errors::{KafkaError, SourceError};
use crate::partition::{CommitBatch, PartitionKey};
use crate::rebalance::RebalanceListener;
use crate::source::{PartitionControl, RawRecord, SourceClient, SourceConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    value: Vec<u8>,
    headers: BTreeMap<String, Option<Vec<u8>>>,
}

#[derive(Debug)]
enum MembershipEvent {
    Assign(Vec<PartitionKey>),
    Revoke(Vec<PartitionKey>),
}

#[derive(Debug, Default)]
struct BrokerState {
    logs: HashMap<String, Vec<Vec<StoredRecord>>>,
    reset: OffsetReset,
    pending: VecDeque<MembershipEvent>,
    assigned: BTreeSet<PartitionKey>,
    cursors: HashMap<PartitionKey, i64>,
    paused: HashSet<PartitionKey>,
    committed: HashMap<PartitionKey, i64>,
    commit_requests: Vec<CommitBatch>,
    seeks: Vec<(PartitionKey, i64)>,
    subscriptions: Vec<String>,
    fail_next_commit: Option<String>,
    fail_next_poll: Option<String>,
    polls: usize,
    closed: bool,
}

impl BrokerState {
    fn log_len(&self, partition: &PartitionKey) -> i64 {
        usize::try_from(partition.partition())
            .ok()
            .and_then(|index| self.logs.get(partition.topic())?.get(index))
            .map_or(0, |records| records.len() as i64)
    }

    fn record_at(&self, partition: &PartitionKey, offset: i64) -> Option<&StoredRecord> {
        let index = usize::try_from(partition.partition()).ok()?;
        let offset = usize::try_from(offset).ok()?;
        self.logs.get(partition.topic())?.get(index)?.get(offset)
    }

    fn start_position(&self, partition: &PartitionKey) -> i64 {
        if let Some(committed) = self.committed.get(partition) {
            return *committed;
        }
        match self.reset {
            OffsetReset::Earliest => 0,
            OffsetReset::Latest => self.log_len(partition),
        }
    }
}

/// Shared handle on the in-process log. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new(reset: OffsetReset) -> Self {
        let broker = Self::default();
        broker.lock().reset = reset;
        broker
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_topic(&self, topic: &str, partitions: usize) {
        self.lock()
            .logs
            .insert(topic.to_string(), vec![Vec::new(); partitions]);
    }

    /// Appends a record and returns its offset, or `None` for a negative
    /// partition index.
    pub fn append(
        &self,
        partition: &PartitionKey,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> Option<i64> {
        self.append_with_headers(partition, key, value, BTreeMap::new())
    }

    pub fn append_with_headers(
        &self,
        partition: &PartitionKey,
        key: Option<&[u8]>,
        value: &[u8],
        headers: BTreeMap<String, Option<Vec<u8>>>,
    ) -> Option<i64> {
        let Ok(index) = usize::try_from(partition.partition()) else {
            warn!("Rejecting append to invalid partition {}", partition);
            return None;
        };

        let mut state = self.lock();
        let partitions = state.logs.entry(partition.topic().to_string()).or_default();
        if partitions.len() <= index {
            partitions.resize(index + 1, Vec::new());
        }
        let records = &mut partitions[index];
        records.push(StoredRecord {
            key: key.map(<[u8]>::to_vec),
            value: value.to_vec(),
            headers,
        });
        Some(records.len() as i64 - 1)
    }

    /// Queues an assignment, delivered on the next poll.
    pub fn assign(&self, partitions: &[PartitionKey]) {
        self.lock()
            .pending
            .push_back(MembershipEvent::Assign(partitions.to_vec()));
    }

    /// Queues a revocation, delivered on the next poll.
    pub fn revoke(&self, partitions: &[PartitionKey]) {
        self.lock()
            .pending
            .push_back(MembershipEvent::Revoke(partitions.to_vec()));
    }

    pub fn fail_next_commit(&self, reason: &str) {
        self.lock().fail_next_commit = Some(reason.to_string());
    }

    pub fn fail_next_poll(&self, reason: &str) {
        self.lock().fail_next_poll = Some(reason.to_string());
    }

    pub fn cursor(&self, partition: &PartitionKey) -> Option<i64> {
        self.lock().cursors.get(partition).copied()
    }

    pub fn committed(&self, partition: &PartitionKey) -> Option<i64> {
        self.lock().committed.get(partition).copied()
    }

    /// Every commit request received, including the failed ones.
    pub fn commit_requests(&self) -> Vec<CommitBatch> {
        self.lock().commit_requests.clone()
    }

    pub fn seeks(&self) -> Vec<(PartitionKey, i64)> {
        self.lock().seeks.clone()
    }

    pub fn assigned(&self) -> Vec<PartitionKey> {
        self.lock().assigned.iter().cloned().collect()
    }

    pub fn is_paused(&self, partition: &PartitionKey) -> bool {
        self.lock().paused.contains(partition)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    pub fn polls(&self) -> usize {
        self.lock().polls
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl SourceConnector for MemoryBroker {
    type Client = MemorySourceClient;

    fn connect(
        &self,
        _options: &KafkaOptions,
        listener: Arc<RebalanceListener>,
    ) -> Result<Self::Client, SourceError> {
        Ok(MemorySourceClient {
            broker: self.clone(),
            listener,
        })
    }
}

pub struct MemorySourceClient {
    broker: MemoryBroker,
    listener: Arc<RebalanceListener>,
}

impl MemorySourceClient {
    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.broker.lock().closed {
            return Err(SourceError::Closed);
        }
        Ok(())
    }

    /// Delivers queued membership changes. The state lock is released while
    /// the listener runs, it calls back into seek and commit.
    fn deliver_membership_events(&self) {
        loop {
            let event = self.broker.lock().pending.pop_front();
            match event {
                Some(MembershipEvent::Revoke(partitions)) => {
                    let owned: Vec<PartitionKey> = {
                        let state = self.broker.lock();
                        partitions
                            .into_iter()
                            .filter(|p| state.assigned.contains(p))
                            .collect()
                    };
                    self.listener.on_revoked(self, &owned);
                    let mut state = self.broker.lock();
                    for partition in &owned {
                        state.assigned.remove(partition);
                        state.cursors.remove(partition);
                        state.paused.remove(partition);
                    }
                }
                Some(MembershipEvent::Assign(partitions)) => {
                    {
                        let mut state = self.broker.lock();
                        for partition in &partitions {
                            let start = state.start_position(partition);
                            state.assigned.insert(partition.clone());
                            state.cursors.insert(partition.clone(), start);
                        }
                    }
                    self.listener.on_assigned(self, &partitions);
                }
                None => break,
            }
        }
    }

    /// Takes one record per readable partition in turn until the batch is
    /// full or every partition is drained.
    fn read(&self, max_records: usize) -> Vec<RawRecord> {
        let mut state = self.broker.lock();
        let mut cursors: Vec<(PartitionKey, i64)> = state
            .assigned
            .iter()
            .filter(|p| !state.paused.contains(*p))
            .filter_map(|p| state.cursors.get(p).map(|cursor| (p.clone(), *cursor)))
            .collect();

        let mut records = Vec::new();
        let mut progressed = true;
        while progressed && records.len() < max_records {
            progressed = false;
            for (partition, cursor) in cursors.iter_mut() {
                if records.len() >= max_records {
                    break;
                }
                let Some(stored) = state.record_at(partition, *cursor) else {
                    continue;
                };
                records.push(RawRecord {
                    partition: partition.clone(),
                    offset: *cursor,
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                    headers: stored.headers.clone(),
                });
                *cursor += 1;
                progressed = true;
            }
        }

        for (partition, cursor) in cursors {
            state.cursors.insert(partition, cursor);
        }
        records
    }
}

impl PartitionControl for MemorySourceClient {
    fn seek(&self, partition: &PartitionKey, offset: i64) -> Result<(), SourceError> {
        let mut state = self.broker.lock();
        if state.closed {
            return Err(SourceError::Closed);
        }
        if !state.assigned.contains(partition) {
            return Err(SourceError::NotAssigned {
                partition: partition.encode(),
            });
        }
        state.cursors.insert(partition.clone(), offset);
        state.seeks.push((partition.clone(), offset));
        Ok(())
    }

    fn commit_sync(&self, batch: &CommitBatch) -> Result<(), SourceError> {
        let mut state = self.broker.lock();
        if state.closed {
            return Err(SourceError::Closed);
        }
        state.commit_requests.push(batch.clone());
        if let Some(reason) = state.fail_next_commit.take() {
            return Err(SourceError::transient(KafkaError::OffsetCommit { reason }));
        }
        for (partition, offset) in batch.iter() {
            state.committed.insert(partition.clone(), offset);
        }
        Ok(())
    }
}

impl SourceClient for MemorySourceClient {
    fn subscribe(&self, topics: &[String]) -> Result<(), SourceError> {
        self.ensure_open()?;
        self.broker.lock().subscriptions = topics.to_vec();
        Ok(())
    }

    async fn poll_batch(
        &self,
        max_records: usize,
        wait: Duration,
    ) -> Result<Vec<RawRecord>, SourceError> {
        self.ensure_open()?;
        let failure = {
            let mut state = self.broker.lock();
            state.polls += 1;
            state.fail_next_poll.take()
        };
        if let Some(reason) = failure {
            return Err(SourceError::transient(KafkaError::Consumption { reason }));
        }

        self.deliver_membership_events();

        let records = self.read(max_records);
        if records.is_empty() {
            tokio::time::sleep(wait).await;
        }
        Ok(records)
    }

    fn pause(&self, partitions: &[PartitionKey]) -> Result<(), SourceError> {
        self.ensure_open()?;
        self.broker.lock().paused.extend(partitions.iter().cloned());
        Ok(())
    }

    fn resume(&self, partitions: &[PartitionKey]) -> Result<(), SourceError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        for partition in partitions {
            state.paused.remove(partition);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.broker.lock().closed = true;
        Ok(())
    }
}
