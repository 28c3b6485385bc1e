use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::PositionError;

const SEPARATOR: char = '-';

/// Identity of one partition of a source topic.
///
/// Crosses the position store boundary in its textual `name-index` form, see
/// [`PartitionKey::encode`] and [`PartitionKey::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    topic: String,
    partition: i32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    /// Parses the `name-index` form.
    ///
    /// The topic name may itself contain `-`, so only the last occurrence splits
    /// name from index. The name must be non-empty and the index a non-negative
    /// decimal number.
    pub fn parse(encoded: &str) -> Result<Self, PositionError> {
        let malformed = || PositionError::MalformedPartition {
            key: encoded.to_string(),
        };

        let (topic, index) = encoded.rsplit_once(SEPARATOR).ok_or_else(malformed)?;
        if topic.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let partition = index.parse::<i32>().map_err(|_| malformed())?;

        Ok(Self::new(topic, partition))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PositionError> {
        let encoded = std::str::from_utf8(bytes).map_err(|_| PositionError::MalformedPartition {
            key: String::from_utf8_lossy(bytes).into_owned(),
        })?;
        Self::parse(encoded)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.topic, SEPARATOR, self.partition)
    }
}

/// Partitions currently assigned to this task.
///
/// Shared between the rebalance listener and the poll loop. Readers always get
/// a snapshot, so a callback mutating the set never disturbs an iteration in
/// progress.
#[derive(Debug, Clone, Default)]
pub struct OwnedPartitions {
    inner: Arc<Mutex<BTreeSet<PartitionKey>>>,
}

impl OwnedPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<PartitionKey>> {
        // the set holds plain keys, a panic elsewhere cannot leave it half-updated
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_all<'a>(&self, partitions: impl IntoIterator<Item = &'a PartitionKey>) {
        let mut owned = self.lock();
        for partition in partitions {
            owned.insert(partition.clone());
        }
    }

    pub fn remove_all<'a>(&self, partitions: impl IntoIterator<Item = &'a PartitionKey>) {
        let mut owned = self.lock();
        for partition in partitions {
            owned.remove(partition);
        }
    }

    pub fn contains(&self, partition: &PartitionKey) -> bool {
        self.lock().contains(partition)
    }

    pub fn snapshot(&self) -> Vec<PartitionKey> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Offsets to commit to the source broker, one per partition.
///
/// Only ever built from confirmed positions, never from read cursors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    offsets: BTreeMap<PartitionKey, i64>,
}

impl CommitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, partition: PartitionKey, offset: i64) {
        self.offsets.insert(partition, offset);
    }

    pub fn get(&self, partition: &PartitionKey) -> Option<i64> {
        self.offsets.get(partition).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PartitionKey, i64)> {
        self.offsets.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

impl FromIterator<(PartitionKey, i64)> for CommitBatch {
    fn from_iter<T: IntoIterator<Item = (PartitionKey, i64)>>(iter: T) -> Self {
        Self {
            offsets: iter.into_iter().collect(),
        }
    }
}
