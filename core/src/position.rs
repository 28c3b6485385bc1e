use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::warn;

use crate::errors::PositionError;
use crate::partition::PartitionKey;

/// Read-only view of the last confirmed delivered offset per partition.
///
/// Keys are encoded partition keys (`name-index`), values are the confirmed
/// offset as a UTF-8 decimal string. The table is written out-of-band by the
/// downstream confirmation path. A missing key means nothing has been
/// confirmed yet.
#[cfg_attr(test, mockall::automock)]
pub trait PositionStore: Send + Sync {
    fn get_position(&self, partition: &[u8]) -> Option<Vec<u8>>;

    /// Returns the subset of `partitions` that have a confirmed position.
    fn get_positions(&self, partitions: &[Vec<u8>]) -> HashMap<Vec<u8>, Vec<u8>>;
}

/// Parses a stored offset. Negative values are rejected, the broker client
/// reads them as logical positions such as end-of-log.
pub fn parse_offset(partition: &PartitionKey, value: &[u8]) -> Result<i64, PositionError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|offset| *offset >= 0)
        .ok_or_else(|| PositionError::MalformedOffset {
            partition: partition.encode(),
            value: String::from_utf8_lossy(value).into_owned(),
        })
}

/// Confirmed offset of a single partition, if one is stored and parses.
///
/// A malformed stored value is logged and treated as absent.
pub fn confirmed_offset(store: &dyn PositionStore, partition: &PartitionKey) -> Option<i64> {
    let value = store.get_position(&partition.to_bytes())?;
    match parse_offset(partition, &value) {
        Ok(offset) => Some(offset),
        Err(e) => {
            warn!("Ignoring confirmed position: {}", e);
            None
        }
    }
}

/// Confirmed offsets for each of `partitions` that has a usable one.
///
/// Entries the store returns that were not asked for are dropped, since a
/// store may hold positions for every task of the connector.
pub fn confirmed_offsets(
    store: &dyn PositionStore,
    partitions: &[PartitionKey],
) -> Vec<(PartitionKey, i64)> {
    if partitions.is_empty() {
        return Vec::new();
    }

    let keys: Vec<Vec<u8>> = partitions.iter().map(PartitionKey::to_bytes).collect();
    let positions = store.get_positions(&keys);

    let mut offsets = Vec::with_capacity(positions.len());
    for (raw_key, raw_value) in positions {
        let partition = match PartitionKey::from_bytes(&raw_key) {
            Ok(partition) => partition,
            Err(e) => {
                warn!("Skipping confirmed position: {}", e);
                continue;
            }
        };
        if !partitions.contains(&partition) {
            continue;
        }
        match parse_offset(&partition, &raw_value) {
            Ok(offset) => offsets.push((partition, offset)),
            Err(e) => warn!("Skipping confirmed position: {}", e),
        }
    }
    offsets.sort();
    offsets
}

/// In-process position table.
///
/// The write side stands in for the downstream confirmation path.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    positions: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `offset` as the last confirmed delivered offset of `partition`.
    pub fn confirm(&self, partition: &PartitionKey, offset: i64) {
        self.put_raw(partition.to_bytes(), offset.to_string().into_bytes());
    }

    pub fn put_raw(&self, partition: Vec<u8>, position: Vec<u8>) {
        self.positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(partition, position);
    }

    pub fn remove(&self, partition: &PartitionKey) {
        self.positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&partition.to_bytes());
    }
}

impl PositionStore for MemoryPositionStore {
    fn get_position(&self, partition: &[u8]) -> Option<Vec<u8>> {
        self.positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(partition)
            .cloned()
    }

    fn get_positions(&self, partitions: &[Vec<u8>]) -> HashMap<Vec<u8>, Vec<u8>> {
        let positions = self.positions.read().unwrap_or_else(PoisonError::into_inner);
        partitions
            .iter()
            .filter_map(|key| positions.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_partial_lookup() {
        let store = MemoryPositionStore::new();
        let p0 = PartitionKey::new("orders", 0);
        let p1 = PartitionKey::new("orders", 1);
        store.confirm(&p0, 41);

        let found = store.get_positions(&[p0.to_bytes(), p1.to_bytes()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[&p0.to_bytes()], b"41".to_vec());
        assert_eq!(store.get_position(&p1.to_bytes()), None);
    }

    #[test]
    fn test_confirmed_offset_ignores_malformed_value() {
        let store = MemoryPositionStore::new();
        let p0 = PartitionKey::new("orders", 0);
        store.put_raw(p0.to_bytes(), b"not-a-number".to_vec());
        assert_eq!(confirmed_offset(&store, &p0), None);

        store.confirm(&p0, 7);
        assert_eq!(confirmed_offset(&store, &p0), Some(7));
    }

    #[test]
    fn test_confirmed_offsets_skips_only_the_malformed_partition() {
        let store = MemoryPositionStore::new();
        let p0 = PartitionKey::new("orders", 0);
        let p1 = PartitionKey::new("orders", 1);
        let p2 = PartitionKey::new("orders", 2);
        store.confirm(&p0, 10);
        store.put_raw(p1.to_bytes(), b"ten".to_vec());
        store.confirm(&p2, 12);

        let offsets = confirmed_offsets(&store, &[p0.clone(), p1, p2.clone()]);
        assert_eq!(offsets, vec![(p0, 10), (p2, 12)]);
    }

    #[test]
    fn test_confirmed_offsets_drops_unrequested_entries() {
        let p0 = PartitionKey::new("orders", 0);
        let other_task = PartitionKey::new("orders", 9);

        let mut store = MockPositionStore::new();
        let (requested, foreign) = (p0.to_bytes(), other_task.to_bytes());
        let expected = requested.clone();
        store
            .expect_get_positions()
            .withf(move |keys: &[Vec<u8>]| keys == [expected.clone()])
            .times(1)
            .returning(move |_| {
                HashMap::from([
                    (requested.clone(), b"5".to_vec()),
                    (foreign.clone(), b"6".to_vec()),
                ])
            });

        let offsets = confirmed_offsets(&store, &[p0.clone()]);
        assert_eq!(offsets, vec![(p0, 5)]);
    }

    #[test]
    fn test_confirmed_offsets_skips_store_for_empty_request() {
        let mut store = MockPositionStore::new();
        store.expect_get_positions().never();
        assert!(confirmed_offsets(&store, &[]).is_empty());
    }

    #[test]
    fn test_parse_offset_trims_and_rejects_negative() {
        let p = PartitionKey::new("orders", 0);
        assert_eq!(parse_offset(&p, b" 99\n"), Ok(99));
        assert_eq!(parse_offset(&p, b"0"), Ok(0));
        assert_eq!(
            parse_offset(&p, b"-1"),
            Err(PositionError::MalformedOffset {
                partition: "orders-0".to_string(),
                value: "-1".to_string(),
            })
        );
        assert!(parse_offset(&p, b"-2").is_err());
        assert!(parse_offset(&p, b"").is_err());
    }
}
