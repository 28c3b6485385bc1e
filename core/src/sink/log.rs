use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::SinkError;
use crate::partition::PartitionKey;
use crate::position::MemoryPositionStore;
use crate::sink::Sink;
use crate::transcode::TranscodedEntry;

/// Writes entries as JSON lines to the log and confirms them immediately.
pub struct LogSink {
    store: Arc<MemoryPositionStore>,
}

impl LogSink {
    pub fn new(store: Arc<MemoryPositionStore>) -> Self {
        Self { store }
    }
}

impl Sink for LogSink {
    async fn put(&self, entries: Vec<TranscodedEntry>) -> Result<(), SinkError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut highest: BTreeMap<PartitionKey, i64> = BTreeMap::new();
        for entry in &entries {
            let partition = entry.source.partition_key()?;
            let offset = entry.source.offset()?;
            highest
                .entry(partition)
                .and_modify(|current| *current = (*current).max(offset))
                .or_insert(offset);
        }

        let count = entries.len();
        for entry in &entries {
            let line = serde_json::to_string(entry).map_err(|e| SinkError::Delivery {
                count,
                reason: e.to_string(),
            })?;
            info!("{}", line);
        }

        for (partition, offset) in &highest {
            self.store.confirm(partition, *offset);
            debug!("Confirmed offset {} for partition {}", offset, partition);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::confirmed_offset;
    use crate::source::RawRecord;
    use crate::transcode::transcode;
    use chrono::Utc;

    fn entry(partition: &PartitionKey, offset: i64) -> TranscodedEntry {
        transcode(
            RawRecord {
                partition: partition.clone(),
                offset,
                key: None,
                value: b"v".to_vec(),
                headers: BTreeMap::new(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_put_confirms_highest_offset_per_partition() {
        let store = Arc::new(MemoryPositionStore::new());
        let sink = LogSink::new(store.clone());
        let p0 = PartitionKey::new("orders", 0);
        let p1 = PartitionKey::new("a-b", 3);

        sink.put(vec![entry(&p0, 4), entry(&p1, 9), entry(&p0, 5)])
            .await
            .unwrap();

        assert_eq!(confirmed_offset(store.as_ref(), &p0), Some(5));
        assert_eq!(confirmed_offset(store.as_ref(), &p1), Some(9));
    }

    #[tokio::test]
    async fn test_bad_source_position_confirms_nothing() {
        let store = Arc::new(MemoryPositionStore::new());
        let sink = LogSink::new(store.clone());
        let p0 = PartitionKey::new("orders", 0);

        let mut broken = entry(&p0, 7);
        broken.source.position = b"seven".to_vec();
        let result = sink.put(vec![entry(&p0, 6), broken]).await;

        assert!(matches!(result, Err(SinkError::SourcePosition(_))));
        assert_eq!(confirmed_offset(store.as_ref(), &p0), None);
    }
}
