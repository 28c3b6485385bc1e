pub mod kafka;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::KafkaOptions;
use crate::errors::SourceError;
use crate::partition::{CommitBatch, PartitionKey};
use crate::rebalance::RebalanceListener;

/// A message read from the source log, before transcoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub partition: PartitionKey,
    pub offset: i64,
    /// `None` when the message carries no key at all.
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    /// Header values are kept verbatim, a header may have no value.
    pub headers: BTreeMap<String, Option<Vec<u8>>>,
}

/// Client operations that are allowed from inside a rebalance callback.
///
/// Rebalance callbacks run on the polling call path, so implementations only
/// ever get called from the thread that drives [`SourceClient::poll_batch`].
pub trait PartitionControl {
    /// Moves the read cursor of an assigned partition.
    fn seek(&self, partition: &PartitionKey, offset: i64) -> Result<(), SourceError>;

    /// Synchronously commits `batch` to the source broker.
    fn commit_sync(&self, batch: &CommitBatch) -> Result<(), SourceError>;
}

/// Handle on the source broker.
///
/// Not safe for concurrent use: the owning task is the only caller.
#[allow(async_fn_in_trait)]
pub trait SourceClient: PartitionControl {
    fn subscribe(&self, topics: &[String]) -> Result<(), SourceError>;

    /// Reads up to `max_records`, waiting at most `timeout`.
    ///
    /// Rebalance events are delivered to the listener from within this call.
    /// An empty batch means the wait elapsed with nothing to read.
    async fn poll_batch(
        &self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<RawRecord>, SourceError>;

    fn pause(&self, partitions: &[PartitionKey]) -> Result<(), SourceError>;

    fn resume(&self, partitions: &[PartitionKey]) -> Result<(), SourceError>;

    /// Releases the client handle. Later calls fail with [`SourceError::Closed`].
    async fn close(&self) -> Result<(), SourceError>;
}

/// Creates a [`SourceClient`] wired to a rebalance listener.
pub trait SourceConnector {
    type Client: SourceClient;

    fn connect(
        &self,
        options: &KafkaOptions,
        listener: Arc<RebalanceListener>,
    ) -> Result<Self::Client, SourceError>;
}
