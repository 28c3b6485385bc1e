use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::config::KafkaOptions;
use crate::errors::{KafkaError, SourceError};
use crate::partition::{CommitBatch, PartitionKey};
use crate::rebalance::RebalanceListener;
use crate::source::{PartitionControl, RawRecord, SourceClient, SourceConnector};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer context that routes group membership changes to the listener.
///
/// librdkafka serves rebalance callbacks from inside the consumer poll, so
/// the listener's seeks and commits run on the polling task.
pub struct BridgeConsumerContext {
    listener: Arc<RebalanceListener>,
}

impl ClientContext for BridgeConsumerContext {}

impl ConsumerContext for BridgeConsumerContext {
    fn pre_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let partitions = partition_keys(tpl);
                self.listener
                    .on_revoked(&ConsumerControl(base_consumer), &partitions);
            }
            Rebalance::Assign(tpl) => {
                debug!("Pre-rebalance assign of {} partitions", tpl.count());
            }
            Rebalance::Error(e) => {
                error!("Rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions = partition_keys(tpl);
                self.listener
                    .on_assigned(&ConsumerControl(base_consumer), &partitions);
            }
            Rebalance::Revoke(_) => {
                debug!("Post-rebalance revoke completed");
            }
            Rebalance::Error(e) => {
                error!("Post-rebalance error: {}", e);
            }
        }
    }
}

/// [`PartitionControl`] over any rdkafka consumer handle.
struct ConsumerControl<'a, K>(&'a K);

impl<K> PartitionControl for ConsumerControl<'_, K>
where
    K: Consumer<BridgeConsumerContext>,
{
    fn seek(&self, partition: &PartitionKey, offset: i64) -> Result<(), SourceError> {
        self.0
            .seek(
                partition.topic(),
                partition.partition(),
                Offset::Offset(offset),
                SEEK_TIMEOUT,
            )
            .map_err(|e| {
                SourceError::transient(KafkaError::Seek {
                    partition: partition.encode(),
                    offset,
                    reason: e.to_string(),
                })
            })
    }

    fn commit_sync(&self, batch: &CommitBatch) -> Result<(), SourceError> {
        let tpl = commit_list(batch).map_err(SourceError::transient)?;
        self.0.commit(&tpl, CommitMode::Sync).map_err(|e| {
            SourceError::transient(KafkaError::OffsetCommit {
                reason: e.to_string(),
            })
        })
    }
}

pub(crate) fn partition_keys(tpl: &TopicPartitionList) -> Vec<PartitionKey> {
    tpl.elements()
        .iter()
        .map(|elem| PartitionKey::new(elem.topic(), elem.partition()))
        .collect()
}

pub(crate) fn commit_list(batch: &CommitBatch) -> Result<TopicPartitionList, KafkaError> {
    let mut tpl = TopicPartitionList::with_capacity(batch.len());
    for (partition, offset) in batch.iter() {
        tpl.add_partition_offset(partition.topic(), partition.partition(), Offset::Offset(offset))
            .map_err(|e| KafkaError::OffsetCommit {
                reason: format!("{}: {}", partition, e),
            })?;
    }
    Ok(tpl)
}

fn partition_list(partitions: &[PartitionKey]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::with_capacity(partitions.len());
    for partition in partitions {
        tpl.add_partition(partition.topic(), partition.partition());
    }
    tpl
}

pub(crate) fn client_config(options: &KafkaOptions) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config
        .set("bootstrap.servers", &options.bootstrap_servers)
        .set("group.id", &options.consumer_group)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        // offsets are committed from confirmed positions only
        .set("enable.auto.commit", "false")
        .set(
            "auto.offset.reset",
            options.auto_offset_reset.as_deref().unwrap_or("latest"),
        );

    if let Some(timeout) = options.session_timeout_ms {
        client_config.set("session.timeout.ms", timeout.to_string());
    }

    if let Some(heartbeat) = options.heartbeat_interval_ms {
        client_config.set("heartbeat.interval.ms", heartbeat.to_string());
    }

    if let Some(security_protocol) = &options.security_protocol {
        client_config.set("security.protocol", security_protocol);
    }

    if let Some(sasl_mechanisms) = &options.sasl_mechanisms {
        client_config.set("sasl.mechanisms", sasl_mechanisms);
    }

    if let Some(sasl_username) = &options.sasl_username {
        client_config.set("sasl.username", sasl_username);
    }

    if let Some(sasl_password) = &options.sasl_password {
        client_config.set("sasl.password", sasl_password);
    }

    if let Some(ssl_ca_location) = &options.ssl_ca_location {
        client_config.set("ssl.ca.location", ssl_ca_location);
    }

    client_config
}

pub struct KafkaConnector;

impl SourceConnector for KafkaConnector {
    type Client = KafkaSourceClient;

    fn connect(
        &self,
        options: &KafkaOptions,
        listener: Arc<RebalanceListener>,
    ) -> Result<Self::Client, SourceError> {
        KafkaSourceClient::new(options, listener)
    }
}

pub struct KafkaSourceClient {
    consumer: StreamConsumer<BridgeConsumerContext>,
    closed: AtomicBool,
}

impl KafkaSourceClient {
    pub fn new(
        options: &KafkaOptions,
        listener: Arc<RebalanceListener>,
    ) -> Result<Self, SourceError> {
        let consumer: StreamConsumer<BridgeConsumerContext> = client_config(options)
            .create_with_context(BridgeConsumerContext { listener })
            .map_err(|e| {
                SourceError::Unrecoverable(Box::new(KafkaError::ConsumerCreation {
                    reason: e.to_string(),
                }))
            })?;

        Ok(Self {
            consumer,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }
        Ok(())
    }

    fn convert_message(message: &BorrowedMessage<'_>) -> RawRecord {
        let mut headers = BTreeMap::new();
        if let Some(header_map) = message.headers() {
            for header in header_map.iter() {
                headers.insert(header.key.to_string(), header.value.map(<[u8]>::to_vec));
            }
        }

        RawRecord {
            partition: PartitionKey::new(message.topic(), message.partition()),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
        }
    }
}

impl PartitionControl for KafkaSourceClient {
    fn seek(&self, partition: &PartitionKey, offset: i64) -> Result<(), SourceError> {
        self.ensure_open()?;
        ConsumerControl(&self.consumer).seek(partition, offset)
    }

    fn commit_sync(&self, batch: &CommitBatch) -> Result<(), SourceError> {
        self.ensure_open()?;
        ConsumerControl(&self.consumer).commit_sync(batch)
    }
}

impl SourceClient for KafkaSourceClient {
    fn subscribe(&self, topics: &[String]) -> Result<(), SourceError> {
        self.ensure_open()?;
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topic_refs).map_err(|e| {
            SourceError::connection(KafkaError::Subscription {
                topics: topics.join(","),
                reason: e.to_string(),
            })
        })?;

        info!("Subscribed to Kafka topics: {}", topics.join(","));
        Ok(())
    }

    async fn poll_batch(
        &self,
        max_records: usize,
        wait: Duration,
    ) -> Result<Vec<RawRecord>, SourceError> {
        self.ensure_open()?;

        let mut records = Vec::new();
        let deadline = Instant::now() + wait;

        while records.len() < max_records {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.consumer.recv()).await {
                Ok(Ok(message)) => {
                    debug!(
                        "Received message from partition {} offset {}",
                        message.partition(),
                        message.offset()
                    );
                    records.push(Self::convert_message(&message));
                }
                Ok(Err(e)) => {
                    if records.is_empty() {
                        return Err(SourceError::transient(KafkaError::Consumption {
                            reason: e.to_string(),
                        }));
                    }
                    warn!("Error receiving message, returning partial batch: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        if !records.is_empty() {
            debug!("Consumed batch of {} messages", records.len());
        }
        Ok(records)
    }

    fn pause(&self, partitions: &[PartitionKey]) -> Result<(), SourceError> {
        self.ensure_open()?;
        self.consumer
            .pause(&partition_list(partitions))
            .map_err(|e| {
                SourceError::transient(KafkaError::Pause {
                    reason: e.to_string(),
                })
            })
    }

    fn resume(&self, partitions: &[PartitionKey]) -> Result<(), SourceError> {
        self.ensure_open()?;
        self.consumer
            .resume(&partition_list(partitions))
            .map_err(|e| {
                SourceError::transient(KafkaError::Resume {
                    reason: e.to_string(),
                })
            })
    }

    async fn close(&self) -> Result<(), SourceError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // leaving the group here rather than on drop keeps revocation on this task
        self.consumer.unsubscribe();
        info!("Kafka consumer closed");
        Ok(())
    }
}
