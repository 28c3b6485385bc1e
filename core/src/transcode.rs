use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PositionError;
use crate::partition::PartitionKey;
use crate::source::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bytes,
    Map,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub index: usize,
    pub name: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Source topic of the record.
    pub name: String,
    pub data_source: String,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn for_topic(topic: &str) -> Self {
        Self {
            name: topic.to_string(),
            data_source: topic.to_string(),
            fields: vec![
                Field {
                    index: 0,
                    name: "key".to_string(),
                    field_type: FieldType::Bytes,
                },
                Field {
                    index: 1,
                    name: "value".to_string(),
                    field_type: FieldType::Bytes,
                },
                Field {
                    index: 2,
                    name: "header".to_string(),
                    field_type: FieldType::Map,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Create,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPayload {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub header: BTreeMap<String, Option<Vec<u8>>>,
}

/// Where an entry was read from, in the form the position store uses.
///
/// `partition` is the encoded partition key and `position` the decimal
/// offset, both UTF-8. The confirmation path writes these back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub partition: Vec<u8>,
    pub position: Vec<u8>,
}

impl SourcePosition {
    pub fn new(partition: &PartitionKey, offset: i64) -> Self {
        Self {
            partition: partition.to_bytes(),
            position: offset.to_string().into_bytes(),
        }
    }

    pub fn partition_key(&self) -> Result<PartitionKey, PositionError> {
        PartitionKey::from_bytes(&self.partition)
    }

    pub fn offset(&self) -> Result<i64, PositionError> {
        let partition = self.partition_key()?;
        crate::position::parse_offset(&partition, &self.position)
    }
}

/// A source record in the generic downstream form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodedEntry {
    pub schema: Schema,
    pub entry_type: EntryType,
    /// Destination queue, named after the source topic.
    pub queue: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EntryPayload,
    pub source: SourcePosition,
}

/// Maps one record to its downstream entry.
///
/// Bytes are passed through untouched, validation belongs to the sink.
pub fn transcode(record: RawRecord, timestamp: DateTime<Utc>) -> TranscodedEntry {
    let topic = record.partition.topic().to_string();
    TranscodedEntry {
        schema: Schema::for_topic(&topic),
        entry_type: EntryType::Create,
        source: SourcePosition::new(&record.partition, record.offset),
        queue: topic,
        timestamp,
        payload: EntryPayload {
            key: record.key,
            value: record.value,
            header: record.headers,
        },
    }
}
