use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to connect or communicate with the source: {source}")]
    Connection {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("A transient error occurred, the operation can be retried: {source}")]
    Transient {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Partition {partition} is not assigned to this consumer")]
    NotAssigned { partition: String },

    #[error("The source client has been closed")]
    Closed,

    #[error("Unrecoverable error from the source: {0}")]
    Unrecoverable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SourceError {
    pub fn connection(err: impl Into<KafkaError>) -> Self {
        SourceError::Connection {
            source: Box::new(err.into()),
        }
    }

    pub fn transient(err: impl Into<KafkaError>) -> Self {
        SourceError::Transient {
            source: Box::new(err.into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Failed to load configuration from {origin}: {error}")]
    LoadFailed {
        origin: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Error, Debug)]
pub enum KafkaError {
    #[error("Failed to create consumer: {reason}")]
    ConsumerCreation { reason: String },

    #[error("Failed to subscribe to topics {topics}: {reason}")]
    Subscription { topics: String, reason: String },

    #[error("Failed to consume messages: {reason}")]
    Consumption { reason: String },

    #[error("Failed to seek {partition} to offset {offset}: {reason}")]
    Seek {
        partition: String,
        offset: i64,
        reason: String,
    },

    #[error("Failed to commit offsets: {reason}")]
    OffsetCommit { reason: String },

    #[error("Failed to pause partitions: {reason}")]
    Pause { reason: String },

    #[error("Failed to resume partitions: {reason}")]
    Resume { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("Malformed partition key {key:?}")]
    MalformedPartition { key: String },

    #[error("Malformed confirmed offset {value:?} for partition {partition}")]
    MalformedOffset { partition: String, value: String },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to deliver {count} entries: {reason}")]
    Delivery { count: usize, reason: String },

    #[error("Entry carries unusable source position: {0}")]
    SourcePosition(#[from] PositionError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Config(_) => false,
            BridgeError::Source(SourceError::Closed) => false,
            BridgeError::Source(SourceError::Unrecoverable(_)) => false,
            BridgeError::Sink(SinkError::SourcePosition(_)) => false,
            BridgeError::Source(_) | BridgeError::Sink(SinkError::Delivery { .. }) => true,
        }
    }

    pub fn get_retry_delay_ms(&self) -> u64 {
        match self {
            BridgeError::Source(_) => 1000,
            BridgeError::Sink(_) => 2000,
            BridgeError::Config(_) => 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_fatal() {
        let err = BridgeError::Config(ConfigError::ValidationFailed {
            reason: "group id cannot be empty".to_string(),
        });
        assert!(!err.is_retryable());
        assert_eq!(err.get_retry_delay_ms(), 5000);
    }

    #[test]
    fn test_transient_source_errors_are_retryable() {
        let err = BridgeError::from(SourceError::transient(KafkaError::OffsetCommit {
            reason: "stale generation".to_string(),
        }));
        assert!(err.is_retryable());
        assert_eq!(err.get_retry_delay_ms(), 1000);
    }

    #[test]
    fn test_closed_source_is_fatal() {
        let err = BridgeError::from(SourceError::Closed);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_sink_delivery_retries_but_bad_position_does_not() {
        let delivery = BridgeError::from(SinkError::Delivery {
            count: 3,
            reason: "downstream unavailable".to_string(),
        });
        assert!(delivery.is_retryable());
        assert_eq!(delivery.get_retry_delay_ms(), 2000);

        let position = BridgeError::from(SinkError::SourcePosition(
            PositionError::MalformedPartition {
                key: "orders".to_string(),
            },
        ));
        assert!(!position.is_retryable());
    }

    #[test]
    fn test_load_failure_names_origin_and_cause() {
        let err = ConfigError::LoadFailed {
            origin: "bridge.yaml".to_string(),
            error: Box::new(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file")),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load configuration from bridge.yaml: no such file"
        );
    }

    #[test]
    fn test_source_error_display() {
        let err = SourceError::NotAssigned {
            partition: "orders-3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Partition orders-3 is not assigned to this consumer"
        );
    }
}
