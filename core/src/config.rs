use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::ConfigError;

const CONFIG_ENV_VAR: &str = "BRIDGE_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    pub kafka: KafkaOptions,
    #[serde(default)]
    pub task: TaskOptions,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaOptions {
    pub bootstrap_servers: String,
    pub consumer_group: String,
    /// Comma-separated topic names.
    pub topics: String,
    pub security_protocol: Option<String>,
    pub sasl_mechanisms: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub ssl_ca_location: Option<String>,
    pub auto_offset_reset: Option<String>,
    pub session_timeout_ms: Option<u32>,
    pub heartbeat_interval_ms: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskOptions {
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_commit_interval_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    150
}

fn default_poll_timeout_ms() -> u64 {
    2000
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            commit_interval_ms: default_commit_interval_ms(),
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl TaskOptions {
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl KafkaOptions {
    pub fn topic_list(&self) -> Vec<String> {
        self.topics
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl BridgeConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            origin: path.to_string(),
            error: Box::new(e),
        })?;
        Self::from_yaml(path, &content)
    }

    /// Reads YAML from the `BRIDGE_CONFIG` environment variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let content = std::env::var(CONFIG_ENV_VAR).map_err(|_| ConfigError::MissingField {
            field: CONFIG_ENV_VAR.to_string(),
        })?;
        Self::from_yaml(CONFIG_ENV_VAR, &content)
    }

    fn from_yaml(origin: &str, content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::LoadFailed {
            origin: origin.to_string(),
            error: Box::new(e),
        })
    }

    /// Builds a config from the flat key/value form an orchestration runtime
    /// hands to a task.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |field: &str| {
            props
                .get(field)
                .cloned()
                .ok_or_else(|| ConfigError::MissingField {
                    field: field.to_string(),
                })
        };
        let optional = |field: &str| props.get(field).cloned();
        fn number<T: std::str::FromStr>(
            props: &HashMap<String, String>,
            field: &str,
        ) -> Result<Option<T>, ConfigError> {
            props
                .get(field)
                .map(|raw| {
                    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
                        message: format!("{field} must be a number, got {raw:?}"),
                    })
                })
                .transpose()
        }

        let defaults = TaskOptions::default();
        Ok(Self {
            kafka: KafkaOptions {
                bootstrap_servers: required("bootstrap.servers")?,
                consumer_group: required("group.id")?,
                topics: required("topics")?,
                security_protocol: optional("security.protocol"),
                sasl_mechanisms: optional("sasl.mechanisms"),
                sasl_username: optional("sasl.username"),
                sasl_password: optional("sasl.password"),
                ssl_ca_location: optional("ssl.ca.location"),
                auto_offset_reset: optional("auto.offset.reset"),
                session_timeout_ms: number(props, "session.timeout.ms")?,
                heartbeat_interval_ms: number(props, "heartbeat.interval.ms")?,
            },
            task: TaskOptions {
                commit_interval_ms: number(props, "commit.interval.ms")?
                    .unwrap_or(defaults.commit_interval_ms),
                batch_size: number(props, "max.poll.records")?.unwrap_or(defaults.batch_size),
                poll_timeout_ms: number(props, "poll.timeout.ms")?
                    .unwrap_or(defaults.poll_timeout_ms),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let failed = |reason: &str| ConfigError::ValidationFailed {
            reason: reason.to_string(),
        };

        if self.kafka.bootstrap_servers.trim().is_empty() {
            return Err(failed("Kafka bootstrap servers cannot be empty"));
        }
        if self.kafka.consumer_group.trim().is_empty() {
            return Err(failed("Kafka consumer group cannot be empty"));
        }
        if self.kafka.topic_list().is_empty() {
            return Err(failed("At least one Kafka topic must be configured"));
        }
        if self.task.batch_size == 0 {
            return Err(failed("Batch size must be greater than zero"));
        }
        if self.task.commit_interval_ms == 0 {
            return Err(failed("Commit interval must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config() -> BridgeConfig {
        BridgeConfig {
            kafka: KafkaOptions {
                bootstrap_servers: "localhost:9092".to_string(),
                consumer_group: "connector-consumer-group".to_string(),
                topics: "orders,payments".to_string(),
                security_protocol: None,
                sasl_mechanisms: None,
                sasl_username: None,
                sasl_password: None,
                ssl_ca_location: None,
                auto_offset_reset: None,
                session_timeout_ms: None,
                heartbeat_interval_ms: None,
            },
            task: TaskOptions::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(create_test_config().validate().is_ok());
    }

    #[test]
    fn test_topic_list_drops_empty_entries() {
        let mut config = create_test_config();
        config.kafka.topics = "orders,, payments ,".to_string();
        assert_eq!(config.kafka.topic_list(), vec!["orders", "payments"]);
    }

    #[test]
    fn test_config_validation_no_topics() {
        let mut config = create_test_config();
        config.kafka.topics = " , ".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("At least one Kafka topic")
        );
    }

    #[test]
    fn test_config_validation_empty_group() {
        let mut config = create_test_config();
        config.kafka.consumer_group = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_batch() {
        let mut config = create_test_config();
        config.task.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_task_options_default() {
        let task = TaskOptions::default();
        assert_eq!(task.commit_interval_ms, 5000);
        assert_eq!(task.batch_size, 150);
        assert_eq!(task.poll_timeout_ms, 2000);
        assert_eq!(task.poll_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_config_from_yaml_file() {
        let yaml_content = r#"
kafka:
  bootstrap_servers: "broker-1:9092,broker-2:9092"
  consumer_group: "connector-consumer-group"
  topics: "orders"
  auto_offset_reset: "earliest"

task:
  batch_size: 50
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = BridgeConfig::from_file(temp_file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.kafka.bootstrap_servers, "broker-1:9092,broker-2:9092");
        assert_eq!(config.kafka.auto_offset_reset.as_deref(), Some("earliest"));
        assert_eq!(config.task.batch_size, 50);
        assert_eq!(config.task.commit_interval_ms, 5000);
        assert_eq!(config.task.poll_timeout_ms, 2000);
    }

    #[test]
    fn test_config_from_yaml_without_task_section() {
        let yaml_content = r#"
kafka:
  bootstrap_servers: "localhost:9092"
  consumer_group: "g"
  topics: "orders"
"#;
        let config: BridgeConfig = serde_yaml::from_str(yaml_content).unwrap();
        assert_eq!(config.task.batch_size, 150);
    }

    #[test]
    fn test_config_from_env() {
        let yaml_content = r#"
kafka:
  bootstrap_servers: "localhost:9092"
  consumer_group: "env-group"
  topics: "env-topic"
"#;

        unsafe {
            std::env::set_var("BRIDGE_CONFIG", yaml_content);
        }

        let config = BridgeConfig::from_env().unwrap();
        assert_eq!(config.kafka.topics, "env-topic");
        assert_eq!(config.kafka.consumer_group, "env-group");

        unsafe {
            std::env::remove_var("BRIDGE_CONFIG");
        }
    }

    #[test]
    fn test_config_from_missing_file() {
        let err = BridgeConfig::from_file("/nonexistent/bridge.yaml").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::LoadFailed { ref origin, .. } if origin == "/nonexistent/bridge.yaml"
        ));
    }

    #[test]
    fn test_config_from_unparsable_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"kafka: [not, a, map]").unwrap();

        let err = BridgeConfig::from_file(temp_file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::LoadFailed { .. }));
        assert!(err.to_string().contains("Failed to load configuration"));
    }

    #[test]
    fn test_config_from_properties() {
        let props = HashMap::from([
            ("bootstrap.servers".to_string(), "localhost:9092".to_string()),
            ("group.id".to_string(), "g".to_string()),
            ("topics".to_string(), "orders,payments".to_string()),
            ("commit.interval.ms".to_string(), "1000".to_string()),
        ]);

        let config = BridgeConfig::from_properties(&props).unwrap();
        assert_eq!(config.kafka.topic_list(), vec!["orders", "payments"]);
        assert_eq!(config.task.commit_interval_ms, 1000);
        assert_eq!(config.task.batch_size, 150);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_properties_missing_group() {
        let props = HashMap::from([
            ("bootstrap.servers".to_string(), "localhost:9092".to_string()),
            ("topics".to_string(), "orders".to_string()),
        ]);

        let err = BridgeConfig::from_properties(&props).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field } if field == "group.id"));
    }

    #[test]
    fn test_config_from_properties_bad_number() {
        let props = HashMap::from([
            ("bootstrap.servers".to_string(), "localhost:9092".to_string()),
            ("group.id".to_string(), "g".to_string()),
            ("topics".to_string(), "orders".to_string()),
            ("max.poll.records".to_string(), "lots".to_string()),
        ]);

        assert!(matches!(
            BridgeConfig::from_properties(&props),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
