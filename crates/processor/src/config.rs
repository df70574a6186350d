//! Configuration for the stream transformation agent

use crate::error::{ProcessorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use transit_types::TopicSpec;

/// Stream transformation agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Kafka bootstrap servers
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Consumer group id
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Topic carrying raw entity records
    #[serde(default = "default_input_topic")]
    pub input_topic: String,

    /// Topic carrying derived records; doubles as the table changelog
    #[serde(default = "default_output_topic")]
    pub output_topic: String,

    #[serde(default = "default_output_partitions")]
    pub output_partitions: i32,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,

    /// Records buffered per partition task before the dispatcher waits
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How long shutdown waits for buffered output
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_ms: u64,

    /// How long replay waits for a single changelog record
    #[serde(default = "default_replay_timeout")]
    pub replay_timeout_ms: u64,

    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,

    /// Additional librdkafka consumer settings
    #[serde(default)]
    pub extra_consumer_config: HashMap<String, String>,
}

fn default_brokers() -> String { "localhost:9092".to_string() }
fn default_group_id() -> String { "stations-transformer".to_string() }
fn default_input_topic() -> String { "jdbc_stations".to_string() }
fn default_output_topic() -> String { "stations_transformed".to_string() }
fn default_output_partitions() -> i32 { 1 }
fn default_replication_factor() -> i32 { 1 }
fn default_channel_capacity() -> usize { 256 }
fn default_flush_timeout() -> u64 { 10_000 }
fn default_replay_timeout() -> u64 { 5_000 }
fn default_auto_offset_reset() -> String { "earliest".to_string() }

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            group_id: default_group_id(),
            input_topic: default_input_topic(),
            output_topic: default_output_topic(),
            output_partitions: default_output_partitions(),
            replication_factor: default_replication_factor(),
            channel_capacity: default_channel_capacity(),
            flush_timeout_ms: default_flush_timeout(),
            replay_timeout_ms: default_replay_timeout(),
            auto_offset_reset: default_auto_offset_reset(),
            extra_consumer_config: HashMap::new(),
        }
    }
}

impl AgentConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.brokers.trim().is_empty() {
            return Err(ProcessorError::Configuration {
                source: "brokers must not be empty".into(),
            });
        }

        if self.group_id.trim().is_empty() {
            return Err(ProcessorError::Configuration {
                source: "group_id must not be empty".into(),
            });
        }

        if self.input_topic.is_empty() || self.output_topic.is_empty() {
            return Err(ProcessorError::Configuration {
                source: "input_topic and output_topic are required".into(),
            });
        }

        if self.input_topic == self.output_topic {
            return Err(ProcessorError::Configuration {
                source: format!(
                    "input and output topic must differ, both are '{}'",
                    self.input_topic
                )
                .into(),
            });
        }

        if self.output_partitions < 1 {
            return Err(ProcessorError::Configuration {
                source: "output_partitions must be at least 1".into(),
            });
        }

        if self.replication_factor < 1 {
            return Err(ProcessorError::Configuration {
                source: "replication_factor must be at least 1".into(),
            });
        }

        if self.channel_capacity == 0 {
            return Err(ProcessorError::Configuration {
                source: "channel_capacity must be greater than 0".into(),
            });
        }

        match self.auto_offset_reset.as_str() {
            "earliest" | "latest" => Ok(()),
            other => Err(ProcessorError::Configuration {
                source: format!("unsupported auto_offset_reset '{}'", other).into(),
            }),
        }
    }

    /// Compacted output topic holding derived records and table changes
    pub fn output_topic_spec(&self) -> TopicSpec {
        TopicSpec::compacted(
            self.output_topic.clone(),
            self.output_partitions,
            self.replication_factor,
        )
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn replay_timeout(&self) -> Duration {
        Duration::from_millis(self.replay_timeout_ms)
    }
}
