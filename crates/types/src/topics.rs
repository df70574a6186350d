//! Topic descriptions used for provisioning

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Default `delete.retention.ms` for compacted topics
pub const DEFAULT_DELETE_RETENTION_MS: u64 = 2000;

/// Default `file.delete.delay.ms` for compacted topics
pub const DEFAULT_FILE_DELETE_DELAY_MS: u64 = 2000;

/// Why a [`TopicSpec`] cannot be sent to the broker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicSpecError {
    #[error("topic name must not be empty")]
    EmptyName,

    #[error("topic '{topic}' needs at least one partition, got {partitions}")]
    NoPartitions { topic: String, partitions: i32 },

    #[error("topic '{topic}' needs a replication factor of at least 1, got {replication_factor}")]
    NoReplicas {
        topic: String,
        replication_factor: i32,
    },
}

/// Desired configuration of a broker topic
///
/// Only `name` takes part in idempotency checks; two specs with the same name
/// are treated as the same provisioning target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name
    pub name: String,

    /// Number of partitions
    #[serde(default = "default_partitions")]
    pub partitions: i32,

    /// Replication factor
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,

    /// Topic-level configuration entries (cleanup policy, retention, ...)
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

fn default_partitions() -> i32 {
    1
}

fn default_replication_factor() -> i32 {
    1
}

impl TopicSpec {
    /// Topic with no extra settings
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            settings: BTreeMap::new(),
        }
    }

    /// Compacted topic with the short deletion windows used across the pipeline
    pub fn compacted(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self::new(name, partitions, replication_factor)
            .with_setting("cleanup.policy", "compact")
            .with_setting("delete.retention.ms", DEFAULT_DELETE_RETENTION_MS.to_string())
            .with_setting("file.delete.delay.ms", DEFAULT_FILE_DELETE_DELAY_MS.to_string())
    }

    /// Add or replace a topic-level setting
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Check the spec is something the broker could accept
    pub fn validate(&self) -> Result<(), TopicSpecError> {
        if self.name.trim().is_empty() {
            return Err(TopicSpecError::EmptyName);
        }
        if self.partitions < 1 {
            return Err(TopicSpecError::NoPartitions {
                topic: self.name.clone(),
                partitions: self.partitions,
            });
        }
        if self.replication_factor < 1 {
            return Err(TopicSpecError::NoReplicas {
                topic: self.name.clone(),
                replication_factor: self.replication_factor,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compacted_settings() {
        let spec = TopicSpec::compacted("stations", 3, 1);

        assert_eq!(spec.settings.get("cleanup.policy").unwrap(), "compact");
        assert_eq!(spec.settings.get("delete.retention.ms").unwrap(), "2000");
        assert_eq!(spec.settings.get("file.delete.delay.ms").unwrap(), "2000");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_specs() {
        assert_eq!(
            TopicSpec::new(" ", 1, 1).validate(),
            Err(TopicSpecError::EmptyName)
        );
        assert_eq!(
            TopicSpec::new("weather", 0, 1).validate(),
            Err(TopicSpecError::NoPartitions {
                topic: "weather".to_string(),
                partitions: 0,
            })
        );
        assert!(matches!(
            TopicSpec::new("weather", 1, 0).validate(),
            Err(TopicSpecError::NoReplicas { replication_factor: 0, .. })
        ));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let spec: TopicSpec = serde_json::from_str(r#"{"name": "weather"}"#).unwrap();
        assert_eq!(spec.partitions, 1);
        assert_eq!(spec.replication_factor, 1);
        assert!(spec.settings.is_empty());
    }
}
