//! Changelog on a compacted Kafka topic
//!
//! Appends are produced to an explicit partition with the `group_id` as
//! message key and the JSON-encoded derived record as payload. Replay reads
//! a partition from its low to its high watermark with a short-lived,
//! manually assigned consumer that never commits.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info, warn};
use transit_types::DerivedRecord;

use crate::config::AgentConfig;
use crate::error::{ChangelogError, ProcessorError, Result};
use crate::state::{decode_entry, encode_key, Changelog, ChangelogEntry};

pub struct KafkaChangelog {
    topic: String,
    partitions: i32,
    brokers: String,
    producer: FutureProducer,
    delivery_timeout: Duration,
    replay_timeout: Duration,
}

impl KafkaChangelog {
    /// Create the producer and look up the topic's partition count
    ///
    /// Falls back to the configured partition count when the broker does
    /// not report the topic.
    pub async fn connect(config: &AgentConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.flush_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| ProcessorError::Configuration {
                source: Box::new(e),
            })?;

        let topic = config.output_topic.clone();
        let lookup = producer.clone();
        let lookup_topic = topic.clone();
        let timeout = config.replay_timeout();
        let reported = tokio::task::spawn_blocking(move || {
            lookup
                .client()
                .fetch_metadata(Some(lookup_topic.as_str()), timeout)
                .map(|metadata| {
                    metadata
                        .topics()
                        .first()
                        .map(|t| t.partitions().len() as i32)
                        .unwrap_or(0)
                })
        })
        .await
        .map_err(|e| ProcessorError::Execution(e.to_string()))?
        .map_err(|e| ProcessorError::Configuration {
            source: Box::new(e),
        })?;

        let partitions = if reported > 0 {
            reported
        } else {
            warn!(
                topic = %topic,
                configured = config.output_partitions,
                "Broker did not report changelog partitions, using configured count"
            );
            config.output_partitions
        };

        info!(topic = %topic, partitions, "Changelog connected");

        Ok(Self {
            topic,
            partitions,
            brokers: config.brokers.clone(),
            producer,
            delivery_timeout: config.flush_timeout(),
            replay_timeout: config.replay_timeout(),
        })
    }
}

#[async_trait]
impl Changelog for KafkaChangelog {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partitions(&self) -> i32 {
        self.partitions
    }

    async fn append(&self, partition: i32, record: &DerivedRecord) -> std::result::Result<i64, ChangelogError> {
        let key = encode_key(record.group_id);
        let payload = serde_json::to_vec(record)?;

        let message = FutureRecord::to(&self.topic)
            .partition(partition)
            .key(&key)
            .payload(&payload);

        let (delivered_partition, offset) = self
            .producer
            .send(message, Timeout::After(self.delivery_timeout))
            .await
            .map_err(|(err, _)| ChangelogError::Append {
                topic: self.topic.clone(),
                partition,
                message: err.to_string(),
            })?;

        debug!(
            topic = %self.topic,
            partition = delivered_partition,
            offset,
            group_id = record.group_id,
            "Changelog append acknowledged"
        );
        Ok(offset)
    }

    async fn replay(&self, partition: i32) -> std::result::Result<Vec<ChangelogEntry>, ChangelogError> {
        let brokers = self.brokers.clone();
        let topic = self.topic.clone();
        let timeout = self.replay_timeout;

        tokio::task::spawn_blocking(move || replay_partition(&brokers, &topic, partition, timeout))
            .await
            .map_err(|e| ChangelogError::Replay {
                topic: self.topic.clone(),
                partition,
                message: e.to_string(),
            })?
    }

    async fn flush(&self, timeout: Duration) -> std::result::Result<(), ChangelogError> {
        info!(topic = %self.topic, "Flushing pending changelog records...");
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| ChangelogError::Flush {
                topic: self.topic.clone(),
                message: e.to_string(),
            })
    }
}

fn replay_partition(
    brokers: &str,
    topic: &str,
    partition: i32,
    timeout: Duration,
) -> std::result::Result<Vec<ChangelogEntry>, ChangelogError> {
    let replay_error = |message: String| ChangelogError::Replay {
        topic: topic.to_string(),
        partition,
        message,
    };

    let consumer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", format!("{}-replay", topic))
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false")
        .create()
        .map_err(|e| replay_error(e.to_string()))?;

    let (low, high) = consumer
        .fetch_watermarks(topic, partition, timeout)
        .map_err(|e| replay_error(e.to_string()))?;
    if high <= low {
        return Ok(Vec::new());
    }

    let mut assignment = TopicPartitionList::new();
    assignment
        .add_partition_offset(topic, partition, Offset::Offset(low))
        .map_err(|e| replay_error(e.to_string()))?;
    consumer
        .assign(&assignment)
        .map_err(|e| replay_error(e.to_string()))?;

    let mut entries = Vec::new();
    let mut next = low;
    while next < high {
        match consumer.poll(timeout) {
            Some(Ok(msg)) => {
                next = msg.offset() + 1;
                entries.push(decode_entry(partition, msg.offset(), msg.key(), msg.payload()));
            }
            Some(Err(e)) => return Err(replay_error(e.to_string())),
            None => {
                return Err(replay_error(format!(
                    "timed out at offset {} before end offset {}",
                    next, high
                )))
            }
        }
    }

    debug!(topic, partition, low, high, entries = entries.len(), "Changelog partition read");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MaterializedTable;
    use std::sync::Arc;
    use transit_types::Category;

    #[tokio::test]
    #[ignore] // Requires Kafka
    async fn test_append_then_recover_from_broker() {
        let config = AgentConfig {
            output_topic: "stations_transformed_test".to_string(),
            ..Default::default()
        };
        let changelog = Arc::new(KafkaChangelog::connect(&config).await.unwrap());
        let table = MaterializedTable::new(changelog.clone());

        table
            .put(&DerivedRecord {
                group_id: 40900,
                entity_name: "Austin".to_string(),
                order: 1,
                category: Some(Category::CategoryA),
            })
            .await
            .unwrap();
        changelog.flush(Duration::from_secs(5)).await.unwrap();

        let recovered = MaterializedTable::new(changelog);
        recovered.recover().await.unwrap();
        assert_eq!(
            recovered.get(40900).map(|entry| entry.category),
            Some(Some(Category::CategoryA))
        );
    }
}
