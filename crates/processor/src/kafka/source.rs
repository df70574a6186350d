//! Kafka record source
//!
//! Wraps an rdkafka [`StreamConsumer`] subscribed to the input topic.
//! Offsets are committed automatically in the background, but only offsets
//! explicitly stored through [`RecordSource::ack`] are eligible, so a record
//! is never committed before the agent finished with it.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use tracing::{debug, error, info};

use crate::config::AgentConfig;
use crate::error::{ProcessorError, Result};
use crate::source::{RecordSource, SourceRecord};

/// Logs partition assignment changes and commit results
pub struct SourceConsumerContext;

impl ClientContext for SourceConsumerContext {}

impl ConsumerContext for SourceConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(tpl) => info!("Partition revocation: {:?}", tpl),
            Rebalance::Assign(tpl) => info!("Partition assignment: {:?}", tpl),
            Rebalance::Error(err) => error!("Rebalance error: {}", err),
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Assign(tpl) = rebalance {
            let partitions: Vec<i32> = tpl.elements().iter().map(|elem| elem.partition()).collect();
            info!("Successfully assigned partitions: {:?}", partitions);
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!("Committed offsets: {:?}", offsets),
            Err(err) => error!("Commit callback error: {}", err),
        }
    }
}

pub struct KafkaRecordSource {
    consumer: StreamConsumer<SourceConsumerContext>,
    topic: String,
}

impl KafkaRecordSource {
    /// Create a consumer in the configured group and subscribe to the input topic
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &config.auto_offset_reset);

        for (key, value) in &config.extra_consumer_config {
            client_config.set(key, value);
        }

        let consumer: StreamConsumer<SourceConsumerContext> = client_config
            .create_with_context(SourceConsumerContext)
            .map_err(|e| ProcessorError::Configuration {
                source: Box::new(e),
            })?;

        consumer
            .subscribe(&[config.input_topic.as_str()])
            .map_err(|e| ProcessorError::Configuration {
                source: Box::new(e),
            })?;

        info!(topic = %config.input_topic, group_id = %config.group_id, "Subscribed to input topic");

        Ok(Self {
            consumer,
            topic: config.input_topic.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn recv(&self) -> Result<Option<SourceRecord>> {
        loop {
            match self.consumer.recv().await {
                Ok(msg) => {
                    return Ok(Some(SourceRecord {
                        topic: msg.topic().to_string(),
                        partition: msg.partition(),
                        offset: msg.offset(),
                        key: msg.key().map(|k| k.to_vec()),
                        payload: msg.payload().map(|p| p.to_vec()),
                    }));
                }
                Err(KafkaError::PartitionEOF(partition)) => {
                    debug!(partition, "Reached end of partition");
                }
                Err(e) => {
                    error!("Error receiving message: {}", e);
                    return Err(ProcessorError::Source {
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    fn ack(&self, record: &SourceRecord) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| ProcessorError::Source {
                source: Box::new(e),
            })?;

        self.consumer
            .store_offsets(&tpl)
            .map_err(|e| ProcessorError::Source {
                source: Box::new(e),
            })
    }
}
