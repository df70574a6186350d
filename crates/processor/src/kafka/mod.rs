//! Kafka adapters for the agent's source and changelog

pub mod changelog;
pub mod source;

pub use changelog::KafkaChangelog;
pub use source::{KafkaRecordSource, SourceConsumerContext};
