//! Stream transformation agent for the transit stations stream
//!
//! This crate consumes raw entity records, derives their category, keeps
//! the `group_id -> category` table and emits derived records to the
//! compacted output topic that doubles as the table's changelog.

pub mod agent;
pub mod config;
pub mod error;
pub mod kafka;
pub mod source;
pub mod state;

pub use agent::{AgentStats, PartitionStats, ProcessOutcome, StreamAgent};
pub use config::AgentConfig;
pub use error::{ChangelogError, ProcessorError, Result as ProcessorResult, TransformError};
pub use kafka::{KafkaChangelog, KafkaRecordSource};
pub use source::{InMemorySource, RecordSource, SourceRecord};
pub use state::{
    Changelog, ChangelogEntry, ChangelogPayload, InMemoryChangelog, MaterializedTable,
    RecoveryStats, TableEntry,
};
