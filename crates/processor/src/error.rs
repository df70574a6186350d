//! Error types for the stream transformation agent
//!
//! Per-record problems are [`TransformError`]s and never stop a partition.
//! Changelog failures are [`ChangelogError`]s and stop the partition that
//! hit them, because the table would otherwise diverge from its changelog.

use thiserror::Error;

/// Main processor error type
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// A raw record could not be transformed
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    /// The table's changelog rejected a write or could not be replayed
    #[error("changelog error: {0}")]
    Changelog(#[from] ChangelogError),

    /// The input source failed
    #[error("source error: {source}")]
    Source {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration errors
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The output topic could not be provisioned
    #[error("provisioning error: {0}")]
    Provision(#[from] publisher::ProvisionError),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A partition task ended abnormally
    #[error("execution error: {0}")]
    Execution(String),
}

/// Per-record transformation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Payload missing, not JSON, or missing a required field
    #[error("malformed record at partition {partition} offset {offset}: {reason}")]
    Malformed {
        partition: i32,
        offset: i64,
        reason: String,
    },
}

/// Changelog write, replay and flush failures
#[derive(Error, Debug)]
pub enum ChangelogError {
    #[error("append to {topic}[{partition}] failed: {message}")]
    Append {
        topic: String,
        partition: i32,
        message: String,
    },

    #[error("replay of {topic}[{partition}] failed: {message}")]
    Replay {
        topic: String,
        partition: i32,
        message: String,
    },

    #[error("flush of {topic} failed: {message}")]
    Flush { topic: String, message: String },

    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;
