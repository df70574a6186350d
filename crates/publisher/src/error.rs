//! Error types for provisioning, control-plane configuration and publishing

use thiserror::Error;
use transit_types::TopicSpecError;

/// Topic provisioning errors
///
/// All variants are fatal for startup. A topic that failed to provision is
/// not recorded as provisioned, so a later call tries again.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The broker refused to create the topic
    #[error("failed to create topic {topic}: {message} (code: {code})")]
    Rejected {
        topic: String,
        code: String,
        message: String,
    },

    /// The topic spec cannot be sent to the broker
    #[error("invalid topic spec: {0}")]
    InvalidSpec(#[from] TopicSpecError),

    /// The admin request did not complete in time
    #[error("topic creation for {topic} timed out after {timeout_ms}ms")]
    Timeout { topic: String, timeout_ms: u64 },

    /// The admin client itself failed
    #[error("kafka admin client error: {0}")]
    Client(String),
}

/// Control-plane configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The control plane answered with a non-2xx status
    #[error("control plane rejected {resource} with status {status}: {body}")]
    Rejected {
        resource: String,
        status: u16,
        body: String,
    },

    /// The HTTP request could not be completed
    #[error("control plane request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Checking whether the resource already exists failed
    #[error("existence check for {resource} failed: {message}")]
    ExistenceCheck { resource: String, message: String },
}

/// Schema loading errors
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The schema definition could not be read
    #[error("failed to read {kind} schema for {entity_type} from {path}: {source}")]
    Read {
        entity_type: String,
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The schema definition is not valid JSON
    #[error("failed to parse {kind} schema for {entity_type}: {reason}")]
    Parse {
        entity_type: String,
        kind: &'static str,
        reason: String,
    },

    /// No definition exists for the entity type
    #[error("no schema definition for entity type {0}")]
    Unknown(String),
}

/// Record publishing errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// The transport answered with a non-2xx status
    #[error("publish to {topic} rejected with status {status}: {body}")]
    Rejected {
        topic: String,
        status: u16,
        body: String,
    },

    /// The transport could not deliver the record
    #[error("publish to {topic} failed: {message}")]
    Transport { topic: String, message: String },

    /// Key or value could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The publisher's topic could not be provisioned
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The publisher's schemas could not be loaded
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The transport could not be created
    #[error("publisher configuration error: {0}")]
    Configuration(String),
}
