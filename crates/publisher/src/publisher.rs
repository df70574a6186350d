//! Publisher lifecycle
//!
//! Constructing a [`Publisher`] provisions its topic and loads its schemas
//! before any record can be sent. Provisioner and registrar are shared by
//! every publisher in the process, so constructing many publishers for the
//! same topic or entity type sends one creation request and reads one
//! schema definition.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use transit_types::TopicSpec;

use crate::error::PublishError;
use crate::provisioner::TopicProvisioner;
use crate::schema::{SchemaPair, SchemaRegistrar};
use crate::transport::RecordTransport;

/// Publishes records of one entity type to one topic
pub struct Publisher {
    topic: TopicSpec,
    entity_type: String,
    schemas: Arc<SchemaPair>,
    transport: Arc<dyn RecordTransport>,
    records_sent: AtomicU64,
}

impl Publisher {
    /// Provision the topic, load the schemas, and return a ready publisher
    pub async fn new(
        topic: TopicSpec,
        entity_type: impl Into<String>,
        provisioner: &TopicProvisioner,
        registrar: &SchemaRegistrar,
        transport: Arc<dyn RecordTransport>,
    ) -> Result<Self, PublishError> {
        let entity_type = entity_type.into();

        provisioner.ensure_topic(&topic).await?;
        let schemas = registrar.get_schema(&entity_type).await?;

        info!(topic = %topic.name, entity_type = %entity_type, "Publisher ready");

        Ok(Self {
            topic,
            entity_type,
            schemas,
            transport,
            records_sent: AtomicU64::new(0),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic.name
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn schemas(&self) -> &SchemaPair {
        &self.schemas
    }

    /// Number of records accepted by the transport
    pub fn records_sent(&self) -> u64 {
        self.records_sent.load(Ordering::Relaxed)
    }

    /// Encode and send one record
    ///
    /// Transport failures are returned as-is; retrying is up to the caller.
    pub async fn publish<K, V>(&self, key: &K, value: &V) -> Result<(), PublishError>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let key = serde_json::to_value(key)?;
        let value = serde_json::to_value(value)?;

        self.transport
            .send(&self.topic.name, &self.schemas, &key, &value)
            .await?;

        self.records_sent.fetch_add(1, Ordering::Relaxed);
        debug!(topic = %self.topic.name, "Record published");
        Ok(())
    }

    /// Flush buffered records before the publisher is dropped
    pub async fn close(&self) -> Result<(), PublishError> {
        if let Err(e) = self.transport.flush().await {
            error!(topic = %self.topic.name, "Failed to flush publisher: {}", e);
            return Err(e);
        }

        info!(
            topic = %self.topic.name,
            records_sent = self.records_sent(),
            "Publisher closed"
        );
        Ok(())
    }
}
