//! Record transports used by publishers
//!
//! Records are JSON-encoded key/value pairs. The REST proxy transport sends
//! one HTTP request per record; the Kafka transport writes to the broker
//! directly.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::PublishError;
use crate::schema::SchemaPair;

/// Content type declaring JSON-encoded records to the REST proxy
pub const REST_PROXY_CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";

/// Sends encoded records to a topic
#[async_trait]
pub trait RecordTransport: Send + Sync {
    /// Send one record and wait until the transport accepted it
    async fn send(
        &self,
        topic: &str,
        schemas: &SchemaPair,
        key: &Value,
        value: &Value,
    ) -> Result<(), PublishError>;

    /// Deliver anything still buffered
    async fn flush(&self) -> Result<(), PublishError>;
}

/// REST proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestProxyConfig {
    #[serde(default = "default_rest_proxy_url")]
    pub url: String,

    #[serde(default = "default_rest_timeout")]
    pub timeout_ms: u64,
}

fn default_rest_proxy_url() -> String { "http://localhost:8082".to_string() }
fn default_rest_timeout() -> u64 { 10_000 }

impl Default for RestProxyConfig {
    fn default() -> Self {
        Self {
            url: default_rest_proxy_url(),
            timeout_ms: default_rest_timeout(),
        }
    }
}

/// Publishes through the broker's HTTP proxy
pub struct RestProxyTransport {
    client: reqwest::Client,
    base_url: String,
}

impl RestProxyTransport {
    pub fn new(config: &RestProxyConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PublishError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    /// URL records for `topic` are posted to
    pub fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic)
    }

    /// Body of a rejected request; a body that cannot be read is described instead
    async fn rejection_body(topic: &str, response: reqwest::Response) -> String {
        match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(topic, "Failed to read REST proxy rejection body: {}", e);
                format!("<unreadable response body: {}>", e)
            }
        }
    }

    /// Request body carrying one record and its schemas
    pub fn request_body(schemas: &SchemaPair, key: &Value, value: &Value) -> Value {
        json!({
            "key_schema": schemas.key.to_string(),
            "value_schema": schemas.value.to_string(),
            "records": [
                { "key": key, "value": value },
            ],
        })
    }
}

#[async_trait]
impl RecordTransport for RestProxyTransport {
    async fn send(
        &self,
        topic: &str,
        schemas: &SchemaPair,
        key: &Value,
        value: &Value,
    ) -> Result<(), PublishError> {
        let body = Self::request_body(schemas, key, value);

        let response = self
            .client
            .post(self.topic_url(topic))
            .header(reqwest::header::CONTENT_TYPE, REST_PROXY_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| PublishError::Transport {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = Self::rejection_body(topic, response).await;
            warn!(topic, status = status.as_u16(), "REST proxy rejected record");
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(topic, "Record accepted by REST proxy");
        Ok(())
    }

    async fn flush(&self) -> Result<(), PublishError> {
        // Every send already waited for the proxy's answer
        Ok(())
    }
}

/// Kafka transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaTransportConfig {
    #[serde(default = "default_brokers")]
    pub brokers: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_message_timeout")]
    pub message_timeout_ms: u64,
}

fn default_brokers() -> String { "localhost:9092".to_string() }
fn default_client_id() -> String { "transit-publisher".to_string() }
fn default_message_timeout() -> u64 { 30_000 }

impl Default for KafkaTransportConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            client_id: default_client_id(),
            message_timeout_ms: default_message_timeout(),
        }
    }
}

/// Publishes straight to the broker with an rdkafka producer
pub struct KafkaTransport {
    producer: FutureProducer,
    config: KafkaTransportConfig,
}

impl KafkaTransport {
    pub fn new(config: KafkaTransportConfig) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| PublishError::Configuration(e.to_string()))?;

        Ok(Self { producer, config })
    }
}

#[async_trait]
impl RecordTransport for KafkaTransport {
    async fn send(
        &self,
        topic: &str,
        _schemas: &SchemaPair,
        key: &Value,
        value: &Value,
    ) -> Result<(), PublishError> {
        let key = serde_json::to_vec(key)?;
        let payload = serde_json::to_vec(value)?;

        let record = FutureRecord::to(topic).key(&key).payload(&payload);
        let timeout = Timeout::After(Duration::from_millis(self.config.message_timeout_ms));

        let (partition, offset) = self
            .producer
            .send(record, timeout)
            .await
            .map_err(|(err, _)| PublishError::Transport {
                topic: topic.to_string(),
                message: err.to_string(),
            })?;

        debug!(topic, partition, offset, "Record delivered");
        Ok(())
    }

    async fn flush(&self) -> Result<(), PublishError> {
        info!("Flushing pending records...");
        self.producer
            .flush(Timeout::After(Duration::from_millis(self.config.message_timeout_ms)))
            .map_err(|e| PublishError::Transport {
                topic: String::new(),
                message: e.to_string(),
            })
    }
}
