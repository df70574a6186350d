//! Topic provisioning
//!
//! [`TopicProvisioner`] makes sure each topic is created at most once per
//! process. It keeps two layers of idempotency:
//!
//! 1. A process-local registry of topic names already provisioned. A name in
//!    the registry returns immediately without touching the broker.
//! 2. The broker's own "topic already exists" answer, which covers other
//!    processes and restarts. It is treated as success.
//!
//! The registry check and the creation call run under one lock, so two
//! publishers constructed concurrently never both send a creation request
//! for the same name.

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use transit_types::TopicSpec;

use crate::error::ProvisionError;

/// Default timeout for admin requests
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Default number of retries for transient admin failures
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (milliseconds)
const DEFAULT_BASE_BACKOFF_MS: u64 = 100;

/// Upper bound for a single backoff delay
const MAX_BACKOFF_MS: u64 = 10_000;

/// Broker error codes worth another attempt
const RETRIABLE_CODES: &[&str] = &[
    "RequestTimedOut",
    "OperationTimedOut",
    "BrokerNotAvailable",
    "LeaderNotAvailable",
    "NotController",
    "NetworkException",
];

/// Configuration for topic provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Kafka bootstrap servers
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Timeout for each admin request (milliseconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Retries for transient failures; "already exists" is never retried
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
}

fn default_brokers() -> String { "localhost:9092".to_string() }
fn default_request_timeout() -> u64 { DEFAULT_REQUEST_TIMEOUT_MS }
fn default_max_retries() -> u32 { DEFAULT_MAX_RETRIES }
fn default_base_backoff() -> u64 { DEFAULT_BASE_BACKOFF_MS }

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
        }
    }
}

/// Result of a single creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The broker created the topic
    Created,
    /// The broker already had the topic
    AlreadyExists,
}

/// Broker administrative interface
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Ask the broker to create a topic and wait for its answer
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError>;

    /// Check whether the broker currently knows the topic
    async fn topic_exists(&self, name: &str) -> Result<bool, ProvisionError>;
}

impl ProvisionError {
    /// Whether another attempt could succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            ProvisionError::Timeout { .. } => true,
            ProvisionError::Rejected { code, .. } => RETRIABLE_CODES.contains(&code.as_str()),
            _ => false,
        }
    }
}

/// [`TopicAdmin`] backed by an rdkafka admin client
pub struct KafkaTopicAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
    request_timeout: Duration,
}

impl KafkaTopicAdmin {
    /// Connect an admin client to the given brokers
    pub fn new(brokers: &str, request_timeout: Duration) -> Result<Self, ProvisionError> {
        let client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()
            .map_err(|e| ProvisionError::Client(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            request_timeout,
        })
    }

    /// Build an admin client from provisioner configuration
    pub fn from_config(config: &ProvisionerConfig) -> Result<Self, ProvisionError> {
        Self::new(&config.brokers, Duration::from_millis(config.request_timeout_ms))
    }
}

#[async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError> {
        let mut new_topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        );
        for (key, value) in &spec.settings {
            new_topic = new_topic.set(key.as_str(), value.as_str());
        }

        let options = AdminOptions::new()
            .operation_timeout(Some(self.request_timeout))
            .request_timeout(Some(self.request_timeout));

        let results = self
            .client
            .create_topics(&[new_topic], &options)
            .await
            .map_err(|e| match e {
                KafkaError::AdminOp(RDKafkaErrorCode::OperationTimedOut)
                | KafkaError::AdminOp(RDKafkaErrorCode::RequestTimedOut) => {
                    ProvisionError::Timeout {
                        topic: spec.name.clone(),
                        timeout_ms: self.request_timeout.as_millis() as u64,
                    }
                }
                other => ProvisionError::Client(other.to_string()),
            })?;

        match results.into_iter().next() {
            Some(Ok(_)) => Ok(CreateOutcome::Created),
            Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => Ok(CreateOutcome::AlreadyExists),
            Some(Err((topic, code))) => Err(ProvisionError::Rejected {
                topic,
                code: format!("{:?}", code),
                message: code.to_string(),
            }),
            None => Err(ProvisionError::Client(format!(
                "no result returned for topic {}",
                spec.name
            ))),
        }
    }

    async fn topic_exists(&self, name: &str) -> Result<bool, ProvisionError> {
        let client = Arc::clone(&self.client);
        let timeout = self.request_timeout;
        let name = name.to_string();

        // Metadata requests block the calling thread
        tokio::task::spawn_blocking(move || {
            let metadata = client
                .inner()
                .fetch_metadata(None, timeout)
                .map_err(|e| ProvisionError::Client(e.to_string()))?;

            Ok(metadata
                .topics()
                .iter()
                .any(|topic| topic.name() == name && topic.error().is_none()))
        })
        .await
        .map_err(|e| ProvisionError::Client(e.to_string()))?
    }
}

/// Creates topics at most once per process
///
/// One provisioner is shared (behind an `Arc`) by every publisher in the
/// process. The registry is append-only and is not persisted.
pub struct TopicProvisioner {
    admin: Arc<dyn TopicAdmin>,
    config: ProvisionerConfig,
    provisioned: Mutex<HashSet<String>>,
    creation_requests: AtomicU64,
}

impl TopicProvisioner {
    /// Create a provisioner over the given admin interface
    pub fn new(admin: Arc<dyn TopicAdmin>, config: ProvisionerConfig) -> Self {
        Self {
            admin,
            config,
            provisioned: Mutex::new(HashSet::new()),
            creation_requests: AtomicU64::new(0),
        }
    }

    /// Create a provisioner talking to the brokers named in `config`
    pub fn connect(config: ProvisionerConfig) -> Result<Self, ProvisionError> {
        let admin = KafkaTopicAdmin::from_config(&config)?;
        Ok(Self::new(Arc::new(admin), config))
    }

    /// Admin interface used by this provisioner
    pub fn admin(&self) -> Arc<dyn TopicAdmin> {
        Arc::clone(&self.admin)
    }

    /// Make sure the topic exists
    ///
    /// A name that was already provisioned returns immediately, even if
    /// `spec` differs from the spec it was first provisioned with.
    pub async fn ensure_topic(&self, spec: &TopicSpec) -> Result<(), ProvisionError> {
        let mut provisioned = self.provisioned.lock().await;

        if provisioned.contains(&spec.name) {
            debug!(topic = %spec.name, "Topic already provisioned in this process");
            return Ok(());
        }

        spec.validate()?;

        match self.create_with_retry(spec).await? {
            CreateOutcome::Created => info!(
                topic = %spec.name,
                partitions = spec.partitions,
                replication_factor = spec.replication_factor,
                "Topic created"
            ),
            CreateOutcome::AlreadyExists => {
                info!(topic = %spec.name, "Topic already exists on broker")
            }
        }

        provisioned.insert(spec.name.clone());
        Ok(())
    }

    /// Whether the name is in this process's registry
    pub async fn is_provisioned(&self, name: &str) -> bool {
        self.provisioned.lock().await.contains(name)
    }

    /// Names provisioned so far, sorted
    pub async fn provisioned_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.provisioned.lock().await.iter().cloned().collect();
        names.sort();
        names
    }

    /// Number of creation requests sent to the broker
    pub fn creation_requests(&self) -> u64 {
        self.creation_requests.load(Ordering::Relaxed)
    }

    async fn create_with_retry(&self, spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError> {
        let mut retries = 0;

        loop {
            self.creation_requests.fetch_add(1, Ordering::Relaxed);

            match self.admin.create_topic(spec).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retriable() && retries < self.config.max_retries => {
                    retries += 1;
                    let backoff = self.calculate_backoff(retries);
                    warn!(
                        topic = %spec.name,
                        "Topic creation failed (attempt {}/{}), retrying in {:?}: {}",
                        retries,
                        self.config.max_retries + 1,
                        backoff,
                        err
                    );
                    sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn calculate_backoff(&self, retry_count: u32) -> Duration {
        let backoff_ms = self
            .config
            .base_backoff_ms
            .saturating_mul(2u64.pow(retry_count.min(10)));
        Duration::from_millis(backoff_ms.min(MAX_BACKOFF_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Admin that answers from a script and counts creation calls
    struct ScriptedAdmin {
        responses: StdMutex<VecDeque<Result<CreateOutcome, ProvisionError>>>,
        requested: StdMutex<Vec<TopicSpec>>,
    }

    impl ScriptedAdmin {
        fn new(responses: Vec<Result<CreateOutcome, ProvisionError>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                requested: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requested.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TopicAdmin for ScriptedAdmin {
        async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError> {
            self.requested.lock().unwrap().push(spec.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(CreateOutcome::Created))
        }

        async fn topic_exists(&self, _name: &str) -> Result<bool, ProvisionError> {
            Ok(false)
        }
    }

    fn fast_config() -> ProvisionerConfig {
        ProvisionerConfig {
            max_retries: 2,
            base_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn rejected(code: &str) -> ProvisionError {
        ProvisionError::Rejected {
            topic: "stations".to_string(),
            code: code.to_string(),
            message: "broker said no".to_string(),
        }
    }

    #[tokio::test]
    async fn test_second_call_is_a_no_op() {
        let admin = Arc::new(ScriptedAdmin::new(vec![]));
        let provisioner = TopicProvisioner::new(admin.clone(), fast_config());
        let spec = TopicSpec::compacted("stations", 1, 1);

        provisioner.ensure_topic(&spec).await.unwrap();
        provisioner.ensure_topic(&spec).await.unwrap();

        assert_eq!(admin.calls(), 1);
        assert!(provisioner.is_provisioned("stations").await);
    }

    #[tokio::test]
    async fn test_already_exists_counts_as_provisioned() {
        let admin = Arc::new(ScriptedAdmin::new(vec![Ok(CreateOutcome::AlreadyExists)]));
        let provisioner = TopicProvisioner::new(admin.clone(), fast_config());

        provisioner
            .ensure_topic(&TopicSpec::new("weather", 3, 1))
            .await
            .unwrap();
        provisioner
            .ensure_topic(&TopicSpec::new("weather", 3, 1))
            .await
            .unwrap();

        assert_eq!(admin.calls(), 1);
        assert_eq!(provisioner.provisioned_topics().await, vec!["weather".to_string()]);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_recorded() {
        let admin = Arc::new(ScriptedAdmin::new(vec![Err(rejected("InvalidReplicationFactor"))]));
        let provisioner = TopicProvisioner::new(admin.clone(), fast_config());
        let spec = TopicSpec::new("stations", 1, 5);

        let err = provisioner.ensure_topic(&spec).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Rejected { .. }));
        assert!(!provisioner.is_provisioned("stations").await);
        assert_eq!(admin.calls(), 1);

        // The next attempt goes back to the broker
        provisioner.ensure_topic(&spec).await.unwrap();
        assert_eq!(admin.calls(), 2);
        assert!(provisioner.is_provisioned("stations").await);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let admin = Arc::new(ScriptedAdmin::new(vec![
            Err(rejected("BrokerNotAvailable")),
            Err(ProvisionError::Timeout {
                topic: "stations".to_string(),
                timeout_ms: 5000,
            }),
            Ok(CreateOutcome::Created),
        ]));
        let provisioner = TopicProvisioner::new(admin.clone(), fast_config());

        provisioner
            .ensure_topic(&TopicSpec::new("stations", 1, 1))
            .await
            .unwrap();

        assert_eq!(admin.calls(), 3);
        assert_eq!(provisioner.creation_requests(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let admin = Arc::new(ScriptedAdmin::new(vec![
            Err(rejected("BrokerNotAvailable")),
            Err(rejected("BrokerNotAvailable")),
            Err(rejected("BrokerNotAvailable")),
            Ok(CreateOutcome::Created),
        ]));
        let provisioner = TopicProvisioner::new(admin.clone(), fast_config());

        let result = provisioner
            .ensure_topic(&TopicSpec::new("stations", 1, 1))
            .await;

        assert!(result.is_err());
        assert_eq!(admin.calls(), 3);
        assert!(!provisioner.is_provisioned("stations").await);
    }

    #[tokio::test]
    async fn test_different_spec_with_same_name_is_ignored() {
        let admin = Arc::new(ScriptedAdmin::new(vec![]));
        let provisioner = TopicProvisioner::new(admin.clone(), fast_config());

        provisioner
            .ensure_topic(&TopicSpec::new("stations", 1, 1))
            .await
            .unwrap();
        provisioner
            .ensure_topic(&TopicSpec::new("stations", 12, 3))
            .await
            .unwrap();

        let requested = admin.requested.lock().unwrap();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].partitions, 1);
    }

    #[tokio::test]
    async fn test_invalid_spec_never_reaches_broker() {
        let admin = Arc::new(ScriptedAdmin::new(vec![]));
        let provisioner = TopicProvisioner::new(admin.clone(), fast_config());

        let err = provisioner
            .ensure_topic(&TopicSpec::new("stations", 0, 1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::InvalidSpec(transit_types::TopicSpecError::NoPartitions { .. })
        ));
        assert_eq!(admin.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_create_once() {
        let admin = Arc::new(ScriptedAdmin::new(vec![]));
        let provisioner = Arc::new(TopicProvisioner::new(admin.clone(), fast_config()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provisioner = Arc::clone(&provisioner);
                tokio::spawn(async move {
                    provisioner
                        .ensure_topic(&TopicSpec::compacted("stations", 1, 1))
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(admin.calls(), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let provisioner = TopicProvisioner::new(
            Arc::new(ScriptedAdmin::new(vec![])),
            ProvisionerConfig::default(),
        );

        assert_eq!(provisioner.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(provisioner.calculate_backoff(10), Duration::from_millis(MAX_BACKOFF_MS));
    }
}
