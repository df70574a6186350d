//! Publisher lifecycle tests
//!
//! These use in-process admin and transport doubles; no broker is needed.

use async_trait::async_trait;
use publisher::{
    CreateOutcome, ProvisionError, ProvisionerConfig, PublishError, Publisher, RecordTransport,
    SchemaPair, SchemaRegistrar, StaticSchemaSource, TopicAdmin, TopicProvisioner,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use transit_types::TopicSpec;

#[derive(Default)]
struct CountingAdmin {
    created: Mutex<Vec<String>>,
}

#[async_trait]
impl TopicAdmin for CountingAdmin {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError> {
        self.created.lock().unwrap().push(spec.name.clone());
        Ok(CreateOutcome::Created)
    }

    async fn topic_exists(&self, name: &str) -> Result<bool, ProvisionError> {
        Ok(self.created.lock().unwrap().iter().any(|t| t == name))
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, Value, Value)>>,
    flushes: AtomicUsize,
}

#[async_trait]
impl RecordTransport for RecordingTransport {
    async fn send(
        &self,
        topic: &str,
        _schemas: &SchemaPair,
        key: &Value,
        value: &Value,
    ) -> Result<(), PublishError> {
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), key.clone(), value.clone()));
        Ok(())
    }

    async fn flush(&self) -> Result<(), PublishError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    admin: Arc<CountingAdmin>,
    provisioner: TopicProvisioner,
    registrar: SchemaRegistrar,
    transport: Arc<RecordingTransport>,
}

fn fixture() -> Fixture {
    let admin = Arc::new(CountingAdmin::default());
    let provisioner = TopicProvisioner::new(admin.clone(), ProvisionerConfig::default());
    let registrar = SchemaRegistrar::new(Arc::new(
        StaticSchemaSource::new()
            .with_definition(
                "station",
                r#"{"type": "record", "name": "station_key", "fields": []}"#,
                r#"{"type": "record", "name": "station_value", "fields": []}"#,
            )
            .with_definition(
                "weather",
                r#"{"type": "record", "name": "weather_key", "fields": []}"#,
                r#"{"type": "record", "name": "weather_value", "fields": []}"#,
            ),
    ));

    Fixture {
        admin,
        provisioner,
        registrar,
        transport: Arc::new(RecordingTransport::default()),
    }
}

#[tokio::test]
async fn test_two_publishers_share_one_creation_request() {
    let f = fixture();

    let first = Publisher::new(
        TopicSpec::compacted("stations", 1, 1),
        "station",
        &f.provisioner,
        &f.registrar,
        f.transport.clone(),
    )
    .await
    .unwrap();
    let second = Publisher::new(
        TopicSpec::compacted("stations", 1, 1),
        "station",
        &f.provisioner,
        &f.registrar,
        f.transport.clone(),
    )
    .await
    .unwrap();

    assert_eq!(*f.admin.created.lock().unwrap(), vec!["stations".to_string()]);
    assert_eq!(f.registrar.loads(), 1);
    assert_eq!(first.schemas(), second.schemas());
}

#[tokio::test]
async fn test_each_topic_is_created_once() {
    let f = fixture();

    for _ in 0..3 {
        Publisher::new(
            TopicSpec::compacted("weather", 3, 1),
            "weather",
            &f.provisioner,
            &f.registrar,
            f.transport.clone(),
        )
        .await
        .unwrap();
    }
    Publisher::new(
        TopicSpec::compacted("stations", 1, 1),
        "station",
        &f.provisioner,
        &f.registrar,
        f.transport.clone(),
    )
    .await
    .unwrap();

    assert_eq!(f.provisioner.creation_requests(), 2);
    assert_eq!(
        f.provisioner.provisioned_topics().await,
        vec!["stations".to_string(), "weather".to_string()]
    );
}

#[tokio::test]
async fn test_publish_and_close() {
    let f = fixture();
    let publisher = Publisher::new(
        TopicSpec::compacted("weather", 3, 1),
        "weather",
        &f.provisioner,
        &f.registrar,
        f.transport.clone(),
    )
    .await
    .unwrap();

    publisher
        .publish(
            &json!({"timestamp": 1_600_000_000_000i64}),
            &json!({"temperature": 70, "status": "sunny"}),
        )
        .await
        .unwrap();
    publisher.close().await.unwrap();

    let sent = f.transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "weather");
    assert_eq!(sent[0].2["status"], "sunny");
    assert_eq!(publisher.records_sent(), 1);
    assert_eq!(f.transport.flushes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_entity_type_fails_construction() {
    let f = fixture();

    let result = Publisher::new(
        TopicSpec::compacted("arrivals", 1, 1),
        "arrival",
        &f.provisioner,
        &f.registrar,
        f.transport.clone(),
    )
    .await;

    assert!(matches!(result, Err(PublishError::Schema(_))));
    // The topic was provisioned before schemas were looked up
    assert!(f.provisioner.is_provisioned("arrivals").await);
}
