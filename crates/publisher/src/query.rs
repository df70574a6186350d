//! Continuous aggregation query over the turnstile topic

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::control_plane::{
    ConfigureOutcome, ControlPlaneConfigurator, CreationRequest, TopicExistenceCheck,
};
use crate::error::ConfigError;
use crate::provisioner::TopicAdmin;

/// Content type of the query endpoint
pub const KSQL_CONTENT_TYPE: &str = "application/vnd.ksql.v1+json";

const DEFAULT_STATEMENT: &str = "CREATE TABLE turnstile(
    station_id INTEGER,
    station_name VARCHAR,
    line VARCHAR
) WITH (
    KAFKA_TOPIC='turnstile',
    VALUE_FORMAT='avro',
    KEY='station_id'
);

CREATE TABLE turnstile_summary
WITH (VALUE_FORMAT='json') AS
    SELECT station_id, count(station_id) AS count
    FROM turnstile
    GROUP BY station_id
;
";

/// Settings of the continuous query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    /// Query server base URL
    #[serde(default = "default_ksql_url")]
    pub ksql_url: String,

    /// Statement text, sent as-is
    #[serde(default = "default_statement")]
    pub statement: String,

    /// Topic the query materializes into; its presence means the query exists
    #[serde(default = "default_summary_topic")]
    pub summary_topic: String,

    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
}

fn default_ksql_url() -> String { "http://localhost:8088".to_string() }
fn default_statement() -> String { DEFAULT_STATEMENT.to_string() }
fn default_summary_topic() -> String { "turnstile_summary".to_string() }
fn default_auto_offset_reset() -> String { "earliest".to_string() }

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            ksql_url: default_ksql_url(),
            statement: default_statement(),
            summary_topic: default_summary_topic(),
            auto_offset_reset: default_auto_offset_reset(),
        }
    }
}

impl QuerySettings {
    pub fn creation_request(&self) -> CreationRequest {
        let payload = json!({
            "ksql": self.statement,
            "streamsProperties": {
                "ksql.streams.auto.offset.reset": self.auto_offset_reset,
            },
        });

        CreationRequest::json(
            format!("{}/ksql", self.ksql_url.trim_end_matches('/')),
            payload,
        )
        .with_content_type(KSQL_CONTENT_TYPE)
        .with_accept(KSQL_CONTENT_TYPE)
    }
}

/// Run the statement unless its summary topic already exists
pub async fn configure_query(
    configurator: &ControlPlaneConfigurator,
    admin: Arc<dyn TopicAdmin>,
    settings: &QuerySettings,
) -> Result<ConfigureOutcome, ConfigError> {
    let check = TopicExistenceCheck::new(admin);
    configurator
        .ensure_configured(&settings.summary_topic, &check, &settings.creation_request())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::tests::ScriptedTransport;
    use crate::error::ProvisionError;
    use crate::provisioner::CreateOutcome;
    use async_trait::async_trait;
    use transit_types::TopicSpec;

    struct KnownTopics(Vec<&'static str>);

    #[async_trait]
    impl TopicAdmin for KnownTopics {
        async fn create_topic(&self, _spec: &TopicSpec) -> Result<CreateOutcome, ProvisionError> {
            Ok(CreateOutcome::Created)
        }

        async fn topic_exists(&self, name: &str) -> Result<bool, ProvisionError> {
            Ok(self.0.iter().any(|topic| *topic == name))
        }
    }

    #[test]
    fn test_request_shape() {
        let request = QuerySettings::default().creation_request();

        assert_eq!(request.url, "http://localhost:8088/ksql");
        assert_eq!(request.content_type, KSQL_CONTENT_TYPE);
        assert_eq!(request.accept.as_deref(), Some(KSQL_CONTENT_TYPE));
        assert!(request.payload["ksql"]
            .as_str()
            .unwrap()
            .contains("CREATE TABLE turnstile_summary"));
        assert_eq!(
            request.payload["streamsProperties"]["ksql.streams.auto.offset.reset"],
            "earliest"
        );
    }

    #[tokio::test]
    async fn test_existing_summary_topic_skips_statement() {
        let transport = Arc::new(ScriptedTransport::new(200, 200, "[]"));
        let configurator = ControlPlaneConfigurator::new(transport.clone());

        let outcome = configure_query(
            &configurator,
            Arc::new(KnownTopics(vec!["turnstile", "turnstile_summary"])),
            &QuerySettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, ConfigureOutcome::AlreadyPresent);
        assert_eq!(transport.post_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_statement_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new(200, 400, r#"{"message": "line 1:1"}"#));
        let configurator = ControlPlaneConfigurator::new(transport.clone());

        let err = configure_query(
            &configurator,
            Arc::new(KnownTopics(vec!["turnstile"])),
            &QuerySettings::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ConfigError::Rejected { status: 400, .. }));
        assert_eq!(transport.post_count(), 1);
    }
}
