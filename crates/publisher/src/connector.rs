//! JDBC source connector for the stations table

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::control_plane::{
    ConfigureOutcome, ControlPlaneConfigurator, CreationRequest, HttpExistenceCheck,
};
use crate::error::ConfigError;

/// Settings of the JDBC source connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorSettings {
    /// Connect REST endpoint listing connectors
    #[serde(default = "default_connect_url")]
    pub connect_url: String,

    /// Connector name; used for both the existence check and creation
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_connection_url")]
    pub connection_url: String,

    #[serde(default = "default_connection_user")]
    pub connection_user: String,

    #[serde(default = "default_connection_password")]
    pub connection_password: String,

    /// Table copied into the broker
    #[serde(default = "default_table")]
    pub table: String,

    /// Prefix of the topic the connector writes to
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Column used by incrementing mode
    #[serde(default = "default_incrementing_column")]
    pub incrementing_column: String,

    #[serde(default = "default_tasks_max")]
    pub tasks_max: u32,
}

fn default_connect_url() -> String { "http://localhost:8083/connectors".to_string() }
fn default_name() -> String { "stations".to_string() }
fn default_connection_url() -> String { "jdbc:postgresql://localhost:5432/cta".to_string() }
fn default_connection_user() -> String { "cta_admin".to_string() }
fn default_connection_password() -> String { "chicago".to_string() }
fn default_table() -> String { "stations".to_string() }
fn default_topic_prefix() -> String { "jdbc_".to_string() }
fn default_incrementing_column() -> String { "stop_id".to_string() }
fn default_tasks_max() -> u32 { 1 }

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            connect_url: default_connect_url(),
            name: default_name(),
            connection_url: default_connection_url(),
            connection_user: default_connection_user(),
            connection_password: default_connection_password(),
            table: default_table(),
            topic_prefix: default_topic_prefix(),
            incrementing_column: default_incrementing_column(),
            tasks_max: default_tasks_max(),
        }
    }
}

impl ConnectorSettings {
    /// Topic the connector publishes rows to
    pub fn topic(&self) -> String {
        format!("{}{}", self.topic_prefix, self.table)
    }

    /// Creation payload for the Connect REST API
    pub fn creation_request(&self) -> CreationRequest {
        let payload = json!({
            "name": self.name,
            "config": {
                "connector.class": "io.confluent.connect.jdbc.JdbcSourceConnector",
                "topic.prefix": self.topic_prefix,
                "mode": "incrementing",
                "incrementing.column.name": self.incrementing_column,
                "table.whitelist": self.table,
                "tasks.max": self.tasks_max,
                "connection.url": self.connection_url,
                "connection.user": self.connection_user,
                "connection.password": self.connection_password,
                "key.converter": "org.apache.kafka.connect.json.JsonConverter",
                "key.converter.schemas.enable": "false",
                "value.converter": "org.apache.kafka.connect.json.JsonConverter",
                "value.converter.schemas.enable": "false",
            },
        });

        CreationRequest::json(self.connect_url.clone(), payload)
    }
}

/// Create the connector unless Connect already knows it
pub async fn configure_connector(
    configurator: &ControlPlaneConfigurator,
    settings: &ConnectorSettings,
) -> Result<ConfigureOutcome, ConfigError> {
    let check = HttpExistenceCheck::new(configurator.transport(), settings.connect_url.clone());
    configurator
        .ensure_configured(&settings.name, &check, &settings.creation_request())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::tests::ScriptedTransport;
    use std::sync::Arc;

    #[test]
    fn test_payload_shape() {
        let request = ConnectorSettings::default().creation_request();

        assert_eq!(request.url, "http://localhost:8083/connectors");
        assert_eq!(request.content_type, "application/json");
        assert_eq!(request.payload["name"], "stations");
        assert_eq!(request.payload["config"]["mode"], "incrementing");
        assert_eq!(request.payload["config"]["table.whitelist"], "stations");
        assert_eq!(request.payload["config"]["tasks.max"], 1);
    }

    #[test]
    fn test_topic_name() {
        assert_eq!(ConnectorSettings::default().topic(), "jdbc_stations");
    }

    #[tokio::test]
    async fn test_existing_connector_is_left_alone() {
        let transport = Arc::new(ScriptedTransport::new(200, 201, ""));
        let configurator = ControlPlaneConfigurator::new(transport.clone());

        let outcome = configure_connector(&configurator, &ConnectorSettings::default())
            .await
            .unwrap();

        assert_eq!(outcome, ConfigureOutcome::AlreadyPresent);
        assert_eq!(
            *transport.gets.lock().unwrap(),
            vec!["http://localhost:8083/connectors/stations".to_string()]
        );
        assert_eq!(transport.post_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_connector_is_posted() {
        let transport = Arc::new(ScriptedTransport::new(404, 201, "{}"));
        let configurator = ControlPlaneConfigurator::new(transport.clone());

        let outcome = configure_connector(&configurator, &ConnectorSettings::default())
            .await
            .unwrap();

        assert_eq!(outcome, ConfigureOutcome::Created { status: 201 });
        assert_eq!(transport.post_count(), 1);
    }
}
