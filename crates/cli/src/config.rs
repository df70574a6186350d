//! CLI configuration file
//!
//! Every section is optional; anything left out falls back to the defaults
//! of the reference deployment (broker on `localhost:9092`, REST proxy on
//! `:8082`, Connect on `:8083`, query server on `:8088`).

use anyhow::{Context, Result};
use processor::AgentConfig;
use publisher::{
    ConnectorSettings, KafkaTransportConfig, ProvisionerConfig, QuerySettings, RestProxyConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use transit_types::TopicSpec;

/// How `publish` delivers records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    RestProxy,
    Kafka,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitConfig {
    #[serde(default)]
    pub provisioner: ProvisionerConfig,

    /// Topics created by `provision` in addition to the agent's output topic
    #[serde(default)]
    pub topics: Vec<TopicSpec>,

    /// Directory holding `<entity>_key.json` / `<entity>_value.json`
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,

    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default)]
    pub rest_proxy: RestProxyConfig,

    #[serde(default)]
    pub kafka_transport: KafkaTransportConfig,

    #[serde(default)]
    pub connector: ConnectorSettings,

    #[serde(default)]
    pub query: QuerySettings,

    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from("schemas")
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            provisioner: ProvisionerConfig::default(),
            topics: Vec::new(),
            schema_dir: default_schema_dir(),
            transport: TransportKind::default(),
            rest_proxy: RestProxyConfig::default(),
            kafka_transport: KafkaTransportConfig::default(),
            connector: ConnectorSettings::default(),
            query: QuerySettings::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl TransitConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Point every broker client at `brokers`
    pub fn set_brokers(&mut self, brokers: &str) {
        self.provisioner.brokers = brokers.to_string();
        self.kafka_transport.brokers = brokers.to_string();
        self.agent.brokers = brokers.to_string();
    }

    pub fn validate(&self) -> Result<()> {
        for topic in &self.topics {
            topic.validate().context("invalid [[topics]] entry")?;
        }
        self.agent.validate().context("invalid [agent] section")?;
        Ok(())
    }
}
