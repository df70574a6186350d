//! `publish`: send JSON-lines records through a publisher
//!
//! Each input line is an object `{"key": ..., "value": ...}`.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use publisher::{
    DirectorySchemaSource, KafkaTransport, Publisher, RecordTransport, RestProxyTransport,
    SchemaRegistrar, TopicProvisioner,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use transit_types::TopicSpec;

use crate::config::{TransitConfig, TransportKind};

#[derive(Args, Debug, Clone)]
pub struct PublishCommand {
    /// Destination topic
    #[arg(long)]
    pub topic: String,

    /// Entity type selecting `<entity>_key.json` / `<entity>_value.json`
    #[arg(long)]
    pub entity_type: String,

    #[arg(long, default_value_t = 1)]
    pub partitions: i32,

    #[arg(long, default_value_t = 1)]
    pub replication_factor: i32,

    /// Overrides the configured transport
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// JSON-lines file; stdin when omitted
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct InputRecord {
    #[serde(default)]
    key: Value,
    value: Value,
}

impl PublishCommand {
    pub async fn execute(&self, config: &TransitConfig) -> Result<()> {
        let provisioner = TopicProvisioner::connect(config.provisioner.clone())
            .context("failed to create broker admin client")?;
        let registrar =
            SchemaRegistrar::new(Arc::new(DirectorySchemaSource::new(config.schema_dir.clone())));

        let transport: Arc<dyn RecordTransport> =
            match self.transport.unwrap_or(config.transport) {
                TransportKind::RestProxy => Arc::new(
                    RestProxyTransport::new(&config.rest_proxy)
                        .context("failed to create REST proxy client")?,
                ),
                TransportKind::Kafka => Arc::new(
                    KafkaTransport::new(config.kafka_transport.clone())
                        .context("failed to create producer")?,
                ),
            };

        let spec = TopicSpec::compacted(self.topic.clone(), self.partitions, self.replication_factor);
        let publisher = Publisher::new(spec, &self.entity_type, &provisioner, &registrar, transport)
            .await
            .with_context(|| format!("failed to set up publisher for '{}'", self.topic))?;

        let sent = match &self.input {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?;
                publish_lines(&publisher, BufReader::new(file)).await
            }
            None => publish_lines(&publisher, BufReader::new(tokio::io::stdin())).await,
        };

        // Flush whatever was accepted even when a later line failed
        publisher.close().await.context("failed to flush publisher")?;
        let sent = sent?;

        println!(
            "{} {} records published to {}",
            "✓".green().bold(),
            sent,
            self.topic.bold()
        );
        Ok(())
    }
}

async fn publish_lines<R>(publisher: &Publisher, reader: R) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_number = 0u64;
    let mut sent = 0u64;

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record = parse_line(&line)
            .with_context(|| format!("invalid record on line {}", line_number))?;
        publisher
            .publish(&record.key, &record.value)
            .await
            .with_context(|| format!("failed to publish line {}", line_number))?;
        sent += 1;
    }

    Ok(sent)
}

fn parse_line(line: &str) -> Result<InputRecord> {
    let record: InputRecord = serde_json::from_str(line)?;
    if record.value.is_null() {
        return Err(anyhow!("record value must not be null"));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_defaults_key() {
        let record = parse_line(r#"{"value": {"temperature": 70}}"#).unwrap();

        assert!(record.key.is_null());
        assert_eq!(record.value["temperature"], 70);
    }

    #[test]
    fn test_parse_line_rejects_missing_value() {
        assert!(parse_line(r#"{"key": 1}"#).is_err());
        assert!(parse_line(r#"{"key": 1, "value": null}"#).is_err());
        assert!(parse_line("not json").is_err());
    }
}
