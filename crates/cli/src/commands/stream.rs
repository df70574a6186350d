//! `stream`: run the transformation agent until interrupted

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use processor::{KafkaChangelog, KafkaRecordSource, MaterializedTable, StreamAgent};
use publisher::TopicProvisioner;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::TransitConfig;

#[derive(Args, Debug, Clone)]
pub struct StreamCommand {
    /// Skip table recovery; the table starts empty
    #[arg(long)]
    pub skip_recovery: bool,
}

impl StreamCommand {
    pub async fn execute(&self, config: &TransitConfig) -> Result<()> {
        let agent_config = config.agent.clone();

        let provisioner = TopicProvisioner::connect(config.provisioner.clone())
            .context("failed to create broker admin client")?;
        provisioner
            .ensure_topic(&agent_config.output_topic_spec())
            .await
            .with_context(|| {
                format!("failed to provision output topic '{}'", agent_config.output_topic)
            })?;

        let changelog = KafkaChangelog::connect(&agent_config)
            .await
            .context("failed to connect changelog")?;
        let table = Arc::new(MaterializedTable::new(Arc::new(changelog)));
        let agent = StreamAgent::new(agent_config.clone(), table)?;

        if self.skip_recovery {
            warn!("Table recovery skipped");
        } else {
            let recovery = agent.recover().await.context("failed to recover table")?;
            println!(
                "{} table recovered: {} keys from {} entries ({} corrupt)",
                "✓".green().bold(),
                recovery.keys,
                recovery.entries_replayed,
                recovery.corrupt
            );
        }

        let source = KafkaRecordSource::new(&agent_config).context("failed to create consumer")?;

        let shutdown = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C"),
                Err(e) => {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await
                }
            }
        };

        println!(
            "{} streaming {} → {} (Ctrl-C to stop)",
            "▶".cyan().bold(),
            agent_config.input_topic.bold(),
            agent_config.output_topic.bold()
        );

        let stats = agent
            .run(Arc::new(source), shutdown)
            .await
            .context("stream agent failed")?;

        println!(
            "{} stopped: {} consumed, {} emitted, {} malformed",
            "■".yellow().bold(),
            stats.consumed(),
            stats.emitted(),
            stats.malformed()
        );
        Ok(())
    }
}
