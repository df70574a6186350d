//! `provision`: create the pipeline's topics

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use publisher::TopicProvisioner;
use transit_types::TopicSpec;

use crate::config::TransitConfig;

#[derive(Args, Debug, Clone)]
pub struct ProvisionCommand {
    /// Extra compacted topic to create; repeatable
    #[arg(long = "topic", value_name = "NAME")]
    pub topics: Vec<String>,

    /// Partitions of topics given with --topic
    #[arg(long, default_value_t = 1)]
    pub partitions: i32,

    /// Replication factor of topics given with --topic
    #[arg(long, default_value_t = 1)]
    pub replication_factor: i32,
}

impl ProvisionCommand {
    /// Every topic this run should ensure, configured ones first
    pub fn topic_specs(&self, config: &TransitConfig) -> Vec<TopicSpec> {
        let mut specs = config.topics.clone();
        specs.push(config.agent.output_topic_spec());
        specs.extend(
            self.topics
                .iter()
                .map(|name| TopicSpec::compacted(name.clone(), self.partitions, self.replication_factor)),
        );
        specs
    }

    pub async fn execute(&self, config: &TransitConfig) -> Result<()> {
        let provisioner = TopicProvisioner::connect(config.provisioner.clone())
            .context("failed to create broker admin client")?;

        for spec in self.topic_specs(config) {
            provisioner
                .ensure_topic(&spec)
                .await
                .with_context(|| format!("failed to provision topic '{}'", spec.name))?;
            println!(
                "{} {} ({} partitions)",
                "✓".green().bold(),
                spec.name.bold(),
                spec.partitions
            );
        }

        println!(
            "{} topics ensured, {} creation requests sent",
            provisioner.provisioned_topics().await.len(),
            provisioner.creation_requests()
        );
        Ok(())
    }
}
