//! `configure-connector` and `configure-query`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use publisher::{
    configure_connector, configure_query, ConfigureOutcome, ControlPlaneConfigurator,
    HttpControlPlane, KafkaTopicAdmin,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TransitConfig;

#[derive(Args, Debug, Clone)]
pub struct ConfigureConnectorCommand {
    /// Control-plane request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

impl ConfigureConnectorCommand {
    pub async fn execute(&self, config: &TransitConfig) -> Result<()> {
        let configurator = configurator(self.timeout)?;
        let settings = &config.connector;

        let outcome = configure_connector(&configurator, settings)
            .await
            .with_context(|| format!("failed to configure connector '{}'", settings.name))?;

        report(&settings.name, outcome);
        println!("  writes to topic {}", settings.topic().bold());
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConfigureQueryCommand {
    /// Control-plane request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

impl ConfigureQueryCommand {
    pub async fn execute(&self, config: &TransitConfig) -> Result<()> {
        let configurator = configurator(self.timeout)?;
        let admin = KafkaTopicAdmin::from_config(&config.provisioner)
            .context("failed to create broker admin client")?;
        let settings = &config.query;

        let outcome = configure_query(&configurator, Arc::new(admin), settings)
            .await
            .with_context(|| {
                format!("failed to configure query for '{}'", settings.summary_topic)
            })?;

        report(&settings.summary_topic, outcome);
        Ok(())
    }
}

fn configurator(timeout_secs: u64) -> Result<ControlPlaneConfigurator> {
    let transport = HttpControlPlane::new(Duration::from_secs(timeout_secs))
        .context("failed to create control-plane client")?;
    Ok(ControlPlaneConfigurator::new(Arc::new(transport)))
}

fn report(resource: &str, outcome: ConfigureOutcome) {
    match outcome {
        ConfigureOutcome::AlreadyPresent => {
            println!("{} {} already present", "•".cyan(), resource.bold());
        }
        ConfigureOutcome::Created { status } => {
            println!("{} {} created (HTTP {})", "✓".green().bold(), resource.bold(), status);
        }
    }
}
