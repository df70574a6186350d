//! Transit stations stream CLI
//!
//! Entry points for provisioning topics, configuring the source connector
//! and continuous query, publishing records and running the stream agent.

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transit_cli::{
    commands::{
        ConfigureConnectorCommand, ConfigureQueryCommand, ProvisionCommand, PublishCommand,
        StreamCommand,
    },
    CliResult, TransitConfig,
};

#[derive(Parser)]
#[command(
    name = "transit",
    version,
    about = "Transit stations stream - provisioning, configuration and stream processing"
)]
struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "TRANSIT_CONFIG",
        value_name = "FILE",
        help = "Path to TOML configuration file"
    )]
    config: Option<PathBuf>,

    /// Broker list, overrides every configured client
    #[arg(long, global = true, env = "TRANSIT_BROKERS")]
    brokers: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    /// Log format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the pipeline's topics
    #[command(name = "provision", about = "Create topics if they do not exist")]
    Provision(ProvisionCommand),

    /// Register the JDBC source connector
    #[command(name = "configure-connector", about = "Create the source connector if missing")]
    ConfigureConnector(ConfigureConnectorCommand),

    /// Create the continuous aggregation query
    #[command(name = "configure-query", about = "Create the continuous query if missing")]
    ConfigureQuery(ConfigureQueryCommand),

    /// Publish JSON-lines records
    #[command(name = "publish", about = "Publish records to a topic")]
    Publish(PublishCommand),

    /// Run the transformation agent
    #[command(name = "stream", about = "Run the stream transformation agent")]
    Stream(StreamCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_format);

    let mut config = match &cli.config {
        Some(path) => TransitConfig::from_file(path)?,
        None => TransitConfig::default(),
    };
    if let Some(brokers) = &cli.brokers {
        config.set_brokers(brokers);
    }
    config.validate()?;

    match &cli.command {
        Commands::Provision(command) => command.execute(&config).await,
        Commands::ConfigureConnector(command) => command.execute(&config).await,
        Commands::ConfigureQuery(command) => command.execute(&config).await,
        Commands::Publish(command) => command.execute(&config).await,
        Commands::Stream(command) => command.execute(&config).await,
    }
}

/// Initialize tracing/logging
///
/// `RUST_LOG` takes precedence; otherwise `info`, or `debug` with `--verbose`.
fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}
