//! Transit stations stream CLI
//!
//! Library half of the `transit` binary: configuration loading and the
//! subcommand implementations.

pub mod commands;
pub mod config;

pub use config::{TransitConfig, TransportKind};

/// CLI result type
pub type CliResult<T> = anyhow::Result<T>;
