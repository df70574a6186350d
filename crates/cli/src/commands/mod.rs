//! CLI command implementations

pub mod configure;
pub mod provision;
pub mod publish;
pub mod stream;

pub use configure::{ConfigureConnectorCommand, ConfigureQueryCommand};
pub use provision::ProvisionCommand;
pub use publish::PublishCommand;
pub use stream::StreamCommand;
