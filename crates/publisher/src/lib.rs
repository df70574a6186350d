//! Publisher-side infrastructure for the transit stations stream
//!
//! This crate holds everything a publishing component needs before and
//! while it sends records:
//!
//! - [`TopicProvisioner`]: creates each topic at most once per process,
//!   falling back on the broker's "already exists" answer
//! - [`SchemaRegistrar`]: loads key/value schemas once per entity type
//! - [`ControlPlaneConfigurator`]: check-then-create for REST-configured
//!   resources such as the source connector and the continuous query
//! - [`Publisher`]: ties the above together and sends records through a
//!   [`RecordTransport`]

pub mod connector;
pub mod control_plane;
pub mod error;
pub mod provisioner;
pub mod publisher;
pub mod query;
pub mod schema;
pub mod transport;

pub use connector::{configure_connector, ConnectorSettings};
pub use control_plane::{
    ConfigureOutcome, ControlPlaneConfigurator, ControlPlaneResponse, ControlPlaneTransport,
    CreationRequest, ExistenceCheck, HttpControlPlane, HttpExistenceCheck, TopicExistenceCheck,
};
pub use error::{ConfigError, ProvisionError, PublishError, SchemaError};
pub use provisioner::{
    CreateOutcome, KafkaTopicAdmin, ProvisionerConfig, TopicAdmin, TopicProvisioner,
};
pub use publisher::Publisher;
pub use query::{configure_query, QuerySettings};
pub use schema::{
    DirectorySchemaSource, SchemaPair, SchemaRegistrar, SchemaSource, StaticSchemaSource,
};
pub use transport::{
    KafkaTransport, KafkaTransportConfig, RecordTransport, RestProxyConfig, RestProxyTransport,
    REST_PROXY_CONTENT_TYPE,
};
