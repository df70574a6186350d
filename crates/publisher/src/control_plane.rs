//! Idempotent configuration of control-plane resources
//!
//! Downstream services (the source connector, the continuous query) are
//! configured over REST. Each resource has its own existence check and
//! creation payload but goes through the same logic: skip if present,
//! otherwise submit once and treat any non-2xx answer as fatal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::ConfigError;
use crate::provisioner::TopicAdmin;

/// Default timeout for control-plane requests
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Status and body of a control-plane response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneResponse {
    pub status: u16,
    pub body: String,
}

impl ControlPlaneResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A creation call: where to send it and what to send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationRequest {
    pub url: String,
    pub content_type: String,
    #[serde(default)]
    pub accept: Option<String>,
    pub payload: Value,
}

impl CreationRequest {
    /// JSON request with the plain `application/json` content type
    pub fn json(url: impl Into<String>, payload: Value) -> Self {
        Self {
            url: url.into(),
            content_type: "application/json".to_string(),
            accept: None,
            payload,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }
}

/// HTTP access to the control plane
#[async_trait]
pub trait ControlPlaneTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<ControlPlaneResponse, ConfigError>;

    async fn post(&self, request: &CreationRequest) -> Result<ControlPlaneResponse, ConfigError>;
}

/// [`ControlPlaneTransport`] over reqwest
#[derive(Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("transit-publisher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ConfigError::Transport {
                url: String::new(),
                source,
            })?;

        Ok(Self { client })
    }

    pub fn with_default_timeout() -> Result<Self, ConfigError> {
        Self::new(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    async fn read(
        url: &str,
        response: reqwest::Response,
    ) -> Result<ControlPlaneResponse, ConfigError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|source| ConfigError::Transport {
                url: url.to_string(),
                source,
            })?;
        Ok(ControlPlaneResponse { status, body })
    }
}

#[async_trait]
impl ControlPlaneTransport for HttpControlPlane {
    async fn get(&self, url: &str) -> Result<ControlPlaneResponse, ConfigError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ConfigError::Transport {
                url: url.to_string(),
                source,
            })?;
        Self::read(url, response).await
    }

    async fn post(&self, request: &CreationRequest) -> Result<ControlPlaneResponse, ConfigError> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, &request.content_type)
            .body(request.payload.to_string());

        if let Some(ref accept) = request.accept {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }

        let response = builder
            .send()
            .await
            .map_err(|source| ConfigError::Transport {
                url: request.url.clone(),
                source,
            })?;
        Self::read(&request.url, response).await
    }
}

/// Answers whether a named resource is already configured
#[async_trait]
pub trait ExistenceCheck: Send + Sync {
    async fn exists(&self, resource_name: &str) -> Result<bool, ConfigError>;
}

/// `GET {base_url}/{name}`; a 200 means the resource exists
pub struct HttpExistenceCheck {
    transport: Arc<dyn ControlPlaneTransport>,
    base_url: String,
}

impl HttpExistenceCheck {
    pub fn new(transport: Arc<dyn ControlPlaneTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ExistenceCheck for HttpExistenceCheck {
    async fn exists(&self, resource_name: &str) -> Result<bool, ConfigError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), resource_name);
        let response = self.transport.get(&url).await?;
        debug!(resource = resource_name, status = response.status, "Existence check");
        Ok(response.status == 200)
    }
}

/// A resource exists when the broker has a topic of the same name
pub struct TopicExistenceCheck {
    admin: Arc<dyn TopicAdmin>,
}

impl TopicExistenceCheck {
    pub fn new(admin: Arc<dyn TopicAdmin>) -> Self {
        Self { admin }
    }
}

#[async_trait]
impl ExistenceCheck for TopicExistenceCheck {
    async fn exists(&self, resource_name: &str) -> Result<bool, ConfigError> {
        self.admin
            .topic_exists(resource_name)
            .await
            .map_err(|e| ConfigError::ExistenceCheck {
                resource: resource_name.to_string(),
                message: e.to_string(),
            })
    }
}

/// What [`ControlPlaneConfigurator::ensure_configured`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureOutcome {
    /// The resource was already there; nothing was sent
    AlreadyPresent,
    /// The creation payload was accepted with this status
    Created { status: u16 },
}

/// Applies the check-then-create sequence for any control-plane resource
#[derive(Clone)]
pub struct ControlPlaneConfigurator {
    transport: Arc<dyn ControlPlaneTransport>,
}

impl ControlPlaneConfigurator {
    pub fn new(transport: Arc<dyn ControlPlaneTransport>) -> Self {
        Self { transport }
    }

    /// Transport used for creation calls
    pub fn transport(&self) -> Arc<dyn ControlPlaneTransport> {
        Arc::clone(&self.transport)
    }

    /// Create the resource unless the existence check finds it
    ///
    /// A non-2xx answer to the creation call is returned as
    /// [`ConfigError::Rejected`] with the response body. Nothing is retried.
    pub async fn ensure_configured(
        &self,
        resource_name: &str,
        existence_check: &dyn ExistenceCheck,
        creation: &CreationRequest,
    ) -> Result<ConfigureOutcome, ConfigError> {
        if existence_check.exists(resource_name).await? {
            debug!(resource = resource_name, "Resource already configured, skipping creation");
            return Ok(ConfigureOutcome::AlreadyPresent);
        }

        info!(resource = resource_name, url = %creation.url, "Creating control-plane resource");
        let response = self.transport.post(creation).await?;

        if !response.is_success() {
            error!(
                resource = resource_name,
                status = response.status,
                body = %response.body,
                "Control plane rejected creation"
            );
            return Err(ConfigError::Rejected {
                resource: resource_name.to_string(),
                status: response.status,
                body: response.body,
            });
        }

        info!(resource = resource_name, status = response.status, "Resource created");
        Ok(ConfigureOutcome::Created {
            status: response.status,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport answering GETs and POSTs with fixed responses
    pub(crate) struct ScriptedTransport {
        pub get_status: u16,
        pub post_response: ControlPlaneResponse,
        pub gets: Mutex<Vec<String>>,
        pub posts: Mutex<Vec<CreationRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(get_status: u16, post_status: u16, post_body: &str) -> Self {
            Self {
                get_status,
                post_response: ControlPlaneResponse {
                    status: post_status,
                    body: post_body.to_string(),
                },
                gets: Mutex::new(Vec::new()),
                posts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn post_count(&self) -> usize {
            self.posts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ControlPlaneTransport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<ControlPlaneResponse, ConfigError> {
            self.gets.lock().unwrap().push(url.to_string());
            Ok(ControlPlaneResponse {
                status: self.get_status,
                body: String::new(),
            })
        }

        async fn post(
            &self,
            request: &CreationRequest,
        ) -> Result<ControlPlaneResponse, ConfigError> {
            self.posts.lock().unwrap().push(request.clone());
            Ok(self.post_response.clone())
        }
    }

    struct Fixed(bool);

    #[async_trait]
    impl ExistenceCheck for Fixed {
        async fn exists(&self, _resource_name: &str) -> Result<bool, ConfigError> {
            Ok(self.0)
        }
    }

    fn request() -> CreationRequest {
        CreationRequest::json(
            "http://localhost:8083/connectors",
            serde_json::json!({"name": "stations", "config": {}}),
        )
    }

    #[tokio::test]
    async fn test_existing_resource_is_not_created() {
        let transport = Arc::new(ScriptedTransport::new(200, 201, ""));
        let configurator = ControlPlaneConfigurator::new(transport.clone());

        let outcome = configurator
            .ensure_configured("stations", &Fixed(true), &request())
            .await
            .unwrap();

        assert_eq!(outcome, ConfigureOutcome::AlreadyPresent);
        assert_eq!(transport.post_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_resource_is_created_once() {
        let transport = Arc::new(ScriptedTransport::new(404, 201, "{}"));
        let configurator = ControlPlaneConfigurator::new(transport.clone());

        let outcome = configurator
            .ensure_configured("stations", &Fixed(false), &request())
            .await
            .unwrap();

        assert_eq!(outcome, ConfigureOutcome::Created { status: 201 });
        assert_eq!(transport.post_count(), 1);
        assert_eq!(transport.posts.lock().unwrap()[0], request());
    }

    #[tokio::test]
    async fn test_non_2xx_is_fatal_with_body() {
        let body = r#"{"error_code": 400, "message": "Connector configuration is invalid"}"#;
        let transport = Arc::new(ScriptedTransport::new(404, 400, body));
        let configurator = ControlPlaneConfigurator::new(transport.clone());

        let err = configurator
            .ensure_configured("stations", &Fixed(false), &request())
            .await
            .unwrap_err();

        match err {
            ConfigError::Rejected {
                resource,
                status,
                body: returned,
            } => {
                assert_eq!(resource, "stations");
                assert_eq!(status, 400);
                assert_eq!(returned, body);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(transport.post_count(), 1);
    }

    #[tokio::test]
    async fn test_http_existence_check_requires_200() {
        let found = Arc::new(ScriptedTransport::new(200, 201, ""));
        let check = HttpExistenceCheck::new(found.clone(), "http://localhost:8083/connectors/");
        assert!(check.exists("stations").await.unwrap());
        assert_eq!(
            found.gets.lock().unwrap()[0],
            "http://localhost:8083/connectors/stations"
        );

        let missing = Arc::new(ScriptedTransport::new(404, 201, ""));
        let check = HttpExistenceCheck::new(missing, "http://localhost:8083/connectors");
        assert!(!check.exists("stations").await.unwrap());
    }

    #[test]
    fn test_response_success_range() {
        let ok = |status| ControlPlaneResponse { status, body: String::new() };
        assert!(ok(200).is_success());
        assert!(ok(201).is_success());
        assert!(ok(299).is_success());
        assert!(!ok(199).is_success());
        assert!(!ok(409).is_success());
        assert!(!ok(500).is_success());
    }
}
