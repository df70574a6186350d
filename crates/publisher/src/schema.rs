//! Key/value schema loading and caching
//!
//! Schemas are read once per entity type and shared by every publisher of
//! that type. The cache is not locked while a definition is being read:
//! two publishers racing on first use may both parse the same definition,
//! but parsing is deterministic and the first insert wins, so every caller
//! ends up holding the same pair.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::SchemaError;

/// Key and value schema of one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaPair {
    pub key: Value,
    pub value: Value,
}

/// Where schema definitions come from
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Read and parse the definitions for an entity type
    async fn load(&self, entity_type: &str) -> Result<SchemaPair, SchemaError>;
}

/// Reads `<dir>/<entity>_key.json` and `<dir>/<entity>_value.json`
#[derive(Debug, Clone)]
pub struct DirectorySchemaSource {
    dir: PathBuf,
}

impl DirectorySchemaSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read(&self, entity_type: &str, kind: &'static str) -> Result<Value, SchemaError> {
        let path = self.dir.join(format!("{}_{}.json", entity_type, kind));

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SchemaError::Read {
                entity_type: entity_type.to_string(),
                kind,
                path: path.display().to_string(),
                source,
            })?;

        serde_json::from_str(&text).map_err(|e| SchemaError::Parse {
            entity_type: entity_type.to_string(),
            kind,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SchemaSource for DirectorySchemaSource {
    async fn load(&self, entity_type: &str) -> Result<SchemaPair, SchemaError> {
        let key = self.read(entity_type, "key").await?;
        let value = self.read(entity_type, "value").await?;
        Ok(SchemaPair { key, value })
    }
}

/// Definitions held as JSON text, keyed by entity type
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaSource {
    definitions: HashMap<String, (String, String)>,
}

impl StaticSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the key and value definition text for an entity type
    pub fn with_definition(
        mut self,
        entity_type: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.definitions
            .insert(entity_type.into(), (key.into(), value.into()));
        self
    }
}

fn parse_definition(
    entity_type: &str,
    kind: &'static str,
    text: &str,
) -> Result<Value, SchemaError> {
    serde_json::from_str(text).map_err(|e| SchemaError::Parse {
        entity_type: entity_type.to_string(),
        kind,
        reason: e.to_string(),
    })
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn load(&self, entity_type: &str) -> Result<SchemaPair, SchemaError> {
        let (key, value) = self
            .definitions
            .get(entity_type)
            .ok_or_else(|| SchemaError::Unknown(entity_type.to_string()))?;

        Ok(SchemaPair {
            key: parse_definition(entity_type, "key", key)?,
            value: parse_definition(entity_type, "value", value)?,
        })
    }
}

/// Process-wide schema cache
pub struct SchemaRegistrar {
    source: Arc<dyn SchemaSource>,
    cache: DashMap<String, Arc<SchemaPair>>,
    loads: AtomicU64,
}

impl SchemaRegistrar {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            loads: AtomicU64::new(0),
        }
    }

    /// Schemas for the entity type, loading them on first use
    ///
    /// A failed load leaves the cache untouched so a later call reads the
    /// definition again.
    pub async fn get_schema(&self, entity_type: &str) -> Result<Arc<SchemaPair>, SchemaError> {
        if let Some(cached) = self.cache.get(entity_type) {
            return Ok(Arc::clone(cached.value()));
        }

        self.loads.fetch_add(1, Ordering::Relaxed);
        let loaded = Arc::new(self.source.load(entity_type).await?);
        debug!(entity_type, "Loaded key/value schemas");

        let entry = self
            .cache
            .entry(entity_type.to_string())
            .or_insert(loaded);
        Ok(Arc::clone(entry.value()))
    }

    /// Number of times a definition was read from the source
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Whether the entity type's schemas are cached
    pub fn is_cached(&self, entity_type: &str) -> bool {
        self.cache.contains_key(entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY: &str = r#"{"type": "record", "name": "weather_key", "fields": [{"name": "timestamp", "type": "long"}]}"#;
    const VALUE: &str = r#"{"type": "record", "name": "weather_value", "fields": [{"name": "temperature", "type": "int"}]}"#;

    fn registrar() -> SchemaRegistrar {
        SchemaRegistrar::new(Arc::new(
            StaticSchemaSource::new().with_definition("weather", KEY, VALUE),
        ))
    }

    #[tokio::test]
    async fn test_schemas_are_loaded_once() {
        let registrar = registrar();

        let first = registrar.get_schema("weather").await.unwrap();
        let second = registrar.get_schema("weather").await.unwrap();

        assert_eq!(registrar.loads(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.key["name"], "weather_key");
        assert_eq!(first.value["name"], "weather_value");
    }

    #[tokio::test]
    async fn test_unknown_entity_type_is_not_cached() {
        let registrar = registrar();

        let err = registrar.get_schema("arrivals").await.unwrap_err();
        assert!(matches!(err, SchemaError::Unknown(_)));
        assert!(!registrar.is_cached("arrivals"));
    }

    #[tokio::test]
    async fn test_invalid_definition_reports_kind() {
        let registrar = SchemaRegistrar::new(Arc::new(
            StaticSchemaSource::new().with_definition("weather", KEY, "{not json"),
        ));

        match registrar.get_schema("weather").await.unwrap_err() {
            SchemaError::Parse { kind, .. } => assert_eq!(kind, "value"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_use_converges() {
        let registrar = Arc::new(registrar());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registrar = Arc::clone(&registrar);
                tokio::spawn(async move { registrar.get_schema("weather").await.unwrap() })
            })
            .collect();

        let mut pairs = Vec::new();
        for handle in handles {
            pairs.push(handle.await.unwrap());
        }

        assert!(pairs.windows(2).all(|w| w[0] == w[1]));
        assert!(registrar.loads() >= 1);
    }

    #[tokio::test]
    async fn test_directory_source_reads_key_and_value_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("weather_key.json"))
            .unwrap()
            .write_all(KEY.as_bytes())
            .unwrap();
        std::fs::File::create(dir.path().join("weather_value.json"))
            .unwrap()
            .write_all(VALUE.as_bytes())
            .unwrap();

        let source = DirectorySchemaSource::new(dir.path());
        let pair = source.load("weather").await.unwrap();
        assert_eq!(pair.value["fields"][0]["name"], "temperature");

        let err = source.load("arrivals").await.unwrap_err();
        assert!(matches!(err, SchemaError::Read { kind: "key", .. }));
    }
}
