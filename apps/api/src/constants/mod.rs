//! Constant Store — the flat map of personal facts (`first_name`, `authorized_to_work`, ...)
//! that form fields are answered from.
//!
//! The store hands out immutable `Arc` snapshots. A fill operation holds one snapshot
//! for its whole lifetime, so a concurrent reload never changes the key set under it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Immutable snapshot of the constants, keyed by `ConstantKey`.
pub type Constants = Arc<HashMap<String, String>>;

#[derive(Debug, Error)]
pub enum ConstantsError {
    #[error("Failed to access constants file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed constants: {0}")]
    Malformed(String),
}

/// Where constants are persisted. The format and location are the source's concern.
#[async_trait]
pub trait ConstantSource: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, String>, ConstantsError>;

    async fn persist(&self, constants: &HashMap<String, String>) -> Result<(), ConstantsError>;
}

/// Constants stored as a single JSON object on disk.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> ConstantsError {
        ConstantsError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ConstantSource for JsonFileSource {
    async fn load(&self) -> Result<HashMap<String, String>, ConstantsError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        parse_constants(&data)
    }

    async fn persist(&self, constants: &HashMap<String, String>) -> Result<(), ConstantsError> {
        // Sorted keys keep the file diff-friendly.
        let sorted: std::collections::BTreeMap<_, _> = constants.iter().collect();
        let json = serde_json::to_vec_pretty(&sorted)
            .map_err(|e| ConstantsError::Malformed(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| self.io_error(e))
    }
}

/// Parses a JSON object of mixed-type values into canonical string constants.
pub fn parse_constants(data: &[u8]) -> Result<HashMap<String, String>, ConstantsError> {
    let raw: Value =
        serde_json::from_slice(data).map_err(|e| ConstantsError::Malformed(e.to_string()))?;

    let Value::Object(entries) = raw else {
        return Err(ConstantsError::Malformed(
            "top-level value must be a JSON object".to_string(),
        ));
    };

    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| canonical_value(&value).map(|v| (key, v)))
        .collect())
}

/// Booleans become `yes`/`no` for form compatibility; whole numbers drop the decimal point.
/// `null` has no answer and is dropped.
fn canonical_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(true) => Some("yes".to_string()),
        Value::Bool(false) => Some("no".to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
            _ => n.to_string(),
        }),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Process-scoped, lazily loaded cache over a `ConstantSource`.
pub struct ConstantStore {
    source: Arc<dyn ConstantSource>,
    cache: RwLock<Option<Constants>>,
}

impl ConstantStore {
    pub fn new(source: Arc<dyn ConstantSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
        }
    }

    /// Returns the cached snapshot, loading it on first access.
    pub async fn get(&self) -> Result<Constants, ConstantsError> {
        if let Some(constants) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(constants));
        }

        let mut cache = self.cache.write().await;
        // Another task may have loaded while we waited for the write lock.
        if let Some(constants) = cache.as_ref() {
            return Ok(Arc::clone(constants));
        }

        let constants: Constants = Arc::new(self.source.load().await?);
        info!("Loaded {} constants", constants.len());
        *cache = Some(Arc::clone(&constants));
        Ok(constants)
    }

    /// Re-reads the source and swaps the snapshot. Readers holding the old
    /// snapshot keep it until they drop it. On failure the old snapshot stays.
    pub async fn reload(&self) -> Result<Constants, ConstantsError> {
        let mut cache = self.cache.write().await;
        let constants: Constants = Arc::new(self.source.load().await?);
        info!("Reloaded {} constants", constants.len());
        *cache = Some(Arc::clone(&constants));
        Ok(constants)
    }

    /// Persists a whole new constant set, then reloads from the source.
    pub async fn replace(
        &self,
        constants: &HashMap<String, String>,
    ) -> Result<Constants, ConstantsError> {
        self.source.persist(constants).await?;
        self.reload().await
    }

    pub async fn get_constant(&self, key: &str) -> Option<String> {
        self.get().await.ok()?.get(key).cloned()
    }
}
