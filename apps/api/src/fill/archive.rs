//! Response archive — every full fill is written to `responses/response_<timestamp>.json`
//! so the most recent answers can be inspected or replayed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::info;

use crate::fill::batch::FillOutcome;

const FILE_PREFIX: &str = "response_";
const FILE_SUFFIX: &str = ".json";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

pub struct ResponseArchive {
    dir: PathBuf,
}

impl ResponseArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `outcome` under a millisecond timestamp.
    pub async fn save(&self, outcome: &FillOutcome) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let name = format!(
            "{FILE_PREFIX}{}{FILE_SUFFIX}",
            Local::now().format(TIMESTAMP_FORMAT)
        );
        let path = self.dir.join(name);
        let body = serde_json::to_vec_pretty(outcome)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!("Response saved to {}", path.display());
        Ok(path)
    }

    /// The newest archived outcome, or `None` when nothing has been saved yet.
    pub async fn latest(&self) -> Result<Option<FillOutcome>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()))
            }
        };

        // Timestamps sort lexicographically.
        let mut newest: Option<String> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
                continue;
            }
            if newest.as_ref().map_or(true, |n| name > *n) {
                newest = Some(name);
            }
        }

        let Some(name) = newest else {
            return Ok(None);
        };
        let path = self.dir.join(name);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let outcome = serde_json::from_slice(&bytes)
            .with_context(|| format!("Malformed archived response {}", path.display()))?;
        Ok(Some(outcome))
    }
}
