use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::constants::{ConstantStore, Constants, ConstantsError};
use crate::fill::archive::ResponseArchive;
use crate::fill::batch::AutofillEngine;
use crate::fill::job_context::JobContext;
use crate::matcher::semantic::EmbeddingIndex;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<ConstantStore>,
    /// `None` when no embedding credential is configured.
    pub index: Option<Arc<EmbeddingIndex>>,
    pub engine: AutofillEngine,
    /// Loaded once at startup; requests may override it.
    pub job_context: JobContext,
    pub archive: Arc<ResponseArchive>,
    /// Serializes reloads so the index is always built for the store's current key set.
    reload_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<ConstantStore>,
        index: Option<Arc<EmbeddingIndex>>,
        engine: AutofillEngine,
        job_context: JobContext,
        archive: Arc<ResponseArchive>,
    ) -> Self {
        Self {
            config,
            store,
            index,
            engine,
            job_context,
            archive,
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Reloads the constants (persisting `replacement` first when given) and rebuilds
    /// the embedding index for the new set. The index is emptied before the store
    /// swaps, so no query can see vectors for keys that no longer exist.
    /// Concurrent reloads run one after another.
    pub async fn reload_constants(
        &self,
        replacement: Option<&HashMap<String, String>>,
    ) -> Result<Constants, ConstantsError> {
        let _reload = self.reload_lock.lock().await;

        if let Some(index) = &self.index {
            index.invalidate().await;
        }

        let reloaded = match replacement {
            Some(constants) => self.store.replace(constants).await,
            None => self.store.reload().await,
        };

        // On failure the store keeps its old snapshot; rebuild for that one instead.
        let constants = match &reloaded {
            Ok(constants) => Arc::clone(constants),
            Err(_) => self.store.get().await?,
        };
        self.rebuild_index(&constants).await;

        reloaded
    }

    /// Best-effort index rebuild for `constants`, discarding whatever the index held.
    /// Failure leaves semantic matching disabled until the next reload.
    pub async fn rebuild_index(&self, constants: &HashMap<String, String>) {
        let Some(index) = &self.index else {
            return;
        };
        match index.rebuild(constants).await {
            Ok(count) => info!("Embedding index ready with {count} keys"),
            Err(e) => warn!("Embedding index build failed, semantic matching disabled: {e}"),
        }
    }
}
