mod config;
mod constants;
mod errors;
mod fill;
mod llm_client;
mod matcher;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::constants::{ConstantStore, JsonFileSource};
use crate::fill::archive::ResponseArchive;
use crate::fill::batch::AutofillEngine;
use crate::fill::job_context::load_job_context;
use crate::llm_client::GeminiClient;
use crate::matcher::generative::GenerativeFallback;
use crate::matcher::semantic::EmbeddingIndex;
use crate::matcher::FieldMatcher;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Autofill API v{}", env!("CARGO_PKG_VERSION"));

    // Constants are loaded lazily; a bad file only fails the requests that need it.
    let store = Arc::new(ConstantStore::new(Arc::new(JsonFileSource::new(
        config.constants_path.clone(),
    ))));

    // One Gemini client serves both embeddings and generation.
    let gemini = match &config.gemini_api_key {
        Some(key) => {
            let client = Arc::new(GeminiClient::new(key.clone())?);
            info!(
                "Gemini client initialized (model: {}, embeddings: {})",
                llm_client::MODEL,
                llm_client::EMBEDDING_MODEL
            );
            Some(client)
        }
        None => {
            warn!("GEMINI_API_KEY not set; semantic matching and LLM fallback disabled");
            None
        }
    };

    let index = gemini
        .clone()
        .map(|client| Arc::new(EmbeddingIndex::new(client, config.provider_timeout)));
    let generator = gemini.map(|client| GenerativeFallback::new(client, config.provider_timeout));

    let engine = AutofillEngine::new(
        FieldMatcher::new(index.clone(), config.semantic_threshold),
        generator,
        config.llm_concurrency,
    );

    let state = AppState::new(
        config.clone(),
        Arc::clone(&store),
        index,
        engine,
        load_job_context(&config.job_description_path).await,
        Arc::new(ResponseArchive::new(config.responses_dir.clone())),
    );

    // Pre-build the embedding index; failure degrades to exact + pattern matching.
    match store.get().await {
        Ok(constants) => state.rebuild_index(&constants).await,
        Err(e) => warn!("Constants not loaded at startup: {e}"),
    }

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // the browser extension calls from arbitrary origins

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");
    info!("API endpoint: {}", config.fill_endpoint());
    info!("Script endpoint: {}/script.js", config.public_origin());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
