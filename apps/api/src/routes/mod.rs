pub mod client_script;
pub mod health;

use axum::{routing::get, routing::post, Router};

use crate::fill::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Fill API
        .route("/api/fill", post(handlers::handle_fill))
        .route("/api/fill-constants", post(handlers::handle_fill_constants))
        .route("/api/fill-llm", post(handlers::handle_fill_llm))
        // Context + constants
        .route("/api/context", get(handlers::handle_get_context))
        .route(
            "/api/constants",
            get(handlers::handle_get_constants).post(handlers::handle_update_constants),
        )
        .route("/api/recent", get(handlers::handle_recent))
        // Browser client
        .route("/script.js", get(client_script::handle_script))
        .route("/autofill.user.js", get(client_script::handle_userscript))
        .with_state(state)
}
