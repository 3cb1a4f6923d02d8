//! Browser client delivery. Both scripts are read from `PUBLIC_DIR` on every request and
//! get this service's address injected, so the same files work on any host.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::config::Config;
use crate::errors::AppError;
use crate::state::AppState;

const SCRIPT_FILE: &str = "script.js";
const USERSCRIPT_FILE: &str = "autofill.user.js";

/// Placeholder origin shipped in the userscript template.
const PLACEHOLDER_ORIGIN: &str = "https://YOUR_SERVER_IP:PORT";
const PLACEHOLDER_HOST: &str = "YOUR_SERVER_IP:PORT";

/// GET /script.js
///
/// The form-filling client, prefixed with its `API_URL` constant.
pub async fn handle_script(State(state): State<AppState>) -> Result<Response, AppError> {
    let script = read_public_file(&state.config, SCRIPT_FILE).await?;
    let body = format!(
        "const API_URL = '{}';\n{script}",
        state.config.fill_endpoint()
    );
    Ok(javascript(body))
}

/// GET /autofill.user.js
///
/// The userscript loader with every placeholder address rewritten.
pub async fn handle_userscript(State(state): State<AppState>) -> Result<Response, AppError> {
    let template = read_public_file(&state.config, USERSCRIPT_FILE).await?;
    Ok(javascript(render_userscript(&template, &state.config)))
}

pub fn render_userscript(template: &str, config: &Config) -> String {
    template
        .replace(PLACEHOLDER_ORIGIN, &config.public_origin())
        .replace(PLACEHOLDER_HOST, &format!("{}:{}", config.ip, config.port))
}

async fn read_public_file(config: &Config, name: &str) -> Result<String, AppError> {
    let path = config.public_dir.join(name);
    tokio::fs::read_to_string(&path).await.map_err(|e| {
        warn!("Error reading {}: {e}", path.display());
        AppError::NotFound(format!("{name} not found"))
    })
}

fn javascript(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
