//! Axum route handlers for the Fill API.

use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AppError;
use crate::fill::batch::{FillMode, FillOutcome};
use crate::fill::job_context::{load_company_info, JobContext};
use crate::matcher::generative::FieldContext;
use crate::matcher::FieldDescriptor;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FillRequest {
    pub fields: Vec<FieldDescriptor>,
    /// Overrides the server's job context; blank parts fall back to it.
    #[serde(default)]
    pub job_context: Option<JobContext>,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub constants_only: bool,
}

#[derive(Debug, Serialize)]
pub struct UpdateConstantsResponse {
    pub status: String,
    pub count: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/fill
///
/// Constants first, generative fallback for the rest (unless `constants_only`).
/// The response is archived; archive failures are only logged.
pub async fn handle_fill(
    State(state): State<AppState>,
    Json(request): Json<FillRequest>,
) -> Result<Json<FillOutcome>, AppError> {
    let mode = if request.constants_only {
        FillMode::ConstantsOnly
    } else {
        FillMode::Full
    };
    let outcome = run_fill(&state, request, mode).await?;

    if let Err(e) = state.archive.save(&outcome).await {
        warn!("Failed to archive fill response: {e:#}");
    }

    Ok(Json(outcome))
}

/// POST /api/fill-constants
pub async fn handle_fill_constants(
    State(state): State<AppState>,
    Json(request): Json<FillRequest>,
) -> Result<Json<FillOutcome>, AppError> {
    Ok(Json(run_fill(&state, request, FillMode::ConstantsOnly).await?))
}

/// POST /api/fill-llm
///
/// Generates every field, skipping constants. Needs a configured text model.
pub async fn handle_fill_llm(
    State(state): State<AppState>,
    Json(request): Json<FillRequest>,
) -> Result<Json<FillOutcome>, AppError> {
    if !state.engine.generation_enabled() {
        return Err(AppError::Unavailable(
            "Generative fallback is not configured (GEMINI_API_KEY unset)".to_string(),
        ));
    }
    Ok(Json(run_fill(&state, request, FillMode::GenerativeOnly).await?))
}

/// GET /api/context
pub async fn handle_get_context(State(state): State<AppState>) -> Json<JobContext> {
    Json(state.job_context.clone())
}

/// GET /api/constants
pub async fn handle_get_constants(
    State(state): State<AppState>,
) -> Result<Json<HashMap<String, String>>, AppError> {
    let constants = state.store.get().await?;
    Ok(Json(constants.as_ref().clone()))
}

/// POST /api/constants
///
/// Replaces the whole constant set, reloads the store and rebuilds the index.
pub async fn handle_update_constants(
    State(state): State<AppState>,
    Json(constants): Json<HashMap<String, String>>,
) -> Result<Json<UpdateConstantsResponse>, AppError> {
    let reloaded = state.reload_constants(Some(&constants)).await?;
    Ok(Json(UpdateConstantsResponse {
        status: "success".to_string(),
        count: reloaded.len(),
    }))
}

/// GET /api/recent
pub async fn handle_recent(State(state): State<AppState>) -> Result<Json<FillOutcome>, AppError> {
    state
        .archive
        .latest()
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No archived responses yet".to_string()))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

async fn run_fill(
    state: &AppState,
    request: FillRequest,
    mode: FillMode,
) -> Result<FillOutcome, AppError> {
    validate_fields(&request.fields)?;

    let constants = state.store.get().await?;
    let job = request
        .job_context
        .map(|job| job.or(&state.job_context))
        .unwrap_or_else(|| state.job_context.clone());

    let context = FieldContext {
        job_title: job.title,
        company: job.company,
        company_info: load_company_info(&state.config.company_info_path).await,
        background: request.background,
        skills: request.skills,
        constants,
    };

    Ok(state.engine.batch_fill(request.fields, &context, mode).await)
}

fn validate_fields(fields: &[FieldDescriptor]) -> Result<(), AppError> {
    match fields.iter().position(|f| f.id.trim().is_empty()) {
        Some(i) => Err(AppError::Validation(format!("fields[{i}] is missing an id"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_fields_rejects_blank_id() {
        let ok = FieldDescriptor {
            id: "a".to_string(),
            ..Default::default()
        };
        let blank = FieldDescriptor {
            id: "  ".to_string(),
            ..Default::default()
        };

        assert!(validate_fields(&[]).is_ok());
        assert!(validate_fields(&[ok.clone()]).is_ok());
        assert!(matches!(
            validate_fields(&[ok, blank]),
            Err(AppError::Validation(msg)) if msg.contains("fields[1]")
        ));
    }

    #[test]
    fn test_fill_request_defaults() {
        let request: FillRequest =
            serde_json::from_str(r#"{"fields": [{"id": "f1", "label": "Email"}]}"#).unwrap();
        assert!(!request.constants_only);
        assert!(request.job_context.is_none());
        assert_eq!(request.fields[0].label, "Email");
    }
}
