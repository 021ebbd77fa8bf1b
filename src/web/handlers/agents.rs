use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use super::super::AppState;
use super::super::error::ApiError;
use super::export::XLSX_MIME;
use crate::export::xlsx;
use crate::store::types::{Agent, AgentPayload};

pub(crate) async fn create_agent(
    State(state): State<AppState>,
    Json(payload): Json<AgentPayload>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state.store.save_agent(payload).await?;
    Ok(Json(agent))
}

pub(crate) async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<Vec<Agent>>, ApiError> {
    Ok(Json(state.store.list_agents().await?))
}

/// Lean projection for the condition picker.
pub(crate) async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(match state.store.get_agent_lean(&agent_id).await? {
        Some(agent) => Json(agent).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Agent not found" })),
        )
            .into_response(),
    })
}

pub(crate) async fn update_agent(
    State(state): State<AppState>,
    Json(agent): Json<Agent>,
) -> Result<Response, ApiError> {
    Ok(if state.store.update_agent(&agent).await? {
        Json(agent).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Agent not found" })),
        )
            .into_response()
    })
}

/// Sample rule sheet served to the admin UI. The uploaded counterpart
/// arrives at `upload-rulesheet` as a parsed agent update; the browser does
/// the sheet parsing.
pub(crate) async fn download_sample() -> Result<Response, ApiError> {
    let bytes = tokio::task::spawn_blocking(xlsx::sample_rule_sheet).await??;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"sample_rule_sheet.xlsx\"".to_string(),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Deleting a condition still referenced by an experiment is refused; the
/// referencing experiments come back so the admin can untangle them.
pub(crate) async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Response, ApiError> {
    let referencing = state.store.experiments_referencing_agent(&agent_id).await?;
    if !referencing.is_empty() {
        return Ok((
            StatusCode::CONFLICT,
            Json(json!({ "experiments": referencing })),
        )
            .into_response());
    }
    state.store.delete_agent(&agent_id).await?;
    Ok(StatusCode::OK.into_response())
}
