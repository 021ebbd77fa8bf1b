use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::info;

use super::super::AppState;
use super::super::error::ApiError;
use crate::store::types::{Experiment, ExperimentPayload};

pub(crate) async fn create_experiment(
    State(state): State<AppState>,
    Json(payload): Json<ExperimentPayload>,
) -> Result<Json<Experiment>, ApiError> {
    let experiment = state.store.create_experiment(payload).await?;
    Ok(Json(experiment))
}

pub(crate) async fn list_experiments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Experiment>>, ApiError> {
    Ok(Json(state.store.list_experiments().await?))
}

pub(crate) async fn get_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(match state.store.get_experiment(&experiment_id).await? {
        Some(experiment) => Json(experiment).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Experiment not found" })),
        )
            .into_response(),
    })
}

pub(crate) async fn update_experiment(
    State(state): State<AppState>,
    Json(experiment): Json<Experiment>,
) -> Result<Response, ApiError> {
    Ok(if state.store.update_experiment(&experiment).await? {
        Json(experiment).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Experiment not found" })),
        )
            .into_response()
    })
}

/// Removes the experiment and everything recorded under it.
pub(crate) async fn delete_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .store
        .delete_experiment_conversations(&experiment_id)
        .await?;
    info!("deleted {removed} conversations of experiment {experiment_id}");
    state.store.delete_experiment(&experiment_id).await?;
    Ok(StatusCode::OK)
}
