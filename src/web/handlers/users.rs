use anyhow::anyhow;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::super::error::ApiError;
use crate::store::types::{User, UserPayload};

/// Register a participant. The condition is resolved here and frozen into
/// the user row: the explicitly assigned agent, or the experiment's active
/// one. Admin accounts carry no snapshot.
pub(crate) async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<UserPayload>,
) -> Result<Json<User>, ApiError> {
    let agent = if payload.is_admin {
        None
    } else if let Some(agent_id) = &payload.agent_id {
        Some(
            state
                .store
                .get_agent(agent_id)
                .await?
                .ok_or_else(|| anyhow!("agent {agent_id} not found"))?,
        )
    } else {
        let experiment = state
            .store
            .get_experiment(&payload.experiment_id)
            .await?
            .ok_or_else(|| anyhow!("experiment {} not found", payload.experiment_id))?;
        let active_id = experiment
            .active_agent_id
            .ok_or_else(|| anyhow!("experiment {} has no active agent", experiment.id))?;
        Some(
            state
                .store
                .get_agent(&active_id)
                .await?
                .ok_or_else(|| anyhow!("active agent {active_id} not found"))?,
        )
    };

    let user = state.store.create_user(payload, agent).await?;
    Ok(Json(user))
}

pub(crate) async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(match state.store.get_user(&user_id).await? {
        Some(user) => Json(user).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "User not found" })),
        )
            .into_response(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsersQuery {
    experiment_id: String,
}

pub(crate) async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UsersQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(
        state.store.users_by_experiment(&query.experiment_id).await?,
    ))
}
