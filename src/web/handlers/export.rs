use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::super::error::ApiError;
use crate::export::{archive, collect_experiment_data, xlsx};

pub(crate) const XLSX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Workbook download of the full experiment data set. Rendering is pure CPU
/// work, so it runs off the async workers.
pub(crate) async fn experiment_xlsx(
    State(state): State<AppState>,
    Path(experiment_id): Path<String>,
) -> Result<Response, ApiError> {
    let export = collect_experiment_data(&state.store, &experiment_id).await?;
    let bytes = tokio::task::spawn_blocking(move || xlsx::build_workbook(&export)).await??;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"experiment_{experiment_id}.xlsx\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Deserialize)]
pub(crate) struct ActionUnitsQuery {
    experiment: String,
}

/// Gzipped tarball of the per-experiment action-unit captures, packed off
/// the async workers.
pub(crate) async fn action_units(
    State(state): State<AppState>,
    Query(query): Query<ActionUnitsQuery>,
) -> Result<Response, ApiError> {
    let data_dir = state.store.data_dir().to_path_buf();
    let experiment = query.experiment.clone();
    let packed = tokio::task::spawn_blocking(move || {
        archive::pack_action_units(&data_dir, &experiment)
    })
    .await??;
    let Some(bytes) = packed else {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "No action units for experiment" })),
        )
            .into_response());
    };
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"action_units_{}.tar.gz\"", query.experiment),
            ),
        ],
        bytes,
    )
        .into_response())
}
