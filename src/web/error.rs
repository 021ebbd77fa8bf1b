use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::conversation::TurnError;

/// HTTP rendering of a turn failure. The SSE endpoint reuses the same
/// mapping for its in-stream error payloads.
pub(crate) fn status_and_message(err: &TurnError) -> (StatusCode, &'static str) {
    match err {
        TurnError::MessageLimitExceeded => (StatusCode::FORBIDDEN, "Messages Limit Exceeded"),
        TurnError::ConversationLimitExceeded => {
            (StatusCode::FORBIDDEN, "Conversations Limit Exceeded")
        }
        TurnError::MessageTooLong => (StatusCode::BAD_REQUEST, "Message Is Too Long"),
        TurnError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
    }
}

impl IntoResponse for TurnError {
    fn into_response(self) -> Response {
        if let TurnError::Internal(e) = &self {
            error!("request failed: {e:#}");
        }
        let (status, message) = status_and_message(&self);
        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// Catch-all wrapper for handler errors outside the turn pipeline.
pub(crate) struct ApiError(pub(crate) anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("request failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "Internal Server Error" })),
        )
            .into_response()
    }
}
