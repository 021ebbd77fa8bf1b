use std::convert::Infallible;

use axum::Json;
use axum::extract::{Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use super::super::AppState;
use super::super::error::{ApiError, status_and_message};
use crate::conversation::TurnError;
use crate::store::types::{NewMessage, Role};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConversationQuery {
    conversation_id: String,
}

pub(crate) async fn get_conversation(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (conversation, metadata) = tokio::try_join!(
        state.store.conversation_messages(&query.conversation_id),
        state.store.get_metadata(&query.conversation_id),
    )?;
    Ok(Json(json!({
        "conversation": conversation,
        "conversationMetaData": metadata,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageRequest {
    message: NewMessage,
    conversation_id: String,
}

pub(crate) async fn post_message(
    State(state): State<AppState>,
    Json(payload): Json<MessageRequest>,
) -> Result<impl IntoResponse, TurnError> {
    let saved = state
        .engine
        .run_turn(&payload.conversation_id, payload.message, None)
        .await?;
    Ok(Json(saved))
}

pub(crate) async fn post_audio(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, TurnError> {
    let mut conversation_id = None;
    let mut audio = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TurnError::Internal(e.into()))?
    {
        match field.name() {
            Some("conversationId") => {
                conversation_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| TurnError::Internal(e.into()))?,
                );
            }
            Some("audio") => {
                audio = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| TurnError::Internal(e.into()))?,
                );
            }
            _ => {}
        }
    }
    let Some(conversation_id) = conversation_id else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "conversationId is missing" })),
        )
            .into_response());
    };
    let Some(audio) = audio else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Audio file is missing" })),
        )
            .into_response());
    };

    let outcome = state.engine.run_audio_turn(&conversation_id, &audio).await?;
    let metadata = json!({
        "_id": outcome.message.id,
        "role": outcome.message.role,
        "userAnnotation": outcome.message.user_annotation,
        "timeDelay": outcome.message.time_delay,
        "contentType": "audio/mpeg",
    });
    Ok(multipart_reply(&metadata, &outcome.speech_mp3))
}

/// Assemble a two-part multipart/form-data body: a JSON metadata part and
/// the synthesized MP3.
fn multipart_reply(metadata: &serde_json::Value, mp3: &[u8]) -> Response {
    let boundary = format!("chatlab-{}", uuid::Uuid::new_v4());
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"audio\"; \
             filename=\"response_audio.mp3\"\r\nContent-Type: audio/mpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(mp3);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )],
        body,
    )
        .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StreamQuery {
    conversation_id: String,
    role: Option<String>,
    content: String,
}

/// Streamed turn. Completion deltas arrive as `data:` events; the saved
/// assistant message closes the stream on a `close` event. Failures are
/// encoded in-stream because the headers are already out.
pub(crate) async fn stream_message(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (event_tx, event_rx) = mpsc::channel::<Event>(32);

    tokio::spawn(async move {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(32);
        let forwarder = {
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                while let Some(chunk) = chunk_rx.recv().await {
                    let payload = json!({ "message": chunk }).to_string();
                    if event_tx.send(Event::default().data(payload)).await.is_err() {
                        break;
                    }
                }
            })
        };

        let role = query
            .role
            .as_deref()
            .and_then(Role::parse)
            .unwrap_or(Role::User);
        let message = NewMessage {
            role,
            content: query.content,
            time_delay: None,
        };
        let result = state
            .engine
            .run_turn(&query.conversation_id, message, Some(chunk_tx))
            .await;
        // All deltas must be flushed before the terminal event.
        let _ = forwarder.await;

        match result {
            Ok(saved) => {
                let data = serde_json::to_string(&saved).unwrap_or_default();
                let _ = event_tx.send(Event::default().event("close").data(data)).await;
            }
            Err(e) => {
                let (status, message) = status_and_message(&e);
                let payload = json!({
                    "error": { "response": { "status": status.as_u16(), "data": message } }
                });
                let _ = event_tx.send(Event::default().data(payload.to_string())).await;
            }
        }
    });

    Sse::new(ReceiverStream::new(event_rx).map(Ok::<_, Infallible>))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateConversationRequest {
    user_id: String,
}

pub(crate) async fn create_conversation(
    State(state): State<AppState>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<String, TurnError> {
    let metadata = state.engine.create_conversation(&payload.user_id).await?;
    Ok(metadata.id)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SurveyRequest {
    conversation_id: String,
    data: serde_json::Value,
    is_pre_conversation: bool,
}

pub(crate) async fn update_metadata(
    State(state): State<AppState>,
    Json(payload): Json<SurveyRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .set_survey(
            &payload.conversation_id,
            payload.is_pre_conversation,
            &payload.data,
        )
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnnotationRequest {
    conversation_id: String,
    message_number: u32,
    user_annotation: i64,
}

pub(crate) async fn update_annotation(
    State(state): State<AppState>,
    Json(payload): Json<AnnotationRequest>,
) -> Result<Response, ApiError> {
    let updated = state
        .store
        .set_user_annotation(
            &payload.conversation_id,
            payload.message_number,
            payload.user_annotation,
        )
        .await?;
    Ok(match updated {
        Some(message) => Json(message).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Message not found" })),
        )
            .into_response(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FinishRequest {
    conversation_id: String,
    experiment_id: String,
    #[serde(default)]
    is_admin: bool,
}

pub(crate) async fn finish_conversation(
    State(state): State<AppState>,
    Json(payload): Json<FinishRequest>,
) -> Result<StatusCode, TurnError> {
    state
        .engine
        .finish_conversation(
            &payload.conversation_id,
            &payload.experiment_id,
            payload.is_admin,
        )
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SnapshotRequest {
    image: String,
    conversation_id: String,
    experiment_id: String,
}

/// Store one webcam frame under
/// `webcam_base/<conversation>_<experiment>/<yyyyMMddHHmmss>.png`.
pub(crate) async fn save_snapshot(
    State(state): State<AppState>,
    Json(payload): Json<SnapshotRequest>,
) -> Result<StatusCode, ApiError> {
    let Some(encoded) = payload.image.split(',').nth(1) else {
        warn!("snapshot payload is not a data url");
        return Ok(StatusCode::BAD_REQUEST);
    };
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;

    let folder = state
        .store
        .data_dir()
        .join("webcam_base")
        .join(format!("{}_{}", payload.conversation_id, payload.experiment_id));
    tokio::fs::create_dir_all(&folder).await?;
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    tokio::fs::write(folder.join(format!("{stamp}.png")), bytes).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AffectSampleRequest {
    conversation_id: String,
    valence: f64,
    arousal: f64,
}

/// Ingestion side of the rolling affect state, fed by the external
/// frame-analysis process.
pub(crate) async fn record_affect(
    State(state): State<AppState>,
    Json(payload): Json<AffectSampleRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .record_affect_sample(&payload.conversation_id, payload.valence, payload.arousal)
        .await?;
    Ok(StatusCode::OK)
}
