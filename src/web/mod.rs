mod error;
mod handlers;
mod router;

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::config::ServerConfig;
use crate::conversation::TurnEngine;
use crate::store::StudyStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<StudyStore>,
    pub(crate) engine: Arc<TurnEngine>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_port: u16,
    pub(crate) web_port: u16,
}

/// Bind and serve the API until the process exits.
pub async fn serve(
    config: &ServerConfig,
    store: Arc<StudyStore>,
    engine: Arc<TurnEngine>,
    log_tx: tokio::sync::broadcast::Sender<String>,
) -> Result<()> {
    let state = AppState {
        store,
        engine,
        log_tx,
        api_port: config.port,
        web_port: config.web_port,
    };
    let app = router::build_api_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API Server running at http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}
