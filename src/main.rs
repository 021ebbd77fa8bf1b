mod audio;
mod config;
mod conversation;
mod export;
mod llm;
mod logging;
mod store;
mod web;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::ServerConfig;
use crate::conversation::TurnEngine;
use crate::llm::openai::OpenAiClient;
use crate::store::StudyStore;

#[tokio::main]
async fn main() -> Result<()> {
    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(256);
    logging::init(log_tx.clone());

    let config = ServerConfig::from_env()?;
    info!("Data directory: {}", config.data_dir.display());

    let store = Arc::new(StudyStore::open(&config.data_dir).await?);
    let llm = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
    ));
    let engine = Arc::new(TurnEngine::new(store.clone(), llm));

    web::serve(&config, store, engine, log_tx).await
}
