use std::path::PathBuf;

use anyhow::{Context, Result};

/// Process configuration, read once at startup from the environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub web_port: u16,
    pub data_dir: PathBuf,
    pub openai_api_key: String,
    pub openai_base_url: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("CHATLAB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("CHATLAB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5100);
        let web_port = std::env::var("CHATLAB_WEB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let data_dir = std::env::var("CHATLAB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .context("Server is not configured with an OpenAI API key")?;
        let openai_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self {
            host,
            port,
            web_port,
            data_dir,
            openai_api_key,
            openai_base_url,
        })
    }
}
