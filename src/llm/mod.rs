pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::store::types::Agent;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Sampling parameters for one completion, taken from the agent condition.
#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub stop_sequences: Vec<String>,
}

impl CompletionParams {
    pub fn from_agent(agent: &Agent) -> Self {
        Self {
            model: agent.model.clone(),
            temperature: agent.temperature,
            max_tokens: agent.max_tokens,
            top_p: agent.top_p,
            frequency_penalty: agent.frequency_penalty,
            presence_penalty: agent.presence_penalty,
            stop_sequences: agent.stop_sequences.clone(),
        }
    }
}

/// Seam between the turn pipeline and the model backend. The production
/// implementation talks to OpenAI; tests script the replies.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One-shot completion, full reply as a single string.
    async fn complete(&self, params: &CompletionParams, messages: &[ChatMessage])
        -> Result<String>;

    /// Streaming completion. Each delta is forwarded through `chunks` as it
    /// arrives; the assembled reply is returned once the stream closes.
    async fn complete_streaming(
        &self,
        params: &CompletionParams,
        messages: &[ChatMessage],
        chunks: mpsc::Sender<String>,
    ) -> Result<String>;

    /// Speech-to-text over a WAV payload.
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;

    /// Text-to-speech, MP3 bytes back.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}
