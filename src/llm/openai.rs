use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use super::{ChatMessage, CompletionParams, LlmProvider};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct StreamEvent {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
}

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn chat_request<'a>(
        params: &'a CompletionParams,
        messages: &'a [ChatMessage],
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &params.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            stop: params.stop_sequences.clone(),
            stream,
        }
    }

    async fn send_chat(
        &self,
        params: &CompletionParams,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response> {
        let req = Self::chat_request(params, messages, stream);
        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "OpenAI API Error: {}",
                res.text().await.unwrap_or_default()
            ));
        }
        Ok(res)
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    async fn complete(
        &self,
        params: &CompletionParams,
        messages: &[ChatMessage],
    ) -> Result<String> {
        let res = self.send_chat(params, messages, false).await?;
        let parsed: ChatResponse = res.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn complete_streaming(
        &self,
        params: &CompletionParams,
        messages: &[ChatMessage],
        chunks: mpsc::Sender<String>,
    ) -> Result<String> {
        let res = self.send_chat(params, messages, true).await?;

        let stream = res
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut lines = BufReader::new(StreamReader::new(stream)).lines();

        let mut full = String::new();
        while let Some(line) = lines.next_line().await? {
            let Some(payload) = line.strip_prefix("data: ") else {
                continue;
            };
            if payload == "[DONE]" {
                break;
            }
            let event: StreamEvent = match serde_json::from_str(payload) {
                Ok(event) => event,
                Err(_) => continue,
            };
            let Some(delta) = event
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
            else {
                continue;
            };
            if delta.is_empty() {
                continue;
            }
            full.push_str(&delta);
            // Receiver hanging up just means the client went away; finish
            // assembling the reply regardless so it can still be saved.
            let _ = chunks.send(delta).await;
        }
        Ok(full)
    }

    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
            .text("language", "en")
            .part("file", part);

        let res = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "OpenAI transcription error: {}",
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: TranscriptionResponse = res.json().await?;
        Ok(parsed.text)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let req = SpeechRequest {
            model: "tts-1",
            voice: "alloy",
            input: text,
        };
        let res = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "OpenAI speech error: {}",
                res.text().await.unwrap_or_default()
            ));
        }
        Ok(res.bytes().await?.to_vec())
    }
}
