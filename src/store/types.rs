use serde::{Deserialize, Serialize};

/// Speaker of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Condition fields supplied when an agent is created or updated.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPayload {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub system_starter_prompt: String,
    #[serde(default)]
    pub before_user_sentence_prompt: String,
    #[serde(default)]
    pub after_user_sentence_prompt: String,
    #[serde(default)]
    pub inverse_time_delay: Option<f64>,
    pub first_chat_sentence: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    /// Snapshots per minute requested from the client webcam. Present only
    /// for multimodal conditions.
    #[serde(default)]
    pub camera_capture_rate: Option<f64>,
    /// Whether rolling valence/arousal state is folded into the prompt.
    #[serde(default)]
    pub va_integration: Option<bool>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

/// A stored experiment condition. The embedded copy inside conversation
/// metadata is frozen at conversation-creation time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub summary: String,
    pub system_starter_prompt: String,
    pub before_user_sentence_prompt: String,
    pub after_user_sentence_prompt: String,
    pub inverse_time_delay: Option<f64>,
    pub first_chat_sentence: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub camera_capture_rate: Option<f64>,
    pub va_integration: Option<bool>,
    pub stop_sequences: Vec<String>,
    pub created_at: String,
    pub timestamp: i64,
}

impl Agent {
    /// Affect integration is active only when the condition both captures
    /// webcam frames and asks for valence/arousal injection.
    pub fn affect_enabled(&self) -> bool {
        self.camera_capture_rate.is_some() && self.va_integration.is_some()
    }
}

/// Id + title projection used by the condition picker in the admin UI.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentLean {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentPayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agents_mode: String,
    #[serde(default)]
    pub active_agent_id: Option<String>,
    #[serde(default)]
    pub max_conversations: Option<u32>,
    #[serde(default)]
    pub max_messages: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub agents_mode: String,
    pub active_agent_id: Option<String>,
    pub max_conversations: Option<u32>,
    pub max_messages: Option<u32>,
    pub open_sessions: u32,
    pub total_sessions: u32,
    pub created_at: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub experiment_id: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    /// Condition assigned at registration. When absent, the experiment's
    /// active agent is snapshotted instead.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Free-form registration answers; flattened into export columns later.
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub experiment_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub is_admin: bool,
    pub number_of_conversations: u32,
    pub agent: Option<Agent>,
    pub extra: serde_json::Value,
    pub created_at: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    #[serde(rename = "_id")]
    pub id: String,
    pub experiment_id: String,
    pub user_id: String,
    pub conversation_number: u32,
    pub agent: Agent,
    pub messages_number: u32,
    pub max_messages: Option<u32>,
    pub pre_conversation: Option<serde_json::Value>,
    pub post_conversation: Option<serde_json::Value>,
    pub is_finished: bool,
    pub last_message_date: Option<String>,
    pub last_message_timestamp: Option<i64>,
    pub created_at: String,
    pub timestamp: i64,
}

/// Content + role of an incoming message before it is persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub time_delay: Option<f64>,
}

/// One persisted conversation turn. Immutable after creation except for
/// `user_annotation`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub message_number: u32,
    pub valence: f64,
    pub arousal: f64,
    pub pitch: f64,
    pub loudness: f64,
    pub snr: f64,
    pub time_delay: Option<f64>,
    pub user_annotation: i64,
    pub created_at: String,
    pub timestamp: i64,
}

/// Valence/arousal averages consumed from the rolling accumulator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AffectSnapshot {
    pub valence: f64,
    pub arousal: f64,
}

/// Acoustic features of one audio turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub pitch: f64,
    pub loudness: f64,
    pub snr: f64,
}

/// One row of the explainability side-log: the "why" completion that runs in
/// parallel with an affect-integrated turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainableRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub conversation_id: String,
    pub message_number: u32,
    pub user_input: String,
    pub prompt_input: String,
    pub response: String,
    pub role: Role,
    pub valence: f64,
    pub arousal: f64,
    pub created_at: String,
    pub timestamp: i64,
}
