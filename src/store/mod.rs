mod affect;
mod agents;
mod conversations;
mod experiments;
mod explainable;
mod messages;
pub mod types;
mod users;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tokio::fs;
use tokio::sync::Mutex;

/// All experiment data behind one SQLite handle. Handlers share it through
/// an `Arc`; every access locks the connection for the duration of the call.
pub struct StudyStore {
    db: Arc<Mutex<Connection>>,
    data_dir: PathBuf,
}

impl StudyStore {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).await?;
        }
        fs::create_dir_all(data_dir.join("webcam_base")).await?;
        fs::create_dir_all(data_dir.join("action_units")).await?;

        let db_path = data_dir.join("chatlab.db");
        let db = Connection::open(&db_path)?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                system_starter_prompt TEXT NOT NULL,
                before_user_sentence_prompt TEXT NOT NULL DEFAULT '',
                after_user_sentence_prompt TEXT NOT NULL DEFAULT '',
                inverse_time_delay REAL,
                first_chat_sentence TEXT NOT NULL,
                model TEXT NOT NULL,
                temperature REAL,
                max_tokens INTEGER,
                top_p REAL,
                frequency_penalty REAL,
                presence_penalty REAL,
                camera_capture_rate REAL,
                va_integration INTEGER,
                stop_sequences TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS experiments (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                agents_mode TEXT NOT NULL DEFAULT '',
                active_agent_id TEXT,
                max_conversations INTEGER,
                max_messages INTEGER,
                open_sessions INTEGER NOT NULL DEFAULT 0,
                total_sessions INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                experiment_id TEXT NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL DEFAULT '',
                age INTEGER,
                gender TEXT,
                is_admin INTEGER NOT NULL DEFAULT 0,
                number_of_conversations INTEGER NOT NULL DEFAULT 0,
                agent_json TEXT,
                extra_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                experiment_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                conversation_number INTEGER NOT NULL,
                agent_json TEXT NOT NULL,
                messages_number INTEGER NOT NULL DEFAULT 0,
                max_messages INTEGER,
                pre_survey_json TEXT,
                post_survey_json TEXT,
                is_finished INTEGER NOT NULL DEFAULT 0,
                last_message_at TEXT,
                last_message_timestamp INTEGER,
                created_at TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                message_number INTEGER NOT NULL,
                valence REAL NOT NULL DEFAULT 0,
                arousal REAL NOT NULL DEFAULT 0,
                pitch REAL NOT NULL DEFAULT 0,
                loudness REAL NOT NULL DEFAULT 0,
                snr REAL NOT NULL DEFAULT 0,
                time_delay REAL,
                user_annotation INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                UNIQUE(conversation_id, message_number)
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, message_number)",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS current_state (
                conversation_id TEXT PRIMARY KEY,
                valence_sum REAL NOT NULL DEFAULT 0,
                arousal_sum REAL NOT NULL DEFAULT 0,
                sample_count INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS explainable (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                message_number INTEGER NOT NULL,
                user_input TEXT NOT NULL,
                prompt_input TEXT NOT NULL,
                response TEXT NOT NULL,
                role TEXT NOT NULL,
                valence REAL NOT NULL DEFAULT 0,
                arousal REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_explainable_conversation
             ON explainable(conversation_id, message_number)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// (RFC 3339 created_at, millisecond timestamp) for a new row.
    pub(crate) fn now() -> (String, i64) {
        let now = chrono::Utc::now();
        (now.to_rfc3339(), now.timestamp_millis())
    }

    pub(crate) fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::StudyStore;
    use super::types::{Agent, AgentPayload, ExperimentPayload, UserPayload};

    /// Store backed by a throwaway directory; the TempDir guard keeps the
    /// files alive for the duration of the test.
    pub(crate) async fn temp_store() -> (StudyStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StudyStore::open(dir.path()).await.expect("open store");
        (store, dir)
    }

    pub(crate) fn agent_payload(title: &str) -> AgentPayload {
        AgentPayload {
            title: title.to_string(),
            summary: "control condition".to_string(),
            system_starter_prompt: "You are a supportive conversation partner.".to_string(),
            before_user_sentence_prompt: "The user says:".to_string(),
            after_user_sentence_prompt: "Reply briefly.".to_string(),
            inverse_time_delay: Some(2.0),
            first_chat_sentence: "Hi, how are you feeling today?".to_string(),
            model: "gpt-4o".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(256),
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            camera_capture_rate: None,
            va_integration: None,
            stop_sequences: vec!["END".to_string()],
        }
    }

    /// An in-memory agent for tests that never touch the agents table.
    pub(crate) fn agent(title: &str) -> Agent {
        let payload = agent_payload(title);
        Agent {
            id: format!("agent-{title}"),
            title: payload.title,
            summary: payload.summary,
            system_starter_prompt: payload.system_starter_prompt,
            before_user_sentence_prompt: payload.before_user_sentence_prompt,
            after_user_sentence_prompt: payload.after_user_sentence_prompt,
            inverse_time_delay: payload.inverse_time_delay,
            first_chat_sentence: payload.first_chat_sentence,
            model: payload.model,
            temperature: payload.temperature,
            max_tokens: payload.max_tokens,
            top_p: payload.top_p,
            frequency_penalty: payload.frequency_penalty,
            presence_penalty: payload.presence_penalty,
            camera_capture_rate: payload.camera_capture_rate,
            va_integration: payload.va_integration,
            stop_sequences: payload.stop_sequences,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            timestamp: 0,
        }
    }

    pub(crate) fn affect_agent_payload(title: &str) -> AgentPayload {
        AgentPayload {
            camera_capture_rate: Some(6.0),
            va_integration: Some(true),
            ..agent_payload(title)
        }
    }

    pub(crate) fn experiment_payload(title: &str) -> ExperimentPayload {
        ExperimentPayload {
            title: title.to_string(),
            description: String::new(),
            agents_mode: "single".to_string(),
            active_agent_id: None,
            max_conversations: Some(2),
            max_messages: Some(10),
        }
    }

    pub(crate) fn user_payload(experiment_id: &str, username: &str) -> UserPayload {
        UserPayload {
            experiment_id: experiment_id.to_string(),
            username: username.to_string(),
            password: String::new(),
            age: Some(30),
            gender: Some("female".to_string()),
            is_admin: false,
            agent_id: None,
            extra: serde_json::json!({ "occupation": "student" }),
        }
    }
}
