use anyhow::Result;
use rusqlite::{Row, params};

use super::StudyStore;
use super::types::{Agent, AgentLean, AgentPayload};

pub(crate) fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let stop_json: String = row.get("stop_sequences")?;
    let va: Option<i64> = row.get("va_integration")?;
    Ok(Agent {
        id: row.get("id")?,
        title: row.get("title")?,
        summary: row.get("summary")?,
        system_starter_prompt: row.get("system_starter_prompt")?,
        before_user_sentence_prompt: row.get("before_user_sentence_prompt")?,
        after_user_sentence_prompt: row.get("after_user_sentence_prompt")?,
        inverse_time_delay: row.get("inverse_time_delay")?,
        first_chat_sentence: row.get("first_chat_sentence")?,
        model: row.get("model")?,
        temperature: row.get("temperature")?,
        max_tokens: row.get("max_tokens")?,
        top_p: row.get("top_p")?,
        frequency_penalty: row.get("frequency_penalty")?,
        presence_penalty: row.get("presence_penalty")?,
        camera_capture_rate: row.get("camera_capture_rate")?,
        va_integration: va.map(|v| v != 0),
        stop_sequences: serde_json::from_str(&stop_json).unwrap_or_default(),
        created_at: row.get("created_at")?,
        timestamp: row.get("timestamp")?,
    })
}

impl StudyStore {
    pub async fn save_agent(&self, payload: AgentPayload) -> Result<Agent> {
        let (created_at, timestamp) = Self::now();
        let agent = Agent {
            id: Self::new_id(),
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
            created_at,
            timestamp,
        };

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agents (
                id, title, summary, system_starter_prompt,
                before_user_sentence_prompt, after_user_sentence_prompt,
                inverse_time_delay, first_chat_sentence, model, temperature,
                max_tokens, top_p, frequency_penalty, presence_penalty,
                camera_capture_rate, va_integration, stop_sequences,
                created_at, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                agent.id,
                agent.title,
                agent.summary,
                agent.system_starter_prompt,
                agent.before_user_sentence_prompt,
                agent.after_user_sentence_prompt,
                agent.inverse_time_delay,
                agent.first_chat_sentence,
                agent.model,
                agent.temperature,
                agent.max_tokens,
                agent.top_p,
                agent.frequency_penalty,
                agent.presence_penalty,
                agent.camera_capture_rate,
                agent.va_integration.map(|v| v as i64),
                serde_json::to_string(&agent.stop_sequences)?,
                agent.created_at,
                agent.timestamp,
            ],
        )?;
        Ok(agent)
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT * FROM agents ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], agent_from_row)?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(row?);
        }
        Ok(agents)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT * FROM agents WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![agent_id], agent_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn get_agent_lean(&self, agent_id: &str) -> Result<Option<AgentLean>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT id, title FROM agents WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![agent_id], |row| {
            Ok(AgentLean {
                id: row.get(0)?,
                title: row.get(1)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Full-row update keyed by the agent id; created_at/timestamp keep their
    /// original values.
    pub async fn update_agent(&self, agent: &Agent) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE agents SET
                title = ?2, summary = ?3, system_starter_prompt = ?4,
                before_user_sentence_prompt = ?5, after_user_sentence_prompt = ?6,
                inverse_time_delay = ?7, first_chat_sentence = ?8, model = ?9,
                temperature = ?10, max_tokens = ?11, top_p = ?12,
                frequency_penalty = ?13, presence_penalty = ?14,
                camera_capture_rate = ?15, va_integration = ?16,
                stop_sequences = ?17
             WHERE id = ?1",
            params![
                agent.id,
                agent.title,
                agent.summary,
                agent.system_starter_prompt,
                agent.before_user_sentence_prompt,
                agent.after_user_sentence_prompt,
                agent.inverse_time_delay,
                agent.first_chat_sentence,
                agent.model,
                agent.temperature,
                agent.max_tokens,
                agent.top_p,
                agent.frequency_penalty,
                agent.presence_penalty,
                agent.camera_capture_rate,
                agent.va_integration.map(|v| v as i64),
                serde_json::to_string(&agent.stop_sequences)?,
            ],
        )?;
        Ok(changed > 0)
    }

    pub async fn delete_agent(&self, agent_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute("DELETE FROM agents WHERE id = ?1", params![agent_id])?;
        Ok(changed > 0)
    }
}
