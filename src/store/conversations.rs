use anyhow::Result;
use rusqlite::{Row, params};

use super::StudyStore;
use super::types::{Agent, ConversationMetadata};

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationMetadata> {
    let agent_json: String = row.get("agent_json")?;
    let agent: Agent = serde_json::from_str(&agent_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let pre: Option<String> = row.get("pre_survey_json")?;
    let post: Option<String> = row.get("post_survey_json")?;
    let is_finished: i64 = row.get("is_finished")?;
    Ok(ConversationMetadata {
        id: row.get("id")?,
        experiment_id: row.get("experiment_id")?,
        user_id: row.get("user_id")?,
        conversation_number: row.get("conversation_number")?,
        agent,
        messages_number: row.get("messages_number")?,
        max_messages: row.get("max_messages")?,
        pre_conversation: pre.and_then(|j| serde_json::from_str(&j).ok()),
        post_conversation: post.and_then(|j| serde_json::from_str(&j).ok()),
        is_finished: is_finished != 0,
        last_message_date: row.get("last_message_at")?,
        last_message_timestamp: row.get("last_message_timestamp")?,
        created_at: row.get("created_at")?,
        timestamp: row.get("timestamp")?,
    })
}

impl StudyStore {
    /// Insert the metadata row for a fresh conversation. The caller supplies
    /// the frozen agent snapshot and the experiment's message cap.
    pub async fn create_conversation_metadata(
        &self,
        experiment_id: &str,
        user_id: &str,
        conversation_number: u32,
        agent: &Agent,
        max_messages: Option<u32>,
    ) -> Result<ConversationMetadata> {
        let (created_at, timestamp) = Self::now();
        let metadata = ConversationMetadata {
            id: Self::new_id(),
            experiment_id: experiment_id.to_string(),
            user_id: user_id.to_string(),
            conversation_number,
            agent: agent.clone(),
            messages_number: 0,
            max_messages,
            pre_conversation: None,
            post_conversation: None,
            is_finished: false,
            last_message_date: None,
            last_message_timestamp: None,
            created_at,
            timestamp,
        };

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO conversations (
                id, experiment_id, user_id, conversation_number, agent_json,
                messages_number, max_messages, is_finished, created_at, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, 0, ?7, ?8)",
            params![
                metadata.id,
                metadata.experiment_id,
                metadata.user_id,
                metadata.conversation_number,
                serde_json::to_string(&metadata.agent)?,
                metadata.max_messages,
                metadata.created_at,
                metadata.timestamp,
            ],
        )?;
        Ok(metadata)
    }

    pub async fn get_metadata(&self, conversation_id: &str) -> Result<Option<ConversationMetadata>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT * FROM conversations WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![conversation_id], metadata_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn metadata_for_user(&self, user_id: &str) -> Result<Vec<ConversationMetadata>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT * FROM conversations WHERE user_id = ?1 ORDER BY conversation_number ASC",
        )?;
        let rows = stmt.query_map(params![user_id], metadata_from_row)?;
        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    pub async fn conversations_by_experiment(
        &self,
        experiment_id: &str,
    ) -> Result<Vec<ConversationMetadata>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT * FROM conversations WHERE experiment_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![experiment_id], metadata_from_row)?;
        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// Attach a pre- or post-conversation survey blob. The answers are kept
    /// opaque until export time.
    pub async fn set_survey(
        &self,
        conversation_id: &str,
        is_pre_conversation: bool,
        answers: &serde_json::Value,
    ) -> Result<bool> {
        let column = if is_pre_conversation {
            "pre_survey_json"
        } else {
            "post_survey_json"
        };
        let db = self.db.lock().await;
        let changed = db.execute(
            &format!("UPDATE conversations SET {column} = ?2 WHERE id = ?1"),
            params![conversation_id, serde_json::to_string(answers)?],
        )?;
        Ok(changed > 0)
    }

    /// Mark a conversation finished. Returns true only when the row existed
    /// and was not already finished, so callers can close the experiment
    /// session exactly once.
    pub async fn finish_conversation(&self, conversation_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE conversations SET is_finished = 1 WHERE id = ?1 AND is_finished = 0",
            params![conversation_id],
        )?;
        Ok(changed > 0)
    }

    /// After a completed turn: advance the message counter and stamp the
    /// last-activity time.
    pub async fn bump_after_turn(&self, conversation_id: &str, messages_number: u32) -> Result<()> {
        let (at, ts) = Self::now();
        let db = self.db.lock().await;
        db.execute(
            "UPDATE conversations SET
                messages_number = ?2, last_message_at = ?3, last_message_timestamp = ?4
             WHERE id = ?1",
            params![conversation_id, messages_number, at, ts],
        )?;
        Ok(())
    }

    /// Remove every conversation of an experiment together with its
    /// messages, affect accumulator, and explainability rows.
    pub async fn delete_experiment_conversations(&self, experiment_id: &str) -> Result<usize> {
        let db = self.db.lock().await;
        db.execute(
            "DELETE FROM messages WHERE conversation_id IN
             (SELECT id FROM conversations WHERE experiment_id = ?1)",
            params![experiment_id],
        )?;
        db.execute(
            "DELETE FROM current_state WHERE conversation_id IN
             (SELECT id FROM conversations WHERE experiment_id = ?1)",
            params![experiment_id],
        )?;
        db.execute(
            "DELETE FROM explainable WHERE conversation_id IN
             (SELECT id FROM conversations WHERE experiment_id = ?1)",
            params![experiment_id],
        )?;
        let removed = db.execute(
            "DELETE FROM conversations WHERE experiment_id = ?1",
            params![experiment_id],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testing::{agent_payload, temp_store};
    use crate::store::types::{NewMessage, Role};

    #[tokio::test]
    async fn metadata_roundtrip_with_agent_snapshot() {
        let (store, _dir) = temp_store().await;
        let agent = store.save_agent(agent_payload("cond")).await.unwrap();
        let meta = store
            .create_conversation_metadata("exp-1", "user-1", 1, &agent, Some(10))
            .await
            .unwrap();

        let loaded = store.get_metadata(&meta.id).await.unwrap().unwrap();
        assert_eq!(loaded.agent.title, "cond");
        assert_eq!(loaded.max_messages, Some(10));
        assert!(!loaded.is_finished);
        assert!(loaded.last_message_date.is_none());
    }

    #[tokio::test]
    async fn finish_is_idempotent_but_reports_first_transition() {
        let (store, _dir) = temp_store().await;
        let agent = store.save_agent(agent_payload("cond")).await.unwrap();
        let meta = store
            .create_conversation_metadata("exp-1", "user-1", 1, &agent, None)
            .await
            .unwrap();

        assert!(store.finish_conversation(&meta.id).await.unwrap());
        assert!(!store.finish_conversation(&meta.id).await.unwrap());
        assert!(!store.finish_conversation("missing").await.unwrap());
    }

    #[tokio::test]
    async fn surveys_attach_to_either_side() {
        let (store, _dir) = temp_store().await;
        let agent = store.save_agent(agent_payload("cond")).await.unwrap();
        let meta = store
            .create_conversation_metadata("exp-1", "user-1", 1, &agent, None)
            .await
            .unwrap();

        let pre = serde_json::json!({ "mood": 4 });
        let post = serde_json::json!({ "mood": 5, "liked": true });
        store.set_survey(&meta.id, true, &pre).await.unwrap();
        store.set_survey(&meta.id, false, &post).await.unwrap();

        let loaded = store.get_metadata(&meta.id).await.unwrap().unwrap();
        assert_eq!(loaded.pre_conversation, Some(pre));
        assert_eq!(loaded.post_conversation, Some(post));
    }

    #[tokio::test]
    async fn deleting_experiment_conversations_cascades() {
        let (store, _dir) = temp_store().await;
        let agent = store.save_agent(agent_payload("cond")).await.unwrap();
        let meta = store
            .create_conversation_metadata("exp-1", "user-1", 1, &agent, None)
            .await
            .unwrap();
        store
            .append_message(
                &meta.id,
                NewMessage {
                    role: Role::User,
                    content: "hello".to_string(),
                    time_delay: None,
                },
                1,
                Default::default(),
                Default::default(),
            )
            .await
            .unwrap();

        let removed = store.delete_experiment_conversations("exp-1").await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_metadata(&meta.id).await.unwrap().is_none());
        assert!(store.conversation_messages(&meta.id).await.unwrap().is_empty());
    }
}
