use anyhow::Result;
use rusqlite::{Row, params};

use super::StudyStore;
use super::types::{AffectSnapshot, AudioFeatures, NewMessage, Role, StoredMessage};

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get("role")?;
    let role = Role::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown role {role:?}").into(),
        )
    })?;
    Ok(StoredMessage {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        role,
        content: row.get("content")?,
        message_number: row.get("message_number")?,
        valence: row.get("valence")?,
        arousal: row.get("arousal")?,
        pitch: row.get("pitch")?,
        loudness: row.get("loudness")?,
        snr: row.get("snr")?,
        time_delay: row.get("time_delay")?,
        user_annotation: row.get("user_annotation")?,
        created_at: row.get("created_at")?,
        timestamp: row.get("timestamp")?,
    })
}

impl StudyStore {
    /// Persist one turn at an explicit position in the transcript. The unique
    /// index on (conversation_id, message_number) rejects duplicates.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
        message_number: u32,
        affect: AffectSnapshot,
        audio: AudioFeatures,
    ) -> Result<StoredMessage> {
        let (created_at, timestamp) = Self::now();
        let stored = StoredMessage {
            id: Self::new_id(),
            conversation_id: conversation_id.to_string(),
            role: message.role,
            content: message.content,
            message_number,
            valence: affect.valence,
            arousal: affect.arousal,
            pitch: audio.pitch,
            loudness: audio.loudness,
            snr: audio.snr,
            time_delay: message.time_delay,
            user_annotation: 0,
            created_at,
            timestamp,
        };

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO messages (
                id, conversation_id, role, content, message_number,
                valence, arousal, pitch, loudness, snr, time_delay,
                user_annotation, created_at, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?13)",
            params![
                stored.id,
                stored.conversation_id,
                stored.role.as_str(),
                stored.content,
                stored.message_number,
                stored.valence,
                stored.arousal,
                stored.pitch,
                stored.loudness,
                stored.snr,
                stored.time_delay,
                stored.created_at,
                stored.timestamp,
            ],
        )?;
        Ok(stored)
    }

    /// Full transcript in turn order.
    pub async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY message_number ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], message_from_row)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Set a participant's agree/disagree annotation on one message. Returns
    /// the updated row, or None when the message does not exist.
    pub async fn set_user_annotation(
        &self,
        conversation_id: &str,
        message_number: u32,
        annotation: i64,
    ) -> Result<Option<StoredMessage>> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE messages SET user_annotation = ?3
             WHERE conversation_id = ?1 AND message_number = ?2",
            params![conversation_id, message_number, annotation],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let mut stmt = db.prepare(
            "SELECT * FROM messages WHERE conversation_id = ?1 AND message_number = ?2",
        )?;
        let mut rows = stmt.query_map(params![conversation_id, message_number], message_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testing::temp_store;
    use crate::store::types::{AffectSnapshot, AudioFeatures, NewMessage, Role};

    fn user_message(content: &str) -> NewMessage {
        NewMessage {
            role: Role::User,
            content: content.to_string(),
            time_delay: Some(1.5),
        }
    }

    #[tokio::test]
    async fn transcript_preserves_turn_order() {
        let (store, _dir) = temp_store().await;
        store
            .append_message(
                "conv-1",
                NewMessage {
                    role: Role::Assistant,
                    content: "hi".to_string(),
                    time_delay: None,
                },
                1,
                Default::default(),
                Default::default(),
            )
            .await
            .unwrap();
        store
            .append_message(
                "conv-1",
                user_message("hello"),
                2,
                AffectSnapshot {
                    valence: 0.4,
                    arousal: -0.1,
                },
                AudioFeatures::default(),
            )
            .await
            .unwrap();

        let messages = store.conversation_messages("conv-1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[1].message_number, 2);
        assert_eq!(messages[1].valence, 0.4);
        assert_eq!(messages[1].time_delay, Some(1.5));
    }

    #[tokio::test]
    async fn duplicate_position_is_rejected() {
        let (store, _dir) = temp_store().await;
        store
            .append_message(
                "conv-1",
                user_message("a"),
                1,
                Default::default(),
                Default::default(),
            )
            .await
            .unwrap();
        let err = store
            .append_message(
                "conv-1",
                user_message("b"),
                1,
                Default::default(),
                Default::default(),
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn annotation_updates_single_message() {
        let (store, _dir) = temp_store().await;
        store
            .append_message(
                "conv-1",
                user_message("a"),
                1,
                Default::default(),
                Default::default(),
            )
            .await
            .unwrap();

        let updated = store
            .set_user_annotation("conv-1", 1, -1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.user_annotation, -1);
        assert!(store
            .set_user_annotation("conv-1", 9, 1)
            .await
            .unwrap()
            .is_none());
    }
}
