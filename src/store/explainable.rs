use anyhow::Result;
use rusqlite::{Row, params};

use super::StudyStore;
use super::types::{ExplainableRecord, Role};

fn explainable_from_row(row: &Row<'_>) -> rusqlite::Result<ExplainableRecord> {
    let role: String = row.get("role")?;
    let role = Role::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown role {role:?}").into(),
        )
    })?;
    Ok(ExplainableRecord {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        message_number: row.get("message_number")?,
        user_input: row.get("user_input")?,
        prompt_input: row.get("prompt_input")?,
        response: row.get("response")?,
        role,
        valence: row.get("valence")?,
        arousal: row.get("arousal")?,
        created_at: row.get("created_at")?,
        timestamp: row.get("timestamp")?,
    })
}

impl StudyStore {
    pub async fn append_explainable(
        &self,
        conversation_id: &str,
        message_number: u32,
        user_input: &str,
        prompt_input: &str,
        response: &str,
        valence: f64,
        arousal: f64,
    ) -> Result<ExplainableRecord> {
        let (created_at, timestamp) = Self::now();
        let record = ExplainableRecord {
            id: Self::new_id(),
            conversation_id: conversation_id.to_string(),
            message_number,
            user_input: user_input.to_string(),
            prompt_input: prompt_input.to_string(),
            response: response.to_string(),
            role: Role::Assistant,
            valence,
            arousal,
            created_at,
            timestamp,
        };

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO explainable (
                id, conversation_id, message_number, user_input, prompt_input,
                response, role, valence, arousal, created_at, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.conversation_id,
                record.message_number,
                record.user_input,
                record.prompt_input,
                record.response,
                record.role.as_str(),
                record.valence,
                record.arousal,
                record.created_at,
                record.timestamp,
            ],
        )?;
        Ok(record)
    }

    pub async fn conversation_explainables(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ExplainableRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT * FROM explainable WHERE conversation_id = ?1 ORDER BY message_number ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], explainable_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testing::temp_store;
    use crate::store::types::Role;

    #[tokio::test]
    async fn records_are_scoped_and_ordered() {
        let (store, _dir) = temp_store().await;
        store
            .append_explainable("conv-1", 4, "input b", "prompt b", "because b", 0.2, 0.1)
            .await
            .unwrap();
        store
            .append_explainable("conv-1", 2, "input a", "prompt a", "because a", 0.5, -0.3)
            .await
            .unwrap();
        store
            .append_explainable("conv-2", 2, "other", "other", "other", 0.0, 0.0)
            .await
            .unwrap();

        let records = store.conversation_explainables("conv-1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message_number, 2);
        assert_eq!(records[0].valence, 0.5);
        assert_eq!(records[1].response, "because b");
        assert_eq!(records[0].role, Role::Assistant);
    }
}
