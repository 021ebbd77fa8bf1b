use anyhow::Result;
use rusqlite::{Row, params};

use super::StudyStore;
use super::types::{Agent, User, UserPayload};

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let agent_json: Option<String> = row.get("agent_json")?;
    let extra_json: String = row.get("extra_json")?;
    let is_admin: i64 = row.get("is_admin")?;
    Ok(User {
        id: row.get("id")?,
        experiment_id: row.get("experiment_id")?,
        username: row.get("username")?,
        password: row.get("password")?,
        age: row.get("age")?,
        gender: row.get("gender")?,
        is_admin: is_admin != 0,
        number_of_conversations: row.get("number_of_conversations")?,
        agent: agent_json.and_then(|j| serde_json::from_str::<Agent>(&j).ok()),
        extra: serde_json::from_str(&extra_json).unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at")?,
        timestamp: row.get("timestamp")?,
    })
}

impl StudyStore {
    /// Register a participant (or admin). The agent snapshot is frozen into
    /// the row so later condition edits do not affect running participants.
    pub async fn create_user(&self, payload: UserPayload, agent: Option<Agent>) -> Result<User> {
        let (created_at, timestamp) = Self::now();
        let user = User {
            id: Self::new_id(),
            experiment_id: payload.experiment_id,
            username: payload.username,
            password: payload.password,
            age: payload.age,
            gender: payload.gender,
            is_admin: payload.is_admin,
            number_of_conversations: 0,
            agent,
            extra: payload.extra,
            created_at,
            timestamp,
        };

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO users (
                id, experiment_id, username, password, age, gender, is_admin,
                number_of_conversations, agent_json, extra_json, created_at, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?11)",
            params![
                user.id,
                user.experiment_id,
                user.username,
                user.password,
                user.age,
                user.gender,
                user.is_admin as i64,
                user.agent
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&user.extra)?,
                user.created_at,
                user.timestamp,
            ],
        )?;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT * FROM users WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![user_id], user_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn users_by_experiment(&self, experiment_id: &str) -> Result<Vec<User>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT * FROM users WHERE experiment_id = ?1 ORDER BY timestamp ASC")?;
        let rows = stmt.query_map(params![experiment_id], user_from_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub async fn increment_user_conversations(&self, user_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE users SET number_of_conversations = number_of_conversations + 1
             WHERE id = ?1",
            params![user_id],
        )?;
        Ok(())
    }
}
