use anyhow::Result;
use rusqlite::{Row, params};

use super::StudyStore;
use super::types::{Experiment, ExperimentPayload};

fn experiment_from_row(row: &Row<'_>) -> rusqlite::Result<Experiment> {
    Ok(Experiment {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        agents_mode: row.get("agents_mode")?,
        active_agent_id: row.get("active_agent_id")?,
        max_conversations: row.get("max_conversations")?,
        max_messages: row.get("max_messages")?,
        open_sessions: row.get("open_sessions")?,
        total_sessions: row.get("total_sessions")?,
        created_at: row.get("created_at")?,
        timestamp: row.get("timestamp")?,
    })
}

impl StudyStore {
    pub async fn create_experiment(&self, payload: ExperimentPayload) -> Result<Experiment> {
        let (created_at, timestamp) = Self::now();
        let experiment = Experiment {
            id: Self::new_id(),
            title: payload.title,
            description: payload.description,
            agents_mode: payload.agents_mode,
            active_agent_id: payload.active_agent_id,
            max_conversations: payload.max_conversations,
            max_messages: payload.max_messages,
            open_sessions: 0,
            total_sessions: 0,
            created_at,
            timestamp,
        };

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO experiments (
                id, title, description, agents_mode, active_agent_id,
                max_conversations, max_messages, open_sessions, total_sessions,
                created_at, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8, ?9)",
            params![
                experiment.id,
                experiment.title,
                experiment.description,
                experiment.agents_mode,
                experiment.active_agent_id,
                experiment.max_conversations,
                experiment.max_messages,
                experiment.created_at,
                experiment.timestamp,
            ],
        )?;
        Ok(experiment)
    }

    pub async fn list_experiments(&self) -> Result<Vec<Experiment>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT * FROM experiments ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], experiment_from_row)?;
        let mut experiments = Vec::new();
        for row in rows {
            experiments.push(row?);
        }
        Ok(experiments)
    }

    pub async fn get_experiment(&self, experiment_id: &str) -> Result<Option<Experiment>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT * FROM experiments WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![experiment_id], experiment_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn update_experiment(&self, experiment: &Experiment) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE experiments SET
                title = ?2, description = ?3, agents_mode = ?4,
                active_agent_id = ?5, max_conversations = ?6, max_messages = ?7
             WHERE id = ?1",
            params![
                experiment.id,
                experiment.title,
                experiment.description,
                experiment.agents_mode,
                experiment.active_agent_id,
                experiment.max_conversations,
                experiment.max_messages,
            ],
        )?;
        Ok(changed > 0)
    }

    pub async fn delete_experiment(&self, experiment_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "DELETE FROM experiments WHERE id = ?1",
            params![experiment_id],
        )?;
        Ok(changed > 0)
    }

    /// Experiments whose active condition is the given agent. Used to block
    /// deleting an agent that is still in use.
    pub async fn experiments_referencing_agent(&self, agent_id: &str) -> Result<Vec<Experiment>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT * FROM experiments WHERE active_agent_id = ?1")?;
        let rows = stmt.query_map(params![agent_id], experiment_from_row)?;
        let mut experiments = Vec::new();
        for row in rows {
            experiments.push(row?);
        }
        Ok(experiments)
    }

    /// A participant started a conversation: one more open session, one more
    /// total session.
    pub async fn add_session(&self, experiment_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE experiments
             SET open_sessions = open_sessions + 1,
                 total_sessions = total_sessions + 1
             WHERE id = ?1",
            params![experiment_id],
        )?;
        Ok(())
    }

    pub async fn close_session(&self, experiment_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE experiments
             SET open_sessions = MAX(open_sessions - 1, 0)
             WHERE id = ?1",
            params![experiment_id],
        )?;
        Ok(())
    }
}
