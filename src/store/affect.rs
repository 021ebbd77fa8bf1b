use anyhow::Result;
use rusqlite::params;

use super::StudyStore;
use super::types::AffectSnapshot;

impl StudyStore {
    /// Fold one webcam-derived valence/arousal sample into the rolling
    /// accumulator for the conversation.
    pub async fn record_affect_sample(
        &self,
        conversation_id: &str,
        valence: f64,
        arousal: f64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO current_state (conversation_id, valence_sum, arousal_sum, sample_count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(conversation_id) DO UPDATE SET
                valence_sum = valence_sum + ?2,
                arousal_sum = arousal_sum + ?3,
                sample_count = sample_count + 1",
            params![conversation_id, valence, arousal],
        )?;
        Ok(())
    }

    /// Average the accumulated samples and reset the accumulator. With no
    /// samples the result is (0, 0) rather than a division by zero.
    pub async fn consume_current_state(&self, conversation_id: &str) -> Result<AffectSnapshot> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT valence_sum, arousal_sum, sample_count
             FROM current_state WHERE conversation_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let snapshot = match rows.next() {
            Some(row) => {
                let (valence_sum, arousal_sum, count) = row?;
                if count > 0 {
                    AffectSnapshot {
                        valence: valence_sum / count as f64,
                        arousal: arousal_sum / count as f64,
                    }
                } else {
                    AffectSnapshot::default()
                }
            }
            None => AffectSnapshot::default(),
        };
        drop(rows);
        drop(stmt);

        db.execute(
            "UPDATE current_state
             SET valence_sum = 0, arousal_sum = 0, sample_count = 0
             WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testing::temp_store;

    #[tokio::test]
    async fn samples_average_and_reset_after_read() {
        let (store, _dir) = temp_store().await;
        store.record_affect_sample("conv-1", 0.8, 0.2).await.unwrap();
        store.record_affect_sample("conv-1", 0.4, -0.2).await.unwrap();

        let first = store.consume_current_state("conv-1").await.unwrap();
        assert!((first.valence - 0.6).abs() < 1e-9);
        assert!((first.arousal - 0.0).abs() < 1e-9);

        // A second read sees the reset accumulator.
        let second = store.consume_current_state("conv-1").await.unwrap();
        assert_eq!(second.valence, 0.0);
        assert_eq!(second.arousal, 0.0);
    }

    #[tokio::test]
    async fn empty_accumulator_reads_as_zero() {
        let (store, _dir) = temp_store().await;
        let snapshot = store.consume_current_state("conv-none").await.unwrap();
        assert_eq!(snapshot.valence, 0.0);
        assert_eq!(snapshot.arousal, 0.0);
    }

    #[tokio::test]
    async fn conversations_accumulate_independently() {
        let (store, _dir) = temp_store().await;
        store.record_affect_sample("conv-a", 1.0, 1.0).await.unwrap();
        store.record_affect_sample("conv-b", -1.0, -1.0).await.unwrap();

        let a = store.consume_current_state("conv-a").await.unwrap();
        let b = store.consume_current_state("conv-b").await.unwrap();
        assert_eq!(a.valence, 1.0);
        assert_eq!(b.valence, -1.0);
    }
}
