use async_trait::async_trait;
use leaderboards_core::ScoreboardEntry;
use sqlx::Row;

use super::Scoreboard;
use crate::{domain::StoreError, infra::db::DBConnection};

/// Ranked views backed by the `scoreboard` table and its `(name, score DESC, entry_id DESC)` index
#[derive(Clone)]
pub struct SqliteScoreboard {
    db_connection: DBConnection,
}

impl SqliteScoreboard {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }
}

#[async_trait]
impl Scoreboard for SqliteScoreboard {
    async fn upsert(&self, name: &str, entry_id: &str, score: f64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO scoreboard (name, entry_id, score) VALUES (?, ?, ?)
             ON CONFLICT(name, entry_id) DO UPDATE SET score = excluded.score",
        )
        .bind(name)
        .bind(entry_id)
        .bind(score)
        .execute(self.db_connection.write())
        .await?;
        Ok(())
    }

    async fn top(&self, name: &str, n: usize) -> Result<Vec<ScoreboardEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT entry_id, score FROM scoreboard
             WHERE name = ?
             ORDER BY score DESC, entry_id DESC
             LIMIT ?",
        )
        .bind(name)
        .bind(i64::try_from(n).unwrap_or(i64::MAX))
        .fetch_all(self.db_connection.read())
        .await?;

        rows.iter()
            .enumerate()
            .map(|(i, row)| -> Result<ScoreboardEntry, StoreError> {
                Ok(ScoreboardEntry {
                    entry_id: row.try_get("entry_id")?,
                    score: row.try_get("score")?,
                    rank: i as u64 + 1,
                })
            })
            .collect()
    }

    async fn rank_of(&self, name: &str, entry_id: &str) -> Result<Option<u64>, StoreError> {
        let rank: Option<i64> = sqlx::query_scalar(
            "SELECT 1 + (
                SELECT COUNT(*) FROM scoreboard AS other
                WHERE other.name = target.name
                  AND (other.score > target.score
                       OR (other.score = target.score AND other.entry_id > target.entry_id))
             )
             FROM scoreboard AS target
             WHERE target.name = ? AND target.entry_id = ?",
        )
        .bind(name)
        .bind(entry_id)
        .fetch_optional(self.db_connection.read())
        .await?;

        Ok(rank.map(|rank| rank as u64))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(self.db_connection.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    fn create_scoreboard(pool: SqlitePool) -> SqliteScoreboard {
        SqliteScoreboard::new(DBConnection::new_with_pool("leaderboards", pool))
    }

    #[sqlx::test(migrations = "./migrations/leaderboards")]
    async fn test_top_orders_descending_with_rank(pool: SqlitePool) {
        let board = create_scoreboard(pool);
        board.upsert("race::1", "A", 10.0).await.unwrap();
        board.upsert("race::1", "B", 15.0).await.unwrap();
        board.upsert("race::2", "C", 99.0).await.unwrap();

        let top = board.top("race::1", 10).await.unwrap();
        assert_eq!(
            top,
            vec![
                ScoreboardEntry { entry_id: "B".into(), score: 15.0, rank: 1 },
                ScoreboardEntry { entry_id: "A".into(), score: 10.0, rank: 2 },
            ]
        );
    }

    #[sqlx::test(migrations = "./migrations/leaderboards")]
    async fn test_ties_and_limits(pool: SqlitePool) {
        let board = create_scoreboard(pool);
        for id in ["a", "b", "c"] {
            board.upsert("race::1", id, 5.0).await.unwrap();
        }
        board.upsert("race::1", "z", 1.0).await.unwrap();

        let top = board.top("race::1", 2).await.unwrap();
        let ids: Vec<&str> = top.iter().map(|e| e.entry_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        assert_eq!(board.rank_of("race::1", "a").await.unwrap(), Some(3));
        assert_eq!(board.rank_of("race::1", "z").await.unwrap(), Some(4));
        assert_eq!(board.rank_of("race::1", "missing").await.unwrap(), None);
    }

    #[sqlx::test(migrations = "./migrations/leaderboards")]
    async fn test_upsert_replaces_score(pool: SqlitePool) {
        let board = create_scoreboard(pool);
        board.upsert("race::1", "A", 10.0).await.unwrap();
        board.upsert("race::1", "B", 15.0).await.unwrap();
        board.upsert("race::1", "A", 3.0).await.unwrap();
        board.upsert("race::1", "A", 30.0).await.unwrap();

        assert_eq!(board.rank_of("race::1", "A").await.unwrap(), Some(1));
        assert_eq!(board.top("race::1", 10).await.unwrap().len(), 2);
    }
}
