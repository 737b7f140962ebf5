use async_trait::async_trait;
use leaderboards_core::LeaderboardConfig;
use sqlx::Row;

use super::ConfigSource;
use crate::{domain::StoreError, infra::db::DBConnection};

/// Configuration records stored as JSON documents in `leaderboard_configs`
#[derive(Clone)]
pub struct SqliteConfigSource {
    db_connection: DBConnection,
}

impl SqliteConfigSource {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }
}

#[async_trait]
impl ConfigSource for SqliteConfigSource {
    async fn fetch_all(&self) -> Result<Vec<LeaderboardConfig>, StoreError> {
        let rows = sqlx::query("SELECT name, config FROM leaderboard_configs ORDER BY name")
            .fetch_all(self.db_connection.read())
            .await?;

        rows.iter()
            .map(|row| -> Result<LeaderboardConfig, StoreError> {
                let name: String = row.try_get("name")?;
                let raw: String = row.try_get("config")?;
                serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Malformed(format!("leaderboard {}: {}", name, e)))
            })
            .collect()
    }

    async fn update(&self, config: &LeaderboardConfig) -> Result<(), StoreError> {
        let raw = serde_json::to_string(config)?;
        sqlx::query(
            "INSERT INTO leaderboard_configs (name, config) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET
                config = excluded.config,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
        )
        .bind(config.name.to_lowercase())
        .bind(raw)
        .execute(self.db_connection.write())
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(self.db_connection.ping().await?)
    }
}
