use async_trait::async_trait;
use leaderboards_core::LeaderboardConfig;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::ConfigSource;
use crate::domain::StoreError;

#[derive(Default)]
pub struct MemoryConfigSource {
    configs: RwLock<BTreeMap<String, LeaderboardConfig>>,
}

impl MemoryConfigSource {
    pub fn new(configs: Vec<LeaderboardConfig>) -> Self {
        Self {
            configs: RwLock::new(
                configs
                    .into_iter()
                    .map(|config| (config.name.to_lowercase(), config))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn fetch_all(&self) -> Result<Vec<LeaderboardConfig>, StoreError> {
        Ok(self.configs.read().await.values().cloned().collect())
    }

    async fn update(&self, config: &LeaderboardConfig) -> Result<(), StoreError> {
        self.configs
            .write()
            .await
            .insert(config.name.to_lowercase(), config.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
