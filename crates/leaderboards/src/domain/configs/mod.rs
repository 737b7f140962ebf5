mod memory;
mod provider;
mod sqlite;

pub use memory::*;
pub use provider::*;
pub use sqlite::*;

use async_trait::async_trait;
use leaderboards_core::LeaderboardConfig;

use super::StoreError;

/// Where leaderboard configuration records live
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<LeaderboardConfig>, StoreError>;

    /// Insert or replace the record for `config.name`
    async fn update(&self, config: &LeaderboardConfig) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
