use async_trait::async_trait;
use itertools::Itertools;
use leaderboards_core::ScoreboardEntry;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{rank_order, Scoreboard};
use crate::domain::StoreError;

#[derive(Default)]
pub struct MemoryScoreboard {
    boards: RwLock<HashMap<String, HashMap<String, f64>>>,
}

impl MemoryScoreboard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Scoreboard for MemoryScoreboard {
    async fn upsert(&self, name: &str, entry_id: &str, score: f64) -> Result<(), StoreError> {
        let mut boards = self.boards.write().await;
        boards
            .entry(name.to_string())
            .or_default()
            .insert(entry_id.to_string(), score);
        Ok(())
    }

    async fn top(&self, name: &str, n: usize) -> Result<Vec<ScoreboardEntry>, StoreError> {
        let boards = self.boards.read().await;
        let Some(board) = boards.get(name) else {
            return Ok(vec![]);
        };

        Ok(board
            .iter()
            .map(|(entry_id, score)| (entry_id.clone(), *score))
            .sorted_by(rank_order)
            .take(n)
            .enumerate()
            .map(|(i, (entry_id, score))| ScoreboardEntry {
                entry_id,
                score,
                rank: i as u64 + 1,
            })
            .collect())
    }

    async fn rank_of(&self, name: &str, entry_id: &str) -> Result<Option<u64>, StoreError> {
        let boards = self.boards.read().await;
        let Some(board) = boards.get(name) else {
            return Ok(None);
        };
        let Some(score) = board.get(entry_id) else {
            return Ok(None);
        };

        let target = (entry_id.to_string(), *score);
        let ahead = board
            .iter()
            .filter(|(other_id, other_score)| {
                rank_order(&((*other_id).clone(), **other_score), &target).is_lt()
            })
            .count();
        Ok(Some(ahead as u64 + 1))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
