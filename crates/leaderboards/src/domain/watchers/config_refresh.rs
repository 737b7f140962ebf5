use async_trait::async_trait;

use super::RecurringTask;
use crate::domain::SnapshotProvider;

#[async_trait]
impl RecurringTask for SnapshotProvider {
    fn name(&self) -> &'static str {
        "config_refresh"
    }

    async fn run_once(&self) -> Result<(), anyhow::Error> {
        self.refresh().await?;
        Ok(())
    }
}
