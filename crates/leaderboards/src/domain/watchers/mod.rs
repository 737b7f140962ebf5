mod config_refresh;
mod reset_watcher;

pub use reset_watcher::*;

use async_trait::async_trait;
use log::{debug, error, info};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// A unit of background work run on a fixed interval by a [`Watcher`]
#[async_trait]
pub trait RecurringTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> Result<(), anyhow::Error>;
}

/// Runs a [`RecurringTask`] until its cancellation token fires.
///
/// Errors from a single run are logged and the loop carries on with the next tick.
pub struct Watcher {
    task: Arc<dyn RecurringTask>,
    interval: Duration,
    cancel_token: CancellationToken,
}

impl Watcher {
    pub fn new(
        task: Arc<dyn RecurringTask>,
        cancel_token: CancellationToken,
        interval: Duration,
    ) -> Self {
        Self {
            task,
            interval,
            cancel_token,
        }
    }

    pub fn name(&self) -> &'static str {
        self.task.name()
    }

    pub async fn watch(&self) -> Result<(), anyhow::Error> {
        let name = self.task.name();
        info!("Starting {}", name);

        loop {
            if self.cancel_token.is_cancelled() {
                info!("{} received cancellation", name);
                break;
            }

            match self.task.run_once().await {
                Ok(_) => debug!("{} run completed", name),
                Err(e) => error!("{} error: {}", name, e),
            }

            tokio::select! {
                _ = sleep(self.interval) => continue,
                _ = self.cancel_token.cancelled() => {
                    info!("{} cancelled during sleep", name);
                    break;
                }
            }
        }

        Ok(())
    }
}
