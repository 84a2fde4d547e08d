//! Run/pause state and runtime of the task scheduler

use std::time::Duration;

use kaa_api::{ApiClient, PauseStatus, RunStatus, TaskAction, TaskOverviewDto};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::{QueryCache, QueryKey};
use crate::error::Result;
use crate::mutation::OptimisticMutation;

/// Task overview kept fresh by polling and updated by actions
#[derive(Clone)]
pub struct TaskOverviewController {
    client: ApiClient,
    cache: QueryCache,
    key: QueryKey,
    action: OptimisticMutation<TaskOverviewDto, TaskAction, TaskOverviewDto>,
}

impl TaskOverviewController {
    #[must_use]
    pub fn new(client: ApiClient, cache: QueryCache) -> Self {
        let key = QueryKey::task_overview();
        let action = {
            let client = client.clone();
            OptimisticMutation::new(cache.clone(), key.clone(), move |action: TaskAction| {
                let client = client.clone();
                async move { client.post_task_action(&action).await }
            })
        }
        .with_updater(apply_optimistic)
        .auto_replace();

        Self {
            client,
            cache,
            key,
            action,
        }
    }

    /// Fetch the overview into the cache
    ///
    /// # Errors
    /// Request failure, or `Cancelled` when an action started meanwhile
    pub async fn load(&self) -> Result<TaskOverviewDto> {
        self.cache
            .fetch(&self.key, self.client.get_task_overview())
            .await
    }

    #[must_use]
    pub fn current(&self) -> Option<TaskOverviewDto> {
        self.cache.get(&self.key)
    }

    /// # Errors
    /// Request failure; the cache is rolled back first
    pub async fn run_all(&self) -> Result<TaskOverviewDto> {
        self.perform(TaskAction::RunAll).await
    }

    /// # Errors
    /// Request failure; the cache is rolled back first
    pub async fn stop(&self) -> Result<TaskOverviewDto> {
        self.perform(TaskAction::Stop).await
    }

    /// # Errors
    /// Request failure; the cache is rolled back first
    pub async fn run_single(&self, task_name: impl Into<String>) -> Result<TaskOverviewDto> {
        self.perform(TaskAction::RunSingle {
            task_name: task_name.into(),
        })
        .await
    }

    /// # Errors
    /// Request failure; the cache is rolled back first
    pub async fn pause_toggle(&self) -> Result<TaskOverviewDto> {
        self.perform(TaskAction::PauseToggle).await
    }

    async fn perform(&self, action: TaskAction) -> Result<TaskOverviewDto> {
        tracing::info!("Task action: {:?}", action);
        self.action.mutate(action).await
    }

    /// Refresh the overview every `interval` until the returned poller is
    /// stopped or dropped
    ///
    /// The first refresh happens immediately. Polls cancelled by an action
    /// are skipped quietly.
    #[must_use]
    pub fn spawn_poller(&self, interval: Duration) -> Poller {
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match controller.load().await {
                    Ok(_) => tracing::debug!("Task overview refreshed"),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => tracing::warn!("Task overview poll failed: {}", e),
                }
            }
        });
        Poller { handle }
    }
}

/// What the buttons will look like once the backend has acted
fn apply_optimistic(overview: &mut TaskOverviewDto, action: &TaskAction) {
    match action {
        TaskAction::RunAll | TaskAction::RunSingle { .. } => {
            overview.run_button.status = RunStatus::Stop;
        }
        TaskAction::Stop => {
            overview.run_button.status = RunStatus::Stopping;
            overview.run_button.interactive = false;
        }
        TaskAction::PauseToggle => {
            let now_paused = overview.pause_button.status == PauseStatus::Pause;
            overview.pause_button.status = if now_paused {
                PauseStatus::Resume
            } else {
                PauseStatus::Pause
            };
            overview.paused = Some(now_paused);
        }
    }
}

/// Handle to a background polling task; aborts it on drop
#[derive(Debug)]
pub struct Poller {
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn stop(self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
