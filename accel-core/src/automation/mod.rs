//! Cron-scheduled background task engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

const TICK_INTERVAL: Duration = Duration::from_secs(60);
const TASK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Cleanup,
    Sync,
    Scan,
    Backup,
    Sign,
    Sbom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub schedule: String,
    pub task_type: TaskType,
    pub config: serde_json::Value,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<TaskStatus>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub fail_count: u64,
}

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("invalid cron schedule: {0}")]
    InvalidSchedule(String),
    #[error("task not found: {0}")]
    NotFound(Uuid),
    #[error("no handler registered for task type")]
    NoHandler,
}

pub type AutomationResult<T> = Result<T, AutomationError>;

/// A pluggable executor for one `TaskType`. The engine only guarantees
/// cancellation is honored and a 30-minute timeout is enforced; the body
/// is entirely up to the handler.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, config: &serde_json::Value, cancel: CancellationToken) -> Result<(), String>;
}

/// Registry of [`ScheduledTask`]s, a 1-minute ticker, and a
/// `maxConcurrent`-bounded executor pool.
pub struct AutomationEngine {
    tasks: DashMap<Uuid, ScheduledTask>,
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
    semaphore: Arc<Semaphore>,
    job_cancels: DashMap<Uuid, CancellationToken>,
    paused: AtomicBool,
    engine_cancel: Mutex<Option<CancellationToken>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl AutomationEngine {
    pub fn new(max_concurrent: usize, handlers: HashMap<TaskType, Arc<dyn TaskHandler>>) -> Self {
        Self {
            tasks: DashMap::new(),
            handlers,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            job_cancels: DashMap::new(),
            paused: AtomicBool::new(false),
            engine_cancel: Mutex::new(None),
            ticker: Mutex::new(None),
        }
    }

    pub fn register_task(
        &self,
        schedule: &str,
        task_type: TaskType,
        config: serde_json::Value,
    ) -> AutomationResult<Uuid> {
        let next_run_at = next_run(schedule)?;
        let id = Uuid::new_v4();
        self.tasks.insert(
            id,
            ScheduledTask {
                id,
                schedule: schedule.to_string(),
                task_type,
                config,
                enabled: true,
                last_run_at: None,
                last_status: None,
                next_run_at: Some(next_run_at),
                run_count: 0,
                fail_count: 0,
            },
        );
        Ok(id)
    }

    pub fn set_enabled(&self, id: Uuid, enabled: bool) -> AutomationResult<()> {
        let mut task = self.tasks.get_mut(&id).ok_or(AutomationError::NotFound(id))?;
        task.enabled = enabled;
        Ok(())
    }

    pub fn remove_task(&self, id: Uuid) -> AutomationResult<()> {
        self.tasks.remove(&id).ok_or(AutomationError::NotFound(id))?;
        Ok(())
    }

    pub fn list_tasks(&self) -> Vec<ScheduledTask> {
        self.tasks.iter().map(|e| e.value().clone()).collect()
    }

    pub fn pause_all(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_all(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Cancels a currently-running execution of `id`, if any.
    pub fn cancel_job(&self, id: Uuid) {
        if let Some((_, token)) = self.job_cancels.remove(&id) {
            token.cancel();
        }
    }

    pub async fn start(self: &Arc<Self>) {
        let token = CancellationToken::new();
        *self.engine_cancel.lock().await = Some(token.clone());

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => engine.tick().await,
                }
            }
        });
        *self.ticker.lock().await = Some(handle);
    }

    /// Cancels the ticker and every in-flight job, then waits for them.
    pub async fn stop(&self) {
        if let Some(token) = self.engine_cancel.lock().await.take() {
            token.cancel();
        }
        if let Some(handle) = self.ticker.lock().await.take() {
            let _ = handle.await;
        }
        for entry in self.job_cancels.iter() {
            entry.value().cancel();
        }
    }

    async fn tick(self: &Arc<Self>) {
        if self.paused.load(Ordering::SeqCst) {
            return;
        }
        let now = Utc::now();
        let due: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|e| e.enabled && e.next_run_at.is_some_and(|t| now > t))
            .map(|e| *e.key())
            .collect();

        for id in due {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.execute(id).await;
            });
        }
    }

    async fn execute(self: &Arc<Self>, id: Uuid) {
        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };

        let (task_type, config, schedule) = {
            let Some(task) = self.tasks.get(&id) else { return };
            (task.task_type, task.config.clone(), task.schedule.clone())
        };

        let Some(handler) = self.handlers.get(&task_type).cloned() else {
            warn!(task_id = %id, "no handler registered for task type");
            return;
        };

        let token = CancellationToken::new();
        self.job_cancels.insert(id, token.clone());

        if self.paused.load(Ordering::SeqCst) {
            self.job_cancels.remove(&id);
            return;
        }

        let status = tokio::select! {
            _ = token.cancelled() => TaskStatus::Cancelled,
            result = tokio::time::timeout(TASK_TIMEOUT, handler.run(&config, token.clone())) => {
                match result {
                    Ok(Ok(())) => TaskStatus::Success,
                    Ok(Err(e)) => {
                        error!(task_id = %id, error = %e, "automation task failed");
                        TaskStatus::Failed
                    }
                    Err(_) => {
                        error!(task_id = %id, "automation task timed out");
                        TaskStatus::Failed
                    }
                }
            }
        };

        self.job_cancels.remove(&id);

        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.last_run_at = Some(Utc::now());
            task.last_status = Some(status);
            task.run_count += 1;
            if status != TaskStatus::Success {
                task.fail_count += 1;
            }
            task.next_run_at = next_run(&schedule).ok();
        }
        info!(task_id = %id, status = ?status, "automation task finished");
    }
}

fn next_run(schedule: &str) -> AutomationResult<DateTime<Utc>> {
    let parsed = Schedule::from_str(schedule).map_err(|e| AutomationError::InvalidSchedule(e.to_string()))?;
    parsed
        .upcoming(Utc)
        .next()
        .ok_or_else(|| AutomationError::InvalidSchedule(schedule.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingHandler {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn run(&self, _config: &serde_json::Value, _cancel: CancellationToken) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn register_task_rejects_bad_cron() {
        let engine = AutomationEngine::new(4, HashMap::new());
        let err = engine.register_task("not a cron", TaskType::Cleanup, serde_json::json!({}));
        assert!(matches!(err, Err(AutomationError::InvalidSchedule(_))));
    }

    #[test]
    fn register_task_computes_next_run() {
        let engine = AutomationEngine::new(4, HashMap::new());
        let id = engine
            .register_task("0 0 * * * * *", TaskType::Cleanup, serde_json::json!({}))
            .unwrap();
        let task = engine.list_tasks().into_iter().find(|t| t.id == id).unwrap();
        assert!(task.next_run_at.is_some());
    }

    #[tokio::test]
    async fn execute_dispatches_to_the_registered_handler() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut handlers: HashMap<TaskType, Arc<dyn TaskHandler>> = HashMap::new();
        handlers.insert(TaskType::Cleanup, Arc::new(CountingHandler { calls: calls.clone() }));
        let engine = Arc::new(AutomationEngine::new(2, handlers));
        let id = engine
            .register_task("0 0 * * * * *", TaskType::Cleanup, serde_json::json!({}))
            .unwrap();

        engine.execute(id).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let task = engine.list_tasks().into_iter().find(|t| t.id == id).unwrap();
        assert_eq!(task.run_count, 1);
        assert_eq!(task.last_status, Some(TaskStatus::Success));
    }

    #[tokio::test]
    async fn pause_all_skips_dispatch() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut handlers: HashMap<TaskType, Arc<dyn TaskHandler>> = HashMap::new();
        handlers.insert(TaskType::Cleanup, Arc::new(CountingHandler { calls: calls.clone() }));
        let engine = Arc::new(AutomationEngine::new(2, handlers));
        let id = engine
            .register_task("0 0 * * * * *", TaskType::Cleanup, serde_json::json!({}))
            .unwrap();
        engine.pause_all();
        engine.execute(id).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
