use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use webloom_core::error::{Result, WebloomError};
use webloom_core::records::{TaskLogEntry, TaskQuery, TaskRecord, TaskState, TaskUpdate, TriggerConfig};
use webloom_core::traits::{TaskStore, WorkflowStore};
use webloom_core::types::ExecutionId;

use crate::executor::{ExecutionEngine, PreparedRun, RunOutcome};
use crate::graph::{self, Graph};

/// In-memory firing state for loop-triggered tasks.
#[derive(Default)]
struct LoopState {
    last_fired: Option<DateTime<Utc>>,
    executions: u32,
}

/// Runs stored tasks through the engine: on demand, on a cron schedule, or
/// on a fixed interval. Tracks which run belongs to which task so a task can
/// be stopped.
pub struct TaskScheduler {
    tasks: Arc<dyn TaskStore>,
    workflows: Arc<dyn WorkflowStore>,
    engine: ExecutionEngine,
    /// Task id -> its run; `None` while the run is being set up.
    active: Mutex<HashMap<String, Option<ExecutionId>>>,
    loops: Mutex<HashMap<String, LoopState>>,
    refresh: Duration,
}

impl TaskScheduler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        workflows: Arc<dyn WorkflowStore>,
        engine: ExecutionEngine,
        refresh: Duration,
    ) -> Self {
        Self {
            tasks,
            workflows,
            engine,
            active: Mutex::new(HashMap::new()),
            loops: Mutex::new(HashMap::new()),
            refresh,
        }
    }

    /// Start the task's workflow. The task moves to `executing` now and to
    /// `completed` or `error` when the run ends.
    pub async fn execute_task(self: &Arc<Self>, task_id: &str) -> Result<ExecutionId> {
        let task = self
            .tasks
            .get_task(task_id)
            .await?
            .ok_or_else(|| WebloomError::NotFound {
                kind: "task",
                id: task_id.to_string(),
            })?;

        self.claim(&task.id)?;
        let run = match self.prepare(&task).await {
            Ok(run) => run,
            Err(e) => {
                self.lock_active().remove(&task.id);
                return Err(e);
            }
        };

        let execution_id = run.execution_id().clone();
        self.lock_active()
            .insert(task.id.clone(), Some(execution_id.clone()));
        let handle = run.start();
        info!(task_id = %task.id, execution_id = %execution_id, "Task started");

        let this = Arc::clone(self);
        let task_id = task.id.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(outcome) => this.record_outcome(&task_id, outcome).await,
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Task run panicked");
                    this.lock_active().remove(&task_id);
                    this.finish(&task_id, TaskState::Error, TaskLogEntry::new("failed", e.to_string()))
                        .await;
                }
            }
        });

        Ok(execution_id)
    }

    /// Mark the task as starting. Fails if it is already starting or running.
    fn claim(&self, task_id: &str) -> Result<()> {
        match self.lock_active().entry(task_id.to_string()) {
            Entry::Occupied(entry) => Err(WebloomError::Gateway(match entry.get() {
                Some(running) => format!("task {} is already running as {}", task_id, running),
                None => format!("task {} is already starting", task_id),
            })),
            Entry::Vacant(entry) => {
                entry.insert(None);
                Ok(())
            }
        }
    }

    /// Load and schedule the task's workflow and record the start. The run
    /// is registered but not started.
    async fn prepare(&self, task: &TaskRecord) -> Result<PreparedRun> {
        let workflow = self
            .workflows
            .get_workflow(&task.workflow_id)
            .await?
            .ok_or_else(|| WebloomError::NotFound {
                kind: "workflow",
                id: task.workflow_id.clone(),
            })?;

        let order = match Graph::from_value(workflow.workflow_data)
            .map_err(WebloomError::from)
            .and_then(|g| graph::plan(&g))
        {
            Ok(order) => order,
            Err(e) => {
                self.finish(&task.id, TaskState::Error, TaskLogEntry::new("rejected", e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let run = self.engine.prepare(order);
        self.tasks
            .update_task(
                &task.id,
                TaskUpdate {
                    state: Some(TaskState::Executing),
                    ..Default::default()
                },
            )
            .await?;
        self.tasks
            .append_task_log(
                &task.id,
                TaskLogEntry::new("started", format!("workflow {}", task.workflow_id))
                    .with_execution(run.execution_id().as_str()),
            )
            .await?;
        Ok(run)
    }

    /// Cancel the task's active run. Returns false if it has none.
    pub fn stop_task(&self, task_id: &str) -> bool {
        match self.active_run(task_id) {
            Some(execution_id) => self.engine.cancel(&execution_id),
            None => false,
        }
    }

    pub fn active_run(&self, task_id: &str) -> Option<ExecutionId> {
        self.lock_active().get(task_id).cloned().flatten()
    }

    fn is_busy(&self, task_id: &str) -> bool {
        self.lock_active().contains_key(task_id)
    }

    /// Fire scheduled and loop tasks until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(refresh_secs = self.refresh.as_secs(), "Task scheduler started");

        loop {
            let now = Utc::now();
            let upcoming = match self.upcoming(now).await {
                Ok(upcoming) => upcoming,
                Err(e) => {
                    warn!(error = %e, "Failed to load tasks for scheduling");
                    Vec::new()
                }
            };

            // Re-read the task list at least every `refresh` so edits are seen.
            let delay = upcoming
                .iter()
                .map(|(fire_at, _)| (*fire_at - now).to_std().unwrap_or(Duration::ZERO))
                .min()
                .map_or(self.refresh, |d| d.min(self.refresh));

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let woke = Utc::now();
                    for (_, task_id) in upcoming.iter().filter(|(fire_at, _)| *fire_at <= woke) {
                        self.fire(task_id).await;
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Task scheduler shutting down");
                    break;
                }
            }
        }
    }

    async fn fire(self: &Arc<Self>, task_id: &str) {
        info!(task_id = %task_id, "Firing scheduled task");
        if let Some(state) = self.lock_loops().get_mut(task_id) {
            state.last_fired = Some(Utc::now());
            state.executions += 1;
        }
        if let Err(e) = self.execute_task(task_id).await {
            warn!(task_id = %task_id, error = %e, "Scheduled task did not start");
        }
    }

    /// Next fire time of every idle scheduled or loop task.
    async fn upcoming(&self, now: DateTime<Utc>) -> Result<Vec<(DateTime<Utc>, String)>> {
        let tasks = self
            .tasks
            .list_tasks(TaskQuery {
                limit: usize::MAX,
                ..Default::default()
            })
            .await?;

        Ok(tasks
            .iter()
            .filter(|task| !self.is_busy(&task.id))
            .filter_map(|task| self.next_fire(task, now).map(|at| (at, task.id.clone())))
            .collect())
    }

    fn next_fire(&self, task: &TaskRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &task.trigger {
            TriggerConfig::Manual => None,
            TriggerConfig::Scheduled { cron_expression } => match Schedule::from_str(cron_expression) {
                Ok(schedule) => schedule.after(&now).next(),
                Err(e) => {
                    warn!(task_id = %task.id, cron = %cron_expression, error = %e, "Invalid cron expression");
                    None
                }
            },
            TriggerConfig::Loop {
                interval_secs,
                max_executions,
            } => {
                let mut loops = self.lock_loops();
                let state = loops.entry(task.id.clone()).or_default();
                if max_executions.is_some_and(|max| state.executions >= max) {
                    return None;
                }
                let Some(last) = state.last_fired else {
                    return Some(now);
                };
                let next = i64::try_from((*interval_secs).max(1))
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .and_then(|interval| last.checked_add_signed(interval));
                if next.is_none() {
                    warn!(task_id = %task.id, interval_secs = *interval_secs, "Loop interval out of range");
                }
                next
            }
        }
    }

    async fn record_outcome(&self, task_id: &str, outcome: RunOutcome) {
        self.lock_active().remove(task_id);
        let (state, entry) = if outcome.succeeded() {
            (
                TaskState::Completed,
                TaskLogEntry::new("completed", format!("finished in {} ms", outcome.elapsed_ms)),
            )
        } else {
            (
                TaskState::Error,
                TaskLogEntry::new(
                    "failed",
                    outcome.error.unwrap_or_else(|| "run failed".to_string()),
                ),
            )
        };
        info!(task_id = %task_id, execution_id = %outcome.execution_id, state = state.as_str(), "Task finished");
        self.finish(task_id, state, entry.with_execution(outcome.execution_id.as_str()))
            .await;
    }

    async fn finish(&self, task_id: &str, state: TaskState, entry: TaskLogEntry) {
        let update = TaskUpdate {
            state: Some(state),
            ..Default::default()
        };
        if let Err(e) = self.tasks.update_task(task_id, update).await {
            warn!(task_id = %task_id, error = %e, "Failed to update task state");
        }
        if let Err(e) = self.tasks.append_task_log(task_id, entry).await {
            warn!(task_id = %task_id, error = %e, "Failed to append task log");
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<ExecutionId>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_loops(&self) -> std::sync::MutexGuard<'_, HashMap<String, LoopState>> {
        self.loops.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Longest accepted loop interval: one year.
pub const MAX_LOOP_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

/// Reject triggers the scheduler could never fire.
pub fn validate_trigger(trigger: &TriggerConfig) -> Result<()> {
    match trigger {
        TriggerConfig::Manual => Ok(()),
        TriggerConfig::Scheduled { cron_expression } => Schedule::from_str(cron_expression)
            .map(|_| ())
            .map_err(|e| {
                WebloomError::Config(format!("invalid cron expression '{}': {}", cron_expression, e))
            }),
        TriggerConfig::Loop { interval_secs, .. } if *interval_secs == 0 => Err(
            WebloomError::Config("loop interval must be at least one second".into()),
        ),
        TriggerConfig::Loop { interval_secs, .. } if *interval_secs > MAX_LOOP_INTERVAL_SECS => {
            Err(WebloomError::Config(format!(
                "loop interval must be at most {} seconds",
                MAX_LOOP_INTERVAL_SECS
            )))
        }
        TriggerConfig::Loop { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SessionPool;
    use serde_json::json;
    use webloom_core::config::UnsupportedOperationPolicy;
    use webloom_core::records::{NewTask, NewWorkflow};
    use webloom_store::SqliteStore;
    use webloom_test_utils::{fixtures, RecordingSink, ScriptedProvider};

    async fn setup(
        provider: ScriptedProvider,
        workflow_data: serde_json::Value,
        trigger: TriggerConfig,
    ) -> (Arc<TaskScheduler>, Arc<SqliteStore>, String) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let pool = Arc::new(SessionPool::new(Arc::new(provider), 1));
        let engine = ExecutionEngine::new(
            pool,
            Arc::new(RecordingSink::new()),
            UnsupportedOperationPolicy::Skip,
        );
        let workflow = store
            .create_workflow(NewWorkflow {
                name: "wf".into(),
                description: None,
                tags: vec![],
                workflow_data,
            })
            .await
            .unwrap();
        let task = store
            .create_task(NewTask {
                workflow_id: workflow.id,
                trigger,
            })
            .await
            .unwrap();
        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            store.clone(),
            engine,
            Duration::from_millis(50),
        ));
        (scheduler, store, task.id)
    }

    async fn wait_for_state(store: &SqliteStore, task_id: &str, want: TaskState) -> TaskRecord {
        for _ in 0..100 {
            let task = store.get_task(task_id).await.unwrap().unwrap();
            if task.state == want {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {:?}", task_id, want);
    }

    #[tokio::test]
    async fn test_manual_task_completes() {
        let (scheduler, store, task_id) = setup(
            ScriptedProvider::new(),
            fixtures::chain_workflow("https://example.com"),
            TriggerConfig::Manual,
        )
        .await;

        let execution_id = scheduler.execute_task(&task_id).await.unwrap();
        let task = wait_for_state(&store, &task_id, TaskState::Completed).await;

        let events: Vec<&str> = task.execution_log.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(events, vec!["started", "completed"]);
        assert_eq!(
            task.execution_log[1].execution_id.as_deref(),
            Some(execution_id.as_str())
        );
        assert!(scheduler.active_run(&task_id).is_none());
    }

    #[tokio::test]
    async fn test_failing_run_marks_error() {
        let (scheduler, store, task_id) = setup(
            ScriptedProvider::new().fail_on("#btn", "gone"),
            fixtures::chain_workflow("https://example.com"),
            TriggerConfig::Manual,
        )
        .await;

        scheduler.execute_task(&task_id).await.unwrap();
        let task = wait_for_state(&store, &task_id, TaskState::Error).await;
        assert!(task.execution_log.last().unwrap().message.contains("gone"));
    }

    #[tokio::test]
    async fn test_cyclic_workflow_rejected() {
        let (scheduler, store, task_id) =
            setup(ScriptedProvider::new(), fixtures::cyclic_workflow(), TriggerConfig::Manual).await;

        let err = scheduler.execute_task(&task_id).await.unwrap_err();
        assert!(matches!(err, WebloomError::CycleDetected { .. }));
        let task = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Error);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (scheduler, _, _) =
            setup(ScriptedProvider::new(), json!({"nodes": []}), TriggerConfig::Manual).await;
        assert!(matches!(
            scheduler.execute_task("nope").await,
            Err(WebloomError::NotFound { kind: "task", .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_task_cancels_run() {
        let (scheduler, store, task_id) = setup(
            ScriptedProvider::new().with_delay(Duration::from_millis(50)),
            fixtures::chain_workflow("https://example.com"),
            TriggerConfig::Manual,
        )
        .await;

        scheduler.execute_task(&task_id).await.unwrap();
        assert!(scheduler.stop_task(&task_id));
        let task = wait_for_state(&store, &task_id, TaskState::Error).await;
        assert!(task.execution_log.last().unwrap().message.contains("cancelled"));
        assert!(!scheduler.stop_task(&task_id));
    }

    #[tokio::test]
    async fn test_loop_task_respects_max_executions() {
        let (scheduler, store, task_id) = setup(
            ScriptedProvider::new(),
            fixtures::chain_workflow("https://example.com"),
            TriggerConfig::Loop {
                interval_secs: 1,
                max_executions: Some(1),
            },
        )
        .await;

        let cancel = CancellationToken::new();
        let runner = tokio::spawn(scheduler.clone().run(cancel.clone()));
        wait_for_state(&store, &task_id, TaskState::Completed).await;
        tokio::time::sleep(Duration::from_millis(1200)).await;
        cancel.cancel();
        runner.await.unwrap();

        let task = store.get_task(&task_id).await.unwrap().unwrap();
        let starts = task
            .execution_log
            .iter()
            .filter(|e| e.event == "started")
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_validate_trigger() {
        assert!(validate_trigger(&TriggerConfig::Manual).is_ok());
        assert!(validate_trigger(&TriggerConfig::Scheduled {
            cron_expression: "0 */5 * * * *".into()
        })
        .is_ok());
        assert!(validate_trigger(&TriggerConfig::Scheduled {
            cron_expression: "every tuesday".into()
        })
        .is_err());
        assert!(validate_trigger(&TriggerConfig::Loop {
            interval_secs: 0,
            max_executions: None
        })
        .is_err());
        assert!(validate_trigger(&TriggerConfig::Loop {
            interval_secs: MAX_LOOP_INTERVAL_SECS,
            max_executions: None
        })
        .is_ok());
        assert!(validate_trigger(&TriggerConfig::Loop {
            interval_secs: 10_000_000_000_000_000,
            max_executions: None
        })
        .is_err());
    }

    #[test]
    fn test_huge_loop_interval_never_fires_again() {
        let now = Utc::now();
        let scheduler = idle_scheduler();
        let task = record(TriggerConfig::Loop {
            interval_secs: u64::MAX,
            max_executions: None,
        });
        assert_eq!(scheduler.next_fire(&task, now), Some(now));

        scheduler.lock_loops().get_mut("t").unwrap().last_fired = Some(now);
        assert!(scheduler.next_fire(&task, now).is_none());

        let task = record(TriggerConfig::Loop {
            interval_secs: 10_000_000_000_000_000,
            max_executions: None,
        });
        assert!(scheduler.next_fire(&task, now).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_execute_starts_one_run() {
        for _ in 0..5 {
            let (scheduler, store, task_id) = setup(
                ScriptedProvider::new().with_delay(Duration::from_millis(30)),
                fixtures::chain_workflow("https://example.com"),
                TriggerConfig::Manual,
            )
            .await;

            let first = {
                let scheduler = scheduler.clone();
                let task_id = task_id.clone();
                tokio::spawn(async move { scheduler.execute_task(&task_id).await })
            };
            let second = {
                let scheduler = scheduler.clone();
                let task_id = task_id.clone();
                tokio::spawn(async move { scheduler.execute_task(&task_id).await })
            };
            let results = [first.await.unwrap(), second.await.unwrap()];

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(WebloomError::Gateway(_)))));

            let task = wait_for_state(&store, &task_id, TaskState::Completed).await;
            let starts = task
                .execution_log
                .iter()
                .filter(|e| e.event == "started")
                .count();
            assert_eq!(starts, 1);
        }
    }

    #[tokio::test]
    async fn test_tasks_due_together_all_fire() {
        let (scheduler, store, first) = setup(
            ScriptedProvider::new(),
            fixtures::chain_workflow("https://example.com"),
            TriggerConfig::Scheduled {
                cron_expression: "* * * * * *".into(),
            },
        )
        .await;
        let workflow_id = store.get_task(&first).await.unwrap().unwrap().workflow_id;
        let second = store
            .create_task(NewTask {
                workflow_id,
                trigger: TriggerConfig::Scheduled {
                    cron_expression: "* * * * * *".into(),
                },
            })
            .await
            .unwrap()
            .id;

        let cancel = CancellationToken::new();
        let runner = tokio::spawn(scheduler.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        runner.await.unwrap();

        for task_id in [&first, &second] {
            let task = store.get_task(task_id).await.unwrap().unwrap();
            let starts = task
                .execution_log
                .iter()
                .filter(|e| e.event == "started")
                .count();
            assert!(starts >= 3, "task {} started {} times", task_id, starts);
        }
    }

    fn idle_scheduler() -> TaskScheduler {
        TaskScheduler::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(SqliteStore::in_memory().unwrap()),
            ExecutionEngine::new(
                Arc::new(SessionPool::new(Arc::new(ScriptedProvider::new()), 1)),
                Arc::new(RecordingSink::new()),
                UnsupportedOperationPolicy::Skip,
            ),
            Duration::from_secs(60),
        )
    }

    fn record(trigger: TriggerConfig) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            id: "t".into(),
            workflow_id: "w".into(),
            trigger,
            state: TaskState::Waiting,
            execution_log: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_manual_tasks_never_fire() {
        let now = Utc::now();
        let scheduler = idle_scheduler();
        assert!(scheduler.next_fire(&record(TriggerConfig::Manual), now).is_none());

        let cron_task = record(TriggerConfig::Scheduled {
            cron_expression: "0 * * * * *".into(),
        });
        let next = scheduler.next_fire(&cron_task, now).unwrap();
        assert!(next > now);
        assert!(next - now <= chrono::Duration::seconds(60));
    }
}
