use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use webloom_core::error::Result;
use webloom_core::records::{NewTask, TaskLogEntry, TaskQuery, TaskRecord, TaskState, TaskUpdate};
use webloom_core::traits::TaskStore;

use crate::store::{db_err, parse_time, sql_count, SqliteStore};

const COLUMNS: &str = "id, workflow_id, trigger, state, execution_log, created_at, updated_at";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let trigger: String = row.get(2)?;
    let state: String = row.get(3)?;
    let log: String = row.get(4)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        trigger: serde_json::from_str(&trigger).unwrap_or_default(),
        state: TaskState::parse(&state).unwrap_or(TaskState::Error),
        execution_log: serde_json::from_str(&log).unwrap_or_default(),
        created_at: parse_time(&created),
        updated_at: parse_time(&updated),
    })
}

impl SqliteStore {
    fn fetch_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", COLUMNS),
            params![id],
            row_to_task,
        )
        .optional()
        .map_err(db_err)
    }

    fn write_task(&self, task: &TaskRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tasks SET trigger = ?2, state = ?3, execution_log = ?4, updated_at = ?5 WHERE id = ?1",
            params![
                task.id,
                serde_json::to_string(&task.trigger)?,
                task.state.as_str(),
                serde_json::to_string(&task.execution_log)?,
                task.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl TaskStore for SqliteStore {
    fn create_task(&self, task: NewTask) -> BoxFuture<'_, Result<TaskRecord>> {
        Box::pin(async move {
            let now = Utc::now();
            let record = TaskRecord {
                id: Uuid::new_v4().to_string(),
                workflow_id: task.workflow_id,
                trigger: task.trigger,
                state: TaskState::Waiting,
                execution_log: vec![],
                created_at: now,
                updated_at: now,
            };

            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO tasks (id, workflow_id, trigger, state, execution_log, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, '[]', ?5, ?6)",
                params![
                    record.id,
                    record.workflow_id,
                    serde_json::to_string(&record.trigger)?,
                    record.state.as_str(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;

            Ok(record)
        })
    }

    fn get_task<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<TaskRecord>>> {
        Box::pin(async move { self.fetch_task(id) })
    }

    fn list_tasks(&self, query: TaskQuery) -> BoxFuture<'_, Result<Vec<TaskRecord>>> {
        Box::pin(async move {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM tasks
                     WHERE (?1 IS NULL OR workflow_id = ?1) AND (?2 IS NULL OR state = ?2)
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?3 OFFSET ?4",
                    COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(
                    params![
                        query.workflow_id,
                        query.state.map(TaskState::as_str),
                        sql_count(query.limit),
                        sql_count(query.skip),
                    ],
                    row_to_task,
                )
                .map_err(db_err)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(db_err)?);
            }
            Ok(out)
        })
    }

    fn update_task<'a>(
        &'a self,
        id: &'a str,
        update: TaskUpdate,
    ) -> BoxFuture<'a, Result<Option<TaskRecord>>> {
        Box::pin(async move {
            let Some(mut task) = self.fetch_task(id)? else {
                return Ok(None);
            };
            if let Some(trigger) = update.trigger {
                task.trigger = trigger;
            }
            if let Some(state) = update.state {
                task.state = state;
            }
            task.updated_at = Utc::now();
            self.write_task(&task)?;
            Ok(Some(task))
        })
    }

    fn append_task_log<'a>(
        &'a self,
        id: &'a str,
        entry: TaskLogEntry,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let Some(mut task) = self.fetch_task(id)? else {
                return Ok(false);
            };
            task.execution_log.push(entry);
            task.updated_at = Utc::now();
            self.write_task(&task)?;
            Ok(true)
        })
    }

    fn delete_task<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let conn = self.conn()?;
            let n = conn
                .execute("DELETE FROM tasks WHERE id = ?1", params![id])
                .map_err(db_err)?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webloom_core::records::TriggerConfig;

    async fn task(store: &SqliteStore, workflow_id: &str) -> TaskRecord {
        store
            .create_task(NewTask {
                workflow_id: workflow_id.into(),
                trigger: TriggerConfig::Manual,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_defaults_to_waiting() {
        let store = SqliteStore::in_memory().unwrap();
        let created = task(&store, "wf-1").await;
        let loaded = store.get_task(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, TaskState::Waiting);
        assert_eq!(loaded.trigger, TriggerConfig::Manual);
        assert!(loaded.execution_log.is_empty());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = SqliteStore::in_memory().unwrap();
        let a = task(&store, "wf-a").await;
        task(&store, "wf-b").await;
        task(&store, "wf-a").await;

        store
            .update_task(
                &a.id,
                TaskUpdate {
                    state: Some(TaskState::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let by_workflow = store
            .list_tasks(TaskQuery {
                workflow_id: Some("wf-a".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_workflow.len(), 2);

        let completed = store
            .list_tasks(TaskQuery {
                state: Some(TaskState::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, a.id);

        let all = store.list_tasks(TaskQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_update_trigger() {
        let store = SqliteStore::in_memory().unwrap();
        let created = task(&store, "wf").await;
        let cron = TriggerConfig::Scheduled {
            cron_expression: "0 0 * * * *".into(),
        };
        let updated = store
            .update_task(
                &created.id,
                TaskUpdate {
                    trigger: Some(cron.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.trigger, cron);
        assert_eq!(updated.state, TaskState::Waiting);
    }

    #[tokio::test]
    async fn test_append_log() {
        let store = SqliteStore::in_memory().unwrap();
        let created = task(&store, "wf").await;

        assert!(store
            .append_task_log(&created.id, TaskLogEntry::new("started", "run 1"))
            .await
            .unwrap());
        assert!(store
            .append_task_log(
                &created.id,
                TaskLogEntry::new("completed", "ok").with_execution("exec-1")
            )
            .await
            .unwrap());
        assert!(!store
            .append_task_log("missing", TaskLogEntry::new("x", "y"))
            .await
            .unwrap());

        let loaded = store.get_task(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.execution_log.len(), 2);
        assert_eq!(loaded.execution_log[1].execution_id.as_deref(), Some("exec-1"));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = SqliteStore::in_memory().unwrap();
        let created = task(&store, "wf").await;
        assert!(store.delete_task(&created.id).await.unwrap());
        assert!(store.get_task(&created.id).await.unwrap().is_none());
    }
}
