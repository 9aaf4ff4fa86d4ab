use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use webloom_core::error::Result;
use webloom_core::records::{NewWorkflow, WorkflowRecord, WorkflowUpdate};
use webloom_core::traits::WorkflowStore;

use crate::store::{db_err, parse_time, sql_count, SqliteStore};

const COLUMNS: &str = "id, name, description, tags, workflow_data, created_at, updated_at";

fn row_to_workflow(row: &Row<'_>) -> rusqlite::Result<WorkflowRecord> {
    let tags: String = row.get(3)?;
    let data: String = row.get(4)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;
    Ok(WorkflowRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        workflow_data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        created_at: parse_time(&created),
        updated_at: parse_time(&updated),
    })
}

impl SqliteStore {
    fn fetch_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM workflows WHERE id = ?1", COLUMNS),
            params![id],
            row_to_workflow,
        )
        .optional()
        .map_err(db_err)
    }
}

impl WorkflowStore for SqliteStore {
    fn create_workflow(&self, workflow: NewWorkflow) -> BoxFuture<'_, Result<WorkflowRecord>> {
        Box::pin(async move {
            let now = Utc::now();
            let record = WorkflowRecord {
                id: Uuid::new_v4().to_string(),
                name: workflow.name,
                description: workflow.description,
                tags: workflow.tags,
                workflow_data: workflow.workflow_data,
                created_at: now,
                updated_at: now,
            };

            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO workflows (id, name, description, tags, workflow_data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.name,
                    record.description,
                    serde_json::to_string(&record.tags)?,
                    serde_json::to_string(&record.workflow_data)?,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;

            Ok(record)
        })
    }

    fn get_workflow<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<WorkflowRecord>>> {
        Box::pin(async move { self.fetch_workflow(id) })
    }

    fn list_workflows(
        &self,
        skip: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<WorkflowRecord>>> {
        Box::pin(async move {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM workflows ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                    COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![sql_count(limit), sql_count(skip)], row_to_workflow)
                .map_err(db_err)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(db_err)?);
            }
            Ok(out)
        })
    }

    fn update_workflow<'a>(
        &'a self,
        id: &'a str,
        update: WorkflowUpdate,
    ) -> BoxFuture<'a, Result<Option<WorkflowRecord>>> {
        Box::pin(async move {
            let Some(mut record) = self.fetch_workflow(id)? else {
                return Ok(None);
            };

            if let Some(name) = update.name {
                record.name = name;
            }
            if let Some(description) = update.description {
                record.description = Some(description);
            }
            if let Some(tags) = update.tags {
                record.tags = tags;
            }
            if let Some(data) = update.workflow_data {
                record.workflow_data = data;
            }
            record.updated_at = Utc::now();

            let conn = self.conn()?;
            conn.execute(
                "UPDATE workflows SET name = ?2, description = ?3, tags = ?4, workflow_data = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    record.id,
                    record.name,
                    record.description,
                    serde_json::to_string(&record.tags)?,
                    serde_json::to_string(&record.workflow_data)?,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;

            Ok(Some(record))
        })
    }

    fn delete_workflow<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let conn = self.conn()?;
            let n = conn
                .execute("DELETE FROM workflows WHERE id = ?1", params![id])
                .map_err(db_err)?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_workflow(name: &str) -> NewWorkflow {
        NewWorkflow {
            name: name.into(),
            description: None,
            tags: vec!["demo".into()],
            workflow_data: json!({"nodes": [], "connections": []}),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SqliteStore::in_memory().unwrap();
        let created = store.create_workflow(new_workflow("login")).await.unwrap();

        let loaded = store.get_workflow(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "login");
        assert_eq!(loaded.tags, vec!["demo"]);
        assert_eq!(loaded.workflow_data["nodes"], json!([]));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_workflow("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_paging() {
        let store = SqliteStore::in_memory().unwrap();
        for name in ["a", "b", "c"] {
            store.create_workflow(new_workflow(name)).await.unwrap();
        }

        let all = store.list_workflows(0, 100).await.unwrap();
        let names: Vec<&str> = all.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);

        let page = store.list_workflows(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "b");
    }

    #[tokio::test]
    async fn test_partial_update() {
        let store = SqliteStore::in_memory().unwrap();
        let created = store.create_workflow(new_workflow("old")).await.unwrap();

        let updated = store
            .update_workflow(
                &created.id,
                WorkflowUpdate {
                    name: Some("new".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "new");
        assert_eq!(updated.tags, vec!["demo"]);
        assert!(updated.updated_at >= created.updated_at);

        let missing = store
            .update_workflow("nope", WorkflowUpdate::default())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = SqliteStore::in_memory().unwrap();
        let created = store.create_workflow(new_workflow("x")).await.unwrap();
        assert!(store.delete_workflow(&created.id).await.unwrap());
        assert!(!store.delete_workflow(&created.id).await.unwrap());
    }
}
