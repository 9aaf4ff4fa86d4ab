use futures::future::BoxFuture;

use crate::cookie::{DomainCookies, DomainSummary};
use crate::error::Result;
use crate::records::{
    NewTask, NewWorkflow, TaskLogEntry, TaskQuery, TaskRecord, TaskUpdate, WorkflowRecord,
    WorkflowUpdate,
};
use crate::types::RunEvent;

/// One live browser page. Every call may suspend on network or DOM latency;
/// timeouts are the implementation's concern.
pub trait BrowserPage: Send + Sync {
    /// Load `url` in this page.
    fn navigate<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Click the first element matching `selector`.
    fn click<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Type `value` into the element matching `selector`.
    fn fill<'a>(&'a self, selector: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Read the visible text of the element matching `selector`.
    fn text_of<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, Result<String>>;

    /// Release the underlying browser resources.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Opens browser pages. Concurrency limits are applied by the engine's pool,
/// not by the provider.
pub trait SessionProvider: Send + Sync + 'static {
    fn open_page(&self) -> BoxFuture<'_, Result<Box<dyn BrowserPage>>>;
}

/// Receives run progress events.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: RunEvent);
}

/// Outbound half of one client connection. The router holds these as opaque
/// handles; a failed send means the peer is gone or the socket broke.
pub trait MessageTransport: Send + Sync + 'static {
    fn send_text(&self, text: String) -> BoxFuture<'_, Result<()>>;
}

/// Workflow record persistence.
pub trait WorkflowStore: Send + Sync + 'static {
    fn create_workflow(&self, workflow: NewWorkflow) -> BoxFuture<'_, Result<WorkflowRecord>>;

    fn get_workflow<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<WorkflowRecord>>>;

    /// Newest first.
    fn list_workflows(&self, skip: usize, limit: usize)
        -> BoxFuture<'_, Result<Vec<WorkflowRecord>>>;

    fn update_workflow<'a>(
        &'a self,
        id: &'a str,
        update: WorkflowUpdate,
    ) -> BoxFuture<'a, Result<Option<WorkflowRecord>>>;

    fn delete_workflow<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>>;
}

/// Task record persistence.
pub trait TaskStore: Send + Sync + 'static {
    fn create_task(&self, task: NewTask) -> BoxFuture<'_, Result<TaskRecord>>;

    fn get_task<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<TaskRecord>>>;

    /// Newest first, filtered by `query`.
    fn list_tasks(&self, query: TaskQuery) -> BoxFuture<'_, Result<Vec<TaskRecord>>>;

    fn update_task<'a>(
        &'a self,
        id: &'a str,
        update: TaskUpdate,
    ) -> BoxFuture<'a, Result<Option<TaskRecord>>>;

    fn append_task_log<'a>(
        &'a self,
        id: &'a str,
        entry: TaskLogEntry,
    ) -> BoxFuture<'a, Result<bool>>;

    fn delete_task<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>>;
}

/// Cookie persistence keyed by primary domain.
pub trait CookieStore: Send + Sync + 'static {
    /// Upsert the cookie set; returns the primary domain it was stored under.
    fn save_cookies(&self, cookies: DomainCookies) -> BoxFuture<'_, Result<String>>;

    fn load_cookies<'a>(&'a self, domain: &'a str)
        -> BoxFuture<'a, Result<Option<DomainCookies>>>;

    fn list_domains(&self) -> BoxFuture<'_, Result<Vec<DomainSummary>>>;

    fn delete_cookies<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Remove cookie sets not updated within `days`; returns the number removed.
    fn cleanup_older_than(&self, days: u32) -> BoxFuture<'_, Result<usize>>;
}
