use std::sync::Arc;

use webloom_core::config::GatewayConfig;
use webloom_core::traits::{TaskStore, WorkflowStore};
use webloom_engine::{ExecutionEngine, TaskScheduler};

use crate::router::MessageRouter;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub router: Arc<MessageRouter>,
    pub engine: ExecutionEngine,
    pub workflows: Arc<dyn WorkflowStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub scheduler: Arc<TaskScheduler>,
}
