//! Workflow message handlers registered on the router at startup.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::{info, warn};

use webloom_core::error::{Result, WebloomError};
use webloom_core::records::{NewWorkflow, WorkflowRecord, WorkflowUpdate};
use webloom_core::traits::WorkflowStore;
use webloom_engine::{ExecutionEngine, Graph};

use crate::protocol::{self, kind, Envelope, Inbound, SaveWorkflow};
use crate::router::{HandlerContext, MessageHandler, MessageRouter};

/// `EXECUTE_WORKFLOW`: validate, schedule and start the posted graph.
pub struct ExecuteWorkflowHandler {
    engine: ExecutionEngine,
}

impl ExecuteWorkflowHandler {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self { engine }
    }
}

impl MessageHandler for ExecuteWorkflowHandler {
    fn handle<'a>(&'a self, ctx: HandlerContext<'a>, message: Inbound) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Inbound::ExecuteWorkflow { workflow } = message else {
                return;
            };
            let prepared = Graph::from_value(workflow)
                .map_err(WebloomError::from)
                .and_then(|graph| self.engine.prepare_graph(&graph));

            match prepared {
                Ok(run) => {
                    info!(connection_id = %ctx.connection_id, execution_id = %run.execution_id(), "Workflow execution started");
                    // The reply is queued ahead of any progress event for this run.
                    ctx.reply(&protocol::execution_started(run.execution_id()))
                        .await;
                    run.start();
                }
                Err(e) => {
                    warn!(connection_id = %ctx.connection_id, error = %e, "Workflow rejected");
                    ctx.reply(&protocol::execution_failed(&e.to_string())).await;
                }
            }
        })
    }
}

/// `STOP_WORKFLOW`: request cancellation of a run.
pub struct StopWorkflowHandler {
    engine: ExecutionEngine,
}

impl StopWorkflowHandler {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self { engine }
    }
}

impl MessageHandler for StopWorkflowHandler {
    fn handle<'a>(&'a self, ctx: HandlerContext<'a>, message: Inbound) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Inbound::StopWorkflow { execution_id } = message else {
                return;
            };
            let stopped = self.engine.cancel(&execution_id);
            ctx.reply(&protocol::execution_stopped(&execution_id, stopped))
                .await;
        })
    }
}

/// `save_workflow`: create, or update when the payload names an existing id.
pub struct SaveWorkflowHandler {
    store: Arc<dyn WorkflowStore>,
}

impl SaveWorkflowHandler {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    async fn save(&self, save: SaveWorkflow) -> Result<WorkflowRecord> {
        if let Some(id) = &save.workflow_id {
            let update = WorkflowUpdate {
                name: Some(save.name.clone()),
                description: save.description.clone(),
                tags: Some(save.tags.clone()),
                workflow_data: Some(save.workflow_data.clone()),
            };
            if let Some(record) = self.store.update_workflow(id, update).await? {
                return Ok(record);
            }
        }
        self.store
            .create_workflow(NewWorkflow {
                name: save.name,
                description: save.description,
                tags: save.tags,
                workflow_data: save.workflow_data,
            })
            .await
    }
}

impl MessageHandler for SaveWorkflowHandler {
    fn handle<'a>(&'a self, ctx: HandlerContext<'a>, message: Inbound) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Inbound::SaveWorkflow(save) = message else {
                return;
            };
            let reply = match self.save(save).await {
                Ok(record) => {
                    info!(workflow_id = %record.id, name = %record.name, "Workflow saved");
                    Envelope::new(
                        kind::WORKFLOW_SAVED,
                        json!({ "workflow_id": record.id, "workflow": record }),
                    )
                }
                Err(e) => {
                    warn!(error = %e, "Failed to save workflow");
                    protocol::error(e.to_string())
                }
            };
            ctx.reply(&reply).await;
        })
    }
}

/// `load_workflow`: return a stored workflow's graph and metadata.
pub struct LoadWorkflowHandler {
    store: Arc<dyn WorkflowStore>,
}

impl LoadWorkflowHandler {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }
}

impl MessageHandler for LoadWorkflowHandler {
    fn handle<'a>(&'a self, ctx: HandlerContext<'a>, message: Inbound) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Inbound::LoadWorkflow { workflow_id } = message else {
                return;
            };
            let reply = match self.store.get_workflow(&workflow_id).await {
                Ok(Some(record)) => Envelope::new(
                    kind::WORKFLOW_LOADED,
                    json!({
                        "workflow_id": record.id,
                        "workflow_data": record.workflow_data,
                        "metadata": {
                            "name": record.name,
                            "description": record.description,
                            "tags": record.tags,
                        },
                    }),
                ),
                Ok(None) => protocol::error(format!("workflow not found: {}", workflow_id)),
                Err(e) => {
                    warn!(workflow_id = %workflow_id, error = %e, "Failed to load workflow");
                    protocol::error(e.to_string())
                }
            };
            ctx.reply(&reply).await;
        })
    }
}

/// `plugin_status`: acknowledge with `connection_status`.
pub struct PluginStatusHandler;

impl MessageHandler for PluginStatusHandler {
    fn handle<'a>(&'a self, ctx: HandlerContext<'a>, message: Inbound) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Inbound::PluginStatus { node_id, status } = message else {
                return;
            };
            if let Some(status) = &status {
                info!(connection_id = %ctx.connection_id, status = %status, "Plugin status");
            }
            let node_id = node_id.unwrap_or_default();
            ctx.reply(&protocol::connection_status(&node_id, "connected"))
                .await;
        })
    }
}

/// Router with every workflow handler registered.
pub fn workflow_router(engine: ExecutionEngine, workflows: Arc<dyn WorkflowStore>) -> MessageRouter {
    MessageRouter::builder()
        .handler(
            kind::EXECUTE_WORKFLOW,
            Arc::new(ExecuteWorkflowHandler::new(engine.clone())),
        )
        .handler(kind::STOP_WORKFLOW, Arc::new(StopWorkflowHandler::new(engine)))
        .handler(
            kind::SAVE_WORKFLOW,
            Arc::new(SaveWorkflowHandler::new(workflows.clone())),
        )
        .handler(kind::LOAD_WORKFLOW, Arc::new(LoadWorkflowHandler::new(workflows)))
        .handler(kind::PLUGIN_STATUS, Arc::new(PluginStatusHandler))
        .build()
}
