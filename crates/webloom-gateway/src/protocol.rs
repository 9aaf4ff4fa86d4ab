//! Wire format for the WebSocket channel.
//!
//! Every frame is an envelope `{type, payload, timestamp?}`. Inbound frames
//! are turned into an [`Inbound`] variant as soon as they arrive, so
//! handlers never touch raw JSON for the message types they understand.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use webloom_core::error::{Result, WebloomError};
use webloom_core::types::{ExecutionId, NodeRunState, RunEvent, RunState};

/// Message type names.
pub mod kind {
    pub const NODE_CONNECTION_REQUEST: &str = "node_connection_request";
    pub const CONNECTION_STATUS: &str = "connection_status";
    pub const PLUGIN_STATUS: &str = "plugin_status";

    pub const EXECUTE_WORKFLOW: &str = "EXECUTE_WORKFLOW";
    pub const STOP_WORKFLOW: &str = "STOP_WORKFLOW";
    pub const WORKFLOW_EXECUTION_STARTED: &str = "WORKFLOW_EXECUTION_STARTED";
    pub const WORKFLOW_EXECUTION_FAILED: &str = "WORKFLOW_EXECUTION_FAILED";
    pub const WORKFLOW_EXECUTION_STOPPED: &str = "WORKFLOW_EXECUTION_STOPPED";
    pub const NODE_EXECUTION_UPDATE: &str = "NODE_EXECUTION_UPDATE";
    pub const WORKFLOW_EXECUTION_COMPLETED: &str = "WORKFLOW_EXECUTION_COMPLETED";

    pub const SAVE_WORKFLOW: &str = "save_workflow";
    pub const LOAD_WORKFLOW: &str = "load_workflow";
    pub const WORKFLOW_SAVED: &str = "WORKFLOW_SAVED";
    pub const WORKFLOW_LOADED: &str = "WORKFLOW_LOADED";

    pub const ERROR: &str = "ERROR";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl Envelope {
    /// Outbound envelope stamped with the current time.
    pub fn new(kind: &str, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
            timestamp: Some(Value::String(Utc::now().to_rfc3339())),
        }
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A recognized inbound message with its payload decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    NodeConnectionRequest { node_id: String },
    /// The payload is the editor graph itself; it is validated by the engine.
    ExecuteWorkflow { workflow: Value },
    StopWorkflow { execution_id: ExecutionId },
    SaveWorkflow(SaveWorkflow),
    LoadWorkflow { workflow_id: String },
    PluginStatus { node_id: Option<String>, status: Option<String> },
    /// A type this module does not decode. Passed through for custom handlers.
    Other { kind: String, payload: Value },
}

/// Decoded `save_workflow` payload. Name, description and tags may come
/// either at the top level or under `metadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveWorkflow {
    pub workflow_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub workflow_data: Value,
}

#[derive(Deserialize)]
struct NodeIdPayload {
    node_id: String,
}

#[derive(Deserialize)]
struct StopPayload {
    execution_id: String,
}

#[derive(Deserialize)]
struct LoadPayload {
    workflow_id: String,
}

#[derive(Default, Deserialize)]
struct PluginStatusPayload {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct SavePayload {
    #[serde(default)]
    workflow_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    metadata: Option<Metadata>,
    workflow_data: Value,
}

impl Inbound {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let payload = || envelope.payload.clone();
        let decode_err = |e: serde_json::Error| {
            WebloomError::Protocol(format!("invalid {} payload: {}", envelope.kind, e))
        };

        Ok(match envelope.kind.as_str() {
            kind::NODE_CONNECTION_REQUEST => {
                let p: NodeIdPayload = serde_json::from_value(payload()).map_err(decode_err)?;
                if p.node_id.is_empty() {
                    return Err(WebloomError::Protocol("node_id must not be empty".into()));
                }
                Inbound::NodeConnectionRequest { node_id: p.node_id }
            }
            kind::EXECUTE_WORKFLOW => Inbound::ExecuteWorkflow { workflow: payload() },
            kind::STOP_WORKFLOW => {
                let p: StopPayload = serde_json::from_value(payload()).map_err(decode_err)?;
                Inbound::StopWorkflow {
                    execution_id: ExecutionId::from_string(&p.execution_id),
                }
            }
            kind::SAVE_WORKFLOW => {
                let p: SavePayload = serde_json::from_value(payload()).map_err(decode_err)?;
                Inbound::SaveWorkflow(p.into_request()?)
            }
            kind::LOAD_WORKFLOW => {
                let p: LoadPayload = serde_json::from_value(payload()).map_err(decode_err)?;
                Inbound::LoadWorkflow {
                    workflow_id: p.workflow_id,
                }
            }
            kind::PLUGIN_STATUS => {
                let p: PluginStatusPayload = if envelope.payload.is_null() {
                    PluginStatusPayload::default()
                } else {
                    serde_json::from_value(payload()).map_err(decode_err)?
                };
                Inbound::PluginStatus {
                    node_id: p.node_id,
                    status: p.status,
                }
            }
            other => Inbound::Other {
                kind: other.to_string(),
                payload: payload(),
            },
        })
    }
}

impl SavePayload {
    fn into_request(self) -> Result<SaveWorkflow> {
        let meta = self.metadata.unwrap_or_default();
        let name = self
            .name
            .or(meta.name)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| WebloomError::Protocol("save_workflow requires a name".into()))?;
        Ok(SaveWorkflow {
            workflow_id: self.workflow_id.filter(|id| !id.is_empty()),
            name,
            description: self.description.or(meta.description),
            tags: self.tags.or(meta.tags).unwrap_or_default(),
            workflow_data: self.workflow_data,
        })
    }
}

// Outbound builders.

pub fn execution_started(execution_id: &ExecutionId) -> Envelope {
    Envelope::new(
        kind::WORKFLOW_EXECUTION_STARTED,
        json!({ "execution_id": execution_id, "status": RunState::Running }),
    )
}

/// The run never started, so there is no execution id to report.
pub fn execution_failed(error: &str) -> Envelope {
    Envelope::new(
        kind::WORKFLOW_EXECUTION_FAILED,
        json!({ "execution_id": null, "status": RunState::Failed, "error": error }),
    )
}

pub fn execution_stopped(execution_id: &ExecutionId, stopped: bool) -> Envelope {
    Envelope::new(
        kind::WORKFLOW_EXECUTION_STOPPED,
        json!({ "execution_id": execution_id, "stopped": stopped }),
    )
}

pub fn node_update(
    execution_id: &ExecutionId,
    node_id: &str,
    state: NodeRunState,
    error: Option<&str>,
) -> Envelope {
    let mut payload = json!({
        "execution_id": execution_id,
        "nodeId": node_id,
        "state": state,
    });
    if let Some(error) = error {
        payload["error"] = json!(error);
    }
    Envelope::new(kind::NODE_EXECUTION_UPDATE, payload)
}

pub fn execution_completed(
    execution_id: &ExecutionId,
    status: RunState,
    error: Option<&str>,
) -> Envelope {
    let mut payload = json!({ "execution_id": execution_id, "status": status });
    if let Some(error) = error {
        payload["error"] = json!(error);
    }
    Envelope::new(kind::WORKFLOW_EXECUTION_COMPLETED, payload)
}

pub fn connection_status(node_id: &str, status: &str) -> Envelope {
    Envelope::new(
        kind::CONNECTION_STATUS,
        json!({ "node_id": node_id, "status": status }),
    )
}

pub fn error(message: impl Into<String>) -> Envelope {
    Envelope::new(kind::ERROR, json!({ "message": message.into() }))
}

/// Client-facing frame for an engine event. Start and warning events stay
/// server-side.
pub fn from_run_event(event: &RunEvent) -> Option<Envelope> {
    match event {
        RunEvent::NodeUpdate {
            execution_id,
            node_id,
            state,
            error,
        } => Some(node_update(execution_id, node_id, *state, error.as_deref())),
        RunEvent::RunCompleted {
            execution_id,
            status,
            error,
        } => Some(execution_completed(execution_id, *status, error.as_deref())),
        RunEvent::RunStarted { .. } | RunEvent::Warning { .. } => None,
    }
}
