//! Workflow graph model.
//!
//! A workflow arrives from the editor as `{nodes, connections}`. It is
//! validated structurally, then linearized with Kahn's algorithm into an
//! [`ExecutionOrder`] that the engine runs strictly in sequence.

pub mod edge;
pub mod node;
pub mod scheduler;
pub mod validate;

use serde::{Deserialize, Serialize};

use webloom_core::{Result, ValidationError};

pub use edge::Edge;
pub use node::{ActionPlan, ActionSpec, Node, NodeKind, OperationType};
pub use scheduler::{topological_order, ExecutionOrder, ScheduleError};
pub use validate::validate;

/// Nodes plus dependency edges. Treated as immutable once scheduled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default, rename = "connections", alias = "edges")]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Parse editor JSON. Shape errors surface as `ValidationError::Malformed`.
    pub fn from_value(value: serde_json::Value) -> std::result::Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate(self)
    }
}

/// Validate then schedule. Either step failing aborts before any browser
/// resource is touched.
pub fn plan(graph: &Graph) -> Result<ExecutionOrder> {
    graph.validate()?;
    Ok(topological_order(graph)?)
}
