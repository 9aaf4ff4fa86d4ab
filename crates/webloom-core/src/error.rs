use thiserror::Error;

/// Structural problems found while validating a workflow graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("edge {from} -> {to} references unknown node: {missing}")]
    UnknownEndpoint {
        from: String,
        to: String,
        missing: String,
    },

    #[error("duplicate edge: {from} -> {to}")]
    DuplicateEdge { from: String, to: String },

    #[error("malformed workflow: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum WebloomError {
    // Graph errors
    #[error("Workflow validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Workflow graph contains a cycle ({scheduled} of {total} nodes schedulable)")]
    CycleDetected { scheduled: usize, total: usize },

    // Browser errors
    #[error("Action dispatch failed: {action} {selector}: {message}")]
    ActionDispatch {
        action: String,
        selector: String,
        message: String,
    },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Browser session error: {0}")]
    Session(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    // Engine errors
    #[error("Run cancelled")]
    Cancelled,

    #[error("Run not found: {0}")]
    RunNotFound(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WebloomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_converts() {
        let err: WebloomError = ValidationError::DuplicateNodeId("a".into()).into();
        assert!(matches!(err, WebloomError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "Workflow validation failed: duplicate node id: a"
        );
    }

    #[test]
    fn cycle_message_reports_counts() {
        let err = WebloomError::CycleDetected {
            scheduled: 1,
            total: 3,
        };
        assert!(err.to_string().contains("1 of 3"));
    }
}
