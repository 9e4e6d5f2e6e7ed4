use thiserror::Error;

/// A single problem found while validating a workflow schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("edge {from} -> {to} references unknown source node '{from}'")]
    UnknownEdgeSource { from: String, to: String },

    #[error("edge {from} -> {to} references unknown target node '{to}'")]
    UnknownEdgeTarget { from: String, to: String },

    #[error("start node id is missing")]
    MissingStartNode,

    #[error("start node '{0}' does not exist")]
    UnknownStartNode(String),

    #[error("end node id is missing")]
    MissingEndNode,

    #[error("end node '{0}' does not exist")]
    UnknownEndNode(String),

    #[error("node '{node_id}' has negative maxRetries ({value})")]
    NegativeMaxRetries { node_id: String, value: i64 },
}

/// Every violation found in a workflow schema, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid workflow schema ({} violation(s)): {}", .violations.len(), join_violations(.violations))]
pub struct SchemaValidationError {
    pub violations: Vec<SchemaViolation>,
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum TaskGraphError {
    // Schema errors
    #[error(transparent)]
    SchemaValidation(#[from] SchemaValidationError),

    // Expression errors
    #[error("Expression error: {0}")]
    Expression(String),

    // Task executor errors
    #[error("Task execution failed: {task_type}: {message}")]
    TaskExecution { task_type: String, message: String },

    #[error("Task timeout after {timeout_secs}s: {task_type}")]
    TaskTimeout { task_type: String, timeout_secs: u64 },

    #[error("No task executor registered for task type: {0}")]
    UnknownTaskType(String),

    #[error("Session init failed for task type {task_type}: {message}")]
    SessionInit { task_type: String, message: String },

    // Engine errors
    #[error("Engine error: {0}")]
    Engine(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskGraphError {
    /// Shorthand for a delegate failure.
    pub fn task(task_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskExecution {
            task_type: task_type.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskGraphError>;
