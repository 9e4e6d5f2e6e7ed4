use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shared key/value state accumulated across node completions.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-call options handed to a task executor alongside the instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub run_id: RunId,
    pub node_id: String,
    pub node_name: String,
    pub task_type: String,
    /// 1-based attempt number for this node.
    pub attempt: u32,
    /// Total attempts the node is allowed.
    pub max_attempts: u32,
}

/// Events published while a workflow runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        run_id: RunId,
        start_node: String,
    },
    StepStarted {
        run_id: RunId,
        step: usize,
        nodes: Vec<String>,
    },
    NodeStarted {
        run_id: RunId,
        node_id: String,
        attempt: u32,
    },
    NodeSucceeded {
        run_id: RunId,
        node_id: String,
        attempt: u32,
        elapsed_ms: u64,
    },
    NodeFailed {
        run_id: RunId,
        node_id: String,
        attempt: u32,
        elapsed_ms: u64,
        error: String,
    },
    RunComplete {
        run_id: RunId,
        steps: usize,
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = WorkflowEvent::NodeStarted {
            run_id: RunId("r1".into()),
            node_id: "a".into(),
            attempt: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "node_started");
        assert_eq!(json["node_id"], "a");
    }
}
