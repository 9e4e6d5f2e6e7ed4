use serde::{Deserialize, Serialize};

use crate::types::Metadata;

/// A workflow as produced by the schema producer.
///
/// Immutable once produced. Field names follow the camelCase wire format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSchema {
    /// Free-text plan that motivated this graph.
    #[serde(default)]
    pub plan: String,
    /// Free-text rendering of the graph (e.g. a mermaid diagram).
    #[serde(default)]
    pub diagram: String,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    #[serde(default)]
    pub start_node_id: String,
    #[serde(default)]
    pub end_node_id: String,
    #[serde(default)]
    pub initial_metadata: Option<Metadata>,
}

impl WorkflowSchema {
    /// Parse a schema from its JSON wire form.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing<'a>(&'a self, from: &'a str) -> impl Iterator<Item = &'a EdgeDefinition> + 'a {
        self.edges.iter().filter(move |e| e.from == from)
    }
}

/// A unit of work bound to one task executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Selects which task executor handles this node.
    #[serde(default)]
    pub task_type: String,
    /// Base instruction text sent to the executor.
    #[serde(default, alias = "prompt")]
    pub instruction: String,
    /// Retries after the first attempt. Signed so the validator can report
    /// negative values instead of failing deserialization.
    #[serde(default)]
    pub max_retries: i64,
    #[serde(default)]
    pub on_success: Option<String>,
    #[serde(default)]
    pub on_error: Option<String>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            task_type: task_type.into(),
            instruction: String::new(),
            max_retries: 0,
            on_success: None,
            on_error: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_on_success(mut self, expr: impl Into<String>) -> Self {
        self.on_success = Some(expr.into());
        self
    }

    pub fn with_on_error(mut self, expr: impl Into<String>) -> Self {
        self.on_error = Some(expr.into());
        self
    }

    /// Total attempts allowed (`maxRetries + 1`). Negative values count as zero retries.
    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.max_retries).unwrap_or(0).saturating_add(1)
    }
}

/// A possible transition between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
    /// Guard expression; `None` (or blank) means unconditional.
    #[serde(default)]
    pub condition: Option<String>,
}

impl EdgeDefinition {
    /// Create an unconditional edge.
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    /// Create a conditional edge.
    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<String>,
        expr: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(expr.into()),
        }
    }

    /// The guard expression, if any non-blank one is set.
    pub fn condition(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}
