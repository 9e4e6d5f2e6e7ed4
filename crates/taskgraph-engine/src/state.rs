use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use taskgraph_core::Metadata;

/// Node outputs in insertion order.
///
/// Re-inserting an id replaces its value but keeps its original position, so
/// [`NodeOutputs::last`] is the most recently *first-inserted* id's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOutputs {
    entries: Vec<(String, String)>,
}

impl NodeOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(id, _)| id == node_id)
            .map(|(_, out)| out.as_str())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.get(node_id).is_some()
    }

    pub fn insert(&mut self, node_id: impl Into<String>, output: impl Into<String>) {
        let node_id = node_id.into();
        let output = output.into();
        match self.entries.iter_mut().find(|(id, _)| *id == node_id) {
            Some(entry) => entry.1 = output,
            None => self.entries.push((node_id, output)),
        }
    }

    /// Value of the last entry in insertion order.
    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(|(_, out)| out.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(id, out)| (id.as_str(), out.as_str()))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(id, out)| (id.clone(), Value::String(out.clone())))
                .collect(),
        )
    }
}

impl Serialize for NodeOutputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, out) in &self.entries {
            map.serialize_entry(id, out)?;
        }
        map.end()
    }
}

/// Mutable state of one run. Only the engine holds it, and only reducers change it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub prompt: String,
    pub node_outputs: NodeOutputs,
    pub final_answer: Option<String>,
    pub error: Option<String>,
    pub metadata: Metadata,
    pub current_node: Option<String>,
    pub retry_count: std::collections::BTreeMap<String, u32>,
}

impl ExecutionState {
    pub fn new(prompt: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            prompt: prompt.into(),
            metadata,
            ..Self::default()
        }
    }

    /// Attempts node `node_id` has used so far.
    pub fn attempts(&self, node_id: &str) -> u32 {
        self.retry_count.get(node_id).copied().unwrap_or(0)
    }

    /// Apply one node's patch through the per-field reducers.
    pub fn apply(&mut self, patch: StatePatch) {
        reduce_node_outputs(&mut self.node_outputs, &patch);
        reduce_error(&mut self.error, &patch);
        reduce_metadata(&mut self.metadata, &patch);
        reduce_current_node(&mut self.current_node, &patch);
        reduce_retry_count(&mut self.retry_count, &patch);
    }

    /// Context object condition expressions see.
    pub fn condition_context(&self) -> Map<String, Value> {
        let mut ctx = Map::new();
        ctx.insert("nodeOutputs".into(), self.node_outputs.to_json());
        ctx.insert("metadata".into(), Value::Object(self.metadata.clone()));
        ctx.insert(
            "error".into(),
            self.error.clone().map(Value::String).unwrap_or(Value::Null),
        );
        ctx.insert(
            "currentNode".into(),
            self.current_node.clone().map(Value::String).unwrap_or(Value::Null),
        );
        ctx
    }

    /// `"Error during execution: ..."` when an error is set, else the last
    /// inserted output, else `placeholder`.
    pub fn compute_final_answer(&self, placeholder: &str) -> String {
        match self.error.as_deref() {
            Some(err) if !err.is_empty() => format!("Error during execution: {}", err),
            _ => self
                .node_outputs
                .last()
                .map(str::to_string)
                .unwrap_or_else(|| placeholder.to_string()),
        }
    }
}

/// Partial update computed by one node completion.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePatch {
    pub node_id: String,
    /// Output on success; failures leave `nodeOutputs` untouched.
    pub output: Option<String>,
    /// New error value (`None` clears it).
    pub error: Option<String>,
    /// Shallow-merged into metadata.
    pub metadata: Metadata,
    /// Attempt number this completion used.
    pub attempt: u32,
}

impl StatePatch {
    pub fn succeeded(&self) -> bool {
        self.output.is_some()
    }
}

/// Insert-or-replace keeps the first insertion position.
pub fn reduce_node_outputs(outputs: &mut NodeOutputs, patch: &StatePatch) {
    if let Some(ref output) = patch.output {
        outputs.insert(patch.node_id.clone(), output.clone());
    }
}

/// Last write wins. Not commutative across patches in the same step.
pub fn reduce_error(error: &mut Option<String>, patch: &StatePatch) {
    *error = patch.error.clone();
}

/// Shallow merge; patch keys overwrite existing ones.
pub fn reduce_metadata(metadata: &mut Metadata, patch: &StatePatch) {
    for (k, v) in &patch.metadata {
        metadata.insert(k.clone(), v.clone());
    }
}

/// Last write wins. Not commutative across patches in the same step.
pub fn reduce_current_node(current: &mut Option<String>, patch: &StatePatch) {
    *current = Some(patch.node_id.clone());
}

/// Each node only ever writes its own key.
pub fn reduce_retry_count(
    retry_count: &mut std::collections::BTreeMap<String, u32>,
    patch: &StatePatch,
) {
    retry_count.insert(patch.node_id.clone(), patch.attempt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success(node: &str, output: &str, metadata: Value) -> StatePatch {
        StatePatch {
            node_id: node.into(),
            output: Some(output.into()),
            error: None,
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            attempt: 1,
        }
    }

    fn failure(node: &str, error: &str, attempt: u32) -> StatePatch {
        StatePatch {
            node_id: node.into(),
            output: None,
            error: Some(error.into()),
            metadata: Metadata::new(),
            attempt,
        }
    }

    #[test]
    fn test_node_outputs_keep_first_insertion_position() {
        let mut outputs = NodeOutputs::new();
        outputs.insert("a", "1");
        outputs.insert("b", "2");
        outputs.insert("a", "3");
        assert_eq!(outputs.get("a"), Some("3"));
        assert_eq!(outputs.last(), Some("2"));
        assert_eq!(outputs.len(), 2);
        let ids: Vec<_> = outputs.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_node_outputs_serialize_in_order() {
        let mut outputs = NodeOutputs::new();
        outputs.insert("z", "1");
        outputs.insert("a", "2");
        assert_eq!(serde_json::to_string(&outputs).unwrap(), r#"{"z":"1","a":"2"}"#);
    }

    #[test]
    fn test_apply_success() {
        let mut state = ExecutionState::new("go", Metadata::new());
        state.error = Some("stale".into());
        state.apply(success("a", "out", json!({"ok": true})));
        assert_eq!(state.node_outputs.get("a"), Some("out"));
        assert_eq!(state.error, None);
        assert_eq!(state.current_node.as_deref(), Some("a"));
        assert_eq!(state.metadata.get("ok"), Some(&json!(true)));
        assert_eq!(state.attempts("a"), 1);
    }

    #[test]
    fn test_apply_failure_leaves_outputs() {
        let mut state = ExecutionState::new("go", Metadata::new());
        state.apply(failure("a", "boom", 2));
        assert!(!state.node_outputs.contains("a"));
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert_eq!(state.attempts("a"), 2);
    }

    #[test]
    fn test_metadata_merge_is_idempotent() {
        let patch = success("a", "out", json!({"ok": true, "n": 1}));
        let mut once = ExecutionState::new("", json!({"keep": 1}).as_object().cloned().unwrap());
        once.apply(patch.clone());
        let mut twice = once.clone();
        twice.apply(patch);
        assert_eq!(once.metadata, twice.metadata);
        assert_eq!(twice.metadata.get("keep"), Some(&json!(1)));
    }

    #[test]
    fn test_scalar_fields_are_last_write() {
        let mut state = ExecutionState::new("", Metadata::new());
        state.apply(failure("b", "b failed", 1));
        state.apply(success("c", "c out", json!({})));
        assert_eq!(state.error, None);
        assert_eq!(state.current_node.as_deref(), Some("c"));

        let mut reversed = ExecutionState::new("", Metadata::new());
        reversed.apply(success("c", "c out", json!({})));
        reversed.apply(failure("b", "b failed", 1));
        assert_eq!(reversed.error.as_deref(), Some("b failed"));
        assert_eq!(reversed.current_node.as_deref(), Some("b"));
    }

    #[test]
    fn test_final_answer_rules() {
        let mut state = ExecutionState::new("", Metadata::new());
        assert_eq!(state.compute_final_answer("none"), "none");
        state.apply(success("a", "first", json!({})));
        state.apply(success("b", "second", json!({})));
        assert_eq!(state.compute_final_answer("none"), "second");
        state.error = Some("x broke".into());
        assert_eq!(state.compute_final_answer("none"), "Error during execution: x broke");
    }

    #[test]
    fn test_condition_context_shape() {
        let mut state = ExecutionState::new("", json!({"k": "v"}).as_object().cloned().unwrap());
        state.apply(success("a", "out", json!({})));
        let ctx = state.condition_context();
        assert_eq!(ctx["nodeOutputs"], json!({"a": "out"}));
        assert_eq!(ctx["metadata"], json!({"k": "v"}));
        assert_eq!(ctx["error"], Value::Null);
        assert_eq!(ctx["currentNode"], json!("a"));
    }
}
