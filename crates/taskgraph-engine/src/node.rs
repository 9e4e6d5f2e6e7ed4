use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use taskgraph_core::event::EventBus;
use taskgraph_core::schema::NodeDefinition;
use taskgraph_core::traits::TaskExecutor;
use taskgraph_core::types::{ExecutionOptions, Metadata, RunId, WorkflowEvent};

use crate::expr::evaluate_hook;
use crate::state::{ExecutionState, StatePatch};

/// Heading placed between a node's instruction and the upstream outputs.
pub const PREVIOUS_OUTPUTS_HEADING: &str = "## Previous Node Outputs";

/// Per-run values shared by every node invocation.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub events: Option<Arc<EventBus>>,
    /// Log full inputs and outputs at debug level.
    pub verbose: bool,
}

impl RunContext {
    fn publish(&self, event: WorkflowEvent) {
        if let Some(ref bus) = self.events {
            bus.publish(event);
        }
    }
}

/// A node definition bound to the executor for its task type.
///
/// Reads a state snapshot and returns a [`StatePatch`]; never touches the
/// shared state itself.
pub struct NodeExecutor {
    def: NodeDefinition,
    executor: Arc<dyn TaskExecutor>,
}

impl NodeExecutor {
    pub fn new(def: NodeDefinition, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { def, executor }
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn definition(&self) -> &NodeDefinition {
        &self.def
    }

    /// Instruction text, followed by the upstream outputs when there are any.
    pub fn build_input(&self, state: &ExecutionState) -> String {
        if state.node_outputs.is_empty() {
            return self.def.instruction.clone();
        }
        let outputs = serde_json::to_string_pretty(&state.node_outputs.to_json())
            .unwrap_or_else(|_| state.node_outputs.to_json().to_string());
        format!(
            "{}\n\n{}\n\n{}",
            self.def.instruction, PREVIOUS_OUTPUTS_HEADING, outputs
        )
    }

    pub async fn run(&self, state: &ExecutionState, ctx: &RunContext) -> StatePatch {
        let node_id = self.def.id.as_str();
        let attempt = state.attempts(node_id) + 1;
        let max_attempts = self.def.max_attempts();
        let input = self.build_input(state);

        let options = ExecutionOptions {
            run_id: ctx.run_id.clone(),
            node_id: node_id.to_string(),
            node_name: self.def.name.clone(),
            task_type: self.def.task_type.clone(),
            attempt,
            max_attempts,
        };

        info!(node_id, executor = self.executor.name(), attempt, max_attempts, "Executing node");
        if ctx.verbose {
            debug!(node_id, input = %input, "Node input");
        }
        ctx.publish(WorkflowEvent::NodeStarted {
            run_id: ctx.run_id.clone(),
            node_id: node_id.to_string(),
            attempt,
        });

        let start = Instant::now();
        let result = self.executor.execute(&input, &options).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                info!(node_id, attempt, elapsed_ms, "Node succeeded");
                if ctx.verbose {
                    debug!(node_id, output = %output, "Node output");
                }
                ctx.publish(WorkflowEvent::NodeSucceeded {
                    run_id: ctx.run_id.clone(),
                    node_id: node_id.to_string(),
                    attempt,
                    elapsed_ms,
                });

                let metadata = match self.def.on_success {
                    Some(ref hook) => evaluate_hook(
                        hook,
                        &self.hook_context(state, Some(&output), None, elapsed_ms, attempt),
                    ),
                    None => Metadata::new(),
                };
                StatePatch {
                    node_id: node_id.to_string(),
                    output: Some(output),
                    error: None,
                    metadata,
                    attempt,
                }
            }
            Err(e) => {
                let error = if attempt < max_attempts {
                    format!(
                        "Node {} failed (attempt {} of {}): {}",
                        node_id, attempt, max_attempts, e
                    )
                } else {
                    format!("Node {} failed after {} attempts: {}", node_id, attempt, e)
                };
                warn!(node_id, attempt, max_attempts, elapsed_ms, error = %e, "Node failed");
                ctx.publish(WorkflowEvent::NodeFailed {
                    run_id: ctx.run_id.clone(),
                    node_id: node_id.to_string(),
                    attempt,
                    elapsed_ms,
                    error: error.clone(),
                });

                let metadata = match self.def.on_error {
                    Some(ref hook) => evaluate_hook(
                        hook,
                        &self.hook_context(state, None, Some(&error), elapsed_ms, attempt),
                    ),
                    None => Metadata::new(),
                };
                StatePatch {
                    node_id: node_id.to_string(),
                    output: None,
                    error: Some(error),
                    metadata,
                    attempt,
                }
            }
        }
    }

    /// Context object `onSuccess` / `onError` hooks see.
    fn hook_context(
        &self,
        state: &ExecutionState,
        output: Option<&str>,
        error: Option<&str>,
        elapsed_ms: u64,
        attempt: u32,
    ) -> Map<String, Value> {
        let mut ctx = Map::new();
        ctx.insert("output".into(), output.map_or(Value::Null, |o| json!(o)));
        ctx.insert("error".into(), error.map_or(Value::Null, |e| json!(e)));
        ctx.insert("elapsedMs".into(), json!(elapsed_ms));
        ctx.insert("retryCount".into(), json!(attempt));
        ctx.insert("metadata".into(), Value::Object(state.metadata.clone()));
        ctx.insert("nodeId".into(), json!(self.def.id));
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskgraph_test_utils::MockExecutor;

    fn ctx() -> RunContext {
        RunContext {
            run_id: RunId::new(),
            events: None,
            verbose: false,
        }
    }

    fn node(def: NodeDefinition, mock: MockExecutor) -> NodeExecutor {
        NodeExecutor::new(def, Arc::new(mock))
    }

    #[test]
    fn test_input_without_outputs_is_instruction() {
        let exec = node(
            NodeDefinition::new("a", "mock").with_instruction("Summarize."),
            MockExecutor::new("mock"),
        );
        assert_eq!(exec.build_input(&ExecutionState::default()), "Summarize.");
    }

    #[test]
    fn test_input_appends_previous_outputs() {
        let exec = node(
            NodeDefinition::new("b", "mock").with_instruction("Review."),
            MockExecutor::new("mock"),
        );
        let mut state = ExecutionState::default();
        state.node_outputs.insert("a", "draft");
        let input = exec.build_input(&state);
        assert!(input.starts_with("Review.\n\n## Previous Node Outputs\n\n"));
        assert!(input.contains("\"a\": \"draft\""));
    }

    #[tokio::test]
    async fn test_success_patch() {
        let exec = node(
            NodeDefinition::new("a", "mock")
                .with_on_success("{ done: true, len: output.length, by: nodeId }"),
            MockExecutor::new("mock").with_response("hello"),
        );
        let patch = exec.run(&ExecutionState::default(), &ctx()).await;
        assert_eq!(patch.output.as_deref(), Some("hello"));
        assert_eq!(patch.error, None);
        assert_eq!(patch.attempt, 1);
        assert_eq!(patch.metadata.get("done"), Some(&json!(true)));
        assert_eq!(patch.metadata.get("len"), Some(&json!(5)));
        assert_eq!(patch.metadata.get("by"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn test_failure_with_attempts_remaining() {
        let exec = node(
            NodeDefinition::new("x", "mock")
                .with_max_retries(2)
                .with_on_error("{ failures: retryCount }"),
            MockExecutor::failing("mock", "boom"),
        );
        let patch = exec.run(&ExecutionState::default(), &ctx()).await;
        assert!(patch.output.is_none());
        let error = patch.error.unwrap();
        assert!(error.starts_with("Node x failed (attempt 1 of 3): "), "{}", error);
        assert!(error.contains("boom"));
        assert_eq!(patch.metadata.get("failures"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_failure_exhausted() {
        let exec = node(
            NodeDefinition::new("x", "mock").with_max_retries(1),
            MockExecutor::failing("mock", "boom"),
        );
        let mut state = ExecutionState::default();
        state.retry_count.insert("x".into(), 1);
        let patch = exec.run(&state, &ctx()).await;
        assert_eq!(patch.attempt, 2);
        assert!(patch
            .error
            .unwrap()
            .starts_with("Node x failed after 2 attempts: "));
    }

    #[tokio::test]
    async fn test_options_carry_attempt() {
        let mock = MockExecutor::new("mock");
        let calls = mock.calls();
        let exec = node(NodeDefinition::new("a", "mock").with_max_retries(3), mock);
        let mut state = ExecutionState::default();
        state.retry_count.insert("a".into(), 2);
        exec.run(&state, &ctx()).await;
        assert_eq!(calls.lock().unwrap()[0].attempt, 3);
    }

    #[tokio::test]
    async fn test_bad_hook_yields_empty_metadata() {
        let exec = node(
            NodeDefinition::new("a", "mock").with_on_success("output.nope.deeper"),
            MockExecutor::new("mock"),
        );
        let patch = exec.run(&ExecutionState::default(), &ctx()).await;
        assert!(patch.succeeded());
        assert!(patch.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_events_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let exec = node(NodeDefinition::new("a", "mock"), MockExecutor::new("mock"));
        let ctx = RunContext {
            events: Some(Arc::clone(&bus)),
            ..ctx()
        };
        exec.run(&ExecutionState::default(), &ctx).await;
        assert!(matches!(rx.recv().await.unwrap(), WorkflowEvent::NodeStarted { attempt: 1, .. }));
        assert!(matches!(rx.recv().await.unwrap(), WorkflowEvent::NodeSucceeded { .. }));
    }
}
