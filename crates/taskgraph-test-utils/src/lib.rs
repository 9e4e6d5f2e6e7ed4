//! Test doubles shared by the taskgraph crates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use taskgraph_core::error::{Result, TaskGraphError};
use taskgraph_core::schema::{EdgeDefinition, NodeDefinition, WorkflowSchema};
use taskgraph_core::traits::TaskExecutor;
use taskgraph_core::types::{ExecutionOptions, RunId};

/// One recorded `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub node_id: String,
    pub instruction: String,
    pub attempt: u32,
}

type Scripted = std::result::Result<String, String>;

/// What the mock does once a node's script runs out.
#[derive(Debug, Clone)]
enum Fallback {
    /// Reply `"<node_id> done"`.
    NodeDone,
    Fail(String),
}

/// A scriptable task executor.
///
/// Responses are taken first from the per-node queue, then the shared queue,
/// then the fallback (`"<node_id> done"` unless built with [`MockExecutor::failing`]).
pub struct MockExecutor {
    name: String,
    shared: Mutex<VecDeque<Scripted>>,
    per_node: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallback: Fallback,
    delays: HashMap<String, Duration>,
    init_failure: Option<String>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    init_calls: Arc<AtomicUsize>,
}

impl MockExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Mutex::new(VecDeque::new()),
            per_node: Mutex::new(HashMap::new()),
            fallback: Fallback::NodeDone,
            delays: HashMap::new(),
            init_failure: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            init_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A mock whose every call fails with `message`.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fallback: Fallback::Fail(message.into()),
            ..Self::new(name)
        }
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push_shared(Ok(text.into()))
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push_shared(Err(message.into()))
    }

    pub fn with_node_response(self, node_id: &str, text: impl Into<String>) -> Self {
        self.push_node(node_id, Ok(text.into()))
    }

    pub fn with_node_failure(self, node_id: &str, message: impl Into<String>) -> Self {
        self.push_node(node_id, Err(message.into()))
    }

    /// Sleep before answering calls for `node_id`.
    pub fn with_node_delay(mut self, node_id: &str, delay: Duration) -> Self {
        self.delays.insert(node_id.to_string(), delay);
        self
    }

    pub fn with_init_failure(mut self, message: impl Into<String>) -> Self {
        self.init_failure = Some(message.into());
        self
    }

    /// Handle to the recorded calls, usable after the mock is moved into a pool.
    pub fn calls(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        Arc::clone(&self.calls)
    }

    pub fn init_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.init_calls)
    }

    fn push_shared(self, item: Scripted) -> Self {
        self.shared.lock().unwrap().push_back(item);
        self
    }

    fn push_node(self, node_id: &str, item: Scripted) -> Self {
        self.per_node
            .lock()
            .unwrap()
            .entry(node_id.to_string())
            .or_default()
            .push_back(item);
        self
    }

    fn next(&self, node_id: &str) -> Scripted {
        if let Some(item) = self
            .per_node
            .lock()
            .unwrap()
            .get_mut(node_id)
            .and_then(|q| q.pop_front())
        {
            return item;
        }
        if let Some(item) = self.shared.lock().unwrap().pop_front() {
            return item;
        }
        match self.fallback {
            Fallback::NodeDone => Ok(format!("{} done", node_id)),
            Fallback::Fail(ref message) => Err(message.clone()),
        }
    }
}

impl TaskExecutor for MockExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_session(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            match self.init_failure {
                Some(ref message) => Err(TaskGraphError::SessionInit {
                    task_type: self.name.clone(),
                    message: message.clone(),
                }),
                None => Ok(()),
            }
        })
    }

    fn execute<'a>(
        &'a self,
        instruction: &'a str,
        options: &'a ExecutionOptions,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(RecordedCall {
                node_id: options.node_id.clone(),
                instruction: instruction.to_string(),
                attempt: options.attempt,
            });
            if let Some(delay) = self.delays.get(&options.node_id) {
                tokio::time::sleep(*delay).await;
            }
            self.next(&options.node_id)
                .map_err(|message| TaskGraphError::task(&self.name, message))
        })
    }
}

/// Execution options for a first attempt at `node_id`.
pub fn options_for(node_id: &str) -> ExecutionOptions {
    ExecutionOptions {
        run_id: RunId::new(),
        node_id: node_id.to_string(),
        node_name: node_id.to_string(),
        task_type: "mock".to_string(),
        attempt: 1,
        max_attempts: 1,
    }
}

/// Fluent builder for workflow schemas in tests. Nodes default to task type `"mock"`.
pub struct SchemaBuilder {
    schema: WorkflowSchema,
}

impl SchemaBuilder {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            schema: WorkflowSchema {
                start_node_id: start.to_string(),
                end_node_id: end.to_string(),
                ..WorkflowSchema::default()
            },
        }
    }

    /// Add a `"mock"` node whose instruction is `"do <id>"`.
    pub fn node(self, id: &str) -> Self {
        self.node_def(NodeDefinition::new(id, "mock").with_instruction(format!("do {}", id)))
    }

    pub fn node_def(mut self, node: NodeDefinition) -> Self {
        self.schema.nodes.push(node);
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.schema.edges.push(EdgeDefinition::always(from, to));
        self
    }

    pub fn conditional(mut self, from: &str, to: &str, condition: &str) -> Self {
        self.schema
            .edges
            .push(EdgeDefinition::conditional(from, to, condition));
        self
    }

    pub fn initial_metadata(mut self, metadata: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = metadata {
            self.schema.initial_metadata = Some(map);
        }
        self
    }

    pub fn build(self) -> WorkflowSchema {
        self.schema
    }
}
