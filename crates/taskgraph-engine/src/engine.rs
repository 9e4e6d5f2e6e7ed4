use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use taskgraph_core::config::{EngineConfig, EngineSettings};
use taskgraph_core::error::{Result, TaskGraphError};
use taskgraph_core::event::EventBus;
use taskgraph_core::schema::WorkflowSchema;
use taskgraph_core::types::{Metadata, RunId, WorkflowEvent};
use taskgraph_executors::ExecutorPool;

use crate::compiler::{compile, CompiledGraph};
use crate::node::RunContext;
use crate::state::{ExecutionState, NodeOutputs};

/// Outcome of one workflow run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub final_answer: String,
    pub node_outputs: NodeOutputs,
    pub metadata: Metadata,
    pub error: Option<String>,
}

impl RunResult {
    fn failed(error: &TaskGraphError) -> Self {
        let message = error.to_string();
        Self {
            final_answer: format!("Error during execution: {}", message),
            node_outputs: NodeOutputs::new(),
            metadata: Metadata::new(),
            error: Some(message),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives compiled workflows in supersteps.
///
/// Every active node of a step runs concurrently against the same state
/// snapshot. At the barrier the patches are applied in completion order, each
/// completed node is routed against the snapshot plus its own patch, and the
/// union of their destinations becomes the next step.
pub struct ExecutionEngine {
    settings: EngineSettings,
    pool: Arc<ExecutorPool>,
    event_bus: Option<Arc<EventBus>>,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig, pool: Arc<ExecutorPool>) -> Self {
        Self {
            settings: config.engine,
            pool,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run a workflow to completion.
    ///
    /// Never fails: schema, compile, and engine errors are reported through
    /// [`RunResult::error`].
    pub async fn run(
        &self,
        schema: &WorkflowSchema,
        prompt: &str,
        initial_metadata: Option<Metadata>,
    ) -> RunResult {
        let run_id = RunId::new();
        let start = Instant::now();
        info!(run_id = %run_id, start_node = %schema.start_node_id, "Starting workflow run");

        let (result, steps) = match self.execute(&run_id, schema, prompt, initial_metadata).await {
            Ok((result, steps)) => (result, steps),
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Workflow run aborted");
                (RunResult::failed(&e), 0)
            }
        };

        info!(
            run_id = %run_id,
            steps,
            elapsed_ms = start.elapsed().as_millis() as u64,
            outputs = result.node_outputs.len(),
            failed = result.error.is_some(),
            "Workflow run complete"
        );
        self.publish(WorkflowEvent::RunComplete {
            run_id,
            steps,
            error: result.error.clone(),
        });
        result
    }

    async fn execute(
        &self,
        run_id: &RunId,
        schema: &WorkflowSchema,
        prompt: &str,
        initial_metadata: Option<Metadata>,
    ) -> Result<(RunResult, usize)> {
        let graph = compile(schema, &self.pool)?;
        self.pool.initialize(graph.task_types()).await?;

        let mut metadata = schema.initial_metadata.clone().unwrap_or_default();
        metadata.extend(initial_metadata.unwrap_or_default());
        let mut state = ExecutionState::new(prompt, metadata);

        self.publish(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
            start_node: graph.start().to_string(),
        });

        let ctx = RunContext {
            run_id: run_id.clone(),
            events: self.event_bus.clone(),
            verbose: self.settings.verbose,
        };
        let semaphore = match self.settings.max_concurrency {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        let mut active = vec![graph.start().to_string()];
        let mut steps = 0;

        while !active.is_empty() {
            if steps >= self.settings.max_steps {
                return Err(TaskGraphError::Engine(format!(
                    "workflow did not finish within {} steps (still active: {})",
                    self.settings.max_steps,
                    active.join(", ")
                )));
            }
            steps += 1;
            debug!(run_id = %run_id, step = steps, nodes = ?active, "Starting step");
            self.publish(WorkflowEvent::StepStarted {
                run_id: run_id.clone(),
                step: steps,
                nodes: active.clone(),
            });

            active = self
                .step(&graph, &active, &mut state, &ctx, semaphore.as_ref())
                .await?;
        }

        let final_answer = state.compute_final_answer(&self.settings.output_placeholder);
        state.final_answer = Some(final_answer.clone());
        let result = RunResult {
            final_answer,
            node_outputs: state.node_outputs,
            metadata: state.metadata,
            error: state.error,
        };
        Ok((result, steps))
    }

    /// Run one superstep and merge its patches in completion order.
    ///
    /// Each completion is routed against the pre-step snapshot with only its
    /// own patch applied, so a sibling's outcome never steers its routing.
    /// Returns the next active set.
    async fn step(
        &self,
        graph: &CompiledGraph,
        active: &[String],
        state: &mut ExecutionState,
        ctx: &RunContext,
        semaphore: Option<&Arc<Semaphore>>,
    ) -> Result<Vec<String>> {
        let snapshot = Arc::new(state.clone());
        let mut tasks = FuturesUnordered::new();
        let mut aborts = Vec::with_capacity(active.len());

        for id in active {
            let node = graph
                .node(id)
                .cloned()
                .ok_or_else(|| TaskGraphError::Engine(format!("no compiled node '{}'", id)))?;
            let snapshot = Arc::clone(&snapshot);
            let ctx = ctx.clone();
            let semaphore = semaphore.cloned();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(s) => Some(
                        s.acquire_owned()
                            .await
                            .map_err(|e| TaskGraphError::Engine(e.to_string()))?,
                    ),
                    None => None,
                };
                Ok::<_, TaskGraphError>(node.run(&snapshot, &ctx).await)
            });
            aborts.push(handle.abort_handle());
            tasks.push(handle);
        }

        let mut next: Vec<String> = Vec::new();
        while let Some(joined) = tasks.next().await {
            let patch = match joined {
                Ok(Ok(patch)) => patch,
                Ok(Err(e)) => return Err(abort_step(&aborts, &mut tasks, e).await),
                Err(e) => {
                    let e = TaskGraphError::Engine(format!("node task failed: {}", e));
                    return Err(abort_step(&aborts, &mut tasks, e).await);
                }
            };

            let Some(route) = graph.route(&patch.node_id) else {
                let e = TaskGraphError::Engine(format!("no route for node '{}'", patch.node_id));
                return Err(abort_step(&aborts, &mut tasks, e).await);
            };
            let mut own_view = ExecutionState::clone(&snapshot);
            own_view.apply(patch.clone());
            for target in route.next(&own_view) {
                if !next.contains(&target) {
                    next.push(target);
                }
            }

            state.apply(patch);
        }
        Ok(next)
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(ref bus) = self.event_bus {
            bus.publish(event);
        }
    }
}

/// Stop the rest of a failed step and wait for its tasks to wind down.
async fn abort_step<F>(
    aborts: &[AbortHandle],
    tasks: &mut FuturesUnordered<F>,
    error: TaskGraphError,
) -> TaskGraphError
where
    F: Future,
{
    for handle in aborts {
        handle.abort();
    }
    while tasks.next().await.is_some() {}
    error
}
