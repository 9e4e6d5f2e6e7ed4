use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use taskgraph_core::error::{Result, TaskGraphError};
use taskgraph_core::schema::{NodeDefinition, WorkflowSchema};
use taskgraph_executors::ExecutorPool;

use crate::expr::{evaluate_condition, Expression};
use crate::node::NodeExecutor;
use crate::state::ExecutionState;
use crate::validate::validate;

/// How control leaves a node once it completes.
#[derive(Debug)]
pub enum Route {
    /// Always continue to one node.
    Direct(String),
    /// End this branch.
    Terminal,
    /// Decide from the node's own completion.
    Dynamic(Router),
}

impl Route {
    /// Destinations after the node completed, given the state its own
    /// completion produced.
    pub fn next(&self, state: &ExecutionState) -> Vec<String> {
        match self {
            Route::Direct(target) => vec![target.clone()],
            Route::Terminal => Vec::new(),
            Route::Dynamic(router) => router.route(state),
        }
    }
}

#[derive(Debug)]
enum Guard {
    Always,
    When(Expression),
    /// Condition text that failed to parse. Never true.
    Invalid,
}

#[derive(Debug)]
struct RouteEdge {
    target: String,
    guard: Guard,
}

/// Routing function for a node with conditions, fan-out, or retries.
///
/// Rules, first match wins:
/// 1. The node failed, has no output, and has attempts left: route back to itself.
/// 2. Attempts are used up and an error is set: the first conditional edge
///    whose condition holds, or nothing.
/// 3. Otherwise every unconditional target plus every conditional target
///    whose condition holds, deduplicated in declaration order.
#[derive(Debug)]
pub struct Router {
    node_id: String,
    max_attempts: u32,
    edges: Vec<RouteEdge>,
}

impl Router {
    pub fn route(&self, state: &ExecutionState) -> Vec<String> {
        let attempts = state.attempts(&self.node_id);
        let has_error = state.error.is_some();

        if has_error && !state.node_outputs.contains(&self.node_id) && attempts < self.max_attempts {
            debug!(node_id = %self.node_id, attempts, max_attempts = self.max_attempts, "Retrying node");
            return vec![self.node_id.clone()];
        }

        let context = state.condition_context();
        let holds = |guard: &Guard| match guard {
            Guard::When(expr) => evaluate_condition(expr, &context),
            Guard::Always | Guard::Invalid => false,
        };

        if attempts >= self.max_attempts && has_error {
            return self
                .edges
                .iter()
                .find(|e| holds(&e.guard))
                .map(|e| vec![e.target.clone()])
                .unwrap_or_default();
        }

        let mut targets: Vec<String> = Vec::new();
        for edge in &self.edges {
            let take = matches!(edge.guard, Guard::Always) || holds(&edge.guard);
            if take && !targets.contains(&edge.target) {
                targets.push(edge.target.clone());
            }
        }
        targets
    }
}

/// A validated schema with every node bound to its executor and route.
pub struct CompiledGraph {
    start: String,
    end: String,
    nodes: HashMap<String, Arc<NodeExecutor>>,
    routes: HashMap<String, Route>,
}

impl CompiledGraph {
    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    pub fn node(&self, id: &str) -> Option<&Arc<NodeExecutor>> {
        self.nodes.get(id)
    }

    pub fn route(&self, id: &str) -> Option<&Route> {
        self.routes.get(id)
    }

    /// Task types referenced by the graph's nodes.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .nodes
            .values()
            .map(|n| n.definition().task_type.as_str())
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }
}

/// Validate `schema` and bind it into a runnable graph.
pub fn compile(schema: &WorkflowSchema, pool: &ExecutorPool) -> Result<CompiledGraph> {
    validate(schema)?;

    let mut nodes = HashMap::with_capacity(schema.nodes.len());
    let mut routes = HashMap::with_capacity(schema.nodes.len());

    for def in &schema.nodes {
        let executor = pool.resolve(&def.task_type)?;
        routes.insert(def.id.clone(), compile_route(schema, def));
        nodes.insert(
            def.id.clone(),
            Arc::new(NodeExecutor::new(def.clone(), executor)),
        );
    }

    if !routes.contains_key(&schema.start_node_id) {
        return Err(TaskGraphError::Engine(format!(
            "start node '{}' was not compiled",
            schema.start_node_id
        )));
    }

    debug!(nodes = nodes.len(), edges = schema.edges.len(), "Compiled workflow graph");
    Ok(CompiledGraph {
        start: schema.start_node_id.clone(),
        end: schema.end_node_id.clone(),
        nodes,
        routes,
    })
}

fn compile_route(schema: &WorkflowSchema, def: &NodeDefinition) -> Route {
    let edges: Vec<RouteEdge> = schema
        .outgoing(&def.id)
        .map(|edge| {
            let guard = match edge.condition() {
                None => Guard::Always,
                Some(source) => match Expression::parse(source) {
                    Ok(expr) => Guard::When(expr),
                    Err(e) => {
                        warn!(
                            from = %edge.from,
                            to = %edge.to,
                            condition = source,
                            error = %e,
                            "Edge condition does not parse, it will never match"
                        );
                        Guard::Invalid
                    }
                },
            };
            RouteEdge {
                target: edge.to.clone(),
                guard,
            }
        })
        .collect();

    let retries = def.max_attempts() > 1;
    match edges.as_slice() {
        [] if !retries => Route::Terminal,
        [RouteEdge {
            target,
            guard: Guard::Always,
        }] if !retries => Route::Direct(target.clone()),
        _ => Route::Dynamic(Router {
            node_id: def.id.clone(),
            max_attempts: def.max_attempts(),
            edges,
        }),
    }
}
