pub mod compiler;
pub mod engine;
pub mod expr;
pub mod node;
pub mod state;
pub mod validate;

pub use compiler::{compile, CompiledGraph, Route, Router};
pub use engine::{ExecutionEngine, RunResult};
pub use expr::{Expression, ExpressionError};
pub use node::{NodeExecutor, RunContext};
pub use state::{ExecutionState, NodeOutputs, StatePatch};
pub use validate::validate;
