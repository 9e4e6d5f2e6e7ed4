pub mod command;
pub mod echo;
pub mod registry;
pub mod retry;

use taskgraph_core::config::{ExecutorConfig, ExecutorKind};
use taskgraph_core::error::{Result, TaskGraphError};
use taskgraph_core::traits::TaskExecutor;

pub use command::CommandExecutor;
pub use echo::EchoExecutor;
pub use registry::ExecutorPool;
pub use retry::RetryingExecutor;

/// Create a task executor from its config entry, wrapped for retry when configured.
pub fn create_executor(task_type: &str, config: &ExecutorConfig) -> Result<Box<dyn TaskExecutor>> {
    let executor: Box<dyn TaskExecutor> = match config.kind {
        ExecutorKind::Echo => Box::new(EchoExecutor::new(task_type)),
        ExecutorKind::Command => {
            let program = config.program.as_deref().ok_or_else(|| {
                TaskGraphError::Config(format!("executors.{}: missing program", task_type))
            })?;
            Box::new(CommandExecutor::new(task_type, program, config))
        }
    };

    Ok(match config.retry {
        Some(ref retry) => Box::new(RetryingExecutor::new(executor, retry.clone())),
        None => executor,
    })
}
