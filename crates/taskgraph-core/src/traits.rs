use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::ExecutionOptions;

/// Task executor: the external capability a node delegates its work to.
///
/// One instance is bound per task type and shared by every node of that type,
/// so implementations must tolerate concurrent `execute` calls.
pub trait TaskExecutor: Send + Sync + 'static {
    /// Executor name, used in logs.
    fn name(&self) -> &str;

    /// Called once before first use. A failure aborts pool initialization.
    fn init_session(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Run one instruction and return its output text.
    fn execute<'a>(
        &'a self,
        instruction: &'a str,
        options: &'a ExecutionOptions,
    ) -> BoxFuture<'a, Result<String>>;
}
