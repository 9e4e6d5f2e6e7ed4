use futures::future::BoxFuture;

use taskgraph_core::error::Result;
use taskgraph_core::traits::TaskExecutor;
use taskgraph_core::types::ExecutionOptions;

/// Returns the instruction unchanged. Useful for dry runs of a graph.
pub struct EchoExecutor {
    name: String,
}

impl EchoExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TaskExecutor for EchoExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute<'a>(
        &'a self,
        instruction: &'a str,
        _options: &'a ExecutionOptions,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(instruction.to_string()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgraph_core::types::RunId;

    #[tokio::test]
    async fn test_echo_returns_instruction() {
        let exec = EchoExecutor::new("echo");
        let options = ExecutionOptions {
            run_id: RunId::new(),
            node_id: "a".into(),
            node_name: "A".into(),
            task_type: "echo".into(),
            attempt: 1,
            max_attempts: 1,
        };
        assert_eq!(exec.execute("hello", &options).await.unwrap(), "hello");
    }
}
