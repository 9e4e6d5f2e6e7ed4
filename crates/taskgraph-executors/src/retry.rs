use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use taskgraph_core::config::RetryConfig;
use taskgraph_core::error::{Result, TaskGraphError};
use taskgraph_core::traits::TaskExecutor;
use taskgraph_core::types::ExecutionOptions;

/// A task executor that retries transient failures with exponential backoff.
///
/// This sits below the graph-level `maxRetries` budget: a node attempt only
/// fails once the executor has given up on its own retries.
pub struct RetryingExecutor {
    inner: Box<dyn TaskExecutor>,
    retry_config: RetryConfig,
}

impl RetryingExecutor {
    pub fn new(inner: Box<dyn TaskExecutor>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &TaskGraphError) -> bool {
    match e {
        TaskGraphError::TaskExecution { message, .. } => {
            message.contains("429")
                || message.contains("502")
                || message.contains("503")
                || message.contains("timeout")
                || message.contains("connection")
        }
        TaskGraphError::TaskTimeout { .. } | TaskGraphError::Io(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let ms = config
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl TaskExecutor for RetryingExecutor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn init_session(&self) -> BoxFuture<'_, Result<()>> {
        self.inner.init_session()
    }

    fn execute<'a>(
        &'a self,
        instruction: &'a str,
        options: &'a ExecutionOptions,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.execute(instruction, options).await {
                    Ok(output) => return Ok(output),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            executor = self.inner.name(),
                            node_id = %options.node_id,
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying task execution"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskgraph_test_utils::{options_for, MockExecutor};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&TaskGraphError::task("x", "HTTP 503 unavailable")));
        assert!(is_retryable(&TaskGraphError::task("x", "connection reset")));
        assert!(is_retryable(&TaskGraphError::TaskTimeout {
            task_type: "x".into(),
            timeout_secs: 1
        }));
        assert!(is_retryable(&TaskGraphError::Io(std::io::Error::from(
            std::io::ErrorKind::WouldBlock
        ))));
        assert!(!is_retryable(&TaskGraphError::task("x", "bad input")));
        assert!(!is_retryable(&TaskGraphError::task("x", "failed to spawn ghost: not found")));
        assert!(!is_retryable(&TaskGraphError::UnknownTaskType("x".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 1000,
        };
        assert!(calculate_backoff(0, &config) <= Duration::from_millis(600));
        assert!(calculate_backoff(8, &config) <= Duration::from_millis(1200));
        assert!(calculate_backoff(80, &config) <= Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mock = MockExecutor::new("mock")
            .with_failure("503 busy")
            .with_response("ok");
        let calls = mock.calls();
        let exec = RetryingExecutor::new(Box::new(mock), fast_retry(2));
        let out = exec.execute("go", &options_for("n")).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let mock = MockExecutor::new("mock")
            .with_failure("bad input")
            .with_response("ok");
        let calls = mock.calls();
        let exec = RetryingExecutor::new(Box::new(mock), fast_retry(2));
        assert!(exec.execute("go", &options_for("n")).await.is_err());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let mock = MockExecutor::failing("mock", "connection refused");
        let calls = mock.calls();
        let exec = RetryingExecutor::new(Box::new(mock), fast_retry(2));
        assert!(exec.execute("go", &options_for("n")).await.is_err());
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    /// Fails its first call the way a resource-starved spawn does.
    struct FlakySpawn {
        calls: AtomicUsize,
    }

    impl TaskExecutor for FlakySpawn {
        fn name(&self) -> &str {
            "flaky"
        }

        fn execute<'a>(
            &'a self,
            _instruction: &'a str,
            _options: &'a ExecutionOptions,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TaskGraphError::Io(std::io::Error::from(
                        std::io::ErrorKind::WouldBlock,
                    )))
                } else {
                    Ok("spawned".to_string())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_retries_spawn_io_failure() {
        let exec = RetryingExecutor::new(
            Box::new(FlakySpawn {
                calls: AtomicUsize::new(0),
            }),
            fast_retry(1),
        );
        assert_eq!(exec.execute("go", &options_for("n")).await.unwrap(), "spawned");
    }

    #[test]
    fn test_name_delegates() {
        let exec = RetryingExecutor::new(Box::new(MockExecutor::new("inner")), fast_retry(1));
        assert_eq!(exec.name(), "inner");
    }
}
