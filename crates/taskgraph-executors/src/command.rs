use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use taskgraph_core::config::ExecutorConfig;
use taskgraph_core::error::{Result, TaskGraphError};
use taskgraph_core::traits::TaskExecutor;
use taskgraph_core::types::ExecutionOptions;

/// Longest stderr excerpt carried into an error message.
const MAX_STDERR_CHARS: usize = 2000;

/// Runs an external program per node: instruction on stdin, output from stdout.
pub struct CommandExecutor {
    task_type: String,
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout_secs: u64,
    session_check: Option<Vec<String>>,
}

impl CommandExecutor {
    pub fn new(task_type: impl Into<String>, program: impl Into<String>, config: &ExecutorConfig) -> Self {
        Self {
            task_type: task_type.into(),
            program: program.into(),
            args: config.args.clone(),
            env: config.env.clone(),
            timeout_secs: config.timeout_secs,
            session_check: config.session_check.clone(),
        }
    }

    fn command(&self, args: &[String]) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Spawn, feed `input` on stdin, and wait for exit within the timeout.
    async fn run(&self, mut command: tokio::process::Command, input: &str) -> Result<String> {
        let mut child = command
            .spawn()
            .map_err(|e| spawn_error(&self.task_type, &self.program, e))?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    // The program may exit without reading its input
                    if e.kind() != ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
            }
            Ok(())
        };

        let timeout = Duration::from_secs(self.timeout_secs);
        let result = tokio::time::timeout(timeout, async {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            output
        })
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(TaskGraphError::task(&self.task_type, e.to_string())),
            Err(_) => {
                return Err(TaskGraphError::TaskTimeout {
                    task_type: self.task_type.clone(),
                    timeout_secs: self.timeout_secs,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
            return Err(TaskGraphError::task(
                &self.task_type,
                format!("exit code {}: {}", output.status.code().unwrap_or(-1), excerpt),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// A missing or forbidden program is permanent. Other spawn failures
/// (fd or process limits, interrupted calls) stay I/O errors so the retry
/// wrapper can try again.
fn spawn_error(task_type: &str, program: &str, e: std::io::Error) -> TaskGraphError {
    match e.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => {
            TaskGraphError::task(task_type, format!("failed to spawn {}: {}", program, e))
        }
        _ => TaskGraphError::Io(e),
    }
}

impl TaskExecutor for CommandExecutor {
    fn name(&self) -> &str {
        &self.task_type
    }

    fn init_session(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let Some(ref check) = self.session_check else {
                return Ok(());
            };
            debug!(program = %self.program, args = ?check, "Running session check");
            self.run(self.command(check), "")
                .await
                .map(|_| ())
                .map_err(|e| TaskGraphError::SessionInit {
                    task_type: self.task_type.clone(),
                    message: e.to_string(),
                })
        })
    }

    fn execute<'a>(
        &'a self,
        instruction: &'a str,
        options: &'a ExecutionOptions,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            debug!(
                program = %self.program,
                node_id = %options.node_id,
                attempt = options.attempt,
                "Executing command"
            );
            let mut command = self.command(&self.args);
            command
                .env("TASKGRAPH_RUN_ID", &options.run_id.0)
                .env("TASKGRAPH_NODE_ID", &options.node_id)
                .env("TASKGRAPH_ATTEMPT", options.attempt.to_string());
            self.run(command, instruction).await
        })
    }
}
