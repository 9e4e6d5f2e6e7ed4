use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskGraphError};

/// Top-level taskgraph configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    /// Task executors keyed by the task-type tag nodes refer to.
    #[serde(default)]
    pub executors: HashMap<String, ExecutorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Cap on nodes running at once within a step (0 = unbounded).
    #[serde(default)]
    pub max_concurrency: usize,
    /// Superstep ceiling; guards against cyclic graphs that never settle.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Final answer used when no node produced output.
    #[serde(default = "default_output_placeholder")]
    pub output_placeholder: String,
    /// Executor used for task types with no entry of their own.
    #[serde(default)]
    pub default_task_type: Option<String>,
    /// Log node instructions and outputs at debug level.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            max_steps: default_max_steps(),
            output_placeholder: default_output_placeholder(),
            default_task_type: None,
            verbose: false,
        }
    }
}

fn default_max_steps() -> usize { 100 }
fn default_output_placeholder() -> String { "No output generated.".to_string() }

/// Which built-in executor implementation backs a task type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Spawn an external program, instruction on stdin.
    #[default]
    Command,
    /// Return the instruction unchanged.
    Echo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub kind: ExecutorKind,
    /// Program to spawn (command kind).
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Args run once by `init_session` to check the program works, e.g. `["--version"]`.
    #[serde(default)]
    pub session_check: Option<Vec<String>>,
    /// Transient-failure retry inside the executor.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_timeout_secs() -> u64 { 300 }

impl ExecutorConfig {
    pub fn echo() -> Self {
        Self {
            kind: ExecutorKind::Echo,
            program: None,
            args: vec![],
            env: HashMap::new(),
            timeout_secs: default_timeout_secs(),
            session_check: None,
            retry: None,
        }
    }

    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind: ExecutorKind::Command,
            program: Some(program.into()),
            args,
            ..Self::echo()
        }
    }
}

/// Retry configuration for transient executor failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 10_000 }

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TaskGraphError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| TaskGraphError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.engine.max_steps == 0 {
            return Err(TaskGraphError::Config("engine.max_steps must be at least 1".into()));
        }
        for (task_type, exec) in &self.executors {
            if exec.kind == ExecutorKind::Command && exec.program.is_none() {
                return Err(TaskGraphError::Config(format!(
                    "executors.{}: command executor needs a program",
                    task_type
                )));
            }
        }
        if let Some(ref default) = self.engine.default_task_type {
            if !self.executors.contains_key(default) {
                return Err(TaskGraphError::Config(format!(
                    "engine.default_task_type '{}' has no [executors.{}] entry",
                    default, default
                )));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
