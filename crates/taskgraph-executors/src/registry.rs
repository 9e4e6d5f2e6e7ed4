use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use taskgraph_core::config::EngineConfig;
use taskgraph_core::error::{Result, TaskGraphError};
use taskgraph_core::traits::TaskExecutor;

use crate::create_executor;

/// Task executors keyed by task type, shared by every node of that type.
pub struct ExecutorPool {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
    default_task_type: Option<String>,
    initialized: Mutex<HashSet<String>>,
}

impl ExecutorPool {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
            default_task_type: None,
            initialized: Mutex::new(HashSet::new()),
        }
    }

    /// Build one executor per `[executors.<type>]` entry.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let mut pool = Self::new();
        for (task_type, exec_config) in &config.executors {
            let executor = create_executor(task_type, exec_config)?;
            pool.executors.insert(task_type.clone(), Arc::from(executor));
        }
        pool.default_task_type = config.engine.default_task_type.clone();
        Ok(pool)
    }

    pub fn register(&mut self, task_type: impl Into<String>, executor: impl TaskExecutor) {
        let task_type = task_type.into();
        debug!(task_type = %task_type, executor = executor.name(), "Registering task executor");
        self.executors.insert(task_type, Arc::new(executor));
    }

    /// Route task types without an entry of their own to `task_type`.
    pub fn with_default(mut self, task_type: impl Into<String>) -> Self {
        self.default_task_type = Some(task_type.into());
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }

    /// Executor for `task_type`, falling back to the default task type.
    pub fn resolve(&self, task_type: &str) -> Result<Arc<dyn TaskExecutor>> {
        self.get(task_type)
            .or_else(|| self.default_task_type.as_deref().and_then(|d| self.get(d)))
            .ok_or_else(|| TaskGraphError::UnknownTaskType(task_type.to_string()))
    }

    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(|k| k.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Run `init_session` once for each executor behind the given task types.
    ///
    /// Stops at the first failure. Executors already initialized by an
    /// earlier call are skipped.
    pub async fn initialize<'a>(&self, task_types: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        for task_type in task_types {
            let key = if self.executors.contains_key(task_type) {
                task_type.to_string()
            } else {
                match self.default_task_type {
                    Some(ref d) if self.executors.contains_key(d) => d.clone(),
                    _ => return Err(TaskGraphError::UnknownTaskType(task_type.to_string())),
                }
            };
            if initialized.contains(&key) {
                continue;
            }
            if let Some(executor) = self.executors.get(&key) {
                executor.init_session().await?;
                info!(task_type = %key, "Task executor session ready");
            }
            initialized.insert(key);
        }
        Ok(())
    }
}

impl Default for ExecutorPool {
    fn default() -> Self {
        Self::new()
    }
}
