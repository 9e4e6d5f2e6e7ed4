use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskgraph_core::config::EngineConfig;
use taskgraph_core::error::TaskGraphError;
use taskgraph_core::event::EventBus;
use taskgraph_core::schema::WorkflowSchema;
use taskgraph_core::types::{Metadata, WorkflowEvent};

use taskgraph_engine::{validate, ExecutionEngine, RunResult};
use taskgraph_executors::{EchoExecutor, ExecutorPool};

#[derive(Parser)]
#[command(name = "taskgraph", version, about = "Compile and run workflow graphs of task nodes")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "taskgraph.toml", env = "TASKGRAPH_CONFIG")]
    config: PathBuf,

    /// Debug logging, including node inputs and outputs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow schema to completion
    Run {
        /// Workflow schema (JSON)
        schema: PathBuf,
        /// Original input stored with the run
        #[arg(short, long, default_value = "")]
        prompt: String,
        /// Extra initial metadata, `key=value` (value parsed as JSON when possible)
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
        /// Serve every task type with the echo executor
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a workflow schema without running it
    Validate {
        /// Workflow schema (JSON)
        schema: PathBuf,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "taskgraph=debug,warn"
    } else {
        "taskgraph=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { schema } => validate_schema(&schema)?,
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Run {
            schema,
            prompt,
            meta,
            json,
            dry_run,
        } => {
            let mut config = load_config(&cli.config)?;
            config.engine.verbose |= cli.verbose;
            let schema = read_schema(&schema)?;
            let metadata = parse_meta(&meta)?;
            let pool = build_pool(&config, &schema, dry_run)?;
            let event_bus = Arc::new(EventBus::default());
            let engine = ExecutionEngine::new(config, Arc::new(pool))
                .with_event_bus(Arc::clone(&event_bus));

            let printer = (!json).then(|| spawn_progress_printer(&event_bus));
            let result = engine.run(&schema, &prompt, Some(metadata)).await;

            // Closing the bus lets the printer drain and exit
            drop(engine);
            drop(event_bus);
            if let Some(handle) = printer {
                handle.await.ok();
            }

            print_result(&result, json)?;
            if let Some(ref error) = result.error {
                anyhow::bail!("workflow failed: {}", error);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    match EngineConfig::load(path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded config");
            Ok(config)
        }
        Err(TaskGraphError::ConfigNotFound(_)) => {
            warn!(path = %path.display(), "No config file found, using defaults");
            Ok(EngineConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn read_schema(path: &Path) -> anyhow::Result<WorkflowSchema> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    Ok(WorkflowSchema::from_json(&text)?)
}

fn validate_schema(path: &Path) -> anyhow::Result<()> {
    let schema = read_schema(path)?;
    match validate(&schema) {
        Ok(schema) => {
            println!(
                "{}: ok ({} nodes, {} edges, {} -> {})",
                path.display(),
                schema.nodes.len(),
                schema.edges.len(),
                schema.start_node_id,
                schema.end_node_id
            );
            Ok(())
        }
        Err(e) => {
            for violation in &e.violations {
                eprintln!("  - {}", violation);
            }
            Err(e.into())
        }
    }
}

/// Parse repeated `key=value` flags into metadata.
fn parse_meta(pairs: &[String]) -> anyhow::Result<Metadata> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--meta expects key=value, got '{}'", pair))?;
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        metadata.insert(key.trim().to_string(), value);
    }
    Ok(metadata)
}

fn build_pool(
    config: &EngineConfig,
    schema: &WorkflowSchema,
    dry_run: bool,
) -> anyhow::Result<ExecutorPool> {
    if !dry_run {
        return Ok(ExecutorPool::from_config(config)?);
    }
    let mut pool = ExecutorPool::new();
    for node in &schema.nodes {
        if pool.get(&node.task_type).is_none() {
            pool.register(node.task_type.clone(), EchoExecutor::new(node.task_type.clone()));
        }
    }
    Ok(pool)
}

fn spawn_progress_printer(event_bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let now = chrono::Local::now().format("%H:%M:%S");
            match event {
                WorkflowEvent::StepStarted { step, nodes, .. } => {
                    eprintln!("{} [step {}] {}", now, step, nodes.join(", "));
                }
                WorkflowEvent::NodeSucceeded {
                    node_id,
                    attempt,
                    elapsed_ms,
                    ..
                } => {
                    eprintln!("{} [{}: ok] attempt {}, {}ms", now, node_id, attempt, elapsed_ms);
                }
                WorkflowEvent::NodeFailed { node_id, error, .. } => {
                    eprintln!("{} [{}: ERROR] {}", now, node_id, truncate(&error, 200));
                }
                _ => {}
            }
        }
    })
}

fn print_result(result: &RunResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", result.final_answer);
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}
