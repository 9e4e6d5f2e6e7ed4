use std::io::Write;

use taskgraph_core::config::{EngineConfig, ExecutorKind};
use taskgraph_core::error::TaskGraphError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_concurrency = 4
max_steps = 50
output_placeholder = "(nothing)"
default_task_type = "shell"

[executors.shell]
program = "sh"
args = ["-c", "cat"]
timeout_secs = 30
session_check = ["-c", "true"]

[executors.shell.env]
LANG = "C"

[executors.shell.retry]
max_retries = 3
initial_backoff_ms = 100

[executors.dry]
kind = "echo"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_concurrency, 4);
    assert_eq!(config.engine.max_steps, 50);
    assert_eq!(config.engine.output_placeholder, "(nothing)");
    assert_eq!(config.engine.default_task_type.as_deref(), Some("shell"));

    let shell = &config.executors["shell"];
    assert_eq!(shell.kind, ExecutorKind::Command);
    assert_eq!(shell.program.as_deref(), Some("sh"));
    assert_eq!(shell.args, vec!["-c", "cat"]);
    assert_eq!(shell.timeout_secs, 30);
    assert_eq!(shell.env.get("LANG").map(String::as_str), Some("C"));
    let retry = shell.retry.as_ref().expect("retry present");
    assert_eq!(retry.max_retries, 3);
    assert_eq!(retry.initial_backoff_ms, 100);
    assert_eq!(retry.max_backoff_ms, 10_000);

    assert_eq!(config.executors["dry"].kind, ExecutorKind::Echo);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("TASKGRAPH_TEST_PROGRAM", "/usr/bin/env");

    let toml_content = r#"
[executors.tool]
program = "${TASKGRAPH_TEST_PROGRAM}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.executors["tool"].program.as_deref(),
        Some("/usr/bin/env")
    );

    std::env::remove_var("TASKGRAPH_TEST_PROGRAM");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"").expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_concurrency, 0);
    assert_eq!(config.engine.max_steps, 100);
    assert_eq!(config.engine.output_placeholder, "No output generated.");
    assert!(config.engine.default_task_type.is_none());
    assert!(!config.engine.verbose);
    assert!(config.executors.is_empty());
}

#[test]
fn test_missing_file_is_not_found() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = EngineConfig::load(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, TaskGraphError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_configs_rejected() {
    let cases = [
        "[engine]\nmax_steps = 0\n",
        "[executors.shell]\nargs = [\"-c\"]\n",
        "[engine]\ndefault_task_type = \"ghost\"\n",
        "[engine\n",
    ];
    for content in cases {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(content.as_bytes()).expect("write toml");
        assert!(
            matches!(EngineConfig::load(tmp.path()), Err(TaskGraphError::Config(_))),
            "accepted: {}",
            content
        );
    }
}
