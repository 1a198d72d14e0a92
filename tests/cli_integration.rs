//! Integration tests for the ryg CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get a Command for the ryg binary
fn ryg() -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("ryg"));
    cmd.env_remove("RYG_CONFIG")
        .env_remove("RYG_AGENT_CMD")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn write_config(temp: &TempDir, file_name: &str, content: &str) {
    let dir = temp.path().join(".ryg");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file_name), content).unwrap();
}

#[test]
fn test_help() {
    ryg()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Red-Yellow-Green TDD cycles"));
}

#[test]
fn test_version() {
    ryg()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_config_shows_defaults() {
    let temp = TempDir::new().unwrap();

    ryg()
        .arg("--project")
        .arg(temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_phase_retries = 3"))
        .stdout(predicate::str::contains("timeout_seconds = 300"));
}

#[test]
fn test_config_reads_project_file() {
    let temp = TempDir::new().unwrap();
    write_config(&temp, "config.toml", "max_phase_retries = 5\n");

    ryg()
        .arg("--project")
        .arg(temp.path())
        .args(["config", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"max_phase_retries\": 5"))
        .stdout(predicate::str::contains("\"max_total_retries\": 10"));
}

#[test]
fn test_config_warns_on_suspicious_values() {
    let temp = TempDir::new().unwrap();
    write_config(&temp, "config.toml", "max_phase_retries = 0\n");

    ryg()
        .arg("--project")
        .arg(temp.path())
        .arg("config")
        .assert()
        .success()
        .stderr(predicate::str::contains("Warning:"));
}

#[test]
fn test_invalid_config_exits_with_config_code() {
    let temp = TempDir::new().unwrap();
    write_config(&temp, "config.toml", "timeout_seconds = 0\n");

    ryg()
        .arg("--project")
        .arg(temp.path())
        .arg("config")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("timeout_seconds"));
}

#[test]
fn test_unsupported_config_format() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ryg.yaml");
    fs::write(&path, "max_phase_retries: 2\n").unwrap();

    ryg()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Unsupported"));
}

#[test]
fn test_run_requires_agent_command() {
    ryg()
        .args(["run", "adds two numbers"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--agent-cmd"));
}

#[cfg(unix)]
mod agent_process {
    use super::*;

    /// A shell agent whose tests pass once an implementation exists.
    const AGENT: &str = r#"#!/bin/sh
payload=$(cat)
case "$1" in
  test_writer) echo "def test_add(): assert add(2, 3) == 5" ;;
  coder) echo "def add(a, b): return a + b" ;;
  executor)
    case "$payload" in
      *'"code":""'*) echo "0 passed, 1 failed" ;;
      *) echo "1 passed, 0 failed" ;;
    esac ;;
  reviewer) echo "LGTM" ;;
esac
"#;

    /// A shell agent whose tests never pass.
    const STUCK_AGENT: &str = r#"#!/bin/sh
cat >/dev/null
case "$1" in
  executor) echo "0 passed, 1 failed" ;;
  *) echo "something" ;;
esac
"#;

    fn agent_cmd(temp: &TempDir, script: &str) -> String {
        let path = temp.path().join("agent.sh");
        fs::write(&path, script).unwrap();
        format!("sh {}", path.display())
    }

    #[test]
    fn test_run_completes_feature() {
        let temp = TempDir::new().unwrap();
        let cmd = agent_cmd(&temp, AGENT);

        ryg()
            .arg("--project")
            .arg(temp.path())
            .args(["run", "adds two numbers", "--id", "add", "--agent-cmd", &cmd])
            .assert()
            .success()
            .stdout(predicate::str::contains("add completed"));
    }

    #[test]
    fn test_run_with_review_prints_json() {
        let temp = TempDir::new().unwrap();
        let cmd = agent_cmd(&temp, AGENT);

        let output = ryg()
            .arg("--project")
            .arg(temp.path())
            .args(["run", "adds two numbers", "--require-review", "--json"])
            .env("RYG_AGENT_CMD", &cmd)
            .output()
            .unwrap();
        assert!(output.status.success());

        let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["cycles"][0]["current_phase"], "COMPLETE");
        assert!(result["feature_id"]
            .as_str()
            .unwrap()
            .starts_with("feature-"));
    }

    #[test]
    fn test_run_failure_exits_nonzero() {
        let temp = TempDir::new().unwrap();
        let cmd = agent_cmd(&temp, STUCK_AGENT);

        ryg()
            .arg("--project")
            .arg(temp.path())
            .args(["run", "never passes", "--max-phase-retries", "2"])
            .args(["--agent-cmd", &cmd])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("failed"))
            .stdout(predicate::str::contains("GREEN phase failed after 2 attempts"));
    }
}
