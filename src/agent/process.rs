//! Agent invoker backed by an external command.
//!
//! The command is run as `<program> [args..] <capability>` with the JSON
//! payload on stdin. Stdout is the agent's output; a non-zero exit turns
//! stderr into the error message.

use super::{AgentInvoker, AgentOutput, AgentPayload, Capability};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Runs one process per invocation.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessInvoker {
    /// Invoke `program` for every capability.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Parse a command line such as `"python agent.py --fast"`.
    ///
    /// Splits on whitespace; quoting is not interpreted.
    #[must_use]
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }

    /// Arguments placed before the capability name.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Run the command from `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The program being run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, capability: Capability, payload: &AgentPayload) -> Result<String> {
        let input = serde_json::to_vec(payload).context("Failed to encode payload")?;

        debug!(
            program = %self.program,
            capability = %capability,
            bytes = input.len(),
            "Spawning agent process"
        );

        let mut command = AsyncCommand::new(&self.program);
        command
            .args(&self.args)
            .arg(capability.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .context("Failed to write payload")?;
            stdin.flush().await.context("Failed to flush stdin")?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to read agent output")?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )
        }
    }
}

#[async_trait]
impl AgentInvoker for ProcessInvoker {
    async fn invoke(&self, capability: Capability, payload: AgentPayload) -> AgentOutput {
        self.run(capability, &payload).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_line() {
        let invoker = ProcessInvoker::from_command_line("python agent.py --fast").unwrap();
        assert_eq!(invoker.program(), "python");
        assert_eq!(invoker.args, vec!["agent.py", "--fast"]);
        assert!(ProcessInvoker::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let invoker = ProcessInvoker::new("ryg-definitely-not-a-real-program");
        let output = invoker.invoke(Capability::Coder, AgentPayload::new()).await;
        assert!(output
            .error_message()
            .unwrap()
            .contains("Failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_output() {
        let invoker = ProcessInvoker::new("sh").with_args(["-c", "cat >/dev/null; echo \"$0 ok\""]);
        let output = invoker
            .invoke(Capability::Executor, AgentPayload::new())
            .await;
        assert_eq!(output.text().map(str::trim), Some("executor ok"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_payload_on_stdin() {
        let invoker = ProcessInvoker::new("sh").with_args(["-c", "cat"]);
        let mut payload = AgentPayload::new();
        payload.insert("feature_id".into(), serde_json::json!("f1"));
        let output = invoker.invoke(Capability::TestWriter, payload).await;
        let echoed: serde_json::Value = serde_json::from_str(output.text().unwrap()).unwrap();
        assert_eq!(echoed["feature_id"], "f1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_uses_stderr() {
        let invoker =
            ProcessInvoker::new("sh").with_args(["-c", "cat >/dev/null; echo boom >&2; exit 3"]);
        let output = invoker.invoke(Capability::Coder, AgentPayload::new()).await;
        let message = output.error_message().unwrap();
        assert!(message.contains("code 3"));
        assert!(message.contains("boom"));
    }
}
