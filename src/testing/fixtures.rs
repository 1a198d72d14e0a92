//! Test fixtures for reproducible orchestrator runs.
//!
//! Provides temporary project directories with config files and canned
//! agent transcripts.

use super::ScriptedInvoker;
use crate::agent::{AgentOutput, Capability};
use crate::config::CONFIG_DIR;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test code returned by the scripted test writer.
pub const SAMPLE_TESTS: &str = "def test_add():\n    assert add(2, 3) == 5\n";

/// Implementation returned by the scripted coder.
pub const SAMPLE_CODE: &str = "def add(a, b):\n    return a + b\n";

/// Executor summary for a run with `passed` passing and `failed` failing tests.
#[must_use]
pub fn test_summary(passed: u32, failed: u32) -> String {
    format!("{} passed, {} failed", passed, failed)
}

/// Invoker that walks one feature through RED, YELLOW and GREEN first time.
#[must_use]
pub fn happy_path_invoker() -> ScriptedInvoker {
    ScriptedInvoker::new()
        .with_default(Capability::TestWriter, SAMPLE_TESTS)
        .with_default(Capability::Coder, SAMPLE_CODE)
        .with_handler(Capability::Executor, |payload| {
            // No implementation yet means the tests fail
            let code = payload.get("code").and_then(|c| c.as_str()).unwrap_or("");
            if code.is_empty() {
                AgentOutput::output(test_summary(0, 1))
            } else {
                AgentOutput::output(test_summary(1, 0))
            }
        })
}

/// A temporary project directory.
///
/// Automatically cleans up when dropped.
pub struct ProjectFixture {
    temp_dir: TempDir,
}

impl ProjectFixture {
    /// Project with no configuration.
    ///
    /// # Panics
    ///
    /// Panics if temporary directory creation fails.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Project with `.ryg/<file_name>` containing `content`.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    #[must_use]
    pub fn with_config(file_name: &str, content: &str) -> Self {
        let fixture = Self::empty();
        let dir = fixture.config_dir();
        std::fs::create_dir_all(&dir).expect("Failed to create config dir");
        std::fs::write(dir.join(file_name), content).expect("Failed to write config");
        fixture
    }

    /// Project root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// `.ryg` directory inside the project.
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.path().join(CONFIG_DIR)
    }
}
