//! Configuration management for the orchestrator.
//!
//! [`OrchestratorConfig`] is loaded once, validated, and then shared
//! read-only between every feature the orchestrator drives.
//!
//! # Resolution order
//!
//! 1. `<project>/.ryg/config.toml`
//! 2. `<project>/.ryg/config.json`
//! 3. `<config dir>/ryg/config.toml` (e.g. `~/.config/ryg/config.toml`)
//! 4. Built-in defaults
//!
//! CLI flags are applied on top by the binary.

use crate::error::{Result, RygError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding project-local configuration.
pub const CONFIG_DIR: &str = ".ryg";

/// Default per-phase attempt cap.
pub const DEFAULT_MAX_PHASE_RETRIES: u32 = 3;

/// Default per-feature retry cap across all phases.
pub const DEFAULT_MAX_TOTAL_RETRIES: u32 = 10;

/// Default per-invocation deadline.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Default number of identical consecutive errors treated as stagnation.
pub const DEFAULT_STAGNATION_THRESHOLD: u32 = 3;

/// Orchestrator configuration.
///
/// # Example
///
/// ```
/// use ryg::config::OrchestratorConfig;
///
/// let config = OrchestratorConfig::default().with_max_phase_retries(5);
/// assert_eq!(config.max_phase_retries, 5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Attempts allowed per phase instance before RetryCoordinator vetoes.
    pub max_phase_retries: u32,
    /// Retries allowed per feature across all phases and cycles.
    pub max_total_retries: u32,
    /// Deadline for each individual agent invocation.
    pub timeout_seconds: u64,
    /// Invoke the reviewer after YELLOW and require approval to advance.
    pub require_review_approval: bool,
    /// Log every agent invocation at info level.
    pub verbose_output: bool,
    /// Identical consecutive errors that mark a phase as stagnant.
    pub stagnation_threshold: u32,
    /// Strip timestamps, ids and numbers from errors before comparing them.
    pub normalize_errors: bool,
    /// Base delay for exponential backoff between retries (0 disables).
    pub retry_backoff_ms: u64,
    /// Times a feature may restart from RED after a phase budget is exhausted.
    pub max_cycle_restarts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_phase_retries: DEFAULT_MAX_PHASE_RETRIES,
            max_total_retries: DEFAULT_MAX_TOTAL_RETRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            require_review_approval: false,
            verbose_output: false,
            stagnation_threshold: DEFAULT_STAGNATION_THRESHOLD,
            normalize_errors: false,
            retry_backoff_ms: 0,
            max_cycle_restarts: 0,
        }
    }
}

impl OrchestratorConfig {
    /// Set the per-phase attempt cap.
    #[must_use]
    pub fn with_max_phase_retries(mut self, max: u32) -> Self {
        self.max_phase_retries = max;
        self
    }

    /// Set the per-feature retry cap.
    #[must_use]
    pub fn with_max_total_retries(mut self, max: u32) -> Self {
        self.max_total_retries = max;
        self
    }

    /// Set the per-invocation deadline.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Require reviewer approval after YELLOW.
    #[must_use]
    pub fn with_review_approval(mut self, required: bool) -> Self {
        self.require_review_approval = required;
        self
    }

    /// Enable verbose invocation logging.
    #[must_use]
    pub fn with_verbose_output(mut self, verbose: bool) -> Self {
        self.verbose_output = verbose;
        self
    }

    /// Set the stagnation threshold.
    #[must_use]
    pub fn with_stagnation_threshold(mut self, threshold: u32) -> Self {
        self.stagnation_threshold = threshold;
        self
    }

    /// Enable error normalization for stagnation comparison.
    #[must_use]
    pub fn with_normalized_errors(mut self, normalize: bool) -> Self {
        self.normalize_errors = normalize;
        self
    }

    /// Set the retry backoff base in milliseconds.
    #[must_use]
    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Allow the cycle to restart from RED this many times.
    #[must_use]
    pub fn with_max_cycle_restarts(mut self, restarts: u32) -> Self {
        self.max_cycle_restarts = restarts;
        self
    }

    /// Load configuration from a `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, has an unknown extension,
    /// or fails to parse.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RygError::config_with_path(format!("cannot read config: {}", e), path.to_path_buf())
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(RygError::UnsupportedConfigFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        debug!(path = %path.display(), "Loaded orchestrator config");
        Ok(config)
    }

    /// Find and load the first configuration file for a project.
    ///
    /// Falls back to defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a discovered file fails to parse.
    pub fn discover(project_dir: &Path) -> Result<Self> {
        for candidate in Self::candidate_paths(project_dir) {
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Config file locations in resolution order.
    #[must_use]
    pub fn candidate_paths(project_dir: &Path) -> Vec<PathBuf> {
        let mut paths = vec![
            project_dir.join(CONFIG_DIR).join("config.toml"),
            project_dir.join(CONFIG_DIR).join("config.json"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("ryg").join("config.toml"));
        }
        paths
    }

    /// Check every field and collect problems.
    #[must_use]
    pub fn report(&self) -> ValidationReport {
        let mut report = ValidationReport::new();

        if self.timeout_seconds == 0 {
            report
                .errors
                .push("timeout_seconds: must be greater than zero".to_string());
        }
        if self.stagnation_threshold == 0 {
            report
                .errors
                .push("stagnation_threshold: must be at least 1".to_string());
        }
        if self.max_phase_retries == 0 {
            report
                .warnings
                .push("max_phase_retries is 0: failed phases are never retried".to_string());
        }
        if self.max_total_retries + 1 < self.max_phase_retries {
            report.warnings.push(format!(
                "max_total_retries ({}) is reached before max_phase_retries ({})",
                self.max_total_retries, self.max_phase_retries
            ));
        }

        report
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RygError::InvalidConfig`] for the first invalid field.
    pub fn validate(&self) -> Result<()> {
        match self.report().errors.into_iter().next() {
            None => Ok(()),
            Some(problem) => {
                let (field, reason) = problem
                    .split_once(": ")
                    .unwrap_or(("config", problem.as_str()));
                Err(RygError::invalid_config(field, reason))
            }
        }
    }
}

/// Result of configuration validation.
///
/// Warnings do not make a configuration invalid.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Problems that prevent the configuration from being used.
    pub errors: Vec<String>,
    /// Suspicious but usable settings.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Create an empty (valid) report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if there are no errors.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// One-line human readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_valid() {
            if self.warnings.is_empty() {
                "Configuration is valid.".to_string()
            } else {
                format!(
                    "Configuration is valid with {} warning(s).",
                    self.warnings.len()
                )
            }
        } else {
            format!(
                "Configuration is invalid with {} error(s).",
                self.errors.len()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_phase_retries, 3);
        assert_eq!(config.max_total_retries, 10);
        assert_eq!(config.timeout_seconds, 300);
        assert!(!config.require_review_approval);
        assert!(!config.normalize_errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = OrchestratorConfig::default()
            .with_max_phase_retries(2)
            .with_max_total_retries(4)
            .with_timeout_seconds(10)
            .with_review_approval(true)
            .with_verbose_output(true)
            .with_stagnation_threshold(5)
            .with_normalized_errors(true)
            .with_retry_backoff_ms(100)
            .with_max_cycle_restarts(1);

        assert_eq!(config.max_phase_retries, 2);
        assert_eq!(config.max_total_retries, 4);
        assert_eq!(config.timeout_seconds, 10);
        assert!(config.require_review_approval);
        assert!(config.verbose_output);
        assert_eq!(config.stagnation_threshold, 5);
        assert!(config.normalize_errors);
        assert_eq!(config.retry_backoff_ms, 100);
        assert_eq!(config.max_cycle_restarts, 1);
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let config = OrchestratorConfig::default().with_timeout_seconds(0);
        match config.validate() {
            Err(RygError::InvalidConfig { field, .. }) => assert_eq!(field, "timeout_seconds"),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_stagnation_threshold_is_invalid() {
        let config = OrchestratorConfig::default().with_stagnation_threshold(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_report_warnings_do_not_invalidate() {
        let config = OrchestratorConfig::default()
            .with_max_phase_retries(0)
            .with_max_total_retries(0);
        let report = config.report();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.summary().contains("1 warning"));
    }

    #[test]
    fn test_report_warns_when_total_budget_is_smaller() {
        let config = OrchestratorConfig::default()
            .with_max_phase_retries(8)
            .with_max_total_retries(2);
        let report = config.report();
        assert!(report.warnings.iter().any(|w| w.contains("max_total_retries")));
    }

    #[test]
    fn test_load_toml_with_partial_fields() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "max_phase_retries = 7\nrequire_review_approval = true\n").unwrap();

        let config = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(config.max_phase_retries, 7);
        assert!(config.require_review_approval);
        assert_eq!(config.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
    }

    #[test]
    fn test_load_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"max_total_retries": 3, "timeout_seconds": 15}"#).unwrap();

        let config = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(config.max_total_retries, 3);
        assert_eq!(config.timeout_seconds, 15);
    }

    #[test]
    fn test_load_unknown_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "max_phase_retries: 1").unwrap();

        assert!(matches!(
            OrchestratorConfig::load(&path),
            Err(RygError::UnsupportedConfigFormat { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = OrchestratorConfig::load(&temp.path().join("nope.toml"));
        assert!(matches!(result, Err(RygError::Config { path: Some(_), .. })));
    }

    #[test]
    fn test_discover_prefers_project_toml() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.toml"), "max_phase_retries = 9").unwrap();
        std::fs::write(dir.join("config.json"), r#"{"max_phase_retries": 1}"#).unwrap();

        let config = OrchestratorConfig::discover(temp.path()).unwrap();
        assert_eq!(config.max_phase_retries, 9);
    }

    #[test]
    fn test_candidate_paths_start_with_project() {
        let paths = OrchestratorConfig::candidate_paths(Path::new("/work"));
        assert_eq!(paths[0], Path::new("/work/.ryg/config.toml"));
        assert_eq!(paths[1], Path::new("/work/.ryg/config.json"));
    }

    #[test]
    fn test_serialization_roundtrip_keeps_fields() {
        let config = OrchestratorConfig::default().with_max_cycle_restarts(2);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"max_cycle_restarts\":2"));
        let restored: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
