//! Passive timing and outcome aggregation.
//!
//! A [`MetricsCollector`] holds at most one active [`Session`], which owns
//! per-feature [`FeatureMetrics`], which own one [`PhaseMetrics`] per phase.
//! Nothing here influences control flow: recording against a feature or
//! session that was never started is a no-op returning `None`.

use crate::phase::TddPhase;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Pass/fail counts from one executor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
}

impl TestMetrics {
    /// Counts with `total = passed + failed`.
    #[must_use]
    pub fn new(passed: u32, failed: u32) -> Self {
        Self {
            passed,
            failed,
            total: passed.saturating_add(failed),
        }
    }
}

/// Outcome of one phase of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub phase: TddPhase,
    pub duration_seconds: f64,
    pub attempts: u32,
    pub success: bool,
    pub agent_invocations: u32,
    pub test_metrics: TestMetrics,
    pub recorded_at: DateTime<Utc>,
}

impl PhaseMetrics {
    pub fn new(phase: TddPhase, duration_seconds: f64, attempts: u32, success: bool) -> Self {
        Self {
            phase,
            duration_seconds,
            attempts,
            success,
            agent_invocations: 0,
            test_metrics: TestMetrics::default(),
            recorded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_agent_invocations(mut self, invocations: u32) -> Self {
        self.agent_invocations = invocations;
        self
    }

    #[must_use]
    pub fn with_test_metrics(mut self, test_metrics: TestMetrics) -> Self {
        self.test_metrics = test_metrics;
        self
    }
}

/// Metrics for one feature within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMetrics {
    pub feature_id: String,
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set by `complete_feature`.
    pub success: Option<bool>,
    /// Sum of phase durations, set by `complete_feature`.
    pub total_duration_seconds: f64,
    pub phases: BTreeMap<TddPhase, PhaseMetrics>,
}

impl FeatureMetrics {
    fn new(feature_id: &str, description: &str) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            description: description.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            success: None,
            total_duration_seconds: 0.0,
            phases: BTreeMap::new(),
        }
    }

    /// Whether `complete_feature` has been called.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Attempts summed over recorded phases.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.phases.values().map(|p| p.attempts).sum()
    }

    /// Agent invocations summed over recorded phases.
    #[must_use]
    pub fn total_invocations(&self) -> u32 {
        self.phases.values().map(|p| p.agent_invocations).sum()
    }
}

/// Aggregate statistics for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub total_features: usize,
    pub completed_features: usize,
    pub successful_features: usize,
    /// Successful over completed features (0.0-1.0).
    pub success_rate: f64,
    pub total_attempts: u32,
    pub total_invocations: u32,
    /// Sum of feature durations.
    pub total_duration_seconds: f64,
    /// Wall-clock session length, once the session is completed.
    pub wall_clock_seconds: Option<f64>,
}

/// Top-level metrics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Features in registration order.
    pub features: Vec<FeatureMetrics>,
}

impl Session {
    /// Look up a feature by id.
    #[must_use]
    pub fn feature(&self, feature_id: &str) -> Option<&FeatureMetrics> {
        self.features.iter().find(|f| f.feature_id == feature_id)
    }

    /// Compute aggregate statistics.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let completed: Vec<_> = self.features.iter().filter(|f| f.is_complete()).collect();
        let successful = completed
            .iter()
            .filter(|f| f.success == Some(true))
            .count();
        let success_rate = if completed.is_empty() {
            0.0
        } else {
            successful as f64 / completed.len() as f64
        };

        SessionSummary {
            session_id: self.session_id.clone(),
            total_features: self.features.len(),
            completed_features: completed.len(),
            successful_features: successful,
            success_rate,
            total_attempts: self.features.iter().map(|f| f.total_attempts()).sum(),
            total_invocations: self.features.iter().map(|f| f.total_invocations()).sum(),
            total_duration_seconds: self.features.iter().map(|f| f.total_duration_seconds).sum(),
            wall_clock_seconds: self
                .completed_at
                .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0),
        }
    }

    /// Serialize the session as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug)]
struct ActiveSession {
    session_id: String,
    started_at: DateTime<Utc>,
    features: DashMap<String, FeatureMetrics>,
}

impl ActiveSession {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            started_at: Utc::now(),
            features: DashMap::new(),
        }
    }

    fn snapshot(&self, completed_at: Option<DateTime<Utc>>) -> Session {
        let mut features: Vec<_> = self.features.iter().map(|f| f.value().clone()).collect();
        features.sort_by_key(|f| f.started_at);
        Session {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            completed_at,
            features,
        }
    }
}

/// Collects session, feature, and phase metrics.
///
/// Safe to share between concurrently running features; each feature's
/// record is locked independently.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    active: RwLock<Option<Arc<ActiveSession>>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Option<Arc<ActiveSession>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Begin a new session. An already active session is discarded.
    pub fn start_session(&self, session_id: &str) -> Session {
        let session = Arc::new(ActiveSession::new(session_id));
        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&session));

        if let Some(previous) = previous {
            warn!(
                previous = %previous.session_id,
                session = %session_id,
                "Metrics session replaced while still active"
            );
        }
        debug!(session = %session_id, "Metrics session started");
        session.snapshot(None)
    }

    /// Snapshot of the active session.
    #[must_use]
    pub fn active_session(&self) -> Option<Session> {
        self.current().map(|s| s.snapshot(None))
    }

    /// Whether a session is active.
    #[must_use]
    pub fn has_active_session(&self) -> bool {
        self.current().is_some()
    }

    /// Register a feature under the active session.
    pub fn start_feature(&self, feature_id: &str, description: &str) -> Option<FeatureMetrics> {
        let session = self.current()?;
        let metrics = FeatureMetrics::new(feature_id, description);
        session
            .features
            .insert(feature_id.to_string(), metrics.clone());
        Some(metrics)
    }

    /// Store or overwrite the metrics for `metrics.phase` of a feature.
    pub fn record_phase_complete(
        &self,
        feature_id: &str,
        metrics: PhaseMetrics,
    ) -> Option<PhaseMetrics> {
        let session = self.current()?;
        let mut feature = session.features.get_mut(feature_id)?;
        feature.phases.insert(metrics.phase, metrics.clone());
        Some(metrics)
    }

    /// Close a feature record.
    pub fn complete_feature(&self, feature_id: &str, success: bool) -> Option<FeatureMetrics> {
        let session = self.current()?;
        let mut feature = session.features.get_mut(feature_id)?;
        feature.success = Some(success);
        feature.completed_at = Some(Utc::now());
        feature.total_duration_seconds = feature.phases.values().map(|p| p.duration_seconds).sum();
        let closed = feature.clone();
        Some(closed)
    }

    /// Finalize and detach the active session.
    pub fn complete_session(&self) -> Option<Session> {
        let session = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let finished = session.snapshot(Some(Utc::now()));
        debug!(
            session = %finished.session_id,
            features = finished.features.len(),
            "Metrics session completed"
        );
        Some(finished)
    }
}
