//! Phase state machine for TDD cycles.
//!
//! Every feature moves through the same states:
//!
//! ```text
//!   ┌─────┐ tests written   ┌────────┐ implementation ┌───────┐ tests pass ┌──────────┐
//!   │ RED │ ──& failing───> │ YELLOW │ ───written───> │ GREEN │ ─────────> │ COMPLETE │
//!   └─────┘                 └────────┘                └───────┘            └──────────┘
//!      │                        │                         │
//!      └────────────────────────┴─────────────────────────┴──────────────> FAILED
//! ```
//!
//! [`PhaseManager`] owns the active cycles and only evaluates transition
//! conditions. Retry limits live in [`crate::retry`].

use crate::error::{Result, RygError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A stage of the TDD cycle.
///
/// # Example
///
/// ```
/// use ryg::phase::TddPhase;
///
/// assert_eq!(TddPhase::Red.next(), Some(TddPhase::Yellow));
/// assert_eq!(TddPhase::Red.to_string(), "RED");
/// assert!(TddPhase::Failed.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TddPhase {
    /// Write tests that fail
    Red,
    /// Write the implementation
    Yellow,
    /// Verify the tests pass
    Green,
    /// Cycle finished successfully
    Complete,
    /// Cycle gave up
    Failed,
}

impl TddPhase {
    /// The phase reached by a successful transition, if any.
    #[must_use]
    pub fn next(&self) -> Option<TddPhase> {
        match self {
            Self::Red => Some(Self::Yellow),
            Self::Yellow => Some(Self::Green),
            Self::Green => Some(Self::Complete),
            Self::Complete | Self::Failed => None,
        }
    }

    /// Returns true for COMPLETE and FAILED.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Returns true for phases that produce artifacts (RED, YELLOW).
    #[must_use]
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Red | Self::Yellow)
    }

    /// Upper-case phase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "RED",
            Self::Yellow => "YELLOW",
            Self::Green => "GREEN",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TddPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stay in a phase, including every retry of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAttempt {
    pub phase: TddPhase,
    /// 1-based, incremented on each retry.
    pub attempt_number: u32,
    /// Errors from every failed attempt so far, oldest first.
    pub errors: Vec<String>,
    /// Advisory guidance for the next attempt.
    pub suggestion: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PhaseAttempt {
    /// First attempt at `phase`, starting now.
    pub fn new(phase: TddPhase) -> Self {
        Self {
            phase,
            attempt_number: 1,
            errors: Vec::new(),
            suggestion: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Wall time spent in this phase, up to now if it is still open.
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// State of one feature's run through the phase machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TddCycle {
    pub feature_id: String,
    pub current_phase: TddPhase,
    pub phase_history: Vec<PhaseAttempt>,
    /// Caller-supplied context captured at `start_cycle`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TddCycle {
    fn new(feature_id: &str, metadata: Map<String, Value>) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            current_phase: TddPhase::Red,
            phase_history: vec![PhaseAttempt::new(TddPhase::Red)],
            metadata,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// The attempt for the phase the cycle is in (or ended in).
    #[must_use]
    pub fn current_attempt(&self) -> Option<&PhaseAttempt> {
        self.phase_history.last()
    }

    /// Sum of attempt numbers across every phase entered.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.phase_history.iter().map(|a| a.attempt_number).sum()
    }

    /// Retries used so far (attempts beyond the first of each phase).
    #[must_use]
    pub fn total_retries(&self) -> u32 {
        self.phase_history
            .iter()
            .map(|a| a.attempt_number.saturating_sub(1))
            .sum()
    }

    /// Returns true once the cycle reached COMPLETE or FAILED.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.current_phase.is_terminal()
    }
}

/// Facts about the latest attempt, checked against the exit condition of the
/// current phase.
///
/// | from   | to       | requires                            |
/// |--------|----------|-------------------------------------|
/// | RED    | YELLOW   | `tests_written && tests_fail`       |
/// | YELLOW | GREEN    | `implementation_written`            |
/// | GREEN  | COMPLETE | `tests_pass`                        |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionContext {
    pub tests_written: bool,
    pub tests_fail: bool,
    pub implementation_written: bool,
    pub tests_pass: bool,
}

impl TransitionContext {
    /// Context for a RED attempt.
    #[must_use]
    pub fn red(tests_written: bool, tests_fail: bool) -> Self {
        Self {
            tests_written,
            tests_fail,
            ..Self::default()
        }
    }

    /// Context for a YELLOW attempt.
    #[must_use]
    pub fn yellow(implementation_written: bool) -> Self {
        Self {
            implementation_written,
            ..Self::default()
        }
    }

    /// Context for a GREEN attempt.
    #[must_use]
    pub fn green(tests_pass: bool) -> Self {
        Self {
            tests_pass,
            ..Self::default()
        }
    }

    /// Whether the exit condition of `phase` holds.
    #[must_use]
    pub fn satisfies(&self, phase: TddPhase) -> bool {
        match phase {
            TddPhase::Red => self.tests_written && self.tests_fail,
            TddPhase::Yellow => self.implementation_written,
            TddPhase::Green => self.tests_pass,
            TddPhase::Complete | TddPhase::Failed => false,
        }
    }
}

/// Result of [`PhaseManager::transition_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Phase after the call.
    pub phase: TddPhase,
    /// Whether the cycle moved forward.
    pub advanced: bool,
}

/// Owns the active TDD cycles, one per feature id.
///
/// All operations take `&self`; cycles for different features are stored in
/// separate shards so concurrent features do not contend.
///
/// # Example
///
/// ```
/// use ryg::phase::{PhaseManager, TddPhase, TransitionContext};
///
/// let manager = PhaseManager::new();
/// manager.start_cycle("f1", None);
///
/// let outcome = manager
///     .transition_phase("f1", &TransitionContext::red(true, true))
///     .unwrap();
/// assert!(outcome.advanced);
/// assert_eq!(outcome.phase, TddPhase::Yellow);
/// ```
#[derive(Debug, Default)]
pub struct PhaseManager {
    active: DashMap<String, TddCycle>,
}

impl PhaseManager {
    /// Create a manager with no active cycles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a cycle at RED, replacing any active cycle for the feature.
    pub fn start_cycle(
        &self,
        feature_id: &str,
        initial_context: Option<Map<String, Value>>,
    ) -> TddCycle {
        let cycle = TddCycle::new(feature_id, initial_context.unwrap_or_default());
        if self
            .active
            .insert(feature_id.to_string(), cycle.clone())
            .is_some()
        {
            debug!(feature = %feature_id, "Replaced active cycle");
        }
        debug!(feature = %feature_id, "Cycle started in RED");
        cycle
    }

    /// Advance the feature to the next phase if `context` satisfies the exit
    /// condition of its current phase.
    ///
    /// An unmet condition is not an error: the phase is returned unchanged
    /// with `advanced == false`.
    ///
    /// # Errors
    ///
    /// Returns [`RygError::NoActiveCycle`] if the feature has no active cycle.
    pub fn transition_phase(
        &self,
        feature_id: &str,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome> {
        let mut cycle = self
            .active
            .get_mut(feature_id)
            .ok_or_else(|| RygError::no_active_cycle(feature_id))?;

        let current = cycle.current_phase;
        let next = match current.next() {
            Some(next) if context.satisfies(current) => next,
            _ => {
                debug!(feature = %feature_id, phase = %current, "Transition condition not met");
                return Ok(TransitionOutcome {
                    phase: current,
                    advanced: false,
                });
            }
        };

        let now = Utc::now();
        if let Some(attempt) = cycle.phase_history.last_mut() {
            attempt.ended_at = Some(now);
        }
        cycle.current_phase = next;
        // COMPLETE is recorded by complete_cycle, not as a phase entry
        if !next.is_terminal() {
            cycle.phase_history.push(PhaseAttempt::new(next));
        }

        debug!(feature = %feature_id, from = %current, to = %next, "Phase transition");
        Ok(TransitionOutcome {
            phase: next,
            advanced: true,
        })
    }

    /// Record a failed attempt and stay in the current phase.
    ///
    /// Returns false if the feature has no active cycle or it already reached
    /// a terminal phase.
    pub fn retry_current_phase(
        &self,
        feature_id: &str,
        error: &str,
        suggestion: Option<String>,
    ) -> bool {
        let Some(mut cycle) = self.active.get_mut(feature_id) else {
            return false;
        };
        let phase = cycle.current_phase;
        if phase.is_terminal() {
            return false;
        }
        let Some(attempt) = cycle.phase_history.last_mut() else {
            return false;
        };

        attempt.attempt_number += 1;
        attempt.errors.push(error.to_string());
        attempt.suggestion = suggestion;

        debug!(
            feature = %feature_id,
            phase = %phase,
            attempt = attempt.attempt_number,
            "Retrying phase"
        );
        true
    }

    /// Append an error to the current attempt without starting a new one.
    ///
    /// Used for the failure that ends a cycle, so the history keeps it.
    pub fn record_failure(&self, feature_id: &str, error: &str) -> bool {
        let Some(mut cycle) = self.active.get_mut(feature_id) else {
            return false;
        };
        match cycle.phase_history.last_mut() {
            Some(attempt) => {
                attempt.errors.push(error.to_string());
                true
            }
            None => false,
        }
    }

    /// Finish the cycle as COMPLETE or FAILED and hand it back to the caller.
    ///
    /// Returns None if the feature has no active cycle.
    pub fn complete_cycle(&self, feature_id: &str, success: bool) -> Option<TddCycle> {
        let (_, mut cycle) = self.active.remove(feature_id)?;
        let now = Utc::now();

        cycle.current_phase = if success {
            TddPhase::Complete
        } else {
            TddPhase::Failed
        };
        if let Some(attempt) = cycle.phase_history.last_mut() {
            attempt.ended_at.get_or_insert(now);
        }
        cycle.completed_at = Some(now);

        debug!(feature = %feature_id, phase = %cycle.current_phase, "Cycle completed");
        Some(cycle)
    }

    /// Snapshot of the active cycle for a feature.
    #[must_use]
    pub fn get_cycle(&self, feature_id: &str) -> Option<TddCycle> {
        self.active.get(feature_id).map(|c| c.clone())
    }

    /// Current phase of an active feature.
    #[must_use]
    pub fn current_phase(&self, feature_id: &str) -> Option<TddPhase> {
        self.active.get(feature_id).map(|c| c.current_phase)
    }

    /// Returns true if the feature has an active cycle.
    #[must_use]
    pub fn is_active(&self, feature_id: &str) -> bool {
        self.active.contains_key(feature_id)
    }

    /// Number of active cycles.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
