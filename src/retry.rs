//! Bounded retries and stagnation detection.
//!
//! The [`RetryCoordinator`] decides whether a failed phase attempt gets
//! another try, and notices when a feature keeps failing the same way.
//!
//! # Architecture
//!
//! ```text
//! error + RetryContext ──record──> retry history (per feature)
//!                                        │
//!                         budget check ──┼── trailing identical-error streak
//!                                        ▼
//!                                  RetryDecision { should_retry, suggestions,
//!                                                  is_stagnant, backoff }
//! ```
//!
//! Stagnation is advisory. A stagnant feature is still retried while budget
//! remains; the decision carries a suggestion to change approach.

use crate::agent::Capability;
use crate::config::{OrchestratorConfig, DEFAULT_STAGNATION_THRESHOLD};
use crate::phase::TddPhase;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// Backoff
// ============================================================================

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Multiplier for exponential backoff.
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Exponential backoff delay before retrying after `attempt` failed.
///
/// The first retry waits `base_ms`, each following one doubles, capped at
/// [`MAX_BACKOFF_MS`]. A zero base disables backoff.
///
/// ```rust,ignore
/// assert_eq!(calculate_backoff(1, 500), Duration::from_millis(500));
/// assert_eq!(calculate_backoff(3, 500), Duration::from_millis(2000));
/// assert_eq!(calculate_backoff(4, 0), Duration::ZERO);
/// ```
#[must_use]
pub fn calculate_backoff(attempt: u32, base_ms: u64) -> Duration {
    if base_ms == 0 {
        return Duration::ZERO;
    }
    let exponent = attempt.saturating_sub(1);
    let multiplier = BACKOFF_MULTIPLIER.saturating_pow(exponent);
    let delay = base_ms.saturating_mul(multiplier);
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

// ============================================================================
// Error normalization
// ============================================================================

static VOLATILE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            "<timestamp>",
        ),
        (
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            "<uuid>",
        ),
        (r"0x[0-9a-fA-F]+", "<addr>"),
        (r"\b\d+(?:\.\d+)?\s*(?:ms|s|secs?|seconds)\b", "<duration>"),
        (r"\b\d{4,}\b", "<n>"),
        (r"\s+", " "),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Strip volatile substrings so that "the same" error compares equal.
///
/// Replaces timestamps, UUIDs, hex addresses, durations, and long numbers
/// with placeholders and collapses whitespace.
#[must_use]
pub fn normalize_error(error: &str) -> String {
    let mut normalized = error.to_string();
    for (re, replacement) in VOLATILE_PATTERNS.iter() {
        normalized = re.replace_all(&normalized, *replacement).into_owned();
    }
    normalized.trim().to_string()
}

// ============================================================================
// Failure classification
// ============================================================================

/// Why a phase attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The agent reported an error or panicked
    Invocation,
    /// The agent did not answer within the deadline
    Timeout,
    /// The agent answered but the phase exit condition was not met
    TransitionCondition,
    /// The reviewer did not approve
    ReviewRejected,
    /// Executor output carried no recognisable test summary
    ParseFailure,
}

impl FailureKind {
    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Invocation => "Agent invocation failed",
            Self::Timeout => "Agent invocation timed out",
            Self::TransitionCondition => "Phase exit condition not met",
            Self::ReviewRejected => "Review rejected",
            Self::ParseFailure => "Test output could not be parsed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// ============================================================================
// Policy, context, records, decisions
// ============================================================================

/// Retry limits and stagnation tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Per-phase attempt cap. Attempt `max_retries` is the last one.
    pub max_retries: u32,
    /// Identical consecutive errors that mark a feature stagnant.
    pub stagnation_threshold: u32,
    /// Compare errors after [`normalize_error`].
    pub normalize_errors: bool,
    /// Backoff base in milliseconds; zero disables backoff.
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            stagnation_threshold: DEFAULT_STAGNATION_THRESHOLD,
            normalize_errors: false,
            backoff_base_ms: 0,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    #[must_use]
    pub fn with_stagnation_threshold(mut self, threshold: u32) -> Self {
        self.stagnation_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_normalize_errors(mut self, normalize: bool) -> Self {
        self.normalize_errors = normalize;
        self
    }

    #[must_use]
    pub fn with_backoff_base_ms(mut self, base_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self
    }
}

impl From<&OrchestratorConfig> for RetryPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_retries: config.max_phase_retries,
            stagnation_threshold: config.stagnation_threshold,
            normalize_errors: config.normalize_errors,
            backoff_base_ms: config.retry_backoff_ms,
        }
    }
}

/// Extra information about a failure, used to tailor suggestions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryContext {
    pub kind: FailureKind,
    /// The capability whose call failed, if any.
    pub capability: Option<Capability>,
    /// Supporting detail such as reviewer feedback.
    pub detail: Option<String>,
    /// Only failures recorded at or after this instant count towards the
    /// stagnation streak. Usually the start of the current cycle.
    pub since: Option<DateTime<Utc>>,
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new(FailureKind::TransitionCondition)
    }
}

impl RetryContext {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            capability: None,
            detail: None,
            since: None,
        }
    }

    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Ignore failures recorded before `since` when measuring stagnation.
    #[must_use]
    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

/// One failed attempt as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub phase: TddPhase,
    pub attempt_number: u32,
    pub error: String,
    pub kind: FailureKind,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of [`RetryCoordinator::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// Guidance for the next attempt.
    pub suggestions: Option<String>,
    pub is_stagnant: bool,
    /// Length of the trailing run of identical errors in this phase.
    pub stagnation_streak: u32,
    /// Delay to wait before the next attempt.
    #[serde(with = "duration_ms")]
    pub backoff: Duration,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Per-feature retry bookkeeping.
///
/// History is keyed by feature id and guarded per key, so concurrent
/// features never contend on a shared lock. It is never pruned.
#[derive(Debug, Default)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    history: DashMap<String, Vec<RetryRecord>>,
}

impl RetryCoordinator {
    /// Create a coordinator with the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            history: DashMap::new(),
        }
    }

    /// Create a coordinator with only a per-phase cap.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self::new(RetryPolicy::default().with_max_retries(max_retries))
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Record a failed attempt and decide whether to try again.
    pub fn should_retry(
        &self,
        feature_id: &str,
        phase: TddPhase,
        attempt_number: u32,
        error: &str,
        context: &RetryContext,
    ) -> RetryDecision {
        let record = RetryRecord {
            phase,
            attempt_number,
            error: error.to_string(),
            kind: context.kind,
            timestamp: Utc::now(),
        };

        let streak = {
            let mut entry = self.history.entry(feature_id.to_string()).or_default();
            entry.push(record);
            self.trailing_streak(&entry, phase, context.since)
        };
        let is_stagnant = streak >= self.policy.stagnation_threshold.max(1);

        if attempt_number >= self.policy.max_retries {
            warn!(
                feature = %feature_id,
                phase = %phase,
                attempt = attempt_number,
                max = self.policy.max_retries,
                "Phase retry budget exhausted"
            );
            return RetryDecision {
                should_retry: false,
                suggestions: None,
                is_stagnant,
                stagnation_streak: streak,
                backoff: Duration::ZERO,
            };
        }

        let suggestions = if is_stagnant {
            warn!(
                feature = %feature_id,
                phase = %phase,
                streak,
                "Identical failure repeating"
            );
            stagnation_suggestion(phase, streak)
        } else {
            generic_suggestion(phase, context)
        };

        let backoff = calculate_backoff(attempt_number, self.policy.backoff_base_ms);
        debug!(
            feature = %feature_id,
            phase = %phase,
            attempt = attempt_number,
            kind = ?context.kind,
            backoff_ms = backoff.as_millis() as u64,
            "Retry allowed"
        );

        RetryDecision {
            should_retry: true,
            suggestions: Some(suggestions),
            is_stagnant,
            stagnation_streak: streak,
            backoff,
        }
    }

    fn comparable(&self, error: &str) -> String {
        if self.policy.normalize_errors {
            normalize_error(error)
        } else {
            error.to_string()
        }
    }

    fn trailing_streak(
        &self,
        records: &[RetryRecord],
        phase: TddPhase,
        since: Option<DateTime<Utc>>,
    ) -> u32 {
        let mut same_phase = records
            .iter()
            .rev()
            .take_while(|r| since.is_none_or(|start| r.timestamp >= start))
            .filter(|r| r.phase == phase);
        let Some(latest) = same_phase.next() else {
            return 0;
        };
        let key = self.comparable(&latest.error);
        1 + same_phase
            .take_while(|r| self.comparable(&r.error) == key)
            .count() as u32
    }

    /// Failed attempts recorded for a feature, oldest first.
    #[must_use]
    pub fn history_for(&self, feature_id: &str) -> Vec<RetryRecord> {
        self.history
            .get(feature_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Number of failures recorded for a feature.
    #[must_use]
    pub fn failure_count(&self, feature_id: &str) -> usize {
        self.history.get(feature_id).map_or(0, |records| records.len())
    }

    /// Number of failures recorded across all features.
    #[must_use]
    pub fn total_failures(&self) -> usize {
        self.history.iter().map(|entry| entry.value().len()).sum()
    }

    /// One-line summary of retry state.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} recorded failures across {} features",
            self.total_failures(),
            self.history.len()
        )
    }
}

fn stagnation_suggestion(phase: TddPhase, streak: u32) -> String {
    let subject = match phase {
        TddPhase::Red => "test",
        _ => "implementation",
    };
    format!(
        "Identical failure repeated {} times in {}; consider a structurally different {} strategy",
        streak, phase, subject
    )
}

fn generic_suggestion(phase: TddPhase, context: &RetryContext) -> String {
    let capability = context
        .capability
        .map_or_else(|| "agent".to_string(), |c| c.to_string());

    match context.kind {
        FailureKind::Timeout => format!(
            "The {} call timed out; produce a smaller, more focused result",
            capability
        ),
        FailureKind::Invocation => format!(
            "The {} call failed; retry with the same inputs and check its output format",
            capability
        ),
        FailureKind::ReviewRejected => match context.detail {
            Some(ref feedback) => format!("Address the reviewer feedback: {}", feedback),
            None => "Address the reviewer's concerns before resubmitting".to_string(),
        },
        FailureKind::ParseFailure => {
            "Report test results as '<N> passed, <M> failed' so they can be verified".to_string()
        }
        FailureKind::TransitionCondition => match phase {
            TddPhase::Red => "Ensure test syntax is valid and assertions target the described \
                              behavior; the tests must fail before the feature exists"
                .to_string(),
            TddPhase::Yellow => {
                "Write the minimal implementation that makes the tests pass".to_string()
            }
            TddPhase::Green => {
                "Fix the implementation so every test passes without changing the tests"
                    .to_string()
            }
            TddPhase::Complete | TddPhase::Failed => "Retry the phase".to_string(),
        },
    }
}
