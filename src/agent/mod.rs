//! Agent invocation layer.
//!
//! The orchestrator never talks to concrete agents. It hands an
//! [`AgentContext`] to the [`AgentCoordinator`], which turns it into a
//! capability-specific JSON payload and calls the injected [`AgentInvoker`].
//!
//! # Architecture
//!
//! ```text
//! AgentContext ──build_payload──> AgentPayload ──AgentInvoker::invoke──> AgentOutput
//!                                                      │
//!                                          timeout / panic capture
//!                                                      │
//!                                                      ▼
//!                                          AgentInvocationRecord (history)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ryg::agent::{AgentCoordinator, AgentContext, AgentOutput, Capability};
//!
//! let coordinator = AgentCoordinator::from_fn(|capability, _payload| async move {
//!     match capability {
//!         Capability::Executor => AgentOutput::output("1 passed, 0 failed"),
//!         _ => AgentOutput::output("def test_x(): pass"),
//!     }
//! });
//!
//! let context = AgentContext::new("f1", "adds numbers", TddPhase::Red);
//! let record = coordinator.invoke_agent(Capability::TestWriter, &context).await;
//! assert!(record.is_success());
//! ```

pub mod process;

pub use process::ProcessInvoker;

use crate::phase::TddPhase;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// JSON object handed to an agent.
pub type AgentPayload = Map<String, Value>;

/// Execution type sent to the executor for test runs.
pub const TEST_EXECUTION: &str = "test_execution";

// ============================================================================
// Capabilities and outputs
// ============================================================================

/// A named external capability the orchestrator can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Generates test code from a feature description
    TestWriter,
    /// Generates an implementation that satisfies tests
    Coder,
    /// Runs code and tests, reports a pass/fail summary
    Executor,
    /// Reviews code and tests
    Reviewer,
}

impl Capability {
    /// Wire name of the capability.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestWriter => "test_writer",
            Self::Coder => "coder",
            Self::Executor => "executor",
            Self::Reviewer => "reviewer",
        }
    }

    /// All capabilities.
    #[must_use]
    pub fn all() -> [Capability; 4] {
        [Self::TestWriter, Self::Coder, Self::Executor, Self::Reviewer]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown capability: {}", s))
    }
}

/// What an agent returned: free-form text, or an error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutput {
    Output(String),
    Error(String),
}

impl AgentOutput {
    /// Successful output.
    pub fn output(text: impl Into<String>) -> Self {
        Self::Output(text.into())
    }

    /// Failed invocation.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Returns true for [`AgentOutput::Output`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Output(_))
    }

    /// Output text, if successful.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Output(text) => Some(text),
            Self::Error(_) => None,
        }
    }

    /// Error message, if failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Output(_) => None,
            Self::Error(message) => Some(message),
        }
    }
}

impl From<anyhow::Result<String>> for AgentOutput {
    fn from(result: anyhow::Result<String>) -> Self {
        match result {
            Ok(text) => Self::Output(text),
            Err(e) => Self::Error(format!("{:#}", e)),
        }
    }
}

// ============================================================================
// Invoker seam
// ============================================================================

/// The boundary to external agents.
///
/// Implementations wrap LLM calls, sandboxed runners, or test doubles. They
/// report failure through [`AgentOutput::Error`]; panics are caught by the
/// coordinator.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Invoke `capability` with `payload`.
    async fn invoke(&self, capability: Capability, payload: AgentPayload) -> AgentOutput;
}

/// Adapts an async closure into an [`AgentInvoker`].
pub struct FnInvoker<F> {
    f: F,
}

impl<F> FnInvoker<F> {
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> std::fmt::Debug for FnInvoker<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInvoker").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> AgentInvoker for FnInvoker<F>
where
    F: Fn(Capability, AgentPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AgentOutput> + Send + 'static,
{
    async fn invoke(&self, capability: Capability, payload: AgentPayload) -> AgentOutput {
        (self.f)(capability, payload).await
    }
}

// ============================================================================
// Context
// ============================================================================

/// Summary of an earlier failed attempt at the same phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousAttempt {
    pub attempt_number: u32,
    pub error: String,
    /// Guidance produced after this attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Working data local to the current phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseContext {
    /// Test code produced in RED.
    pub tests: Option<String>,
    /// Implementation produced in YELLOW (or a GREEN fix).
    pub implementation: Option<String>,
    /// Raw output of the last executor run.
    pub execution_output: Option<String>,
    /// Feedback from the reviewer.
    pub review_feedback: Option<String>,
    /// Additional keys forwarded verbatim to agents.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Data shared across the whole feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalContext {
    pub test_criteria: Vec<String>,
    pub require_review_approval: bool,
    pub verbose_output: bool,
    /// Additional keys forwarded verbatim to agents.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Everything an agent needs to know about the attempt it is part of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub phase: TddPhase,
    pub feature_id: String,
    pub feature_description: String,
    pub attempt_number: u32,
    pub previous_attempts: Vec<PreviousAttempt>,
    pub phase_context: PhaseContext,
    pub global_context: GlobalContext,
}

impl AgentContext {
    /// Context for the first attempt at `phase`.
    pub fn new(
        feature_id: impl Into<String>,
        feature_description: impl Into<String>,
        phase: TddPhase,
    ) -> Self {
        Self {
            phase,
            feature_id: feature_id.into(),
            feature_description: feature_description.into(),
            attempt_number: 1,
            previous_attempts: Vec::new(),
            phase_context: PhaseContext::default(),
            global_context: GlobalContext::default(),
        }
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt_number: u32) -> Self {
        self.attempt_number = attempt_number;
        self
    }

    #[must_use]
    pub fn with_previous_attempts(mut self, attempts: Vec<PreviousAttempt>) -> Self {
        self.previous_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_phase_context(mut self, phase_context: PhaseContext) -> Self {
        self.phase_context = phase_context;
        self
    }

    #[must_use]
    pub fn with_global_context(mut self, global_context: GlobalContext) -> Self {
        self.global_context = global_context;
        self
    }

    /// Error messages of earlier attempts, oldest first.
    #[must_use]
    pub fn previous_errors(&self) -> Vec<String> {
        self.previous_attempts
            .iter()
            .map(|a| a.error.clone())
            .collect()
    }

    /// Most recent retry guidance, if any.
    #[must_use]
    pub fn latest_suggestion(&self) -> Option<&str> {
        self.previous_attempts
            .iter()
            .rev()
            .find_map(|a| a.suggestion.as_deref())
    }
}

// ============================================================================
// Invocation records
// ============================================================================

/// Audit entry for one agent call. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInvocationRecord {
    pub id: Uuid,
    pub capability: Capability,
    pub feature_id: String,
    pub phase: TddPhase,
    pub attempt_number: u32,
    /// Payload exactly as sent to the invoker.
    pub payload: AgentPayload,
    pub outcome: AgentOutput,
    /// True when the call was abandoned at the deadline.
    pub timed_out: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AgentInvocationRecord {
    /// Returns true if the agent produced output.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Output text, if successful.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.outcome.text()
    }

    /// Error message, if failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.outcome.error_message()
    }

    /// Call duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Builds agent payloads, performs calls, and keeps the invocation history.
///
/// Invocation failures, timeouts, and panics inside the invoker are captured
/// in the returned record; `invoke_agent` itself cannot fail.
pub struct AgentCoordinator {
    invoker: Arc<dyn AgentInvoker>,
    timeout: Option<Duration>,
    verbose: bool,
    history: DashMap<String, Vec<AgentInvocationRecord>>,
}

impl std::fmt::Debug for AgentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCoordinator")
            .field("timeout", &self.timeout)
            .field("verbose", &self.verbose)
            .field("features", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl AgentCoordinator {
    /// Create a coordinator around an invoker, with no deadline.
    #[must_use]
    pub fn new(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self {
            invoker,
            timeout: None,
            verbose: false,
            history: DashMap::new(),
        }
    }

    /// Create a coordinator from an async closure.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Capability, AgentPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentOutput> + Send + 'static,
    {
        Self::new(Arc::new(FnInvoker::new(f)))
    }

    /// Bound every invocation by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Log invocations at info level instead of debug.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Invoke `capability` for the attempt described by `context`.
    pub async fn invoke_agent(
        &self,
        capability: Capability,
        context: &AgentContext,
    ) -> AgentInvocationRecord {
        let payload = Self::build_payload(capability, context);
        let timestamp = Utc::now();
        let started = Instant::now();

        if self.verbose {
            info!(
                feature = %context.feature_id,
                capability = %capability,
                phase = %context.phase,
                attempt = context.attempt_number,
                "Invoking agent"
            );
        } else {
            debug!(
                feature = %context.feature_id,
                capability = %capability,
                phase = %context.phase,
                attempt = context.attempt_number,
                "Invoking agent"
            );
        }

        let call =
            AssertUnwindSafe(self.invoker.invoke(capability, payload.clone())).catch_unwind();
        let (outcome, timed_out) = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => (settle(result), false),
                Err(_) => {
                    warn!(
                        feature = %context.feature_id,
                        capability = %capability,
                        seconds = limit.as_secs(),
                        "Agent invocation timed out"
                    );
                    (
                        AgentOutput::error(format!(
                            "{} timed out after {}s",
                            capability,
                            limit.as_secs()
                        )),
                        true,
                    )
                }
            },
            None => (settle(call.await), false),
        };

        let record = AgentInvocationRecord {
            id: Uuid::new_v4(),
            capability,
            feature_id: context.feature_id.clone(),
            phase: context.phase,
            attempt_number: context.attempt_number,
            payload,
            outcome,
            timed_out,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp,
        };

        if let Some(error) = record.error() {
            debug!(capability = %capability, error = %error, "Agent invocation failed");
        }

        self.history
            .entry(context.feature_id.clone())
            .or_default()
            .push(record.clone());

        record
    }

    /// Build the payload for `capability`.
    #[must_use]
    pub fn build_payload(capability: Capability, context: &AgentContext) -> AgentPayload {
        let mut payload = match capability {
            Capability::TestWriter => Self::build_test_writer_context(context),
            Capability::Coder => Self::build_coder_context(context),
            Capability::Executor => Self::build_executor_context(context),
            Capability::Reviewer => Self::build_reviewer_context(context),
        };

        payload.insert("feature_id".into(), json!(context.feature_id));
        payload.insert("attempt_number".into(), json!(context.attempt_number));
        if let Some(suggestion) = context.latest_suggestion() {
            payload.insert("suggestions".into(), json!(suggestion));
        }

        // Extras never shadow the keys built above
        for (key, value) in context
            .global_context
            .extra
            .iter()
            .chain(context.phase_context.extra.iter())
        {
            payload.entry(key.clone()).or_insert_with(|| value.clone());
        }

        payload
    }

    fn build_test_writer_context(context: &AgentContext) -> AgentPayload {
        let mut payload = Map::new();
        payload.insert(
            "feature_description".into(),
            json!(context.feature_description),
        );
        payload.insert(
            "test_criteria".into(),
            json!(context.global_context.test_criteria),
        );
        payload.insert("previous_errors".into(), json!(context.previous_errors()));
        payload
    }

    fn build_coder_context(context: &AgentContext) -> AgentPayload {
        let phase_context = &context.phase_context;
        let mut payload = Map::new();
        payload.insert(
            "feature_description".into(),
            json!(context.feature_description),
        );
        payload.insert(
            "tests_to_pass".into(),
            json!(phase_context.tests.clone().unwrap_or_default()),
        );
        payload.insert("implementation_phase".into(), json!(context.phase.as_str()));
        payload.insert("previous_errors".into(), json!(context.previous_errors()));
        if let Some(ref code) = phase_context.implementation {
            payload.insert("current_implementation".into(), json!(code));
        }
        if let Some(ref output) = phase_context.execution_output {
            payload.insert("execution_output".into(), json!(output));
        }
        if let Some(ref feedback) = phase_context.review_feedback {
            payload.insert("review_feedback".into(), json!(feedback));
        }
        payload
    }

    fn build_executor_context(context: &AgentContext) -> AgentPayload {
        let phase_context = &context.phase_context;
        let mut payload = Map::new();
        payload.insert("execution_type".into(), json!(TEST_EXECUTION));
        payload.insert("phase".into(), json!(context.phase.as_str()));
        payload.insert(
            "tests".into(),
            json!(phase_context.tests.clone().unwrap_or_default()),
        );
        payload.insert(
            "code".into(),
            json!(phase_context.implementation.clone().unwrap_or_default()),
        );
        payload
    }

    fn build_reviewer_context(context: &AgentContext) -> AgentPayload {
        let phase_context = &context.phase_context;
        let mut payload = Map::new();
        payload.insert(
            "feature_description".into(),
            json!(context.feature_description),
        );
        payload.insert(
            "tests".into(),
            json!(phase_context.tests.clone().unwrap_or_default()),
        );
        payload.insert(
            "code".into(),
            json!(phase_context.implementation.clone().unwrap_or_default()),
        );
        payload
    }

    /// Records for one feature, in call order.
    #[must_use]
    pub fn history_for(&self, feature_id: &str) -> Vec<AgentInvocationRecord> {
        self.history
            .get(feature_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Every record across all features, ordered by start time.
    #[must_use]
    pub fn invocation_history(&self) -> Vec<AgentInvocationRecord> {
        let mut all: Vec<_> = self
            .history
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|r| r.timestamp);
        all
    }

    /// Total number of invocations.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.history.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of failed invocations.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.history
            .iter()
            .map(|entry| entry.value().iter().filter(|r| !r.is_success()).count())
            .sum()
    }
}

fn settle(result: std::thread::Result<AgentOutput>) -> AgentOutput {
    match result {
        Ok(output) => output,
        Err(panic) => AgentOutput::error(format!("agent panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn context(phase: TddPhase) -> AgentContext {
        AgentContext::new("f1", "adds two numbers", phase)
    }

    fn echo_coordinator() -> AgentCoordinator {
        AgentCoordinator::from_fn(|capability, _payload| async move {
            AgentOutput::output(format!("{} done", capability))
        })
    }

    #[test]
    fn test_capability_names() {
        assert_eq!(Capability::TestWriter.as_str(), "test_writer");
        assert_eq!(Capability::Coder.to_string(), "coder");
        assert_eq!("executor".parse::<Capability>(), Ok(Capability::Executor));
        assert!("planner".parse::<Capability>().is_err());
        assert_eq!(
            serde_json::to_string(&Capability::Reviewer).unwrap(),
            "\"reviewer\""
        );
    }

    #[test]
    fn test_agent_output_accessors() {
        let ok = AgentOutput::output("tests");
        assert!(ok.is_success());
        assert_eq!(ok.text(), Some("tests"));
        assert_eq!(ok.error_message(), None);

        let err = AgentOutput::error("boom");
        assert!(!err.is_success());
        assert_eq!(err.error_message(), Some("boom"));
    }

    #[test]
    fn test_agent_output_from_anyhow() {
        let output: AgentOutput = Err::<String, _>(anyhow::anyhow!("exit 1")).into();
        assert_eq!(output, AgentOutput::error("exit 1"));
        let output: AgentOutput = Ok::<_, anyhow::Error>("hi".to_string()).into();
        assert_eq!(output, AgentOutput::output("hi"));
    }

    #[test]
    fn test_test_writer_payload() {
        let ctx = context(TddPhase::Red)
            .with_global_context(GlobalContext {
                test_criteria: vec!["handles negatives".into()],
                ..GlobalContext::default()
            })
            .with_previous_attempts(vec![PreviousAttempt {
                attempt_number: 1,
                error: "syntax error".into(),
                suggestion: Some("check syntax".into()),
            }])
            .with_attempt(2);

        let payload = AgentCoordinator::build_payload(Capability::TestWriter, &ctx);
        assert_eq!(payload["feature_description"], "adds two numbers");
        assert_eq!(payload["test_criteria"], json!(["handles negatives"]));
        assert_eq!(payload["previous_errors"], json!(["syntax error"]));
        assert_eq!(payload["suggestions"], "check syntax");
        assert_eq!(payload["attempt_number"], 2);
        assert_eq!(payload["feature_id"], "f1");
    }

    #[test]
    fn test_coder_payload() {
        let ctx = context(TddPhase::Yellow).with_phase_context(PhaseContext {
            tests: Some("def test_add(): ...".into()),
            ..PhaseContext::default()
        });

        let payload = AgentCoordinator::build_payload(Capability::Coder, &ctx);
        assert_eq!(payload["tests_to_pass"], "def test_add(): ...");
        assert_eq!(payload["implementation_phase"], "YELLOW");
        assert!(!payload.contains_key("current_implementation"));
        assert!(!payload.contains_key("suggestions"));
    }

    #[test]
    fn test_coder_payload_for_green_fix() {
        let ctx = context(TddPhase::Green).with_phase_context(PhaseContext {
            tests: Some("tests".into()),
            implementation: Some("code".into()),
            execution_output: Some("0 passed, 1 failed".into()),
            ..PhaseContext::default()
        });

        let payload = AgentCoordinator::build_payload(Capability::Coder, &ctx);
        assert_eq!(payload["implementation_phase"], "GREEN");
        assert_eq!(payload["current_implementation"], "code");
        assert_eq!(payload["execution_output"], "0 passed, 1 failed");
    }

    #[test]
    fn test_executor_payload() {
        let ctx = context(TddPhase::Red).with_phase_context(PhaseContext {
            tests: Some("tests".into()),
            ..PhaseContext::default()
        });

        let payload = AgentCoordinator::build_payload(Capability::Executor, &ctx);
        assert_eq!(payload["execution_type"], TEST_EXECUTION);
        assert_eq!(payload["phase"], "RED");
        assert_eq!(payload["tests"], "tests");
        assert_eq!(payload["code"], "");
    }

    #[test]
    fn test_reviewer_payload() {
        let ctx = context(TddPhase::Yellow).with_phase_context(PhaseContext {
            tests: Some("tests".into()),
            implementation: Some("code".into()),
            ..PhaseContext::default()
        });

        let payload = AgentCoordinator::build_payload(Capability::Reviewer, &ctx);
        assert_eq!(payload["feature_description"], "adds two numbers");
        assert_eq!(payload["code"], "code");
        assert_eq!(payload["tests"], "tests");
    }

    #[test]
    fn test_extras_do_not_shadow_built_keys() {
        let mut extra = Map::new();
        extra.insert("language".into(), json!("python"));
        extra.insert("phase".into(), json!("bogus"));
        let ctx = context(TddPhase::Red).with_phase_context(PhaseContext {
            extra,
            ..PhaseContext::default()
        });

        let payload = AgentCoordinator::build_payload(Capability::Executor, &ctx);
        assert_eq!(payload["language"], "python");
        assert_eq!(payload["phase"], "RED");
    }

    #[tokio::test]
    async fn test_invoke_agent_records_success() {
        let coordinator = echo_coordinator();
        let record = coordinator
            .invoke_agent(Capability::TestWriter, &context(TddPhase::Red))
            .await;

        assert!(record.is_success());
        assert_eq!(record.output(), Some("test_writer done"));
        assert_eq!(record.phase, TddPhase::Red);
        assert!(!record.timed_out);
        assert_eq!(coordinator.invocation_count(), 1);
        assert_eq!(coordinator.history_for("f1").len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_agent_captures_errors() {
        let coordinator = AgentCoordinator::from_fn(|_, _| async { AgentOutput::error("quota") });
        let record = coordinator
            .invoke_agent(Capability::Coder, &context(TddPhase::Yellow))
            .await;

        assert!(!record.is_success());
        assert_eq!(record.error(), Some("quota"));
        assert_eq!(coordinator.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_invoke_agent_captures_panics() {
        let coordinator = AgentCoordinator::from_fn(|_, _| async {
            if true {
                panic!("agent exploded");
            }
            AgentOutput::output("unreachable")
        });
        let record = coordinator
            .invoke_agent(Capability::Executor, &context(TddPhase::Green))
            .await;

        assert!(!record.is_success());
        assert!(record.error().unwrap().contains("agent exploded"));
    }

    #[tokio::test]
    async fn test_invoke_agent_times_out() {
        let coordinator = AgentCoordinator::from_fn(|_, _| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            AgentOutput::output("late")
        })
        .with_timeout(Duration::from_millis(20));

        let record = coordinator
            .invoke_agent(Capability::Executor, &context(TddPhase::Green))
            .await;

        assert!(record.timed_out);
        assert!(record.error().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_invoker_receives_built_payload() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let coordinator = AgentCoordinator::from_fn(move |capability, payload| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                assert_eq!(capability, Capability::Executor);
                assert_eq!(payload["execution_type"], TEST_EXECUTION);
                AgentOutput::output("1 passed")
            }
        });

        coordinator
            .invoke_agent(Capability::Executor, &context(TddPhase::Green))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_history_is_grouped_per_feature() {
        let coordinator = echo_coordinator();
        let a = AgentContext::new("a", "feature a", TddPhase::Red);
        let b = AgentContext::new("b", "feature b", TddPhase::Red);

        coordinator.invoke_agent(Capability::TestWriter, &a).await;
        coordinator.invoke_agent(Capability::TestWriter, &b).await;
        coordinator.invoke_agent(Capability::Executor, &a).await;

        assert_eq!(coordinator.history_for("a").len(), 2);
        assert_eq!(coordinator.history_for("b").len(), 1);
        assert!(coordinator.history_for("c").is_empty());

        let all = coordinator.invocation_history();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_latest_suggestion_skips_empty_entries() {
        let ctx = context(TddPhase::Red).with_previous_attempts(vec![
            PreviousAttempt {
                attempt_number: 1,
                error: "a".into(),
                suggestion: Some("first".into()),
            },
            PreviousAttempt {
                attempt_number: 2,
                error: "b".into(),
                suggestion: None,
            },
        ]);
        assert_eq!(ctx.latest_suggestion(), Some("first"));
        assert_eq!(ctx.previous_errors(), vec!["a", "b"]);
    }
}
