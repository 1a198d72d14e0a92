//! The Red-Yellow-Green control loop.
//!
//! [`TddOrchestrator`] drives a feature through RED (write failing tests),
//! YELLOW (implement), and GREEN (verify), using the four components:
//!
//! ```text
//!                     ┌──────────────────────┐
//!                     │    TddOrchestrator   │
//!                     └──────────┬───────────┘
//!        ┌───────────────┬───────┴───────┬────────────────┐
//!        ▼               ▼               ▼                ▼
//!  PhaseManager   AgentCoordinator  RetryCoordinator  MetricsCollector
//!  (state machine)  (agent calls)   (retry policy)    (passive stats)
//! ```
//!
//! Per phase attempt the loop invokes the phase's agents, turns the outcome
//! into a [`TransitionContext`], and asks the [`PhaseManager`] to advance.
//! Failures go to the [`RetryCoordinator`]; a veto ends the cycle as FAILED.
//!
//! # Example
//!
//! ```rust,ignore
//! use ryg::{AgentOutput, Capability, TddOrchestrator};
//!
//! let orchestrator = TddOrchestrator::builder()
//!     .invoke_fn(|capability, _payload| async move {
//!         match capability {
//!             Capability::Executor => AgentOutput::output("1 passed, 0 failed"),
//!             _ => AgentOutput::output("generated"),
//!         }
//!     })
//!     .build()?;
//!
//! let result = orchestrator.execute_feature("adds two numbers").await;
//! println!("success: {}", result.success);
//! ```

mod types;

pub use types::{
    derive_feature_id, parse_test_results, FeatureResult, ReviewVerdict, TddFeature, TestResults,
};

use crate::agent::{
    AgentContext, AgentCoordinator, AgentInvocationRecord, AgentInvoker, AgentOutput,
    AgentPayload, Capability, FnInvoker, GlobalContext, PhaseContext, PreviousAttempt,
};
use crate::config::OrchestratorConfig;
use crate::error::{Result, RygError};
use crate::metrics::{MetricsCollector, PhaseMetrics, Session, TestMetrics};
use crate::phase::{PhaseAttempt, PhaseManager, TddCycle, TddPhase, TransitionContext};
use crate::retry::{FailureKind, RetryContext, RetryCoordinator, RetryPolicy};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`TddOrchestrator`].
#[derive(Default)]
pub struct TddOrchestratorBuilder {
    config: OrchestratorConfig,
    invoker: Option<Arc<dyn AgentInvoker>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl std::fmt::Debug for TddOrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TddOrchestratorBuilder")
            .field("config", &self.config)
            .field("has_invoker", &self.invoker.is_some())
            .finish_non_exhaustive()
    }
}

impl TddOrchestratorBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Agent invoker used for every capability.
    #[must_use]
    pub fn invoker(mut self, invoker: Arc<dyn AgentInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Agent invoker from an async closure.
    #[must_use]
    pub fn invoke_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Capability, AgentPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentOutput> + Send + 'static,
    {
        self.invoker(Arc::new(FnInvoker::new(f)))
    }

    /// Share a metrics collector with other orchestrators.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and assemble the orchestrator.
    ///
    /// # Errors
    ///
    /// [`RygError::MissingInvoker`] without an invoker, or
    /// [`RygError::InvalidConfig`] for an invalid configuration.
    pub fn build(self) -> Result<TddOrchestrator> {
        let invoker = self.invoker.ok_or(RygError::MissingInvoker)?;
        self.config.validate()?;

        let agents = AgentCoordinator::new(invoker)
            .with_timeout(Duration::from_secs(self.config.timeout_seconds))
            .with_verbose(self.config.verbose_output);
        let retries = RetryCoordinator::new(RetryPolicy::from(&self.config));

        Ok(TddOrchestrator {
            config: Arc::new(self.config),
            phases: PhaseManager::new(),
            agents,
            retries,
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives features through Red-Yellow-Green cycles.
///
/// All methods take `&self`; share one orchestrator between concurrently
/// running features with an `Arc`. Two features with the same id must not
/// run at the same time.
pub struct TddOrchestrator {
    config: Arc<OrchestratorConfig>,
    phases: PhaseManager,
    agents: AgentCoordinator,
    retries: RetryCoordinator,
    metrics: Arc<MetricsCollector>,
}

impl std::fmt::Debug for TddOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TddOrchestrator")
            .field("config", &self.config)
            .field("active_cycles", &self.phases.active_count())
            .finish_non_exhaustive()
    }
}

/// Why a phase attempt failed.
#[derive(Debug, Clone)]
struct PhaseFailure {
    error: String,
    kind: FailureKind,
    capability: Option<Capability>,
    detail: Option<String>,
}

impl PhaseFailure {
    fn condition(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: FailureKind::TransitionCondition,
            capability: None,
            detail: None,
        }
    }

    fn from_record(record: &AgentInvocationRecord) -> Self {
        let message = record.error().unwrap_or("no output");
        Self {
            error: format!("{} failed: {}", record.capability, message),
            kind: if record.timed_out {
                FailureKind::Timeout
            } else {
                FailureKind::Invocation
            },
            capability: Some(record.capability),
            detail: None,
        }
    }

    fn unparsed_results() -> Self {
        Self {
            error: "could not parse test results from executor output".to_string(),
            kind: FailureKind::ParseFailure,
            capability: Some(Capability::Executor),
            detail: None,
        }
    }

    fn retry_context(&self, cycle_started_at: DateTime<Utc>) -> RetryContext {
        RetryContext {
            kind: self.kind,
            capability: self.capability,
            detail: self.detail.clone(),
            since: Some(cycle_started_at),
        }
    }
}

/// Outcome of running the agents for one phase attempt.
enum PhaseStep {
    /// Agents answered; `failure` applies if the transition is refused.
    Evaluated {
        transition: TransitionContext,
        failure: PhaseFailure,
        tests: TestMetrics,
    },
    /// An agent call failed before the exit condition could be checked.
    Failed(PhaseFailure),
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    Complete,
    /// RetryCoordinator refused another attempt at the phase.
    PhaseVetoed,
    /// The feature used up `max_total_retries`.
    BudgetExhausted,
    Cancelled,
}

/// Artifacts and bookkeeping for one `execute_feature` call.
#[derive(Debug, Default)]
struct FeatureRun {
    tests: Option<String>,
    code: Option<String>,
    execution_output: Option<String>,
    review_feedback: Option<String>,
    cycles: Vec<TddCycle>,
    retries_used: u32,
    errors: Vec<String>,
}

/// Fails the active cycle if `execute_feature` is dropped mid-flight.
struct CycleGuard<'a> {
    phases: &'a PhaseManager,
    metrics: &'a MetricsCollector,
    feature_id: String,
    armed: bool,
}

impl<'a> CycleGuard<'a> {
    fn new(phases: &'a PhaseManager, metrics: &'a MetricsCollector, feature_id: &str) -> Self {
        Self {
            phases,
            metrics,
            feature_id: feature_id.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || !self.phases.is_active(&self.feature_id) {
            return;
        }
        warn!(feature = %self.feature_id, "Feature execution dropped, failing active cycle");
        self.phases
            .record_failure(&self.feature_id, "cancelled: execution dropped");
        self.phases.complete_cycle(&self.feature_id, false);
        self.metrics.complete_feature(&self.feature_id, false);
    }
}

impl TddOrchestrator {
    /// Start building an orchestrator.
    #[must_use]
    pub fn builder() -> TddOrchestratorBuilder {
        TddOrchestratorBuilder::default()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub fn phase_manager(&self) -> &PhaseManager {
        &self.phases
    }

    #[must_use]
    pub fn agent_coordinator(&self) -> &AgentCoordinator {
        &self.agents
    }

    #[must_use]
    pub fn retry_coordinator(&self) -> &RetryCoordinator {
        &self.retries
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Begin a metrics session covering subsequent features.
    pub fn start_session(&self, session_id: &str) -> Session {
        self.metrics.start_session(session_id)
    }

    /// Finish the active metrics session.
    pub fn complete_session(&self) -> Option<Session> {
        self.metrics.complete_session()
    }

    /// Drive one feature to COMPLETE or FAILED.
    ///
    /// Agent and transition failures are reported in the result, never as
    /// errors.
    pub async fn execute_feature(&self, feature: impl Into<TddFeature>) -> FeatureResult {
        self.execute_feature_with_cancel(feature, CancellationToken::new())
            .await
    }

    /// Drive several features concurrently.
    pub async fn execute_features<I, F>(&self, features: I) -> Vec<FeatureResult>
    where
        I: IntoIterator<Item = F>,
        F: Into<TddFeature>,
    {
        join_all(features.into_iter().map(|f| self.execute_feature(f))).await
    }

    /// Like [`execute_feature`](Self::execute_feature), stopping early when
    /// `cancel` fires. A cancelled feature ends FAILED.
    pub async fn execute_feature_with_cancel(
        &self,
        feature: impl Into<TddFeature>,
        cancel: CancellationToken,
    ) -> FeatureResult {
        let feature = feature.into();
        let started = Instant::now();
        info!(feature = %feature.id, description = %feature.description, "Starting feature");

        self.metrics.start_feature(&feature.id, &feature.description);
        let mut guard = CycleGuard::new(&self.phases, &self.metrics, &feature.id);
        let mut run = FeatureRun::default();
        let mut restarts = 0;

        let end = loop {
            let end = self.run_cycle(&feature, &mut run, &cancel).await;
            let can_restart = end == CycleEnd::PhaseVetoed
                && restarts < self.config.max_cycle_restarts
                && run.retries_used < self.config.max_total_retries;
            if !can_restart {
                break end;
            }
            restarts += 1;
            info!(feature = %feature.id, restart = restarts, "Restarting cycle from RED");
            run.execution_output = None;
            run.review_feedback = None;
        };
        guard.disarm();

        let success = end == CycleEnd::Complete;
        self.metrics.complete_feature(&feature.id, success);

        let result = FeatureResult {
            feature_id: feature.id.clone(),
            feature_description: feature.description.clone(),
            success,
            cycles: run.cycles,
            final_tests: run.tests,
            final_code: run.code,
            errors: if success { Vec::new() } else { run.errors },
            total_duration_seconds: started.elapsed().as_secs_f64(),
        };

        info!(
            feature = %result.feature_id,
            success,
            cycles = result.cycles.len(),
            attempts = result.get_total_attempts(),
            duration_s = result.total_duration_seconds,
            "Feature finished"
        );
        result
    }

    async fn run_cycle(
        &self,
        feature: &TddFeature,
        run: &mut FeatureRun,
        cancel: &CancellationToken,
    ) -> CycleEnd {
        let mut metadata = Map::new();
        metadata.insert("description".into(), json!(feature.description));
        metadata.insert("cycle".into(), json!(run.cycles.len() + 1));
        if !feature.test_criteria.is_empty() {
            metadata.insert("test_criteria".into(), json!(feature.test_criteria));
        }
        self.phases.start_cycle(&feature.id, Some(metadata));

        loop {
            let Some(cycle) = self.phases.get_cycle(&feature.id) else {
                return self.finish_cycle(feature, run, CycleEnd::Cancelled, "cycle vanished");
            };
            let phase = cycle.current_phase;
            if phase == TddPhase::Complete {
                return self.finish_cycle(feature, run, CycleEnd::Complete, "");
            }
            let attempt = cycle.current_attempt().map_or(1, |a| a.attempt_number);

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                step = self.run_phase(feature, &cycle, phase, attempt, run) => Some(step),
            };
            let Some(step) = step else {
                let reason = format!("cancelled during {} phase", phase);
                return self.finish_cycle(feature, run, CycleEnd::Cancelled, &reason);
            };

            let (failure, tests) = match step {
                PhaseStep::Failed(failure) => (failure, TestMetrics::default()),
                PhaseStep::Evaluated {
                    transition,
                    failure,
                    tests,
                } => match self.phases.transition_phase(&feature.id, &transition) {
                    Ok(outcome) if outcome.advanced => {
                        self.record_advanced_phase(&feature.id, tests);
                        continue;
                    }
                    Ok(_) => (failure, tests),
                    Err(e) => (PhaseFailure::condition(e.to_string()), tests),
                },
            };

            let decision = self.retries.should_retry(
                &feature.id,
                phase,
                attempt,
                &failure.error,
                &failure.retry_context(cycle.started_at),
            );

            let end = if !decision.should_retry {
                Some(CycleEnd::PhaseVetoed)
            } else if run.retries_used >= self.config.max_total_retries {
                warn!(
                    feature = %feature.id,
                    retries = run.retries_used,
                    "Feature retry budget exhausted"
                );
                Some(CycleEnd::BudgetExhausted)
            } else {
                None
            };

            if let Some(end) = end {
                self.phases.record_failure(&feature.id, &failure.error);
                self.record_failed_phase(&feature.id, attempt, tests);
                let reason = match end {
                    CycleEnd::BudgetExhausted => {
                        format!("retry budget exhausted after {} retries", run.retries_used)
                    }
                    _ => format!("{} phase failed after {} attempts", phase, attempt),
                };
                return self.finish_cycle(feature, run, end, &reason);
            }

            self.phases
                .retry_current_phase(&feature.id, &failure.error, decision.suggestions);
            run.retries_used += 1;

            if !decision.backoff.is_zero() {
                debug!(
                    feature = %feature.id,
                    backoff_ms = decision.backoff.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let reason = format!("cancelled during {} phase", phase);
                        return self.finish_cycle(feature, run, CycleEnd::Cancelled, &reason);
                    }
                    _ = tokio::time::sleep(decision.backoff) => {}
                }
            }
        }
    }

    /// Close the active cycle and collect its unrecovered errors.
    fn finish_cycle(
        &self,
        feature: &TddFeature,
        run: &mut FeatureRun,
        end: CycleEnd,
        reason: &str,
    ) -> CycleEnd {
        if end == CycleEnd::Cancelled {
            warn!(feature = %feature.id, "Feature cancelled");
            self.phases.record_failure(&feature.id, reason);
        }
        let Some(cycle) = self.phases.complete_cycle(&feature.id, end == CycleEnd::Complete)
        else {
            run.errors = vec![reason.to_string()];
            return end;
        };

        run.errors = match (end, cycle.current_attempt()) {
            (CycleEnd::Complete, _) => Vec::new(),
            (CycleEnd::Cancelled, _) => vec![reason.to_string()],
            (_, Some(attempt)) => {
                let mut errors = attempt_errors(attempt);
                errors.push(reason.to_string());
                errors
            }
            (_, None) => vec![reason.to_string()],
        };
        run.cycles.push(cycle);
        end
    }

    async fn run_phase(
        &self,
        feature: &TddFeature,
        cycle: &TddCycle,
        phase: TddPhase,
        attempt: u32,
        run: &mut FeatureRun,
    ) -> PhaseStep {
        let mut context = self.agent_context(feature, cycle, phase, attempt, run);
        match phase {
            TddPhase::Red => self.run_red(&mut context, run).await,
            TddPhase::Yellow => self.run_yellow(&mut context, run).await,
            TddPhase::Green => self.run_green(&mut context, attempt, run).await,
            TddPhase::Complete | TddPhase::Failed => {
                PhaseStep::Failed(PhaseFailure::condition(format!("{} is terminal", phase)))
            }
        }
    }

    /// Write tests, then prove they fail.
    async fn run_red(&self, context: &mut AgentContext, run: &mut FeatureRun) -> PhaseStep {
        let record = self.agents.invoke_agent(Capability::TestWriter, context).await;
        let Some(tests) = record.output().map(str::to_string) else {
            return PhaseStep::Failed(PhaseFailure::from_record(&record));
        };
        if tests.trim().is_empty() {
            return PhaseStep::Evaluated {
                transition: TransitionContext::red(false, false),
                failure: PhaseFailure::condition("test_writer produced no tests"),
                tests: TestMetrics::default(),
            };
        }
        run.tests = Some(tests);
        context.phase_context.tests = run.tests.clone();

        let record = self.agents.invoke_agent(Capability::Executor, context).await;
        let Some(output) = record.output().map(str::to_string) else {
            return PhaseStep::Failed(PhaseFailure::from_record(&record));
        };
        let results = parse_test_results(&output);
        run.execution_output = Some(output);

        if results.is_empty() {
            return PhaseStep::Failed(PhaseFailure::unparsed_results());
        }

        PhaseStep::Evaluated {
            transition: TransitionContext::red(true, results.failed_tests > 0),
            failure: PhaseFailure::condition(format!(
                "tests pass before implementation ({} passed); they must fail first",
                results.passed_tests
            )),
            tests: TestMetrics::new(results.passed_tests, results.failed_tests),
        }
    }

    /// Implement, then optionally get the implementation reviewed.
    async fn run_yellow(&self, context: &mut AgentContext, run: &mut FeatureRun) -> PhaseStep {
        let record = self.agents.invoke_agent(Capability::Coder, context).await;
        let Some(code) = record.output().map(str::to_string) else {
            return PhaseStep::Failed(PhaseFailure::from_record(&record));
        };
        if code.trim().is_empty() {
            return PhaseStep::Evaluated {
                transition: TransitionContext::yellow(false),
                failure: PhaseFailure::condition("coder produced no implementation"),
                tests: TestMetrics::default(),
            };
        }
        run.code = Some(code);

        if self.config.require_review_approval {
            context.phase_context.implementation = run.code.clone();
            let record = self.agents.invoke_agent(Capability::Reviewer, context).await;
            let Some(review) = record.output().map(str::to_string) else {
                return PhaseStep::Failed(PhaseFailure::from_record(&record));
            };
            if !ReviewVerdict::parse(&review).is_approved() {
                run.review_feedback = Some(review.clone());
                return PhaseStep::Failed(PhaseFailure {
                    error: format!("review rejected: {}", review.trim()),
                    kind: FailureKind::ReviewRejected,
                    capability: Some(Capability::Reviewer),
                    detail: Some(review),
                });
            }
            run.review_feedback = None;
        }

        PhaseStep::Evaluated {
            transition: TransitionContext::yellow(true),
            failure: PhaseFailure::condition("coder produced no implementation"),
            tests: TestMetrics::default(),
        }
    }

    /// Run the tests against the implementation, fixing it first on retries.
    async fn run_green(
        &self,
        context: &mut AgentContext,
        attempt: u32,
        run: &mut FeatureRun,
    ) -> PhaseStep {
        if attempt > 1 {
            let record = self.agents.invoke_agent(Capability::Coder, context).await;
            let Some(code) = record.output().map(str::to_string) else {
                return PhaseStep::Failed(PhaseFailure::from_record(&record));
            };
            if !code.trim().is_empty() {
                run.code = Some(code);
                context.phase_context.implementation = run.code.clone();
            }
        }

        let record = self.agents.invoke_agent(Capability::Executor, context).await;
        let Some(output) = record.output().map(str::to_string) else {
            return PhaseStep::Failed(PhaseFailure::from_record(&record));
        };
        let results = parse_test_results(&output);
        run.execution_output = Some(output);

        let failure = if results.is_empty() {
            PhaseFailure::unparsed_results()
        } else {
            PhaseFailure::condition(format!(
                "{} of {} tests failing",
                results.failed_tests,
                results.total()
            ))
        };

        PhaseStep::Evaluated {
            transition: TransitionContext::green(results.all_passed),
            failure,
            tests: TestMetrics::new(results.passed_tests, results.failed_tests),
        }
    }

    fn agent_context(
        &self,
        feature: &TddFeature,
        cycle: &TddCycle,
        phase: TddPhase,
        attempt: u32,
        run: &FeatureRun,
    ) -> AgentContext {
        let previous_attempts = cycle
            .current_attempt()
            .map(previous_attempts)
            .unwrap_or_default();

        let phase_context = match phase {
            TddPhase::Red => PhaseContext::default(),
            TddPhase::Yellow => PhaseContext {
                tests: run.tests.clone(),
                implementation: run.code.clone(),
                review_feedback: run.review_feedback.clone(),
                ..PhaseContext::default()
            },
            _ => PhaseContext {
                tests: run.tests.clone(),
                implementation: run.code.clone(),
                execution_output: run.execution_output.clone(),
                ..PhaseContext::default()
            },
        };

        AgentContext::new(&feature.id, &feature.description, phase)
            .with_attempt(attempt)
            .with_previous_attempts(previous_attempts)
            .with_phase_context(phase_context)
            .with_global_context(GlobalContext {
                test_criteria: feature.test_criteria.clone(),
                require_review_approval: self.config.require_review_approval,
                verbose_output: self.config.verbose_output,
                extra: Map::<String, Value>::new(),
            })
    }

    /// Record metrics for the phase just left.
    fn record_advanced_phase(&self, feature_id: &str, tests: TestMetrics) {
        let Some(cycle) = self.phases.get_cycle(feature_id) else {
            return;
        };
        // COMPLETE has no entry, so after GREEN the left phase is last
        let left = if cycle.current_phase == TddPhase::Complete {
            cycle.phase_history.last()
        } else {
            cycle.phase_history.iter().rev().nth(1)
        };
        if let Some(attempt) = left {
            self.record_phase_metrics(feature_id, attempt, true, tests);
        }
    }

    fn record_failed_phase(&self, feature_id: &str, attempt: u32, tests: TestMetrics) {
        let Some(cycle) = self.phases.get_cycle(feature_id) else {
            return;
        };
        if let Some(current) = cycle.current_attempt() {
            debug!(feature = %feature_id, phase = %current.phase, attempt, "Phase failed");
            self.record_phase_metrics(feature_id, current, false, tests);
        }
    }

    fn record_phase_metrics(
        &self,
        feature_id: &str,
        attempt: &PhaseAttempt,
        success: bool,
        tests: TestMetrics,
    ) {
        let invocations = self
            .agents
            .history_for(feature_id)
            .iter()
            .filter(|r| r.phase == attempt.phase && r.timestamp >= attempt.started_at)
            .count() as u32;

        self.metrics.record_phase_complete(
            feature_id,
            PhaseMetrics::new(
                attempt.phase,
                attempt.duration_seconds(),
                attempt.attempt_number,
                success,
            )
            .with_agent_invocations(invocations)
            .with_test_metrics(tests),
        );
    }
}

/// Errors of an attempt as earlier-attempt summaries for the next agent call.
fn previous_attempts(attempt: &PhaseAttempt) -> Vec<PreviousAttempt> {
    let last = attempt.errors.len();
    attempt
        .errors
        .iter()
        .enumerate()
        .map(|(i, error)| PreviousAttempt {
            attempt_number: i as u32 + 1,
            error: error.clone(),
            suggestion: if i + 1 == last {
                attempt.suggestion.clone()
            } else {
                None
            },
        })
        .collect()
}

/// Errors of an attempt, each tagged with its phase and attempt number.
fn attempt_errors(attempt: &PhaseAttempt) -> Vec<String> {
    let retried = attempt.attempt_number as usize;
    attempt
        .errors
        .iter()
        .enumerate()
        .map(|(i, error)| {
            format!(
                "[{} attempt {}] {}",
                attempt.phase,
                (i + 1).min(retried),
                error
            )
        })
        .collect()
}
