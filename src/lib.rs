//! ryg - Red-Yellow-Green TDD orchestration
//!
//! Drives pluggable agents (a test writer, a coder, an executor and an
//! optional reviewer) through strict test-first cycles: write failing tests,
//! implement, verify.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`phase`] - Per-feature RED/YELLOW/GREEN state machine
//! - [`agent`] - Agent invocation seam, payload builders and history
//! - [`retry`] - Bounded retries, stagnation detection and backoff
//! - [`metrics`] - Session, feature and phase metrics
//! - [`orchestrator`] - The control loop tying the above together
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Testing infrastructure (scripted invoker, fixtures)
//!
//! # Example
//!
//! ```rust,ignore
//! use ryg::{AgentOutput, Capability, OrchestratorConfig, TddOrchestrator};
//!
//! let orchestrator = TddOrchestrator::builder()
//!     .config(OrchestratorConfig::default().with_max_phase_retries(5))
//!     .invoke_fn(|capability, payload| async move {
//!         my_agents::dispatch(capability, payload).await
//!     })
//!     .build()?;
//!
//! orchestrator.start_session("nightly");
//! let result = orchestrator.execute_feature("parse ISO-8601 dates").await;
//! let session = orchestrator.complete_session();
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod retry;
pub mod testing;

// Re-export commonly used types
pub use error::{Result, RygError};

// Re-export config types
pub use config::{OrchestratorConfig, ValidationReport};

// Re-export state machine types
pub use phase::{
    PhaseAttempt, PhaseManager, TddCycle, TddPhase, TransitionContext, TransitionOutcome,
};

// Re-export agent types
pub use agent::{
    AgentContext, AgentCoordinator, AgentInvocationRecord, AgentInvoker, AgentOutput,
    AgentPayload, Capability, FnInvoker, GlobalContext, PhaseContext, PreviousAttempt,
    ProcessInvoker,
};

// Re-export retry types
pub use retry::{
    calculate_backoff, normalize_error, FailureKind, RetryContext, RetryCoordinator,
    RetryDecision, RetryPolicy, RetryRecord,
};

// Re-export metrics types
pub use metrics::{
    FeatureMetrics, MetricsCollector, PhaseMetrics, Session, SessionSummary, TestMetrics,
};

// Re-export orchestrator types
pub use orchestrator::{
    derive_feature_id, parse_test_results, FeatureResult, ReviewVerdict, TddFeature,
    TddOrchestrator, TddOrchestratorBuilder, TestResults,
};

// Re-export testing types for convenience
pub use testing::ScriptedInvoker;
