//! Testing infrastructure for ryg.
//!
//! Test doubles and fixtures for driving the orchestrator without real
//! agents.
//!
//! - **Mocks**: [`ScriptedInvoker`], an [`AgentInvoker`](crate::agent::AgentInvoker)
//!   answering from scripts
//! - **Fixtures**: temporary projects and canned agent transcripts (test-only)
//!
//! # Example
//!
//! ```rust,ignore
//! use ryg::testing::ScriptedInvoker;
//!
//! let invoker = ScriptedInvoker::new()
//!     .with_default(Capability::TestWriter, "tests")
//!     .with_default(Capability::Coder, "code")
//!     .with_responses(Capability::Executor, ["0 passed, 1 failed", "1 passed, 0 failed"]);
//! ```

#[cfg(test)]
pub mod fixtures;
pub mod mocks;

#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
