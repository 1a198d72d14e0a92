//! Scripted agent invoker.
//!
//! [`ScriptedInvoker`] answers each capability from a queue of canned
//! responses, then from an optional payload-aware handler, then from a
//! default. Clones share state, so a test can keep a handle for call counts
//! after giving the invoker to an orchestrator.

use crate::agent::{AgentInvoker, AgentOutput, AgentPayload, Capability};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Handler = Arc<dyn Fn(&AgentPayload) -> AgentOutput + Send + Sync>;

#[derive(Default)]
struct CapabilityScript {
    queue: VecDeque<AgentOutput>,
    handler: Option<Handler>,
    default: Option<AgentOutput>,
    delay: Option<Duration>,
}

impl CapabilityScript {
    fn next_output(&mut self, capability: Capability, payload: &AgentPayload) -> AgentOutput {
        if let Some(output) = self.queue.pop_front() {
            return output;
        }
        if let Some(ref handler) = self.handler {
            return handler(payload);
        }
        self.default.clone().unwrap_or_else(|| {
            AgentOutput::error(format!("no scripted response for {}", capability))
        })
    }
}

#[derive(Default)]
struct ScriptState {
    scripts: HashMap<Capability, CapabilityScript>,
    calls: Vec<(Capability, AgentPayload)>,
}

/// Test double for [`AgentInvoker`].
///
/// # Example
///
/// ```rust,ignore
/// let invoker = ScriptedInvoker::new()
///     .with_default(Capability::TestWriter, "def test_add(): ...")
///     .with_responses(Capability::Executor, ["0 passed, 1 failed", "1 passed, 0 failed"]);
///
/// let handle = invoker.clone();
/// // ... run an orchestrator with `invoker` ...
/// assert_eq!(handle.call_count(Capability::Executor), 2);
/// ```
#[derive(Clone, Default)]
pub struct ScriptedInvoker {
    state: Arc<Mutex<ScriptState>>,
}

impl std::fmt::Debug for ScriptedInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedInvoker")
            .field("calls", &self.total_calls())
            .finish_non_exhaustive()
    }
}

impl ScriptedInvoker {
    /// Create an invoker with no scripts. Unscripted calls return an error.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn script(self, capability: Capability, f: impl FnOnce(&mut CapabilityScript)) -> Self {
        f(self.lock().scripts.entry(capability).or_default());
        self
    }

    /// Queue one successful response.
    #[must_use]
    pub fn with_response(self, capability: Capability, output: &str) -> Self {
        let output = AgentOutput::output(output);
        self.script(capability, |s| s.queue.push_back(output))
    }

    /// Queue several successful responses, answered in order.
    #[must_use]
    pub fn with_responses<'a>(
        self,
        capability: Capability,
        outputs: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let outputs: Vec<_> = outputs.into_iter().map(AgentOutput::output).collect();
        self.script(capability, |s| s.queue.extend(outputs))
    }

    /// Queue one failed response.
    #[must_use]
    pub fn with_error(self, capability: Capability, message: &str) -> Self {
        let output = AgentOutput::error(message);
        self.script(capability, |s| s.queue.push_back(output))
    }

    /// Response used once the queue is empty and no handler is set.
    #[must_use]
    pub fn with_default(self, capability: Capability, output: &str) -> Self {
        let output = AgentOutput::output(output);
        self.script(capability, |s| s.default = Some(output))
    }

    /// Failed response used once the queue is empty and no handler is set.
    #[must_use]
    pub fn with_default_error(self, capability: Capability, message: &str) -> Self {
        let output = AgentOutput::error(message);
        self.script(capability, |s| s.default = Some(output))
    }

    /// Compute responses from the payload once the queue is empty.
    #[must_use]
    pub fn with_handler<F>(self, capability: Capability, handler: F) -> Self
    where
        F: Fn(&AgentPayload) -> AgentOutput + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.script(capability, |s| s.handler = Some(handler))
    }

    /// Wait before answering, to exercise timeouts and cancellation.
    #[must_use]
    pub fn with_delay(self, capability: Capability, delay: Duration) -> Self {
        self.script(capability, |s| s.delay = Some(delay))
    }

    /// Number of calls made for a capability.
    #[must_use]
    pub fn call_count(&self, capability: Capability) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(c, _)| *c == capability)
            .count()
    }

    /// Number of calls made across all capabilities.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// Payloads received for a capability, in call order.
    #[must_use]
    pub fn payloads(&self, capability: Capability) -> Vec<AgentPayload> {
        self.lock()
            .calls
            .iter()
            .filter(|(c, _)| *c == capability)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Capabilities in call order.
    #[must_use]
    pub fn call_sequence(&self) -> Vec<Capability> {
        self.lock().calls.iter().map(|(c, _)| *c).collect()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, capability: Capability, payload: AgentPayload) -> AgentOutput {
        let (output, delay) = {
            let mut state = self.lock();
            state.calls.push((capability, payload.clone()));
            let script = state.scripts.entry(capability).or_default();
            (script.next_output(capability, &payload), script.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        output
    }
}
