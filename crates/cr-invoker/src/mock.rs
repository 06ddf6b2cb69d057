//! In-process mock invoker.
//!
//! Executes invocations locally with no external dependencies. Useful for
//! driver development, integration testing, and exercising cancellation and
//! failure paths deterministically.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use async_trait::async_trait;
use cr_types::{ModelTarget, ParamMap, ProviderError};

use crate::gate::ProviderGate;
use crate::invoker::{InvocationInput, InvocationOutcome, InvokerResult, ModelInvoker, Usage};

/// Configuration for the mock invoker.
#[derive(Debug, Clone, PartialEq)]
pub struct MockInvokerConfig {
    /// Simulated call latency.
    pub latency_ms: u64,
    /// Output returned when no scripted response is queued.
    pub default_output: String,
    /// Flat cost charged per call.
    pub cost_per_call: Decimal,
    /// Per-provider concurrency ceiling.
    pub provider_ceiling: usize,
}

impl Default for MockInvokerConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            default_output: "ok".to_string(),
            cost_per_call: Decimal::new(1, 3), // $0.001
            provider_ceiling: 8,
        }
    }
}

/// A fully in-process invoker that simulates model calls.
///
/// Responses are served from a scripted FIFO queue when one is present,
/// otherwise a default outcome is synthesized. An optional hold gate lets
/// tests freeze calls in flight: each call consumes one permit, so
/// `add_permits(1)` releases exactly one unit of work.
pub struct MockInvoker {
    config: MockInvokerConfig,
    script: Mutex<VecDeque<InvokerResult<InvocationOutcome>>>,
    gate: ProviderGate,
    hold: Option<Arc<Semaphore>>,
    calls_started: AtomicUsize,
    calls_completed: AtomicUsize,
}

impl MockInvoker {
    pub fn new(config: MockInvokerConfig) -> Self {
        let ceiling = config.provider_ceiling;
        Self {
            config,
            script: Mutex::new(VecDeque::new()),
            gate: ProviderGate::new(ceiling),
            hold: None,
            calls_started: AtomicUsize::new(0),
            calls_completed: AtomicUsize::new(0),
        }
    }

    /// Create a mock invoker with default settings.
    pub fn with_defaults() -> Self {
        Self::new(MockInvokerConfig::default())
    }

    /// Block every call on `hold` until the test grants permits.
    pub fn with_hold(mut self, hold: Arc<Semaphore>) -> Self {
        self.hold = Some(hold);
        self
    }

    /// Queue a scripted success for the next unscripted call.
    pub fn push_response(&self, outcome: InvocationOutcome) {
        self.script.lock().push_back(Ok(outcome));
    }

    /// Queue a scripted provider failure.
    pub fn push_failure(&self, error: ProviderError) {
        self.script.lock().push_back(Err(error));
    }

    /// Calls that have entered `invoke` (including ones still in flight).
    pub fn calls_started(&self) -> usize {
        self.calls_started.load(Ordering::SeqCst)
    }

    /// Calls that have returned.
    pub fn calls_completed(&self) -> usize {
        self.calls_completed.load(Ordering::SeqCst)
    }

    fn synthesize(&self, input: &InvocationInput) -> InvocationOutcome {
        let output = self.config.default_output.clone();
        InvocationOutcome {
            usage: Usage {
                input_tokens: (input.prompt_chars() / 4) as u64,
                output_tokens: (output.len() / 4) as u64,
            },
            cost: self.config.cost_per_call,
            latency_ms: self.config.latency_ms,
            tool_calls: Vec::new(),
            output,
        }
    }
}

#[async_trait]
impl ModelInvoker for MockInvoker {
    async fn invoke(
        &self,
        target: &ModelTarget,
        _params: &ParamMap,
        input: &InvocationInput,
    ) -> InvokerResult<InvocationOutcome> {
        self.calls_started.fetch_add(1, Ordering::SeqCst);

        let _permit = self.gate.acquire(&target.provider).await?;

        if let Some(hold) = &self.hold {
            let permit = hold
                .acquire()
                .await
                .map_err(|_| ProviderError::Unavailable {
                    message: "hold gate closed".into(),
                })?;
            // Consume the permit so each release lets exactly one call through.
            permit.forget();
        }

        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        let scripted = self.script.lock().pop_front();
        let result = match scripted {
            Some(r) => r,
            None => Ok(self.synthesize(input)),
        };

        self.calls_completed.fetch_add(1, Ordering::SeqCst);
        debug!(target_name = %target, ok = result.is_ok(), "mock invocation served");
        result
    }
}
