//! Retry/timeout envelope.
//!
//! Model calls get bounded retries with jittered exponential backoff, but only
//! for transient failures (see [`Retryable`]). Every model attempt and every
//! tool invocation is raced against a wall-clock timer. Tool calls are never
//! retried.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use taskpilot_config::RetryConfig;
use taskpilot_core::error::{Error, ModelError, ToolError};
use taskpilot_core::model::{ModelClient, ModelRequest, ModelResponse};
use taskpilot_core::tool::{ToolCall, ToolContext, ToolOutput, ToolSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-mandated wait that replaces the computed backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ModelError {
    fn is_retryable(&self) -> bool {
        ModelError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs().map(Duration::from_secs)
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Model(e) => e.is_retryable(),
            Error::Channel(_) => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Model(e) => Retryable::retry_after(e),
            _ => None,
        }
    }
}

/// Backoff schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Up to this fraction of the delay is added at random
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Same schedule, different retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Un-jittered delay after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1).min(30) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Delay to wait after a failed attempt; `retry_after` wins if present,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max_delay);
        }
        let base = self.backoff(attempt);
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let max_jitter = base.as_millis() as f64 * self.jitter_factor;
        let jitter = rand::rng().random_range(0.0..=max_jitter);
        base + Duration::from_millis(jitter as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `operation` until it succeeds, fails terminally, or the budget runs out.
///
/// `operation` receives the 1-based attempt number. `on_retry` is called with
/// the failed attempt, the chosen delay and the error before each backoff.
/// Cancellation during a backoff returns the last error immediately.
pub async fn with_retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, Duration, &E),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "Request succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if !e.is_retryable() || attempt >= policy.max_attempts() || cancel.is_cancelled() {
                    return Err(e);
                }

                let delay = policy.delay_for(attempt, e.retry_after());
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                on_retry(attempt, delay, &e);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(e),
                }
            }
        }
    }
}

/// One model attempt raced against `timeout` and the cancellation token.
pub async fn call_model_once(
    model: &dyn ModelClient,
    request: ModelRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ModelResponse, ModelError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ModelError::Cancelled),
        result = tokio::time::timeout(timeout, model.complete(request, cancel)) => match result {
            Ok(response) => response,
            Err(_) => Err(ModelError::Timeout(format!(
                "{} did not respond within {}s",
                model.name(),
                timeout.as_secs()
            ))),
        },
    }
}

/// Execute a tool with a hard timeout. The in-flight future is dropped on expiry.
pub async fn execute_tool_with_timeout(
    tools: &ToolSet,
    call: &ToolCall,
    ctx: &ToolContext,
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    match tokio::time::timeout(timeout, tools.execute(call, ctx)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(tool = %call.name, timeout_secs = timeout.as_secs(), "Tool timed out");
            Err(ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}
