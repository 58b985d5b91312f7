//! Resilience layer wrapping every outbound invocation.
//!
//! Each endpoint gets one circuit breaker, one token bucket and one
//! in-flight bound, shared across all investigations in the process. The
//! [`ResilientClient`] composes them around an [`ApiClient`]: breaker
//! admission, token wait, per-call deadline, error classification, breaker
//! bookkeeping, and bounded retries with jittered exponential backoff.
//!
//! The layer is single-endpooint by design: walking fallback endpoints is
//! the executor's decision, not this layer's.

mod breaker;
mod limiter;

pub use breaker::{BreakerState, CircuitBreaker};
pub use limiter::TokenBucket;

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::client::{ApiClient, Params, RawResult};
use crate::config::{CircuitConfig, RetryConfig};
use crate::context::InvestigationContext;
use crate::error::{Error, Result};
use crate::registry::ApiEndpoint;

/// The per-endpoint resilience state: breaker, bucket, in-flight bound.
#[derive(Debug)]
pub struct EndpointResilience {
    /// Circuit breaker for the endpoint
    pub breaker: CircuitBreaker,
    /// Token-bucket rate limiter for the endpoint
    pub limiter: TokenBucket,
    /// Concurrent-invocation bound for the endpoint
    pub in_flight: Semaphore,
}

/// Process-wide registry of per-endpoint resilience state.
///
/// Initialized at process start and torn down on shutdown; the only
/// legitimately process-wide mutable state in the engine. Entries are
/// created lazily on first use and shared across investigations.
#[derive(Debug)]
pub struct ResilienceRegistry {
    circuit: CircuitConfig,
    max_in_flight_per_endpoint: usize,
    entries: Mutex<HashMap<String, Arc<EndpointResilience>>>,
}

impl ResilienceRegistry {
    /// Create a registry from circuit config and the per-endpoint bound.
    pub fn new(circuit: CircuitConfig, max_in_flight_per_endpoint: usize) -> Self {
        Self {
            circuit,
            max_in_flight_per_endpoint: max_in_flight_per_endpoint.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The resilience state for an endpoint, created on first use.
    pub fn for_endpoint(&self, endpoint: &ApiEndpoint) -> Arc<EndpointResilience> {
        let mut entries = match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .entry(endpoint.id.clone())
            .or_insert_with(|| {
                Arc::new(EndpointResilience {
                    breaker: CircuitBreaker::new(&self.circuit, endpoint.circuit_threshold),
                    limiter: TokenBucket::new(endpoint.rate_per_minute),
                    in_flight: Semaphore::new(self.max_in_flight_per_endpoint),
                })
            })
            .clone()
    }
}

/// Outcome of a resilient invocation: the classified result plus how many
/// attempts were issued against the endpoint.
#[derive(Debug)]
pub struct InvokeOutcome {
    /// The final classified result
    pub result: Result<RawResult>,
    /// Attempts issued, the first call included
    pub attempts: u32,
}

/// An [`ApiClient`] wrapped with one endpoint's resilience state.
pub struct ResilientClient {
    client: Arc<dyn ApiClient>,
    resilience: Arc<EndpointResilience>,
    endpoint_id: String,
    invocation_timeout: Duration,
    retry: RetryConfig,
}

impl ResilientClient {
    /// Wrap a client with the endpoint's resilience state.
    pub fn new(
        client: Arc<dyn ApiClient>,
        resilience: Arc<EndpointResilience>,
        endpoint: &ApiEndpoint,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            resilience,
            endpoint_id: endpoint.id.clone(),
            invocation_timeout: endpoint.timeout,
            retry,
        }
    }

    /// Invoke with breaker, rate limit, deadline and retries applied.
    pub async fn invoke(
        &self,
        ctx: &InvestigationContext,
        method: &str,
        params: &Params,
    ) -> InvokeOutcome {
        let cancel = ctx.cancel_token();

        let _permit = tokio::select! {
            _ = cancel.cancelled() => {
                return InvokeOutcome { result: Err(Error::Cancelled), attempts: 0 };
            }
            permit = self.resilience.in_flight.acquire() => match permit {
                Ok(p) => p,
                Err(_) => {
                    return InvokeOutcome {
                        result: Err(Error::internal("endpoint semaphore closed")),
                        attempts: 0,
                    };
                }
            },
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.invoke_once(ctx, method, params).await {
                Ok(raw) => {
                    return InvokeOutcome {
                        result: Ok(raw),
                        attempts,
                    }
                }
                Err(e) => e,
            };

            let can_retry = error.is_retryable() && attempts < self.retry.max_attempts;
            if !can_retry {
                return InvokeOutcome {
                    result: Err(error),
                    attempts,
                };
            }

            let delay = match &error {
                Error::RateLimited {
                    retry_after: Some(retry_after),
                    ..
                } => *retry_after,
                _ => jittered(self.retry.delay_for_attempt(attempts - 1), self.retry.jitter),
            };
            tracing::debug!(
                endpoint_id = %self.endpoint_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying after {}", error.kind()
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return InvokeOutcome { result: Err(Error::Cancelled), attempts };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn invoke_once(
        &self,
        ctx: &InvestigationContext,
        method: &str,
        params: &Params,
    ) -> Result<RawResult> {
        let cancel = ctx.cancel_token();

        // While Open, short-circuit without touching the client.
        self.resilience.breaker.try_acquire(&self.endpoint_id)?;

        let deadline = Instant::now() + self.invocation_timeout;
        let token = tokio::select! {
            _ = cancel.cancelled() => {
                self.resilience.breaker.record_neutral();
                return Err(Error::Cancelled);
            }
            result = self.resilience.limiter.acquire(deadline) => result,
        };
        if let Err(e) = token {
            // Token never became available inside the call deadline.
            self.resilience.breaker.record_failure(&self.endpoint_id);
            return Err(e);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                self.resilience.breaker.record_neutral();
                return Err(Error::Cancelled);
            }
            outcome = tokio::time::timeout(remaining, self.client.invoke(ctx, method, params)) => outcome,
        };

        match outcome {
            Ok(Ok(raw)) => {
                self.resilience.breaker.record_success();
                Ok(raw)
            }
            Ok(Err(error)) => {
                match &error {
                    Error::Cancelled => self.resilience.breaker.record_neutral(),
                    Error::AuthenticationFailed { .. } => {
                        self.resilience.breaker.trip_soft(&self.endpoint_id)
                    }
                    e if e.counts_as_breaker_failure() => {
                        self.resilience.breaker.record_failure(&self.endpoint_id)
                    }
                    // The endpoint answered; NotFound and InvalidRequest do
                    // not indicate ill health.
                    _ => self.resilience.breaker.record_success(),
                }
                Err(error)
            }
            Err(_elapsed) => {
                self.resilience.breaker.record_failure(&self.endpoint_id);
                Err(Error::timeout(self.invocation_timeout))
            }
        }
    }
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let spread = jitter.min(1.0);
    let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}
