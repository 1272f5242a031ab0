//! Retrying, circuit-gated upstream transport.
//!
//! # Responsibilities
//! - Run each attempt inside the circuit breaker and under a timeout
//! - Retry retriable failures (network, timeout, 5xx, 429) with bounded backoff
//! - Fail immediately on anything retrying cannot fix
//!
//! # Design Decisions
//! - Non-idempotent operations are never retried unless the upstream
//!   deduplicates; then one idempotency key is shared by all attempts
//! - A timed-out attempt is a retriable failure, never a success
//! - A circuit that opens mid-sequence ends the sequence

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::observability::metrics::MetricsCollector;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::upstream::types::{Outcome, RequestDescriptor, TransportError};
use crate::upstream::Upstream;

pub struct RetryingTransport {
    upstream: Arc<dyn Upstream>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsCollector>,
    policy: ArcSwap<RetryConfig>,
}

impl RetryingTransport {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsCollector>,
        policy: RetryConfig,
    ) -> Self {
        Self {
            upstream,
            breaker,
            metrics,
            policy: ArcSwap::from_pointee(policy),
        }
    }

    pub fn set_policy(&self, policy: RetryConfig) {
        self.policy.store(Arc::new(policy));
    }

    pub fn policy(&self) -> Arc<RetryConfig> {
        self.policy.load_full()
    }

    /// Retries allowed after the first attempt for this request.
    pub fn retry_budget(&self, descriptor: &RequestDescriptor) -> u32 {
        let policy = self.policy.load();
        if descriptor.idempotent || policy.retry_non_idempotent {
            policy.attempts
        } else {
            0
        }
    }

    /// Issue `descriptor`, retrying per policy.
    pub async fn call(&self, descriptor: &RequestDescriptor) -> Outcome {
        let policy = self.policy.load_full();
        let retries = self.retry_budget(descriptor);

        let keyed;
        let descriptor = if !descriptor.idempotent && retries > 0 && descriptor.idempotency_key.is_none() {
            let mut d = descriptor.clone();
            d.idempotency_key = Some(Uuid::new_v4().to_string());
            keyed = d;
            &keyed
        } else {
            descriptor
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let error = match self.breaker.execute(move || self.attempt(descriptor)).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = %descriptor.operation, attempt, "Upstream call succeeded after retry");
                    }
                    return Outcome::Success(value);
                }
                Err(BreakerError::Open) => {
                    tracing::debug!(operation = %descriptor.operation, attempt, "Circuit open, skipping upstream call");
                    return Outcome::TerminalFailure(TransportError::CircuitOpen);
                }
                Err(BreakerError::Inner(e)) => e,
            };

            if !error.is_retriable() {
                tracing::debug!(operation = %descriptor.operation, error = %error, "Non-retriable upstream failure");
                return Outcome::TerminalFailure(error);
            }
            if attempt > retries {
                tracing::warn!(
                    operation = %descriptor.operation,
                    attempts = attempt,
                    error = %error,
                    "Upstream call failed, retries exhausted"
                );
                return Outcome::RetriableFailure(error);
            }

            let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms, policy.jitter);
            self.metrics.record_retry(descriptor.operation);
            tracing::info!(
                operation = %descriptor.operation,
                attempt,
                delay = ?delay,
                error = %error,
                "Retrying upstream call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, descriptor: &RequestDescriptor) -> Result<Value, TransportError> {
        match tokio::time::timeout(descriptor.timeout, self.upstream.send(descriptor)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(descriptor.timeout)),
        }
    }
}
