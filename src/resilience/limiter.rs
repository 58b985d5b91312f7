//! Token-bucket rate limiter, one instance per endpoint.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Token bucket with capacity `rate_per_minute` and a refill rate of
/// `rate_per_minute / 60` tokens per second.
///
/// `acquire` suspends until a token is available or the deadline passes.
/// The critical section only updates counters; waiting happens outside
/// the lock.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket for the declared per-minute rate. The bucket starts
    /// full, so a burst of up to `rate_per_minute` calls passes untouched.
    pub fn new(rate_per_minute: u32) -> Self {
        let capacity = f64::from(rate_per_minute.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting until `deadline` at most.
    pub async fn acquire(&self, deadline: Instant) -> Result<()> {
        loop {
            let wait = {
                let mut state = self
                    .state
                    .lock()
                    .map_err(|e| Error::internal(format!("limiter lock poisoned: {}", e)))?;

                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }

                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };

            let now = Instant::now();
            if now + wait > deadline {
                let budget = deadline.saturating_duration_since(now);
                if budget.is_zero() {
                    return Err(Error::timeout(Duration::ZERO));
                }
                tokio::time::sleep(budget).await;
                return Err(Error::timeout(budget));
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (tests and introspection).
    pub fn available(&self) -> f64 {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return 0.0,
        };
        let elapsed = Instant::now().duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * self.refill_per_sec).min(self.capacity)
    }
}
