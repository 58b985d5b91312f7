//! Circuit breaker, one instance per endpoint.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitConfig;
use crate::error::{Error, Result};

/// Cooldown applied when an endpoint soft-opens on authentication
/// failures. Shorter than the regular cooldown: credentials are usually
/// fixed out-of-band and the endpoint itself is healthy.
const SOFT_OPEN_COOLDOWN: Duration = Duration::from_secs(30);

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; failures are counted
    Closed,
    /// Calls short-circuit until the cooldown elapses
    Open,
    /// One probe call is allowed through
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed {
        consecutive_failures: u32,
        run_started: Option<Instant>,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        probe_in_flight: bool,
    },
}

/// Per-endpoint circuit breaker.
///
/// Closed → Open when consecutive failures reach the threshold within the
/// rolling window. Open → HalfOpen after the cooldown; HalfOpen admits a
/// single probe, closing on success and reopening on failure. The lock is
/// never held across I/O.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker from engine config, with an optional per-endpoint
    /// threshold override.
    pub fn new(config: &CircuitConfig, threshold_override: Option<u32>) -> Self {
        Self {
            threshold: threshold_override.unwrap_or(config.failure_threshold).max(1),
            window: config.window,
            cooldown: config.cooldown,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
                run_started: None,
            }),
        }
    }

    /// Admit or short-circuit a call.
    ///
    /// Returns `CircuitOpen` while open or while a half-open probe is
    /// already in flight. An admitted call MUST be concluded with
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self, endpoint_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        match &mut *inner {
            Inner::Closed { .. } => Ok(()),
            Inner::Open { until } => {
                if Instant::now() >= *until {
                    *inner = Inner::HalfOpen {
                        probe_in_flight: true,
                    };
                    tracing::debug!(endpoint_id, "breaker half-open, admitting probe");
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        endpoint_id: endpoint_id.to_string(),
                    })
                }
            }
            Inner::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Err(Error::CircuitOpen {
                        endpoint_id: endpoint_id.to_string(),
                    })
                } else {
                    *probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        if let Ok(mut inner) = self.lock() {
            match &*inner {
                Inner::HalfOpen { .. } | Inner::Closed { .. } => {
                    *inner = Inner::Closed {
                        consecutive_failures: 0,
                        run_started: None,
                    };
                }
                Inner::Open { .. } => {}
            }
        }
    }

    /// Record a failed call that counts toward tripping the breaker.
    pub fn record_failure(&self, endpoint_id: &str) {
        if let Ok(mut inner) = self.lock() {
            let now = Instant::now();
            match &mut *inner {
                Inner::Closed {
                    consecutive_failures,
                    run_started,
                } => {
                    // Restart the run when the rolling window has lapsed.
                    match run_started {
                        Some(started) if now.duration_since(*started) <= self.window => {
                            *consecutive_failures += 1;
                        }
                        _ => {
                            *consecutive_failures = 1;
                            *run_started = Some(now);
                        }
                    }
                    if *consecutive_failures >= self.threshold {
                        tracing::warn!(endpoint_id, "circuit breaker tripped open");
                        *inner = Inner::Open {
                            until: now + self.cooldown,
                        };
                    }
                }
                Inner::HalfOpen { .. } => {
                    tracing::warn!(endpoint_id, "half-open probe failed, reopening");
                    *inner = Inner::Open {
                        until: now + self.cooldown,
                    };
                }
                Inner::Open { .. } => {}
            }
        }
    }

    /// Conclude an admitted call without a health verdict (cancellation).
    ///
    /// Releases a half-open probe slot so the next caller may probe again;
    /// otherwise leaves the state untouched.
    pub fn record_neutral(&self) {
        if let Ok(mut inner) = self.lock() {
            if let Inner::HalfOpen { probe_in_flight } = &mut *inner {
                *probe_in_flight = false;
            }
        }
    }

    /// Open the breaker for the short soft window without counting toward
    /// the failure run. Used on authentication failures.
    pub fn trip_soft(&self, endpoint_id: &str) {
        if let Ok(mut inner) = self.lock() {
            if matches!(&*inner, Inner::Closed { .. }) {
                tracing::warn!(endpoint_id, "endpoint soft-opened after auth failure");
                *inner = Inner::Open {
                    until: Instant::now() + SOFT_OPEN_COOLDOWN,
                };
            }
        }
    }

    /// The observable state, resolving an elapsed cooldown to `HalfOpen`.
    pub fn state(&self) -> BreakerState {
        match self.lock() {
            Ok(inner) => match &*inner {
                Inner::Closed { .. } => BreakerState::Closed,
                Inner::Open { until } => {
                    if Instant::now() >= *until {
                        BreakerState::HalfOpen
                    } else {
                        BreakerState::Open
                    }
                }
                Inner::HalfOpen { .. } => BreakerState::HalfOpen,
            },
            Err(_) => BreakerState::Open,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| Error::internal(format!("breaker lock poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitConfig {
        CircuitConfig {
            failure_threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_threshold() {
        let breaker = CircuitBreaker::new(&config(), None);
        for _ in 0..3 {
            breaker.try_acquire("tce-mg").unwrap();
            breaker.record_failure("tce-mg");
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(
            breaker.try_acquire("tce-mg"),
            Err(Error::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_run() {
        let breaker = CircuitBreaker::new(&config(), None);
        breaker.try_acquire("a").unwrap();
        breaker.record_failure("a");
        breaker.try_acquire("a").unwrap();
        breaker.record_failure("a");
        breaker.try_acquire("a").unwrap();
        breaker.record_success();
        breaker.try_acquire("a").unwrap();
        breaker.record_failure("a");
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_lapse_restarts_run() {
        let breaker = CircuitBreaker::new(&config(), None);
        breaker.record_failure("a");
        breaker.record_failure("a");
        tokio::time::advance(Duration::from_secs(61)).await;
        breaker.record_failure("a");
        // The first two failures aged out of the window.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_probe() {
        let breaker = CircuitBreaker::new(&config(), None);
        for _ in 0..3 {
            breaker.record_failure("a");
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        // First caller gets the probe, second short-circuits.
        breaker.try_acquire("a").unwrap();
        assert!(matches!(
            breaker.try_acquire("a"),
            Err(Error::CircuitOpen { .. })
        ));

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.try_acquire("a").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(&config(), None);
        for _ in 0..3 {
            breaker.record_failure("a");
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        breaker.try_acquire("a").unwrap();
        breaker.record_failure("a");
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_override() {
        let breaker = CircuitBreaker::new(&config(), Some(1));
        breaker.record_failure("a");
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_open_recovers_quickly() {
        let breaker = CircuitBreaker::new(&config(), None);
        breaker.trip_soft("a");
        assert_eq!(breaker.state(), BreakerState::Open);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }
}
