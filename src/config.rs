//! Engine configuration.
//!
//! Everything here is an explicit struct handed to the orchestrator at
//! construction. There is no environment-variable lookup; callers wire
//! config themselves and the defaults match the documented operational
//! values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the investigation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global per-investigation bound on concurrently running stages.
    pub max_in_flight_stages: usize,
    /// Per-endpoint bound on concurrent invocations.
    pub max_in_flight_per_endpoint: usize,
    /// Stage deadline when the plan does not override it.
    pub default_stage_timeout: Duration,
    /// Per-call deadline when the registry does not override it.
    pub default_invocation_timeout: Duration,
    /// Bound on concurrently running anomaly analyzers.
    pub max_concurrent_analyzers: usize,
    /// Circuit breaker settings shared by all endpoints.
    pub circuit: CircuitConfig,
    /// Retry policy for transient invocation failures.
    pub retry: RetryConfig,
    /// Progress sink buffering and back-pressure.
    pub progress: ProgressConfig,
    /// Per-analyzer thresholds.
    pub analyzers: AnalyzerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight_stages: 8,
            max_in_flight_per_endpoint: 4,
            default_stage_timeout: Duration::from_secs(30),
            default_invocation_timeout: Duration::from_secs(10),
            max_concurrent_analyzers: 4,
            circuit: CircuitConfig::default(),
            retry: RetryConfig::default(),
            progress: ProgressConfig::default(),
            analyzers: AnalyzerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global stage concurrency bound.
    pub fn with_max_in_flight_stages(mut self, max: usize) -> Self {
        self.max_in_flight_stages = max.max(1);
        self
    }

    /// Set the per-endpoint concurrency bound.
    pub fn with_max_in_flight_per_endpoint(mut self, max: usize) -> Self {
        self.max_in_flight_per_endpoint = max.max(1);
        self
    }

    /// Set the default stage timeout.
    pub fn with_default_stage_timeout(mut self, timeout: Duration) -> Self {
        self.default_stage_timeout = timeout;
        self
    }

    /// Set the default per-invocation timeout.
    pub fn with_default_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.default_invocation_timeout = timeout;
        self
    }

    /// Replace the circuit breaker settings.
    pub fn with_circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the progress sink settings.
    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the analyzer thresholds.
    pub fn with_analyzers(mut self, analyzers: AnalyzerConfig) -> Self {
        self.analyzers = analyzers;
        self
    }
}

/// Circuit breaker configuration, shared by every endpoint breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures within the rolling window that trip the breaker.
    pub failure_threshold: u32,
    /// Rolling window over which consecutive failures are counted.
    pub window: Duration,
    /// How long an open breaker waits before allowing a probe.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Retry policy for transient invocation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per endpoint, the first call included.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Jitter fraction applied to each delay (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// The backoff delay before the given retry, zero-based, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let millis = (self.base_backoff.as_millis() as f64 * factor).round() as u64;
        Duration::from_millis(millis).min(self.max_backoff)
    }
}

/// Progress sink buffering and back-pressure settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Bounded channel capacity.
    pub buffer_size: usize,
    /// How long a producer waits for channel space before dropping a
    /// non-data event.
    pub send_wait: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            send_wait: Duration::from_millis(50),
        }
    }
}

/// Thresholds for every anomaly analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub price: PriceDeviationConfig,
    pub concentration: VendorConcentrationConfig,
    pub temporal: TemporalSpikeConfig,
    pub duplicate: DuplicateContractConfig,
    pub payment: PaymentMismatchConfig,
    pub benford: BenfordConfig,
    pub cartel: CartelCliqueConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            price: PriceDeviationConfig::default(),
            concentration: VendorConcentrationConfig::default(),
            temporal: TemporalSpikeConfig::default(),
            duplicate: DuplicateContractConfig::default(),
            payment: PaymentMismatchConfig::default(),
            benford: BenfordConfig::default(),
            cartel: CartelCliqueConfig::default(),
        }
    }
}

/// Price deviation detection (median/MAD within a cohort).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceDeviationConfig {
    /// Deviations beyond `mad_multiplier × MAD` are flagged.
    pub mad_multiplier: f64,
}

impl Default for PriceDeviationConfig {
    fn default() -> Self {
        Self { mad_multiplier: 2.5 }
    }
}

/// Vendor concentration detection (top-supplier share of contract value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorConcentrationConfig {
    /// Top-supplier fraction above which an organization is flagged.
    pub share_threshold: f64,
    /// Rolling window, in months, over which value is aggregated.
    pub window_months: u32,
}

impl Default for VendorConcentrationConfig {
    fn default() -> Self {
        Self {
            share_threshold: 0.70,
            window_months: 12,
        }
    }
}

/// Temporal spike detection (monthly Z-score vs trailing months).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalSpikeConfig {
    /// Z-score above which a month is flagged.
    pub z_threshold: f64,
    /// Trailing months forming the baseline.
    pub trailing_months: u32,
}

impl Default for TemporalSpikeConfig {
    fn default() -> Self {
        Self {
            z_threshold: 2.0,
            trailing_months: 12,
        }
    }
}

/// Duplicate contract detection (value gate + description similarity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateContractConfig {
    /// Relative value difference below which a pair is comparable.
    pub value_tolerance: f64,
    /// Jaccard similarity above which a pair is flagged.
    pub jaccard_threshold: f64,
}

impl Default for DuplicateContractConfig {
    fn default() -> Self {
        Self {
            value_tolerance: 0.05,
            jaccard_threshold: 0.85,
        }
    }
}

/// Payment mismatch detection (contracted vs paid value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMismatchConfig {
    /// Relative mismatch above which a contract is flagged.
    pub mismatch_threshold: f64,
}

impl Default for PaymentMismatchConfig {
    fn default() -> Self {
        Self {
            mismatch_threshold: 0.50,
        }
    }
}

/// Benford leading-digit analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenfordConfig {
    /// Minimum numeric amount records in scope per organization.
    pub min_samples: usize,
    /// Chi-square statistic (df=8) above which the distribution is flagged.
    pub chi_square_threshold: f64,
}

impl Default for BenfordConfig {
    fn default() -> Self {
        Self {
            min_samples: 300,
            chi_square_threshold: 15.5,
        }
    }
}

/// Cartel detection over the co-bidding projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartelCliqueConfig {
    /// Shared bidding processes required for a co-bidding edge.
    pub min_shared_processes: u32,
    /// Minimum clique size reported.
    pub min_clique_size: usize,
    /// Minimum edge density within the clique.
    pub min_density: f64,
}

impl Default for CartelCliqueConfig {
    fn default() -> Self {
        Self {
            min_shared_processes: 5,
            min_clique_size: 3,
            min_density: 0.7,
        }
    }
}
