//! Anomaly detection over the frozen entity graph.
//!
//! An analyzer is any type implementing [`Analyzer`]: a deterministic
//! function from a frozen graph and thresholds to a list of anomalies.
//! Registration is explicit through [`default_analyzers`]; the runner
//! executes analyzers concurrently under a bound and contains panics, so
//! one buggy analyzer never takes the investigation down.

mod benford;
mod cartel;
mod concentration;
mod duplicate;
mod payment;
mod price;
pub mod stats;
mod temporal;

pub use benford::BenfordViolationAnalyzer;
pub use cartel::CartelCliqueAnalyzer;
pub use concentration::VendorConcentrationAnalyzer;
pub use duplicate::DuplicateContractAnalyzer;
pub use payment::PaymentMismatchAnalyzer;
pub use price::PriceDeviationAnalyzer;
pub use temporal::TemporalSpikeAnalyzer;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::AnalyzerConfig;
use crate::error::{Error, Result};
use crate::graph::EntityGraph;

/// The closed set of anomaly kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Unit price far from its cohort median
    PriceDeviation,
    /// One supplier dominating an organization's contract value
    VendorConcentration,
    /// Monthly contracting burst against the trailing baseline
    TemporalSpike,
    /// Near-identical contracts inside one organization-year
    DuplicateContract,
    /// Paid value diverging from contracted value
    PaymentMismatch,
    /// Leading-digit distribution failing Benford's law
    BenfordViolation,
    /// Dense co-bidding cluster of suppliers
    CartelClique,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PriceDeviation => "price_deviation",
            Self::VendorConcentration => "vendor_concentration",
            Self::TemporalSpike => "temporal_spike",
            Self::DuplicateContract => "duplicate_contract",
            Self::PaymentMismatch => "payment_mismatch",
            Self::BenfordViolation => "benford_violation",
            Self::CartelClique => "cartel_clique",
        };
        write!(f, "{}", s)
    }
}

/// Anomaly severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Deterministic id derived from kind, affected nodes and fingerprint
    pub anomaly_id: String,
    /// Anomaly kind
    pub kind: AnomalyKind,
    /// Severity band
    pub severity: Severity,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Graph nodes implicated
    pub affected_nodes: BTreeSet<String>,
    /// Kind-specific supporting figures
    pub evidence: serde_json::Map<String, Value>,
    /// Suggested follow-up for the investigator
    pub recommendation: String,
    /// Estimated impact in BRL, when computable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_impact: Option<f64>,
}

impl Anomaly {
    /// Create an anomaly with a deterministic id.
    ///
    /// `fingerprint` disambiguates multiple findings of the same kind over
    /// the same nodes (a month, a cohort key); identical inputs always
    /// yield the identical id.
    pub fn new(
        kind: AnomalyKind,
        severity: Severity,
        confidence: f64,
        affected_nodes: BTreeSet<String>,
        fingerprint: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.to_string().as_bytes());
        for node in &affected_nodes {
            hasher.update(b"|");
            hasher.update(node.as_bytes());
        }
        hasher.update(b"|");
        hasher.update(fingerprint.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();

        Self {
            anomaly_id: format!("anomaly-{}", hex),
            kind,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            affected_nodes,
            evidence: serde_json::Map::new(),
            recommendation: String::new(),
            estimated_impact: None,
        }
    }

    /// Attach an evidence figure.
    pub fn with_evidence(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }

    /// Set the recommendation text.
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    /// Set the estimated impact in BRL.
    pub fn with_estimated_impact(mut self, impact: f64) -> Self {
        self.estimated_impact = Some(impact);
        self
    }
}

/// The analyzer capability: a deterministic function from a frozen graph
/// and configuration to anomalies.
pub trait Analyzer: Send + Sync {
    /// The kind of anomaly this analyzer produces.
    fn kind(&self) -> AnomalyKind;

    /// Run the analysis. Must not mutate anything and must be
    /// deterministic for a given graph and config.
    fn analyze(&self, graph: &EntityGraph, config: &AnalyzerConfig) -> Vec<Anomaly>;
}

/// The built-in analyzer set, in deterministic execution order.
pub fn default_analyzers() -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(PriceDeviationAnalyzer),
        Arc::new(VendorConcentrationAnalyzer),
        Arc::new(TemporalSpikeAnalyzer),
        Arc::new(DuplicateContractAnalyzer),
        Arc::new(PaymentMismatchAnalyzer),
        Arc::new(BenfordViolationAnalyzer),
        Arc::new(CartelCliqueAnalyzer),
    ]
}

/// Outcome of one analyzer run.
#[derive(Debug)]
pub struct AnalyzerOutcome {
    /// The analyzer kind
    pub kind: AnomalyKind,
    /// Its anomalies, or the contained failure
    pub result: Result<Vec<Anomaly>>,
}

/// Run analyzers concurrently, at most `max_concurrent` at a time.
///
/// Outcomes keep registration order. A panicking analyzer resolves to an
/// `InternalError` outcome; cancellation resolves pending analyzers to
/// `Cancelled`.
pub async fn run_analyzers(
    graph: Arc<EntityGraph>,
    config: Arc<AnalyzerConfig>,
    analyzers: &[Arc<dyn Analyzer>],
    max_concurrent: usize,
    cancel: CancellationToken,
) -> Vec<AnalyzerOutcome> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

    let tasks = analyzers.iter().map(|analyzer| {
        let analyzer = Arc::clone(analyzer);
        let graph = Arc::clone(&graph);
        let config = Arc::clone(&config);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();

        async move {
            let kind = analyzer.kind();
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return AnalyzerOutcome { kind, result: Err(Error::Cancelled) };
                }
                permit = semaphore.acquire_owned() => permit,
            };
            let _permit = match permit {
                Ok(p) => p,
                Err(_) => {
                    return AnalyzerOutcome {
                        kind,
                        result: Err(Error::internal("analyzer semaphore closed")),
                    };
                }
            };

            let handle =
                tokio::task::spawn_blocking(move || analyzer.analyze(&graph, &config));
            let result = match handle.await {
                Ok(anomalies) => Ok(anomalies),
                Err(join_error) if join_error.is_panic() => Err(Error::internal(format!(
                    "analyzer {} panicked",
                    kind
                ))),
                Err(join_error) => Err(Error::internal(join_error.to_string())),
            };
            tracing::debug!(analyzer = %kind, ok = result.is_ok(), "analyzer finished");
            AnalyzerOutcome { kind, result }
        }
    });

    join_all(tasks).await
}
