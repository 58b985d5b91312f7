//! Payment mismatch detection: contracted value against paid value.

use std::collections::BTreeSet;

use super::{Analyzer, Anomaly, AnomalyKind, Severity};
use crate::config::AnalyzerConfig;
use crate::graph::{EntityGraph, NodeType};

/// Flags contracts whose paid value diverges from the contracted value by
/// more than the configured fraction.
pub struct PaymentMismatchAnalyzer;

impl Analyzer for PaymentMismatchAnalyzer {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::PaymentMismatch
    }

    fn analyze(&self, graph: &EntityGraph, config: &AnalyzerConfig) -> Vec<Anomaly> {
        let threshold = config.payment.mismatch_threshold;

        let mut anomalies = Vec::new();
        for contract in graph.nodes_by_type(NodeType::Contract) {
            let Some(value) = contract.attributes.get("value").and_then(|v| v.as_f64()) else {
                continue;
            };
            let Some(paid) = contract.attributes.get("paid_value").and_then(|v| v.as_f64())
            else {
                continue;
            };
            if value <= 0.0 {
                continue;
            }

            let mismatch = (paid - value).abs() / value;
            if mismatch <= threshold {
                continue;
            }

            let severity = if mismatch > 5.0 {
                Severity::Critical
            } else if mismatch > 2.0 {
                Severity::High
            } else if mismatch > 1.0 {
                Severity::Medium
            } else {
                Severity::Low
            };

            anomalies.push(
                Anomaly::new(
                    self.kind(),
                    severity,
                    0.9,
                    BTreeSet::from([contract.id.clone()]),
                    &format!("{:.2}", mismatch),
                )
                .with_evidence("contracted_value", value)
                .with_evidence("paid_value", paid)
                .with_evidence("mismatch_ratio", mismatch)
                .with_estimated_impact((paid - value).abs())
                .with_recommendation(
                    "Conferir aditivos e notas de empenho que justifiquem a diferença",
                ),
            );
        }
        anomalies
    }
}
