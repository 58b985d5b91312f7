//! Benford's-law analysis of contract amounts per organization.

use std::collections::BTreeSet;

use super::{stats, Analyzer, Anomaly, AnomalyKind, Severity};
use crate::config::AnalyzerConfig;
use crate::graph::{EntityGraph, NodeType, Relationship};

/// Chi-square cutoffs for df = 8 at p ≈ 0.01 and p ≈ 0.001.
const CHI_SQUARE_P01: f64 = 20.09;
const CHI_SQUARE_P001: f64 = 26.12;

/// Flags organizations whose contract amounts deviate from Benford's
/// leading-digit law, given enough amounts to make the test meaningful.
pub struct BenfordViolationAnalyzer;

impl Analyzer for BenfordViolationAnalyzer {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::BenfordViolation
    }

    fn analyze(&self, graph: &EntityGraph, config: &AnalyzerConfig) -> Vec<Anomaly> {
        let min_samples = config.benford.min_samples;
        let threshold = config.benford.chi_square_threshold;

        let mut anomalies = Vec::new();
        for organization in graph.nodes_by_type(NodeType::Organization) {
            let amounts: Vec<f64> = graph
                .neighbors_in(&organization.id, Some(Relationship::ContractedBy))
                .into_iter()
                .filter_map(|contract_id| {
                    graph
                        .node(contract_id)
                        .and_then(|c| c.attributes.get("value"))
                        .and_then(|v| v.as_f64())
                })
                .filter(|v| *v > 0.0)
                .collect();
            if amounts.len() < min_samples {
                continue;
            }
            let Some(chi_square) = stats::benford_chi_square(&amounts) else {
                continue;
            };
            if chi_square <= threshold {
                continue;
            }

            let (severity, confidence) = if chi_square > CHI_SQUARE_P001 {
                (Severity::Critical, 0.99)
            } else if chi_square > CHI_SQUARE_P01 {
                (Severity::High, 0.95)
            } else {
                (Severity::Medium, 0.9)
            };

            anomalies.push(
                Anomaly::new(
                    self.kind(),
                    severity,
                    confidence,
                    BTreeSet::from([organization.id.clone()]),
                    &format!("{:.2}", chi_square),
                )
                .with_evidence("chi_square", chi_square)
                .with_evidence("sample_size", amounts.len())
                .with_evidence("threshold", threshold)
                .with_recommendation(
                    "Auditar a formação de preços; distribuição de dígitos sugere valores arbitrados",
                ),
            );
        }
        anomalies
    }
}
