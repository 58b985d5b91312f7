//! Temporal spike detection: monthly contract counts against the trailing
//! baseline.

use std::collections::{BTreeMap, BTreeSet};

use super::{stats, Analyzer, Anomaly, AnomalyKind, Severity};
use crate::config::AnalyzerConfig;
use crate::graph::{EntityGraph, NodeType, Relationship};

/// Minimum trailing months required before a Z-score is meaningful.
const MIN_BASELINE_MONTHS: usize = 3;

/// Flags months where an organization's contract count spikes above the
/// trailing-months baseline.
pub struct TemporalSpikeAnalyzer;

impl Analyzer for TemporalSpikeAnalyzer {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::TemporalSpike
    }

    fn analyze(&self, graph: &EntityGraph, config: &AnalyzerConfig) -> Vec<Anomaly> {
        let z_threshold = config.temporal.z_threshold;
        let trailing = config.temporal.trailing_months as usize;

        let mut anomalies = Vec::new();
        for organization in graph.nodes_by_type(NodeType::Organization) {
            // (year, month) → contract count
            let mut monthly: BTreeMap<(i32, u32), f64> = BTreeMap::new();
            for contract_id in
                graph.neighbors_in(&organization.id, Some(Relationship::ContractedBy))
            {
                let Some(contract) = graph.node(contract_id) else {
                    continue;
                };
                let Some(date) = contract
                    .attributes
                    .get("signed_at")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s[..s.len().min(10)].parse::<chrono::NaiveDate>().ok())
                else {
                    continue;
                };
                use chrono::Datelike;
                *monthly.entry((date.year(), date.month())).or_insert(0.0) += 1.0;
            }
            if monthly.is_empty() {
                continue;
            }

            // Contiguous timeline from first to last month, zeros included.
            let first = *monthly.keys().next().unwrap_or(&(0, 1));
            let last = *monthly.keys().next_back().unwrap_or(&(0, 1));
            let mut timeline: Vec<((i32, u32), f64)> = Vec::new();
            let mut cursor = first;
            loop {
                timeline.push((cursor, monthly.get(&cursor).copied().unwrap_or(0.0)));
                if cursor == last {
                    break;
                }
                cursor = if cursor.1 == 12 {
                    (cursor.0 + 1, 1)
                } else {
                    (cursor.0, cursor.1 + 1)
                };
            }
            if timeline.len() < MIN_BASELINE_MONTHS + 1 {
                continue;
            }

            for index in MIN_BASELINE_MONTHS..timeline.len() {
                let window_start = index.saturating_sub(trailing);
                let baseline: Vec<f64> = timeline[window_start..index]
                    .iter()
                    .map(|(_, count)| *count)
                    .collect();
                let Some((mean, std)) = stats::mean_std(&baseline) else {
                    continue;
                };
                if std <= f64::EPSILON {
                    continue;
                }
                let ((year, month), count) = timeline[index];
                let z = (count - mean) / std;
                if z <= z_threshold {
                    continue;
                }

                let severity = if z > 5.0 {
                    Severity::Critical
                } else if z > 3.5 {
                    Severity::High
                } else if z > 2.5 {
                    Severity::Medium
                } else {
                    Severity::Low
                };
                let confidence = 1.0 - (1.0 / baseline.len() as f64).clamp(0.0, 1.0);

                anomalies.push(
                    Anomaly::new(
                        self.kind(),
                        severity,
                        confidence,
                        BTreeSet::from([organization.id.clone()]),
                        &format!("{:04}-{:02}", year, month),
                    )
                    .with_evidence("month", format!("{:04}-{:02}", year, month))
                    .with_evidence("contract_count", count)
                    .with_evidence("baseline_mean", mean)
                    .with_evidence("baseline_std", std)
                    .with_evidence("z_score", z)
                    .with_recommendation(
                        "Examinar os contratos do mês atípico, em especial dispensas emergenciais",
                    ),
                );
            }
        }
        anomalies
    }
}
