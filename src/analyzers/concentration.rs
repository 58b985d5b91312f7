//! Vendor concentration: one supplier dominating an organization's
//! contract value.

use chrono::{Months, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};

use super::{Analyzer, Anomaly, AnomalyKind, Severity};
use crate::config::AnalyzerConfig;
use crate::graph::{EntityGraph, Node, NodeType, Relationship};

/// Flags organizations whose top supplier holds more than the configured
/// share of total contract value inside the rolling window.
pub struct VendorConcentrationAnalyzer;

impl Analyzer for VendorConcentrationAnalyzer {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::VendorConcentration
    }

    fn analyze(&self, graph: &EntityGraph, config: &AnalyzerConfig) -> Vec<Anomaly> {
        let threshold = config.concentration.share_threshold;
        let window = config.concentration.window_months;

        let mut anomalies = Vec::new();
        for organization in graph.nodes_by_type(NodeType::Organization) {
            // Contracts awarded by this organization, with value, supplier
            // and signature date.
            let mut dated: Vec<(&str, f64, Option<NaiveDate>)> = Vec::new();
            for contract_id in
                graph.neighbors_in(&organization.id, Some(Relationship::ContractedBy))
            {
                let Some(contract) = graph.node(contract_id) else {
                    continue;
                };
                let Some(value) = contract.attributes.get("value").and_then(|v| v.as_f64())
                else {
                    continue;
                };
                let Some(supplier) = supplier_of(graph, contract) else {
                    continue;
                };
                dated.push((supplier, value, signed_date(contract)));
            }
            if dated.len() < 2 {
                continue;
            }

            // Rolling window anchored at the newest dated contract;
            // undated contracts stay in scope.
            let anchor = dated.iter().filter_map(|(_, _, d)| *d).max();
            let cutoff =
                anchor.and_then(|a| a.checked_sub_months(Months::new(window)));

            let mut by_supplier: BTreeMap<&str, f64> = BTreeMap::new();
            let mut total = 0.0;
            for (supplier, value, date) in &dated {
                if let (Some(cutoff), Some(date)) = (cutoff, date) {
                    if *date < cutoff {
                        continue;
                    }
                }
                *by_supplier.entry(supplier).or_insert(0.0) += value;
                total += value;
            }
            if total <= 0.0 || by_supplier.is_empty() {
                continue;
            }

            let (top_supplier, top_value) = by_supplier
                .iter()
                .max_by(|a, b| {
                    a.1.partial_cmp(b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(b.0.cmp(a.0))
                })
                .map(|(s, v)| (*s, *v))
                .unwrap_or(("", 0.0));
            let share = top_value / total;
            if share <= threshold {
                continue;
            }

            let severity = if share > 0.90 {
                Severity::Critical
            } else if share > 0.80 {
                Severity::High
            } else {
                Severity::Medium
            };
            let confidence = 1.0 - (1.0 / dated.len() as f64).clamp(0.0, 1.0);

            anomalies.push(
                Anomaly::new(
                    self.kind(),
                    severity,
                    confidence,
                    BTreeSet::from([organization.id.clone(), top_supplier.to_string()]),
                    &format!("{:.4}", share),
                )
                .with_evidence("top_supplier_share", share)
                .with_evidence("top_supplier_value", top_value)
                .with_evidence("total_value", total)
                .with_evidence("supplier_count", by_supplier.len())
                .with_evidence("window_months", window)
                .with_recommendation(
                    "Verificar se houve dispensa de licitação recorrente para o mesmo fornecedor",
                ),
            );
        }
        anomalies
    }
}

fn supplier_of<'a>(graph: &'a EntityGraph, contract: &Node) -> Option<&'a str> {
    graph
        .neighbors_in(&contract.id, Some(Relationship::SuppliedTo))
        .into_iter()
        .find(|id| id.starts_with("supplier:"))
}

fn signed_date(contract: &Node) -> Option<NaiveDate> {
    contract
        .attributes
        .get("signed_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s[..s.len().min(10)].parse().ok())
}
