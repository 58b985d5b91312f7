//! Price deviation detection: unit prices against their cohort.

use std::collections::{BTreeSet, HashMap};

use super::{stats, Analyzer, Anomaly, AnomalyKind, Severity};
use crate::config::AnalyzerConfig;
use crate::graph::{EntityGraph, NodeType};

/// Flags contracts whose per-unit price sits far from the median of their
/// cohort (same category, year and UF), measured in MADs.
pub struct PriceDeviationAnalyzer;

impl Analyzer for PriceDeviationAnalyzer {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::PriceDeviation
    }

    fn analyze(&self, graph: &EntityGraph, config: &AnalyzerConfig) -> Vec<Anomaly> {
        let multiplier = config.price.mad_multiplier;

        // Cohort key → (contract id, unit price)
        let mut cohorts: HashMap<(String, String, String), Vec<(&str, f64)>> = HashMap::new();
        for contract in graph.nodes_by_type(NodeType::Contract) {
            let Some(price) = contract.attributes.get("unit_price").and_then(|v| v.as_f64())
            else {
                continue;
            };
            let category = attr_string(contract, "category");
            let year = attr_string(contract, "year");
            let uf = attr_string(contract, "uf");
            cohorts
                .entry((category, year, uf))
                .or_default()
                .push((contract.id.as_str(), price));
        }

        let mut anomalies = Vec::new();
        let mut keys: Vec<_> = cohorts.keys().cloned().collect();
        keys.sort();
        for key in keys {
            let members = &cohorts[&key];
            if members.len() < 3 {
                continue;
            }
            let prices: Vec<f64> = members.iter().map(|(_, p)| *p).collect();
            let (Some(center), Some(spread)) = (stats::median(&prices), stats::mad(&prices))
            else {
                continue;
            };
            if spread <= f64::EPSILON {
                continue;
            }

            let confidence = 1.0 - (1.0 / members.len() as f64).clamp(0.0, 1.0);
            for (contract_id, price) in members {
                let deviation = (price - center).abs() / spread;
                if deviation <= multiplier {
                    continue;
                }
                let severity = if deviation > 5.0 {
                    Severity::Critical
                } else if deviation > 4.0 {
                    Severity::High
                } else if deviation > 3.0 {
                    Severity::Medium
                } else {
                    Severity::Low
                };

                let mut anomaly = Anomaly::new(
                    self.kind(),
                    severity,
                    confidence,
                    BTreeSet::from([(*contract_id).to_string()]),
                    &format!("{}|{}|{}", key.0, key.1, key.2),
                )
                .with_evidence("unit_price", *price)
                .with_evidence("cohort_median", center)
                .with_evidence("cohort_mad", spread)
                .with_evidence("deviation_mads", deviation)
                .with_evidence("cohort_size", members.len())
                .with_recommendation(
                    "Comparar o preço unitário com a ata de registro de preços do período",
                );
                if *price > center {
                    anomaly = anomaly.with_estimated_impact(price - center);
                }
                anomalies.push(anomaly);
            }
        }
        anomalies
    }
}

fn attr_string(node: &crate::graph::Node, key: &str) -> String {
    node.attributes
        .get(key)
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn graph_with_prices(prices: &[f64]) -> EntityGraph {
        let mut graph = EntityGraph::new();
        for (i, price) in prices.iter().enumerate() {
            let attrs = json!({
                "unit_price": price,
                "category": "saúde",
                "year": 2024,
                "uf": "MG"
            });
            graph
                .upsert_node(
                    format!("contract:{:04}", i),
                    NodeType::Contract,
                    attrs.as_object().cloned().unwrap(),
                    "portal",
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                )
                .unwrap();
        }
        graph.freeze();
        graph
    }

    #[test]
    fn test_outlier_is_flagged() {
        // Median 10, MAD 1; 50 sits 40 MADs out.
        let graph = graph_with_prices(&[9.0, 10.0, 11.0, 10.0, 9.5, 50.0]);
        let anomalies =
            PriceDeviationAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::Critical);
        assert!(anomalies[0].affected_nodes.contains("contract:0005"));
        assert!(anomalies[0].estimated_impact.unwrap() > 0.0);
    }

    #[test]
    fn test_tight_cohort_is_clean() {
        let graph = graph_with_prices(&[9.0, 10.0, 11.0, 10.5, 9.5]);
        let anomalies =
            PriceDeviationAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_small_cohort_skipped() {
        let graph = graph_with_prices(&[10.0, 1000.0]);
        let anomalies =
            PriceDeviationAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_output_is_deterministic() {
        let graph = graph_with_prices(&[9.0, 10.0, 11.0, 10.0, 9.5, 50.0]);
        let config = AnalyzerConfig::default();
        let a = PriceDeviationAnalyzer.analyze(&graph, &config);
        let b = PriceDeviationAnalyzer.analyze(&graph, &config);
        assert_eq!(a, b);
    }
}
