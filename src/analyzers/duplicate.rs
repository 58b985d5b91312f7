//! Duplicate contract detection within an organization-year.

use std::collections::{BTreeSet, HashMap};

use super::{stats, Analyzer, Anomaly, AnomalyKind, Severity};
use crate::config::AnalyzerConfig;
use crate::graph::{EntityGraph, NodeType};

/// Flags contract pairs inside the same organization and year whose
/// values sit within the tolerance and whose descriptions are nearly
/// identical under Jaccard similarity.
pub struct DuplicateContractAnalyzer;

impl Analyzer for DuplicateContractAnalyzer {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::DuplicateContract
    }

    fn analyze(&self, graph: &EntityGraph, config: &AnalyzerConfig) -> Vec<Anomaly> {
        let tolerance = config.duplicate.value_tolerance;
        let similarity_threshold = config.duplicate.jaccard_threshold;

        // (org code, year) → candidate contracts
        let mut groups: HashMap<(String, String), Vec<Candidate<'_>>> = HashMap::new();
        for contract in graph.nodes_by_type(NodeType::Contract) {
            let Some(value) = contract.attributes.get("value").and_then(|v| v.as_f64()) else {
                continue;
            };
            let Some(description) = contract.attributes.get("description").and_then(|v| v.as_str())
            else {
                continue;
            };
            let org = contract
                .attributes
                .get("org_code")
                .and_then(|v| v.as_str())
                .unwrap_or("desconhecido")
                .to_string();
            let year = contract
                .attributes
                .get("year")
                .map(|v| v.to_string())
                .unwrap_or_default();
            groups.entry((org, year)).or_default().push(Candidate {
                id: &contract.id,
                value,
                tokens: stats::description_tokens(description),
            });
        }

        let mut anomalies = Vec::new();
        let mut keys: Vec<_> = groups.keys().cloned().collect();
        keys.sort();
        for key in keys {
            let members = &groups[&key];
            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    let (a, b) = (&members[i], &members[j]);
                    let larger = a.value.max(b.value);
                    if larger <= 0.0 || (a.value - b.value).abs() / larger > tolerance {
                        continue;
                    }
                    let similarity = stats::jaccard(&a.tokens, &b.tokens);
                    if similarity <= similarity_threshold {
                        continue;
                    }

                    let severity = if similarity > 0.97 {
                        Severity::Critical
                    } else if similarity > 0.92 {
                        Severity::High
                    } else {
                        Severity::Medium
                    };

                    anomalies.push(
                        Anomaly::new(
                            self.kind(),
                            severity,
                            similarity,
                            BTreeSet::from([a.id.to_string(), b.id.to_string()]),
                            &format!("{}|{}", key.0, key.1),
                        )
                        .with_evidence("similarity", similarity)
                        .with_evidence("value_a", a.value)
                        .with_evidence("value_b", b.value)
                        .with_estimated_impact(a.value.min(b.value))
                        .with_recommendation(
                            "Confirmar se os dois contratos cobrem o mesmo objeto e período",
                        ),
                    );
                }
            }
        }
        anomalies
    }
}

struct Candidate<'a> {
    id: &'a str,
    value: f64,
    tokens: std::collections::BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn add_contract(graph: &mut EntityGraph, id: &str, value: f64, description: &str, year: i32) {
        graph
            .upsert_node(
                id,
                NodeType::Contract,
                json!({
                    "value": value,
                    "description": description,
                    "org_code": "26000",
                    "year": year
                })
                .as_object()
                .cloned()
                .unwrap(),
                "portal",
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            )
            .unwrap();
    }

    #[test]
    fn test_near_identical_pair_flagged() {
        let mut graph = EntityGraph::new();
        add_contract(
            &mut graph,
            "contract:a",
            100_000.0,
            "Aquisição de insumos hospitalares para unidades básicas",
            2024,
        );
        add_contract(
            &mut graph,
            "contract:b",
            102_000.0,
            "Aquisição de insumos hospitalares para unidades básicas",
            2024,
        );
        graph.freeze();

        let anomalies =
            DuplicateContractAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::Critical);
        assert_eq!(anomalies[0].estimated_impact, Some(100_000.0));
    }

    #[test]
    fn test_different_values_not_compared() {
        let mut graph = EntityGraph::new();
        add_contract(
            &mut graph,
            "contract:a",
            100_000.0,
            "Aquisição de insumos hospitalares",
            2024,
        );
        add_contract(
            &mut graph,
            "contract:b",
            200_000.0,
            "Aquisição de insumos hospitalares",
            2024,
        );
        graph.freeze();

        let anomalies =
            DuplicateContractAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_different_descriptions_clean() {
        let mut graph = EntityGraph::new();
        add_contract(
            &mut graph,
            "contract:a",
            100_000.0,
            "Aquisição de insumos hospitalares",
            2024,
        );
        add_contract(
            &mut graph,
            "contract:b",
            101_000.0,
            "Serviços de manutenção predial preventiva",
            2024,
        );
        graph.freeze();

        let anomalies =
            DuplicateContractAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_different_years_not_compared() {
        let mut graph = EntityGraph::new();
        add_contract(
            &mut graph,
            "contract:a",
            100_000.0,
            "Aquisição de insumos hospitalares",
            2023,
        );
        add_contract(
            &mut graph,
            "contract:b",
            100_000.0,
            "Aquisição de insumos hospitalares",
            2024,
        );
        graph.freeze();

        let anomalies =
            DuplicateContractAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert!(anomalies.is_empty());
    }
}
