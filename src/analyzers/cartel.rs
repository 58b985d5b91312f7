//! Cartel detection over the co-bidding projection of suppliers.

use std::collections::{BTreeMap, BTreeSet};

use super::{Analyzer, Anomaly, AnomalyKind, Severity};
use crate::config::AnalyzerConfig;
use crate::graph::{EntityGraph, NodeType, Relationship};

/// Projects supplier→process participation onto a co-bidding graph (two
/// suppliers connect when they bid on enough of the same processes) and
/// flags dense clusters of three or more suppliers.
pub struct CartelCliqueAnalyzer;

impl Analyzer for CartelCliqueAnalyzer {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::CartelClique
    }

    fn analyze(&self, graph: &EntityGraph, config: &AnalyzerConfig) -> Vec<Anomaly> {
        let min_shared = config.cartel.min_shared_processes;
        let min_size = config.cartel.min_clique_size;
        let min_density = config.cartel.min_density;

        // Unordered supplier pair → number of shared bidding processes.
        let mut shared: BTreeMap<(String, String), u32> = BTreeMap::new();
        for process in graph.nodes_by_type(NodeType::BiddingProcess) {
            let bidders: Vec<&str> = graph
                .neighbors_in(&process.id, Some(Relationship::SuppliedTo))
                .into_iter()
                .filter(|id| id.starts_with("supplier:"))
                .collect();
            for i in 0..bidders.len() {
                for j in (i + 1)..bidders.len() {
                    let pair = ordered_pair(bidders[i], bidders[j]);
                    *shared.entry(pair).or_insert(0) += 1;
                }
            }
        }

        // Co-bidding adjacency, thresholded.
        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for ((a, b), count) in &shared {
            if *count >= min_shared {
                adjacency.entry(a.as_str()).or_default().insert(b.as_str());
                adjacency.entry(b.as_str()).or_default().insert(a.as_str());
            }
        }

        // Connected components of the co-bidding graph.
        let mut anomalies = Vec::new();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let members: Vec<&str> = adjacency.keys().copied().collect();
        for start in members {
            if visited.contains(start) {
                continue;
            }
            let mut component: BTreeSet<&str> = BTreeSet::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if !visited.insert(node) {
                    continue;
                }
                component.insert(node);
                if let Some(neighbors) = adjacency.get(node) {
                    stack.extend(neighbors.iter().copied());
                }
            }
            if component.len() < min_size {
                continue;
            }

            let n = component.len();
            let possible = (n * (n - 1) / 2) as f64;
            let edges = shared
                .iter()
                .filter(|((a, b), count)| {
                    **count >= min_shared
                        && component.contains(a.as_str())
                        && component.contains(b.as_str())
                })
                .count() as f64;
            let density = edges / possible;
            if density < min_density {
                continue;
            }

            let severity = if density >= 0.9 && n >= 4 {
                Severity::Critical
            } else if density >= 0.8 {
                Severity::High
            } else {
                Severity::Medium
            };

            let affected: BTreeSet<String> =
                component.iter().map(|s| (*s).to_string()).collect();
            let fingerprint = affected.iter().cloned().collect::<Vec<_>>().join(",");
            anomalies.push(
                Anomaly::new(self.kind(), severity, density, affected, &fingerprint)
                    .with_evidence("cluster_size", n)
                    .with_evidence("edge_density", density)
                    .with_evidence("min_shared_processes", min_shared)
                    .with_recommendation(
                        "Cruzar as propostas destes fornecedores nos certames compartilhados",
                    ),
            );
        }
        anomalies
    }
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    /// Wire `suppliers` to `process_count` shared bidding processes.
    fn co_bid(graph: &mut EntityGraph, suppliers: &[&str], process_prefix: &str, process_count: usize) {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for supplier in suppliers {
            graph
                .upsert_node(
                    *supplier,
                    NodeType::Supplier,
                    serde_json::Map::new(),
                    "portal",
                    now,
                )
                .unwrap();
        }
        for index in 0..process_count {
            let process_id = format!("bidding_process:{}-{:03}", process_prefix, index);
            graph
                .upsert_node(
                    &process_id,
                    NodeType::BiddingProcess,
                    serde_json::Map::new(),
                    "portal",
                    now,
                )
                .unwrap();
            for supplier in suppliers {
                graph
                    .upsert_edge(
                        *supplier,
                        &process_id,
                        Relationship::SuppliedTo,
                        serde_json::Map::new(),
                        "portal",
                    )
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_trio_co_bidding_flagged() {
        let mut graph = EntityGraph::new();
        co_bid(
            &mut graph,
            &["supplier:a", "supplier:b", "supplier:c"],
            "pg",
            6,
        );
        graph.freeze();

        let anomalies = CartelCliqueAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].affected_nodes.len(), 3);
        assert_eq!(anomalies[0].evidence["edge_density"], 1.0);
    }

    #[test]
    fn test_few_shared_processes_clean() {
        let mut graph = EntityGraph::new();
        // Below the 5-shared-processes default.
        co_bid(
            &mut graph,
            &["supplier:a", "supplier:b", "supplier:c"],
            "pg",
            3,
        );
        graph.freeze();

        let anomalies = CartelCliqueAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_pair_is_not_a_cluster() {
        let mut graph = EntityGraph::new();
        co_bid(&mut graph, &["supplier:a", "supplier:b"], "pg", 10);
        graph.freeze();

        let anomalies = CartelCliqueAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_sparse_component_below_density_clean() {
        let mut graph = EntityGraph::new();
        // A chain a—b—c—d: 3 edges of 6 possible, density 0.5.
        co_bid(&mut graph, &["supplier:a", "supplier:b"], "p1", 6);
        co_bid(&mut graph, &["supplier:b", "supplier:c"], "p2", 6);
        co_bid(&mut graph, &["supplier:c", "supplier:d"], "p3", 6);
        graph.freeze();

        let anomalies = CartelCliqueAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_quad_full_density_is_critical() {
        let mut graph = EntityGraph::new();
        co_bid(
            &mut graph,
            &["supplier:a", "supplier:b", "supplier:c", "supplier:d"],
            "pg",
            8,
        );
        graph.freeze();

        let anomalies = CartelCliqueAnalyzer.analyze(&graph, &AnalyzerConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::Critical);
    }
}
