//! Per-investigation entity graph.
//!
//! An arena of nodes keyed by canonical ids; every cross-reference is an
//! id, never an owning pointer. The graph is mutated only during ingestion
//! and frozen before analyzers run; writes after freezing fail with
//! `GraphFrozen`. Given the same ingestion stream the frozen graph
//! serializes byte-identically.

pub mod builder;
mod types;

pub use builder::{GraphBuilder, ShapeMapper};
pub use types::{keys, Edge, Node, NodeType, Relationship};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::error::{Error, Result};

/// Aggregate counts for the external result shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    /// Total nodes
    pub node_count: usize,
    /// Total edges
    pub edge_count: usize,
    /// Node counts by type
    pub by_node_type: BTreeMap<String, usize>,
    /// Edge counts by relationship
    pub by_edge_type: BTreeMap<String, usize>,
}

/// The labeled multigraph of entities built from stage results.
#[derive(Debug, Default)]
pub struct EntityGraph {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<(String, String, Relationship), Edge>,
    /// Adjacency by node id, kept in both directions for neighbor queries.
    outgoing: HashMap<String, BTreeSet<(String, Relationship)>>,
    incoming: HashMap<String, BTreeSet<(String, Relationship)>>,
    frozen: bool,
}

impl EntityGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the graph has been frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Freeze the graph; all subsequent writes fail.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Insert a node or merge it into the existing node with the same id.
    ///
    /// Merge contract: provenance is unioned, array attributes are
    /// set-unioned, scalar attributes follow newest-wins on the
    /// contribution's fetch time.
    pub fn upsert_node(
        &mut self,
        id: impl Into<String>,
        node_type: NodeType,
        attributes: serde_json::Map<String, Value>,
        provenance: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        if self.frozen {
            return Err(Error::GraphFrozen);
        }
        let id = id.into();
        let provenance = provenance.into();

        match self.nodes.get_mut(&id) {
            Some(existing) => {
                let newer = fetched_at >= existing.updated_at;
                for (key, value) in attributes {
                    merge_attribute(&mut existing.attributes, key, value, newer);
                }
                existing.provenance.insert(provenance);
                if newer {
                    existing.updated_at = fetched_at;
                }
            }
            None => {
                self.nodes.insert(
                    id.clone(),
                    Node {
                        id,
                        node_type,
                        attributes,
                        provenance: BTreeSet::from([provenance]),
                        updated_at: fetched_at,
                    },
                );
            }
        }
        Ok(())
    }

    /// Insert an edge or collapse it into the existing one with the same
    /// `(from, to, relationship)` triple, incrementing its weight.
    pub fn upsert_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        relationship: Relationship,
        attributes: serde_json::Map<String, Value>,
        provenance: impl Into<String>,
    ) -> Result<()> {
        if self.frozen {
            return Err(Error::GraphFrozen);
        }
        let from = from.into();
        let to = to.into();
        let provenance = provenance.into();
        let key = (from.clone(), to.clone(), relationship);

        match self.edges.get_mut(&key) {
            Some(existing) => {
                existing.weight += 1;
                existing.provenance.insert(provenance);
                for (attr_key, value) in attributes {
                    existing.attributes.entry(attr_key).or_insert(value);
                }
            }
            None => {
                self.edges.insert(
                    key,
                    Edge {
                        from: from.clone(),
                        to: to.clone(),
                        relationship,
                        weight: 1,
                        attributes,
                        provenance: BTreeSet::from([provenance]),
                    },
                );
                self.outgoing
                    .entry(from.clone())
                    .or_default()
                    .insert((to.clone(), relationship));
                self.incoming
                    .entry(to)
                    .or_default()
                    .insert((from, relationship));
            }
        }
        Ok(())
    }

    /// The node with the given id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes of a type, ordered by id.
    pub fn nodes_by_type(&self, node_type: NodeType) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.node_type == node_type)
            .collect()
    }

    /// All edges with a relationship, ordered by (from, to).
    pub fn edges_by_relationship(&self, relationship: Relationship) -> Vec<&Edge> {
        self.edges
            .values()
            .filter(|e| e.relationship == relationship)
            .collect()
    }

    /// Neighbor ids in either direction, optionally filtered by
    /// relationship, ordered and deduplicated.
    pub fn neighbors(&self, node_id: &str, relationship: Option<Relationship>) -> Vec<&str> {
        let mut result: BTreeSet<&str> = BTreeSet::new();
        if let Some(out) = self.outgoing.get(node_id) {
            for (to, rel) in out {
                if relationship.is_none_or(|r| r == *rel) {
                    result.insert(to.as_str());
                }
            }
        }
        if let Some(inc) = self.incoming.get(node_id) {
            for (from, rel) in inc {
                if relationship.is_none_or(|r| r == *rel) {
                    result.insert(from.as_str());
                }
            }
        }
        result.into_iter().collect()
    }

    /// Outgoing neighbor ids, optionally filtered by relationship.
    pub fn neighbors_out(&self, node_id: &str, relationship: Option<Relationship>) -> Vec<&str> {
        self.outgoing
            .get(node_id)
            .map(|set| {
                set.iter()
                    .filter(|(_, rel)| relationship.is_none_or(|r| r == *rel))
                    .map(|(to, _)| to.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Incoming neighbor ids, optionally filtered by relationship.
    pub fn neighbors_in(&self, node_id: &str, relationship: Option<Relationship>) -> Vec<&str> {
        self.incoming
            .get(node_id)
            .map(|set| {
                set.iter()
                    .filter(|(_, rel)| relationship.is_none_or(|r| r == *rel))
                    .map(|(from, _)| from.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Shortest undirected path between two nodes, bounded by `max_hops`.
    /// Returns the node ids from `a` to `b` inclusive.
    pub fn shortest_path(&self, a: &str, b: &str, max_hops: usize) -> Option<Vec<String>> {
        if !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return None;
        }
        if a == b {
            return Some(vec![a.to_string()]);
        }

        let mut predecessor: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(a, 0)]);
        let mut visited: BTreeSet<&str> = BTreeSet::from([a]);

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }
            for neighbor in self.neighbors(current, None) {
                if !visited.insert(neighbor) {
                    continue;
                }
                predecessor.insert(neighbor, current);
                if neighbor == b {
                    let mut path = vec![b.to_string()];
                    let mut cursor = b;
                    while let Some(prev) = predecessor.get(cursor) {
                        path.push((*prev).to_string());
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back((neighbor, depth + 1));
            }
        }
        None
    }

    /// Node count.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edge count.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Aggregate counts for the result shape.
    pub fn summary(&self) -> GraphSummary {
        let mut by_node_type = BTreeMap::new();
        for node in self.nodes.values() {
            *by_node_type.entry(node.node_type.to_string()).or_insert(0) += 1;
        }
        let mut by_edge_type = BTreeMap::new();
        for edge in self.edges.values() {
            *by_edge_type
                .entry(edge.relationship.to_string())
                .or_insert(0) += 1;
        }
        GraphSummary {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            by_node_type,
            by_edge_type,
        }
    }

    /// Canonical serialization: nodes sorted by id, edges sorted by
    /// (from, to, relationship). Identical ingestion streams produce
    /// byte-identical output.
    pub fn to_canonical_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            nodes: Vec<&'a Node>,
            edges: Vec<&'a Edge>,
        }
        let canonical = Canonical {
            nodes: self.nodes.values().collect(),
            edges: self.edges.values().collect(),
        };
        Ok(serde_json::to_string(&canonical)?)
    }
}

/// Merge one attribute into a node's attribute map.
fn merge_attribute(
    attributes: &mut serde_json::Map<String, Value>,
    key: String,
    value: Value,
    newer: bool,
) {
    match attributes.get_mut(&key) {
        Some(Value::Array(existing)) => {
            // Multi-valued attributes union as sets.
            let incoming = match value {
                Value::Array(items) => items,
                single => vec![single],
            };
            for item in incoming {
                if !existing.contains(&item) {
                    existing.push(item);
                }
            }
        }
        Some(existing) => {
            if newer {
                *existing = value;
            }
        }
        None => {
            attributes.insert(key, value);
        }
    }
}
