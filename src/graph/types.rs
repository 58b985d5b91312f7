//! Node and edge types for the entity graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Types of nodes in the entity graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A public contract
    Contract,
    /// A company identified by CNPJ
    Supplier,
    /// A government organization
    Organization,
    /// A natural person identified by CPF
    Person,
    /// A geographic reference
    Location,
    /// A standalone monetary figure
    Money,
    /// A bidding process contracts were awarded through
    BiddingProcess,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Contract => "contract",
            Self::Supplier => "supplier",
            Self::Organization => "organization",
            Self::Person => "person",
            Self::Location => "location",
            Self::Money => "money",
            Self::BiddingProcess => "bidding_process",
        };
        write!(f, "{}", s)
    }
}

/// Typed, directed relationships between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    /// Contract → Organization that awarded it
    ContractedBy,
    /// Supplier → Contract or BiddingProcess it supplied/bid on
    SuppliedTo,
    /// Entity → Location
    LocatedIn,
    /// Organization → Person responsible
    ManagedBy,
    /// Person → Supplier ownership/partnership
    PartnerOf,
    /// Donor → recipient
    DonatedTo,
    /// Flagged connection between entities
    SuspiciousLink,
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ContractedBy => "contracted_by",
            Self::SuppliedTo => "supplied_to",
            Self::LocatedIn => "located_in",
            Self::ManagedBy => "managed_by",
            Self::PartnerOf => "partner_of",
            Self::DonatedTo => "donated_to",
            Self::SuspiciousLink => "suspicious_link",
        };
        write!(f, "{}", s)
    }
}

/// A node in the entity graph.
///
/// `id` is the canonical key for the real-world entity; two ingestions of
/// the same entity merge into one node. Attributes use a sorted map so the
/// frozen graph serializes canonically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Canonical node id
    pub id: String,
    /// Node type
    pub node_type: NodeType,
    /// Merged attributes
    pub attributes: serde_json::Map<String, Value>,
    /// Endpoints that contributed to this node; never empty
    pub provenance: BTreeSet<String>,
    /// Fetch time of the newest contribution, drives scalar merge
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A directed edge in the entity graph.
///
/// Duplicate `(from, to, relationship)` triples collapse into one edge
/// with an incremented weight and unioned provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id
    pub from: String,
    /// Target node id
    pub to: String,
    /// Relationship type
    pub relationship: Relationship,
    /// Collapse count: how many ingestions asserted this edge
    pub weight: u32,
    /// Edge attributes
    pub attributes: serde_json::Map<String, Value>,
    /// Endpoints that contributed to this edge
    pub provenance: BTreeSet<String>,
}

impl Edge {
    /// The dedup key for this edge.
    pub fn key(&self) -> (String, String, Relationship) {
        (self.from.clone(), self.to.clone(), self.relationship)
    }
}

/// Canonical node id constructors. Deterministic by construction.
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Supplier key from a canonical 14-digit CNPJ.
    pub fn supplier(cnpj: &str) -> String {
        format!("supplier:{}", cnpj)
    }

    /// Person key from a canonical 11-digit CPF.
    pub fn person(cpf: &str) -> String {
        format!("person:{}", cpf)
    }

    /// Organization key from a stable org code.
    pub fn organization(code: &str) -> String {
        format!("organization:{}", code)
    }

    /// Contract key: the (org, year, number) tuple hashed to a stable id.
    pub fn contract(org_code: &str, year: i32, number: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(org_code.as_bytes());
        hasher.update(b"|");
        hasher.update(year.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(number.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        format!("contract:{}", hex)
    }

    /// Location key from UF and optional municipality.
    pub fn location(uf: &str, municipality: Option<&str>) -> String {
        match municipality {
            Some(m) => format!(
                "location:{}:{}",
                uf.to_ascii_uppercase(),
                crate::extract::fold_for_matching(m).replace(' ', "-")
            ),
            None => format!("location:{}", uf.to_ascii_uppercase()),
        }
    }

    /// Bidding process key from org code and process number.
    pub fn bidding_process(org_code: &str, number: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(org_code.as_bytes());
        hasher.update(b"|");
        hasher.update(number.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        format!("bidding_process:{}", hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_key_is_stable() {
        let a = keys::contract("26000", 2024, "123/2024");
        let b = keys::contract("26000", 2024, "123/2024");
        assert_eq!(a, b);
        assert!(a.starts_with("contract:"));

        let c = keys::contract("26000", 2023, "123/2024");
        assert_ne!(a, c);
    }

    #[test]
    fn test_location_key_folds_municipality() {
        assert_eq!(
            keys::location("mg", Some("Belo Horizonte")),
            "location:MG:belo-horizonte"
        );
        assert_eq!(keys::location("SP", None), "location:SP");
    }

    #[test]
    fn test_key_separator_prevents_collisions() {
        assert_ne!(
            keys::contract("26", 2024, "1123"),
            keys::contract("261", 2024, "123")
        );
    }
}
