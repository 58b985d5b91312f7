//! Static catalog of federated government API endpoints.
//!
//! The registry is built once at startup, validated fail-fast, and shared
//! read-only across investigations. Endpoint selection for a capability is
//! deterministic: category priority first, then declared rate descending,
//! then id ascending.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// A uniform operation an endpoint advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Search public contracts by filters
    SearchContracts,
    /// Search expense/payment records
    SearchExpenses,
    /// Resolve a CNPJ to company registration data
    LookupCnpj,
    /// Check sanction and debarment lists
    LookupSanctions,
    /// Fetch municipal/state population figures
    FetchPopulation,
    /// Fetch public servant rosters
    FetchServants,
    /// Catch-all informational capability for degenerate plans
    GeneralInfo,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SearchContracts => "search_contracts",
            Self::SearchExpenses => "search_expenses",
            Self::LookupCnpj => "lookup_cnpj",
            Self::LookupSanctions => "lookup_sanctions",
            Self::FetchPopulation => "fetch_population",
            Self::FetchServants => "fetch_servants",
            Self::GeneralInfo => "general_info",
        };
        write!(f, "{}", s)
    }
}

/// Endpoint category, also the first selection-ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointCategory {
    /// Federal transparency portals and registries
    Federal,
    /// State courts of accounts (TCE)
    StateTce,
    /// State CKAN open-data instances
    StateCkan,
    /// Municipal and thematic portals
    Portal,
    /// Non-government enrichment sources
    External,
}

impl std::fmt::Display for EndpointCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Federal => "federal",
            Self::StateTce => "state_tce",
            Self::StateCkan => "state_ckan",
            Self::Portal => "portal",
            Self::External => "external",
        };
        write!(f, "{}", s)
    }
}

/// A registry entry describing one external API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    /// Unique endpoint identifier
    pub id: String,
    /// Endpoint category
    pub category: EndpointCategory,
    /// Capabilities this endpoint advertises
    pub capabilities: BTreeSet<Capability>,
    /// Declared requests-per-minute budget
    pub rate_per_minute: u32,
    /// Per-call timeout
    pub timeout: Duration,
    /// Endpoint-specific breaker threshold; engine default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_threshold: Option<u32>,
    /// Ordered fallback endpoint ids
    pub fallbacks: Vec<String>,
    /// Declared stage-duration estimate used by the planner
    pub estimated_stage_duration: Duration,
    /// Geographic focus (UF code) for state-scoped endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uf: Option<String>,
}

impl ApiEndpoint {
    /// Create an endpoint with defaults suitable for most registrations.
    pub fn new(id: impl Into<String>, category: EndpointCategory) -> Self {
        Self {
            id: id.into(),
            category,
            capabilities: BTreeSet::new(),
            rate_per_minute: 60,
            timeout: Duration::from_secs(10),
            circuit_threshold: None,
            fallbacks: Vec::new(),
            estimated_stage_duration: Duration::from_secs(5),
            uf: None,
        }
    }

    /// Advertise a capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Set the rate budget.
    pub fn with_rate_per_minute(mut self, rate: u32) -> Self {
        self.rate_per_minute = rate;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set an endpoint-specific breaker threshold.
    pub fn with_circuit_threshold(mut self, threshold: u32) -> Self {
        self.circuit_threshold = Some(threshold);
        self
    }

    /// Append a fallback endpoint.
    pub fn with_fallback(mut self, endpoint_id: impl Into<String>) -> Self {
        self.fallbacks.push(endpoint_id.into());
        self
    }

    /// Set the planner's stage-duration estimate.
    pub fn with_estimated_stage_duration(mut self, estimate: Duration) -> Self {
        self.estimated_stage_duration = estimate;
        self
    }

    /// Set the geographic focus.
    pub fn with_uf(mut self, uf: impl Into<String>) -> Self {
        self.uf = Some(uf.into());
        self
    }

    /// Whether the endpoint advertises the capability.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Immutable, thread-safe catalog of [`ApiEndpoint`] entries.
#[derive(Debug, Clone)]
pub struct ApiRegistry {
    endpoints: Arc<BTreeMap<String, ApiEndpoint>>,
    category_priority: Arc<HashMap<EndpointCategory, u8>>,
}

impl ApiRegistry {
    /// Build and validate a registry.
    ///
    /// Fails with [`Error::RegistryInvalid`] when an endpoint advertises no
    /// capability, a fallback reference does not resolve, or the fallback
    /// graph contains a cycle.
    pub fn new(
        entries: Vec<ApiEndpoint>,
        category_priority: HashMap<EndpointCategory, u8>,
    ) -> Result<Self> {
        let mut endpoints = BTreeMap::new();
        for entry in entries {
            if entry.capabilities.is_empty() {
                return Err(Error::RegistryInvalid(format!(
                    "endpoint '{}' advertises no capability",
                    entry.id
                )));
            }
            if endpoints.insert(entry.id.clone(), entry).is_some() {
                return Err(Error::RegistryInvalid("duplicate endpoint id".into()));
            }
        }

        for endpoint in endpoints.values() {
            for fallback in &endpoint.fallbacks {
                if !endpoints.contains_key(fallback) {
                    return Err(Error::RegistryInvalid(format!(
                        "endpoint '{}' references unknown fallback '{}'",
                        endpoint.id, fallback
                    )));
                }
            }
        }

        Self::check_fallback_cycles(&endpoints)?;

        Ok(Self {
            endpoints: Arc::new(endpoints),
            category_priority: Arc::new(category_priority),
        })
    }

    /// Build a registry with the default category priority
    /// (federal, portal, state TCE, state CKAN, external).
    pub fn with_default_priorities(entries: Vec<ApiEndpoint>) -> Result<Self> {
        Self::new(entries, Self::default_category_priority())
    }

    /// The default category priority map.
    pub fn default_category_priority() -> HashMap<EndpointCategory, u8> {
        HashMap::from([
            (EndpointCategory::Federal, 0),
            (EndpointCategory::Portal, 1),
            (EndpointCategory::StateTce, 2),
            (EndpointCategory::StateCkan, 3),
            (EndpointCategory::External, 4),
        ])
    }

    fn check_fallback_cycles(endpoints: &BTreeMap<String, ApiEndpoint>) -> Result<()> {
        // Three-color DFS over the fallback graph.
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let mut color: HashMap<&str, u8> = HashMap::new();
        for id in endpoints.keys() {
            color.insert(id, WHITE);
        }

        for start in endpoints.keys() {
            if color[start.as_str()] != WHITE {
                continue;
            }
            // (node, next-fallback index) stack
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            color.insert(start, GRAY);

            while let Some((node, index)) = stack.pop() {
                let fallbacks = &endpoints[node].fallbacks;
                if index < fallbacks.len() {
                    stack.push((node, index + 1));
                    let next = fallbacks[index].as_str();
                    match color[next] {
                        WHITE => {
                            color.insert(next, GRAY);
                            stack.push((next, 0));
                        }
                        GRAY => {
                            return Err(Error::RegistryInvalid(format!(
                                "fallback cycle through '{}'",
                                next
                            )));
                        }
                        _ => {}
                    }
                } else {
                    color.insert(node, BLACK);
                }
            }
        }
        Ok(())
    }

    /// Look up an endpoint by id.
    pub fn lookup(&self, endpoint_id: &str) -> Result<&ApiEndpoint> {
        self.endpoints
            .get(endpoint_id)
            .ok_or_else(|| Error::not_found(endpoint_id, "endpoint not registered"))
    }

    /// Endpoints advertising a capability, deterministically ordered by
    /// (category priority, rate descending, id ascending).
    pub fn by_capability(&self, capability: Capability) -> Vec<&ApiEndpoint> {
        let mut matches: Vec<&ApiEndpoint> = self
            .endpoints
            .values()
            .filter(|e| e.has_capability(capability))
            .collect();
        matches.sort_by(|a, b| {
            let pa = self.priority_of(a.category);
            let pb = self.priority_of(b.category);
            pa.cmp(&pb)
                .then(b.rate_per_minute.cmp(&a.rate_per_minute))
                .then(a.id.cmp(&b.id))
        });
        matches
    }

    /// Ordered fallback ids for an endpoint; empty when unknown.
    pub fn fallbacks_for(&self, endpoint_id: &str) -> Vec<String> {
        self.endpoints
            .get(endpoint_id)
            .map(|e| e.fallbacks.clone())
            .unwrap_or_default()
    }

    /// All registered endpoint ids.
    pub fn endpoint_ids(&self) -> Vec<&str> {
        self.endpoints.keys().map(String::as_str).collect()
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn priority_of(&self, category: EndpointCategory) -> u8 {
        self.category_priority.get(&category).copied().unwrap_or(u8::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contracts_endpoint(id: &str, category: EndpointCategory, rate: u32) -> ApiEndpoint {
        ApiEndpoint::new(id, category)
            .with_capability(Capability::SearchContracts)
            .with_rate_per_minute(rate)
    }

    #[test]
    fn test_lookup_missing_is_not_found() {
        let registry = ApiRegistry::with_default_priorities(vec![contracts_endpoint(
            "portal-federal",
            EndpointCategory::Federal,
            60,
        )])
        .unwrap();

        assert!(registry.lookup("portal-federal").is_ok());
        assert!(matches!(
            registry.lookup("nope"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_by_capability_ordering() {
        let registry = ApiRegistry::with_default_priorities(vec![
            contracts_endpoint("tce-mg", EndpointCategory::StateTce, 120),
            contracts_endpoint("portal-federal", EndpointCategory::Federal, 30),
            contracts_endpoint("portal-compras", EndpointCategory::Federal, 90),
            contracts_endpoint("ckan-sp", EndpointCategory::StateCkan, 240),
        ])
        .unwrap();

        let ordered: Vec<&str> = registry
            .by_capability(Capability::SearchContracts)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        // Federal first (rate desc inside the category), then TCE, then CKAN.
        assert_eq!(
            ordered,
            vec!["portal-compras", "portal-federal", "tce-mg", "ckan-sp"]
        );
    }

    #[test]
    fn test_unknown_fallback_rejected() {
        let endpoint = contracts_endpoint("a", EndpointCategory::Federal, 60).with_fallback("ghost");
        let result = ApiRegistry::with_default_priorities(vec![endpoint]);
        assert!(matches!(result, Err(Error::RegistryInvalid(_))));
    }

    #[test]
    fn test_fallback_cycle_rejected() {
        let a = contracts_endpoint("a", EndpointCategory::Federal, 60).with_fallback("b");
        let b = contracts_endpoint("b", EndpointCategory::Federal, 60).with_fallback("a");
        let result = ApiRegistry::with_default_priorities(vec![a, b]);
        assert!(matches!(result, Err(Error::RegistryInvalid(_))));
    }

    #[test]
    fn test_fallback_chain_accepted() {
        let a = contracts_endpoint("a", EndpointCategory::Federal, 60).with_fallback("b");
        let b = contracts_endpoint("b", EndpointCategory::StateTce, 60).with_fallback("c");
        let c = contracts_endpoint("c", EndpointCategory::External, 60);
        let registry = ApiRegistry::with_default_priorities(vec![a, b, c]).unwrap();
        assert_eq!(registry.fallbacks_for("a"), vec!["b".to_string()]);
        assert_eq!(registry.fallbacks_for("unknown"), Vec::<String>::new());
    }

    #[test]
    fn test_empty_capabilities_rejected() {
        let endpoint = ApiEndpoint::new("bare", EndpointCategory::Portal);
        let result = ApiRegistry::with_default_priorities(vec![endpoint]);
        assert!(matches!(result, Err(Error::RegistryInvalid(_))));
    }
}
