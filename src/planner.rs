//! Execution planning: from intent and entities to a stage DAG.
//!
//! Each intent has a plan template listing stage specifications: a
//! capability, the entity fields that fill its parameters, and its
//! dependencies. Optional stages with missing parameters are dropped
//! (and removed from downstream dependency sets); required stages with
//! missing parameters make planning fail with the missing-field list.
//!
//! Planning is deterministic: the same classification and entities always
//! produce the same plan, plan id included.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::client::Params;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::extract::Entities;
use crate::intent::{Classification, Intent};
use crate::registry::{ApiEndpoint, ApiRegistry, Capability};

/// The wave a stage belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Pull from primary sources
    Fetch,
    /// Augment fetched data (CNPJ lookups, demographics)
    Enrich,
    /// Cross-checks feeding the graph builder
    Analyze,
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fetch => "fetch",
            Self::Enrich => "enrich",
            Self::Analyze => "analyze",
        };
        write!(f, "{}", s)
    }
}

/// How the executor may schedule independent stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelismPolicy {
    /// Run every stage whose dependencies are satisfied concurrently
    DependencyDriven,
    /// One stage at a time, in plan order
    StrictlySequential,
}

/// One unit of work in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStage {
    /// Stage identifier, unique within the plan
    pub id: String,
    /// The wave this stage belongs to
    pub stage_type: StageType,
    /// The capability invoked
    pub capability: Capability,
    /// Invocation parameters filled from the extracted entities
    pub params: Params,
    /// Stage ids that must finish first
    pub dependencies: BTreeSet<String>,
    /// Endpoint ids selected by the planner, primary first
    pub endpoints: Vec<String>,
    /// Stage deadline override; engine default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_override: Option<Duration>,
    /// Retry policy override; engine default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryConfig>,
    /// A failing critical stage fails the whole investigation
    pub critical: bool,
    /// Run even when a dependency failed
    pub independent: bool,
    /// Invoke every listed endpoint concurrently instead of walking
    /// primary-then-fallbacks
    pub fan_out: bool,
}

impl ExecutionStage {
    /// Create a stage with defaults.
    pub fn new(id: impl Into<String>, stage_type: StageType, capability: Capability) -> Self {
        Self {
            id: id.into(),
            stage_type,
            capability,
            params: Params::new(),
            dependencies: BTreeSet::new(),
            endpoints: Vec::new(),
            timeout_override: None,
            retry_policy: None,
            critical: false,
            independent: false,
            fan_out: false,
        }
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, stage_id: impl Into<String>) -> Self {
        self.dependencies.insert(stage_id.into());
        self
    }

    /// Add a selected endpoint.
    pub fn with_endpoint(mut self, endpoint_id: impl Into<String>) -> Self {
        self.endpoints.push(endpoint_id.into());
        self
    }

    /// Set a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Mark the stage critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Mark the stage independent of upstream failures.
    pub fn independent(mut self) -> Self {
        self.independent = true;
        self
    }

    /// Enable inner fan-out across the endpoint list.
    pub fn fan_out(mut self) -> Self {
        self.fan_out = true;
        self
    }

    /// Set the stage deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }
}

/// A validated DAG of stages for one investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Deterministic plan identifier
    pub plan_id: String,
    /// The intent the plan serves
    pub intent: Intent,
    /// Stages in a topological order
    pub stages: Vec<ExecutionStage>,
    /// Wave-wise duration estimate
    pub estimated_duration: Duration,
    /// Scheduling policy
    pub parallelism_policy: ParallelismPolicy,
}

impl ExecutionPlan {
    /// Assemble and validate a plan. Fails when a dependency is dangling,
    /// self-referential, or cyclic.
    pub fn new(
        plan_id: impl Into<String>,
        intent: Intent,
        stages: Vec<ExecutionStage>,
        estimated_duration: Duration,
        parallelism_policy: ParallelismPolicy,
    ) -> Result<Self> {
        validate_stages(&stages)?;
        Ok(Self {
            plan_id: plan_id.into(),
            intent,
            stages,
            estimated_duration,
            parallelism_policy,
        })
    }

    /// The stage with the given id.
    pub fn stage(&self, id: &str) -> Option<&ExecutionStage> {
        self.stages.iter().find(|s| s.id == id)
    }
}

/// Check the stage dependency relation is a DAG over existing ids.
pub fn validate_stages(stages: &[ExecutionStage]) -> Result<()> {
    let ids: HashSet<&str> = stages.iter().map(|s| s.id.as_str()).collect();
    if ids.len() != stages.len() {
        return Err(Error::internal("duplicate stage id in plan"));
    }

    for stage in stages {
        for dep in &stage.dependencies {
            if dep == &stage.id {
                return Err(Error::internal(format!(
                    "stage '{}' depends on itself",
                    stage.id
                )));
            }
            if !ids.contains(dep.as_str()) {
                return Err(Error::internal(format!(
                    "stage '{}' depends on unknown stage '{}'",
                    stage.id, dep
                )));
            }
        }
    }

    // Kahn's algorithm; leftover nodes mean a cycle.
    let mut in_degree: HashMap<&str, usize> = stages
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for stage in stages {
        for dep in &stage.dependencies {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(stage.id.as_str());
        }
    }
    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for dependent in dependents.get(id).into_iter().flatten() {
            let degree = in_degree
                .get_mut(dependent)
                .ok_or_else(|| Error::internal("dependency bookkeeping out of sync"))?;
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }
    if visited != stages.len() {
        return Err(Error::internal("stage dependency cycle"));
    }
    Ok(())
}

/// Entity fields a template stage draws its parameters from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamField {
    DateRange,
    Locations,
    Categories,
    MoneyMin,
    Cnpj,
    Organizations,
}

impl ParamField {
    fn name(self) -> &'static str {
        match self {
            Self::DateRange => "date_range",
            Self::Locations => "location",
            Self::Categories => "category",
            Self::MoneyMin => "min_value",
            Self::Cnpj => "cnpj",
            Self::Organizations => "organization",
        }
    }

    fn present_in(self, entities: &Entities) -> bool {
        match self {
            Self::DateRange => entities.date_range.is_some(),
            Self::Locations => !entities.locations.is_empty(),
            Self::Categories => !entities.categories.is_empty(),
            Self::MoneyMin => !entities.money.is_empty(),
            Self::Cnpj => !entities.cnpjs.is_empty(),
            Self::Organizations => !entities.organizations.is_empty(),
        }
    }
}

/// A template stage specification.
struct StageTemplate {
    id: &'static str,
    stage_type: StageType,
    capability: Capability,
    dependencies: &'static [&'static str],
    required: &'static [ParamField],
    optional: bool,
    independent: bool,
}

fn template_for(intent: Intent) -> &'static [StageTemplate] {
    use Capability::*;
    use ParamField::*;
    use StageType::*;

    match intent {
        Intent::ContractAnomalyDetection => &[
            StageTemplate {
                id: "fetch-contracts",
                stage_type: Fetch,
                capability: SearchContracts,
                dependencies: &[],
                required: &[],
                optional: false,
                independent: false,
            },
            StageTemplate {
                id: "enrich-demographics",
                stage_type: Enrich,
                capability: FetchPopulation,
                dependencies: &["fetch-contracts"],
                required: &[Locations],
                optional: true,
                independent: true,
            },
            StageTemplate {
                id: "analyze-sanctions",
                stage_type: Analyze,
                capability: LookupSanctions,
                dependencies: &["fetch-contracts"],
                required: &[],
                optional: false,
                independent: false,
            },
        ],
        Intent::SupplierInvestigation => &[
            StageTemplate {
                id: "lookup-supplier",
                stage_type: Fetch,
                capability: LookupCnpj,
                dependencies: &[],
                required: &[Cnpj],
                optional: false,
                independent: false,
            },
            StageTemplate {
                id: "fetch-supplier-contracts",
                stage_type: Fetch,
                capability: SearchContracts,
                dependencies: &[],
                required: &[Cnpj],
                optional: false,
                independent: false,
            },
            StageTemplate {
                id: "enrich-sanctions",
                stage_type: Enrich,
                capability: LookupSanctions,
                dependencies: &["lookup-supplier"],
                required: &[Cnpj],
                optional: false,
                independent: true,
            },
        ],
        Intent::BudgetAnalysis => &[
            StageTemplate {
                id: "fetch-expenses",
                stage_type: Fetch,
                capability: SearchExpenses,
                dependencies: &[],
                required: &[],
                optional: false,
                independent: false,
            },
            StageTemplate {
                id: "enrich-demographics",
                stage_type: Enrich,
                capability: FetchPopulation,
                dependencies: &["fetch-expenses"],
                required: &[Locations],
                optional: true,
                independent: true,
            },
            StageTemplate {
                id: "analyze-contracts",
                stage_type: Analyze,
                capability: SearchContracts,
                dependencies: &["fetch-expenses"],
                required: &[],
                optional: false,
                independent: false,
            },
        ],
        Intent::CorruptionIndicators => &[
            StageTemplate {
                id: "fetch-contracts",
                stage_type: Fetch,
                capability: SearchContracts,
                dependencies: &[],
                required: &[],
                optional: false,
                independent: false,
            },
            StageTemplate {
                id: "fetch-expenses",
                stage_type: Fetch,
                capability: SearchExpenses,
                dependencies: &[],
                required: &[],
                optional: false,
                independent: false,
            },
            StageTemplate {
                id: "enrich-sanctions",
                stage_type: Enrich,
                capability: LookupSanctions,
                dependencies: &["fetch-contracts"],
                required: &[],
                optional: false,
                independent: true,
            },
            StageTemplate {
                id: "analyze-links",
                stage_type: Analyze,
                capability: LookupCnpj,
                dependencies: &["fetch-contracts", "fetch-expenses"],
                required: &[Cnpj],
                optional: true,
                independent: false,
            },
        ],
        Intent::GeographicAnalysis => &[
            StageTemplate {
                id: "fetch-contracts",
                stage_type: Fetch,
                capability: SearchContracts,
                dependencies: &[],
                required: &[Locations],
                optional: false,
                independent: false,
            },
            StageTemplate {
                id: "enrich-population",
                stage_type: Enrich,
                capability: FetchPopulation,
                dependencies: &["fetch-contracts"],
                required: &[Locations],
                optional: false,
                independent: true,
            },
            StageTemplate {
                id: "analyze-expenses",
                stage_type: Analyze,
                capability: SearchExpenses,
                dependencies: &["enrich-population"],
                required: &[],
                optional: true,
                independent: false,
            },
        ],
        Intent::TemporalAnalysis => &[
            StageTemplate {
                id: "fetch-contracts",
                stage_type: Fetch,
                capability: SearchContracts,
                dependencies: &[],
                required: &[DateRange],
                optional: false,
                independent: false,
            },
            StageTemplate {
                id: "fetch-expenses",
                stage_type: Fetch,
                capability: SearchExpenses,
                dependencies: &[],
                required: &[DateRange],
                optional: true,
                independent: false,
            },
            StageTemplate {
                id: "enrich-demographics",
                stage_type: Enrich,
                capability: FetchPopulation,
                dependencies: &["fetch-contracts"],
                required: &[Locations],
                optional: true,
                independent: true,
            },
        ],
        Intent::NetworkAnalysis => &[
            StageTemplate {
                id: "fetch-contracts",
                stage_type: Fetch,
                capability: SearchContracts,
                dependencies: &[],
                required: &[],
                optional: false,
                independent: false,
            },
            StageTemplate {
                id: "enrich-cnpj",
                stage_type: Enrich,
                capability: LookupCnpj,
                dependencies: &["fetch-contracts"],
                required: &[Cnpj],
                optional: true,
                independent: false,
            },
            StageTemplate {
                id: "analyze-sanctions",
                stage_type: Analyze,
                capability: LookupSanctions,
                dependencies: &["enrich-cnpj"],
                required: &[],
                optional: false,
                independent: true,
            },
        ],
        Intent::GeneralInvestigation => &[StageTemplate {
            id: "general_info",
            stage_type: Fetch,
            capability: GeneralInfo,
            dependencies: &[],
            required: &[],
            optional: false,
            independent: false,
        }],
    }
}

/// Produces an [`ExecutionPlan`] from classification and entities.
#[derive(Debug, Clone)]
pub struct ExecutionPlanner {
    registry: ApiRegistry,
    /// How many endpoints a stage may list, primary first.
    max_endpoints_per_stage: usize,
}

impl ExecutionPlanner {
    /// Create a planner over a registry.
    pub fn new(registry: ApiRegistry) -> Self {
        Self {
            registry,
            max_endpoints_per_stage: 3,
        }
    }

    /// Bound the endpoint list per stage.
    pub fn with_max_endpoints_per_stage(mut self, max: usize) -> Self {
        self.max_endpoints_per_stage = max.max(1);
        self
    }

    /// Build a plan for the classified intent.
    ///
    /// Returns [`Error::InsufficientContext`] when a required stage cannot
    /// fill its parameters from the entities.
    pub fn plan(
        &self,
        classification: &Classification,
        entities: &Entities,
    ) -> Result<ExecutionPlan> {
        let templates = template_for(classification.intent);

        let mut missing: BTreeSet<&'static str> = BTreeSet::new();
        let mut skipped: HashSet<&'static str> = HashSet::new();
        for template in templates {
            let absent: Vec<&'static str> = template
                .required
                .iter()
                .filter(|f| !f.present_in(entities))
                .map(|f| f.name())
                .collect();
            if absent.is_empty() {
                continue;
            }
            if template.optional {
                skipped.insert(template.id);
            } else {
                missing.extend(absent);
            }
        }
        if !missing.is_empty() {
            return Err(Error::InsufficientContext {
                missing: missing.into_iter().map(str::to_string).collect(),
            });
        }

        let params = fill_params(entities);
        let mut stages = Vec::new();
        for template in templates {
            if skipped.contains(template.id) {
                continue;
            }
            let endpoints = self.select_endpoints(template.capability, entities);
            let dependencies: BTreeSet<String> = template
                .dependencies
                .iter()
                .filter(|d| !skipped.contains(**d))
                .map(|d| (*d).to_string())
                .collect();

            stages.push(ExecutionStage {
                id: template.id.to_string(),
                stage_type: template.stage_type,
                capability: template.capability,
                params: params.clone(),
                dependencies,
                endpoints,
                timeout_override: None,
                retry_policy: None,
                critical: false,
                independent: template.independent,
                fan_out: false,
            });
        }

        let estimated_duration = self.estimate_duration(&stages);
        let plan_id = deterministic_plan_id(classification.intent, entities);

        ExecutionPlan::new(
            plan_id,
            classification.intent,
            stages,
            estimated_duration,
            ParallelismPolicy::DependencyDriven,
        )
    }

    /// Endpoints for a capability, filtered by geographic context: when
    /// the query pins states, endpoints focused on another state are
    /// excluded; nation-wide endpoints always qualify.
    fn select_endpoints(&self, capability: Capability, entities: &Entities) -> Vec<String> {
        let ufs = entities.ufs();
        self.registry
            .by_capability(capability)
            .into_iter()
            .filter(|e| match &e.uf {
                Some(uf) => ufs.is_empty() || ufs.contains(uf.as_str()),
                None => true,
            })
            .take(self.max_endpoints_per_stage)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Σ over waves of the slowest stage estimate within the wave.
    fn estimate_duration(&self, stages: &[ExecutionStage]) -> Duration {
        let mut total = Duration::ZERO;
        for wave in [StageType::Fetch, StageType::Enrich, StageType::Analyze] {
            let slowest = stages
                .iter()
                .filter(|s| s.stage_type == wave)
                .map(|s| self.stage_estimate(s))
                .max();
            if let Some(slowest) = slowest {
                total += slowest;
            }
        }
        total
    }

    fn stage_estimate(&self, stage: &ExecutionStage) -> Duration {
        stage
            .endpoints
            .first()
            .and_then(|id| self.registry.lookup(id).ok())
            .map(|e: &ApiEndpoint| e.estimated_stage_duration)
            .unwrap_or(Duration::from_secs(5))
    }
}

/// Fill the parameter map from every present entity field.
fn fill_params(entities: &Entities) -> Params {
    let mut params = Params::new();
    if let Some(range) = &entities.date_range {
        params.insert("start_date".into(), range.start.to_string().into());
        params.insert("end_date".into(), range.end.to_string().into());
    }
    if let Some(location) = entities.locations.iter().next() {
        params.insert("uf".into(), location.uf.clone().into());
        if let Some(municipality) = &location.municipality {
            params.insert("municipality".into(), municipality.clone().into());
        }
    }
    if let Some(category) = entities.categories.iter().next() {
        params.insert("category".into(), category.clone().into());
    }
    if let Some(min) = entities.money_min() {
        params.insert("min_value".into(), (min as f64 / 100.0).into());
    }
    if let Some(cnpj) = entities.cnpjs.iter().next() {
        params.insert("cnpj".into(), cnpj.clone().into());
    }
    if let Some(organization) = entities.organizations.iter().next() {
        params.insert("organization".into(), organization.clone().into());
    }
    params
}

/// Deterministic plan id from the planning inputs.
fn deterministic_plan_id(intent: Intent, entities: &Entities) -> String {
    let mut hasher = Sha256::new();
    hasher.update(intent.to_string().as_bytes());
    if let Ok(serialized) = serde_json::to_vec(entities) {
        hasher.update(&serialized);
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("plan-{}", hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::EntityExtractor;
    use crate::intent::IntentClassifier;
    use crate::registry::EndpointCategory;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn registry() -> ApiRegistry {
        ApiRegistry::with_default_priorities(vec![
            ApiEndpoint::new("portal-transparencia", EndpointCategory::Federal)
                .with_capability(Capability::SearchContracts)
                .with_capability(Capability::SearchExpenses)
                .with_rate_per_minute(90),
            ApiEndpoint::new("tce-mg", EndpointCategory::StateTce)
                .with_capability(Capability::SearchContracts)
                .with_uf("MG"),
            ApiEndpoint::new("tce-sp", EndpointCategory::StateTce)
                .with_capability(Capability::SearchContracts)
                .with_uf("SP"),
            ApiEndpoint::new("receita", EndpointCategory::Federal)
                .with_capability(Capability::LookupCnpj),
            ApiEndpoint::new("ceis", EndpointCategory::Federal)
                .with_capability(Capability::LookupSanctions),
            ApiEndpoint::new("ibge", EndpointCategory::External)
                .with_capability(Capability::FetchPopulation)
                .with_capability(Capability::GeneralInfo),
        ])
        .unwrap()
    }

    fn plan_for(query: &str) -> Result<ExecutionPlan> {
        let classification = IntentClassifier::new().classify(query);
        let entities = EntityExtractor::new().extract(
            query,
            chrono::Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        );
        ExecutionPlanner::new(registry()).plan(&classification, &entities)
    }

    #[test]
    fn test_contract_anomaly_plan_has_three_stages() {
        let plan =
            plan_for("Analise contratos de saúde em Minas Gerais acima de R$ 1 milhão em 2024")
                .unwrap();
        assert_eq!(plan.intent, Intent::ContractAnomalyDetection);
        let ids: Vec<&str> = plan.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["fetch-contracts", "enrich-demographics", "analyze-sanctions"]
        );
    }

    #[test]
    fn test_geographic_filter_excludes_other_states() {
        let plan =
            plan_for("Analise contratos de saúde em Minas Gerais acima de R$ 1 milhão em 2024")
                .unwrap();
        let fetch = plan.stage("fetch-contracts").unwrap();
        assert!(fetch.endpoints.contains(&"portal-transparencia".to_string()));
        assert!(fetch.endpoints.contains(&"tce-mg".to_string()));
        assert!(!fetch.endpoints.contains(&"tce-sp".to_string()));
    }

    #[test]
    fn test_params_filled_from_entities() {
        let plan =
            plan_for("Analise contratos de saúde em Minas Gerais acima de R$ 1 milhão em 2024")
                .unwrap();
        let fetch = plan.stage("fetch-contracts").unwrap();
        assert_eq!(fetch.params["start_date"], "2024-01-01");
        assert_eq!(fetch.params["end_date"], "2024-12-31");
        assert_eq!(fetch.params["uf"], "MG");
        assert_eq!(fetch.params["category"], "saúde");
        assert_eq!(fetch.params["min_value"], 1_000_000.0);
    }

    #[test]
    fn test_optional_stage_skipped_without_location() {
        let plan = plan_for("contratos com sobrepreço acima de R$ 100 mil").unwrap();
        assert!(plan.stage("enrich-demographics").is_none());
        assert!(plan.stage("fetch-contracts").is_some());
    }

    #[test]
    fn test_supplier_without_cnpj_is_insufficient() {
        let result = plan_for("Investigar fornecedor suspeito");
        match result {
            Err(Error::InsufficientContext { missing }) => {
                assert!(missing.contains(&"cnpj".to_string()));
            }
            other => panic!("expected InsufficientContext, got {:?}", other.map(|p| p.plan_id)),
        }
    }

    #[test]
    fn test_supplier_with_cnpj_plans_lookup_first() {
        let plan = plan_for("Investigar fornecedor 12.345.678/0001-95").unwrap();
        assert_eq!(plan.intent, Intent::SupplierInvestigation);
        assert_eq!(plan.stages[0].id, "lookup-supplier");
        assert_eq!(plan.stages[0].capability, Capability::LookupCnpj);
        assert_eq!(plan.stages[0].endpoints, vec!["receita".to_string()]);
    }

    #[test]
    fn test_empty_query_plans_general_info_only() {
        let plan = plan_for("").unwrap();
        assert_eq!(plan.intent, Intent::GeneralInvestigation);
        assert_eq!(plan.stages.len(), 1);
        assert_eq!(plan.stages[0].id, "general_info");
    }

    #[test]
    fn test_plan_is_deterministic() {
        let query = "contratos de saúde em MG em 2024";
        let a = plan_for(query).unwrap();
        let b = plan_for(query).unwrap();
        assert_eq!(a.plan_id, b.plan_id);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let stages = vec![
            ExecutionStage::new("a", StageType::Fetch, Capability::SearchContracts)
                .with_dependency("b"),
            ExecutionStage::new("b", StageType::Fetch, Capability::SearchContracts)
                .with_dependency("a"),
        ];
        assert!(validate_stages(&stages).is_err());
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let stages = vec![ExecutionStage::new(
            "a",
            StageType::Fetch,
            Capability::SearchContracts,
        )
        .with_dependency("a")];
        assert!(validate_stages(&stages).is_err());
    }

    #[test]
    fn test_validate_rejects_dangling_dependency() {
        let stages = vec![ExecutionStage::new(
            "a",
            StageType::Fetch,
            Capability::SearchContracts,
        )
        .with_dependency("ghost")];
        assert!(validate_stages(&stages).is_err());
    }

    #[test]
    fn test_estimated_duration_sums_wave_maxima() {
        let plan =
            plan_for("Analise contratos de saúde em Minas Gerais acima de R$ 1 milhão em 2024")
                .unwrap();
        // One fetch wave + one enrich wave + one analyze wave, all at the
        // default 5s estimate.
        assert_eq!(plan.estimated_duration, Duration::from_secs(15));
    }
}
