//! Top-level orchestration: query in, investigation result out.
//!
//! `investigate` wires the pipeline end to end: entity extraction and
//! intent classification, planning, concurrent federated execution,
//! graph construction, gated anomaly analysis, and result assembly. The
//! failure policy is partial-success-by-default: stage errors surface
//! through traceability, and only terminal causes (cancellation, a
//! critical stage failing, an orchestrator bug) fail the investigation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::time::Instant;

use crate::analyzers::{self, Analyzer, Anomaly};
use crate::client::ApiClient;
use crate::config::EngineConfig;
use crate::context::InvestigationContext;
use crate::error::{Error, ErrorRecord, Result};
use crate::executor::{DataFederationExecutor, StageResult, StageStatus};
use crate::extract::{Entities, EntityExtractor};
use crate::graph::{EntityGraph, GraphBuilder, ShapeMapper};
use crate::intent::{Classification, Intent, IntentClassifier};
use crate::planner::{ExecutionPlan, ExecutionPlanner};
use crate::progress::{InvestigationSummary, NullSink, ProgressEvent, ProgressSink};
use crate::registry::{ApiRegistry, Capability};
use crate::resilience::ResilienceRegistry;
use crate::result::{InvestigationResult, InvestigationStatus};
use crate::store::InvestigationRepository;
use crate::trace::Traceability;

/// Intents whose collected evidence is run through the anomaly analyzers.
const ANALYZED_INTENTS: [Intent; 4] = [
    Intent::ContractAnomalyDetection,
    Intent::CorruptionIndicators,
    Intent::SupplierInvestigation,
    Intent::NetworkAnalysis,
];

/// Builder for [`Orchestrator`]. Everything is wired explicitly; the only
/// process-wide state is the resilience registry, which callers may share
/// across orchestrators.
pub struct OrchestratorBuilder {
    registry: ApiRegistry,
    config: EngineConfig,
    clients: HashMap<String, Arc<dyn ApiClient>>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    sink: Arc<dyn ProgressSink>,
    repository: Option<Arc<dyn InvestigationRepository>>,
    resilience: Option<Arc<ResilienceRegistry>>,
    mapper_overrides: Vec<(String, Capability, ShapeMapper)>,
}

impl OrchestratorBuilder {
    /// Register an API client for a registry endpoint.
    pub fn with_client(mut self, client: Arc<dyn ApiClient>) -> Self {
        self.clients.insert(client.endpoint_id().to_string(), client);
        self
    }

    /// Replace the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the analyzer set.
    pub fn with_analyzers(mut self, analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        self.analyzers = analyzers;
        self
    }

    /// Stream progress events to the sink.
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Persist terminal results through the repository.
    pub fn with_repository(mut self, repository: Arc<dyn InvestigationRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Share an existing process-wide resilience registry.
    pub fn with_resilience(mut self, resilience: Arc<ResilienceRegistry>) -> Self {
        self.resilience = Some(resilience);
        self
    }

    /// Register an endpoint-specific shape mapper.
    pub fn with_shape_mapper(
        mut self,
        endpoint_id: impl Into<String>,
        capability: Capability,
        mapper: ShapeMapper,
    ) -> Self {
        self.mapper_overrides
            .push((endpoint_id.into(), capability, mapper));
        self
    }

    /// Assemble the orchestrator.
    pub fn build(self) -> Orchestrator {
        let resilience = self.resilience.unwrap_or_else(|| {
            Arc::new(ResilienceRegistry::new(
                self.config.circuit.clone(),
                self.config.max_in_flight_per_endpoint,
            ))
        });
        let executor = DataFederationExecutor::new(
            self.registry.clone(),
            resilience,
            self.clients,
            self.config.clone(),
        );
        Orchestrator {
            planner: ExecutionPlanner::new(self.registry),
            classifier: IntentClassifier::new(),
            extractor: EntityExtractor::new(),
            executor,
            analyzers: self.analyzers,
            sink: self.sink,
            repository: self.repository,
            mapper_overrides: self.mapper_overrides,
            config: self.config,
        }
    }
}

/// The investigation orchestration engine.
pub struct Orchestrator {
    planner: ExecutionPlanner,
    classifier: IntentClassifier,
    extractor: EntityExtractor,
    executor: DataFederationExecutor,
    analyzers: Vec<Arc<dyn Analyzer>>,
    sink: Arc<dyn ProgressSink>,
    repository: Option<Arc<dyn InvestigationRepository>>,
    mapper_overrides: Vec<(String, Capability, ShapeMapper)>,
    config: EngineConfig,
}

impl Orchestrator {
    /// Start building an orchestrator over a registry.
    pub fn builder(registry: ApiRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registry,
            config: EngineConfig::default(),
            clients: HashMap::new(),
            analyzers: analyzers::default_analyzers(),
            sink: Arc::new(NullSink),
            repository: None,
            resilience: None,
            mapper_overrides: Vec::new(),
        }
    }

    /// Classify a query. Testing/observability surface.
    pub fn classify(&self, query: &str) -> Classification {
        self.classifier.classify(query)
    }

    /// Extract entities from a query against a context's reference clock.
    pub fn extract(&self, ctx: &InvestigationContext, query: &str) -> Entities {
        self.extractor.extract(query, ctx.reference_clock)
    }

    /// Plan a query without executing it.
    pub fn plan(&self, ctx: &InvestigationContext, query: &str) -> Result<ExecutionPlan> {
        let classification = self.classifier.classify(query);
        let entities = self.extractor.extract(query, ctx.reference_clock);
        self.planner.plan(&classification, &entities)
    }

    /// Run a full investigation for the query.
    pub async fn investigate(
        &self,
        ctx: InvestigationContext,
        query: &str,
    ) -> InvestigationResult {
        let start = Instant::now();
        tracing::info!(
            investigation_id = %ctx.investigation_id,
            "investigation started"
        );

        let classification = self.classifier.classify(query);
        let entities = self.extractor.extract(query, ctx.reference_clock);
        tracing::debug!(
            intent = %classification.intent,
            confidence = classification.confidence,
            "query classified"
        );

        // Planner runs behind a recovery boundary: a planning bug is an
        // orchestrator-terminal failure, not a crash.
        let planned = catch_unwind(AssertUnwindSafe(|| {
            self.planner.plan(&classification, &entities)
        }))
        .unwrap_or_else(|_| Err(Error::internal("planner panicked")));

        let plan = match planned {
            Ok(plan) => plan,
            Err(error @ Error::InsufficientContext { .. }) => {
                // Not enough context to execute anything: complete with a
                // single informational stage naming the missing fields.
                let result = self.short_circuit(
                    &ctx,
                    query,
                    &classification,
                    entities,
                    &error,
                    start,
                    InvestigationStatus::Completed,
                );
                return self.finish(result).await;
            }
            Err(error) => {
                let result = self.short_circuit(
                    &ctx,
                    query,
                    &classification,
                    entities,
                    &error,
                    start,
                    InvestigationStatus::Failed,
                );
                return self.finish(result).await;
            }
        };

        self.sink.emit(ProgressEvent::plan_created(&plan)).await;
        let mut stage_results = self.executor.execute(&ctx, &plan, self.sink.as_ref()).await;

        let graph = self.build_graph(&ctx, &plan, &mut stage_results, &entities);
        let graph_summary = graph.summary();

        let mut anomalies: Vec<Anomaly> = Vec::new();
        let mut analyzer_errors: Vec<ErrorRecord> = Vec::new();
        if !ctx.is_cancelled() && ANALYZED_INTENTS.contains(&classification.intent) {
            let outcomes = analyzers::run_analyzers(
                Arc::new(graph),
                Arc::new(self.config.analyzers.clone()),
                &self.analyzers,
                self.config.max_concurrent_analyzers,
                ctx.cancel_token(),
            )
            .await;
            for outcome in outcomes {
                match outcome.result {
                    Ok(found) => {
                        self.sink
                            .emit(ProgressEvent::analyzer_completed(outcome.kind, found.len()))
                            .await;
                        anomalies.extend(found);
                    }
                    Err(error) => {
                        self.sink
                            .emit(ProgressEvent::error(
                                format!("analyzer:{}", outcome.kind),
                                error.kind(),
                            ))
                            .await;
                        analyzer_errors.push(ErrorRecord::from_error(&error));
                    }
                }
            }
        }

        let mut traceability = Traceability::from_stage_results(&stage_results, ctx.started_at);
        traceability.analyzer_errors = analyzer_errors;

        let (status, error) = final_status(&ctx, &plan, &stage_results);
        let total_duration = Instant::now().duration_since(start);

        let result = InvestigationResult {
            investigation_id: ctx.investigation_id.clone(),
            context: ctx.info(query),
            intent: classification.intent,
            confidence: classification.confidence,
            entities,
            plan: Some(plan),
            stage_results,
            graph_summary,
            anomalies,
            total_duration_sec: total_duration.as_secs_f64(),
            status,
            error,
            dropped_events: self.sink.dropped_events(),
            traceability,
        };
        self.finish(result).await
    }

    /// Ingest stage records into a fresh graph and freeze it. Mapper
    /// failures are recorded on the stage that produced the payload.
    fn build_graph(
        &self,
        ctx: &InvestigationContext,
        plan: &ExecutionPlan,
        stage_results: &mut [StageResult],
        entities: &Entities,
    ) -> EntityGraph {
        let mut builder = GraphBuilder::new();
        for (endpoint_id, capability, mapper) in &self.mapper_overrides {
            builder = builder.with_mapper(endpoint_id.clone(), *capability, *mapper);
        }

        for stage_result in stage_results.iter_mut() {
            let Some(stage) = plan.stage(&stage_result.stage_id) else {
                continue;
            };
            let mut mapper_errors = Vec::new();
            for raw in &stage_result.records {
                if let Err(error) = builder.ingest(stage.capability, raw) {
                    tracing::warn!(
                        stage_id = %stage_result.stage_id,
                        endpoint_id = %raw.endpoint_id,
                        "shape mapper failed: {}",
                        error
                    );
                    mapper_errors.push(ErrorRecord::for_endpoint(&error, &raw.endpoint_id));
                }
            }
            stage_result.errors.extend(mapper_errors);
        }

        // A supplier the caller asked about stays visible even when no
        // endpoint resolved it: seed a provisional node carrying the
        // attempted endpoint as provenance.
        if !entities.cnpjs.is_empty() {
            if let Some(lookup_stage) = plan
                .stages
                .iter()
                .find(|s| s.capability == Capability::LookupCnpj)
            {
                let attempted = stage_results
                    .iter()
                    .find(|r| r.stage_id == lookup_stage.id)
                    .and_then(|r| r.endpoints_invoked.first().cloned())
                    .or_else(|| lookup_stage.endpoints.first().cloned());
                if let Some(attempted) = attempted {
                    for cnpj in &entities.cnpjs {
                        if let Err(error) = builder.ensure_supplier(cnpj, &attempted, ctx.started_at)
                        {
                            tracing::warn!("provisional supplier seed failed: {}", error);
                        }
                    }
                }
            }
        }

        builder.finish()
    }

    fn short_circuit(
        &self,
        ctx: &InvestigationContext,
        query: &str,
        classification: &Classification,
        entities: Entities,
        error: &Error,
        start: Instant,
        status: InvestigationStatus,
    ) -> InvestigationResult {
        let terminal_error = match status {
            InvestigationStatus::Failed => Some(ErrorRecord::from_error(error)),
            _ => None,
        };
        InvestigationResult {
            investigation_id: ctx.investigation_id.clone(),
            context: ctx.info(query),
            intent: classification.intent,
            confidence: classification.confidence,
            entities,
            plan: None,
            stage_results: Vec::new(),
            graph_summary: Default::default(),
            anomalies: Vec::new(),
            total_duration_sec: Instant::now().duration_since(start).as_secs_f64(),
            status,
            error: terminal_error,
            dropped_events: self.sink.dropped_events(),
            traceability: Traceability::placeholder_stage(
                "general_info",
                vec![ErrorRecord::from_error(error)],
                ctx.started_at,
            ),
        }
    }

    /// Emit the terminal event and persist the result. Storage failures
    /// are logged, never fatal.
    async fn finish(&self, result: InvestigationResult) -> InvestigationResult {
        self.sink
            .emit(ProgressEvent::investigation_completed(InvestigationSummary {
                investigation_id: result.investigation_id.to_string(),
                status: result.status.to_string(),
                anomaly_count: result.anomalies.len(),
                total_duration_ms: (result.total_duration_sec * 1000.0) as u64,
            }))
            .await;

        if let Some(repository) = &self.repository {
            if let Err(error) = repository.save(&result) {
                tracing::warn!(
                    investigation_id = %result.investigation_id,
                    "failed to persist investigation: {}",
                    error
                );
            }
        }
        tracing::info!(
            investigation_id = %result.investigation_id,
            status = %result.status,
            anomalies = result.anomalies.len(),
            "investigation finished"
        );
        result
    }
}

/// §7 propagation policy: cancellation and failed critical stages are
/// terminal; anything else completes with partial data.
fn final_status(
    ctx: &InvestigationContext,
    plan: &ExecutionPlan,
    stage_results: &[StageResult],
) -> (InvestigationStatus, Option<ErrorRecord>) {
    if ctx.is_cancelled() {
        return (
            InvestigationStatus::Failed,
            Some(ErrorRecord::from_error(&Error::Cancelled)),
        );
    }

    for stage_result in stage_results {
        if stage_result.status != StageStatus::Failed {
            continue;
        }
        let critical = plan
            .stage(&stage_result.stage_id)
            .is_some_and(|s| s.critical);
        if critical {
            let error = stage_result.errors.last().cloned().unwrap_or_else(|| {
                ErrorRecord::from_error(&Error::internal("critical stage failed"))
            });
            return (InvestigationStatus::Failed, Some(error));
        }
    }

    (InvestigationStatus::Completed, None)
}
