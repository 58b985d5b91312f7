//! Concurrent execution of an [`ExecutionPlan`] with resilience and
//! partial-failure semantics.
//!
//! The scheduler is dependency-driven: a stage becomes eligible when every
//! dependency finished `completed` or `partial`; a stage with a failed or
//! skipped dependency is skipped unless marked independent. Eligible
//! stages run concurrently up to the configured bound (or one at a time
//! under the strictly-sequential policy).
//!
//! Within a stage the executor invokes the planner's primary endpoint and
//! walks the registry fallback chain on fallback-eligible failures only.
//! A stage with inner fan-out invokes every listed endpoint concurrently
//! instead; responses are collected in completion order, which callers
//! must not rely on.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::client::{ApiClient, RawResult};
use crate::config::EngineConfig;
use crate::context::InvestigationContext;
use crate::error::{Error, ErrorRecord};
use crate::planner::{ExecutionPlan, ExecutionStage, ParallelismPolicy};
use crate::progress::{ProgressEvent, ProgressSink, RecordDigest};
use crate::registry::ApiRegistry;
use crate::resilience::{ResilienceRegistry, ResilientClient};

/// Terminal status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Every invoked endpoint returned records
    Completed,
    /// No endpoint returned records, or the stage deadline expired
    Failed,
    /// Not run because a dependency failed
    Skipped,
    /// Some records collected despite endpoint failures
    Partial,
}

impl StageStatus {
    /// Whether a dependent stage may proceed on this status.
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, Self::Completed | Self::Partial)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Partial => "partial",
        };
        write!(f, "{}", s)
    }
}

/// The outcome of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage identifier
    pub stage_id: String,
    /// Terminal status
    pub status: StageStatus,
    /// When the stage started (or was skipped)
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration
    pub duration: Duration,
    /// Total invocation attempts across endpoints
    pub attempts: u32,
    /// Endpoints invoked, in invocation order
    pub endpoints_invoked: Vec<String>,
    /// Collected payloads; per endpoint, response order is preserved
    pub records: Vec<RawResult>,
    /// Classified errors encountered
    pub errors: Vec<ErrorRecord>,
}

impl StageResult {
    fn skipped(stage_id: &str) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            status: StageStatus::Skipped,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            attempts: 0,
            endpoints_invoked: Vec::new(),
            records: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Whether the stage contributed records to the graph.
    pub fn has_records(&self) -> bool {
        !self.records.is_empty()
    }
}

/// Shared mutable state while a stage is in flight. Lives behind a
/// mutex so the deadline path can finalize whatever was collected.
#[derive(Default)]
struct StageCollector {
    records: Mutex<Vec<RawResult>>,
    errors: Mutex<Vec<ErrorRecord>>,
    endpoints_invoked: Mutex<Vec<String>>,
    attempts: Mutex<u32>,
}

impl StageCollector {
    fn push_record(&self, raw: RawResult) {
        if let Ok(mut records) = self.records.lock() {
            records.push(raw);
        }
    }

    fn push_error(&self, record: ErrorRecord) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(record);
        }
    }

    fn push_endpoint(&self, endpoint_id: &str) {
        if let Ok(mut endpoints) = self.endpoints_invoked.lock() {
            endpoints.push(endpoint_id.to_string());
        }
    }

    fn add_attempts(&self, attempts: u32) {
        if let Ok(mut total) = self.attempts.lock() {
            *total += attempts;
        }
    }
}

/// Executes plans against the federated endpoints.
pub struct DataFederationExecutor {
    registry: ApiRegistry,
    resilience: Arc<ResilienceRegistry>,
    clients: HashMap<String, Arc<dyn ApiClient>>,
    config: EngineConfig,
}

impl DataFederationExecutor {
    /// Create an executor.
    pub fn new(
        registry: ApiRegistry,
        resilience: Arc<ResilienceRegistry>,
        clients: HashMap<String, Arc<dyn ApiClient>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            resilience,
            clients,
            config,
        }
    }

    /// Execute the plan, emitting progress events and returning stage
    /// results ordered by start time. Stages never started because of
    /// cancellation do not appear in the result.
    pub async fn execute(
        &self,
        ctx: &InvestigationContext,
        plan: &ExecutionPlan,
        sink: &dyn ProgressSink,
    ) -> Vec<StageResult> {
        let max_in_flight = match plan.parallelism_policy {
            ParallelismPolicy::DependencyDriven => self.config.max_in_flight_stages.max(1),
            ParallelismPolicy::StrictlySequential => 1,
        };
        let cancel = ctx.cancel_token();

        let mut pending: Vec<ExecutionStage> = plan.stages.clone();
        let mut finished: HashMap<String, StageStatus> = HashMap::new();
        let mut results: Vec<StageResult> = Vec::new();
        let mut running: FuturesUnordered<_> = FuturesUnordered::new();

        loop {
            if cancel.is_cancelled() {
                // Unstarted stages are dropped, not reported.
                pending.clear();
            }

            // Schedule until a fixpoint: skipping one stage can make its
            // dependents skippable in the same pass.
            loop {
                let mut changed = false;
                let mut index = 0;
                while index < pending.len() {
                    if running.len() >= max_in_flight {
                        break;
                    }
                    let deps_terminal = pending[index]
                        .dependencies
                        .iter()
                        .all(|dep| finished.contains_key(dep));
                    if !deps_terminal {
                        index += 1;
                        continue;
                    }
                    let stage = pending.remove(index);
                    changed = true;
                    let deps_satisfied = stage
                        .dependencies
                        .iter()
                        .all(|dep| finished[dep].satisfies_dependency());
                    if deps_satisfied || stage.independent {
                        running.push(self.run_stage(ctx, stage, sink).boxed());
                    } else {
                        tracing::debug!(stage_id = %stage.id, "stage skipped, dependency failed");
                        let result = StageResult::skipped(&stage.id);
                        sink.emit(ProgressEvent::stage_completed(
                            &stage.id,
                            StageStatus::Skipped,
                            Duration::ZERO,
                        ))
                        .await;
                        finished.insert(stage.id.clone(), StageStatus::Skipped);
                        results.push(result);
                    }
                }
                if !changed || running.len() >= max_in_flight {
                    break;
                }
            }

            if running.is_empty() {
                break;
            }

            if let Some(result) = running.next().await {
                finished.insert(result.stage_id.clone(), result.status);
                results.push(result);
            }
        }

        results.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        results
    }

    async fn run_stage(
        &self,
        ctx: &InvestigationContext,
        stage: ExecutionStage,
        sink: &dyn ProgressSink,
    ) -> StageResult {
        let started_at = Utc::now();
        let start = Instant::now();
        sink.emit(ProgressEvent::stage_started(
            &stage.id,
            stage.endpoints.clone(),
        ))
        .await;

        let collector = StageCollector::default();
        let deadline = stage
            .timeout_override
            .unwrap_or(self.config.default_stage_timeout);

        let work = async {
            if stage.fan_out {
                self.invoke_fan_out(ctx, &stage, sink, &collector).await;
            } else {
                self.invoke_with_fallbacks(ctx, &stage, sink, &collector).await;
            }
        };
        let deadline_hit = tokio::time::timeout(deadline, work).await.is_err();
        if deadline_hit {
            tracing::warn!(stage_id = %stage.id, "stage deadline exceeded, cancelling in-flight work");
            collector.push_error(ErrorRecord::from_error(&Error::timeout(deadline)));
        }

        let records = collector.records.into_inner().unwrap_or_default();
        let errors = collector.errors.into_inner().unwrap_or_default();
        let endpoints_invoked = collector.endpoints_invoked.into_inner().unwrap_or_default();
        let attempts = collector.attempts.into_inner().unwrap_or_default();

        // A deadline-expired stage fails outright, even when some
        // endpoints delivered records before the cutoff.
        let status = if deadline_hit || records.is_empty() {
            StageStatus::Failed
        } else if errors.is_empty() {
            StageStatus::Completed
        } else {
            StageStatus::Partial
        };

        let duration = Instant::now().duration_since(start);
        sink.emit(ProgressEvent::stage_completed(&stage.id, status, duration))
            .await;
        tracing::debug!(
            stage_id = %stage.id,
            %status,
            records = records.len(),
            errors = errors.len(),
            "stage finished"
        );

        StageResult {
            stage_id: stage.id,
            status,
            started_at,
            duration,
            attempts,
            endpoints_invoked,
            records,
            errors,
        }
    }

    /// Primary endpoint first, then the registry fallback chain. A
    /// fallback is attempted only after a fallback-eligible failure.
    async fn invoke_with_fallbacks(
        &self,
        ctx: &InvestigationContext,
        stage: &ExecutionStage,
        sink: &dyn ProgressSink,
        collector: &StageCollector,
    ) {
        let Some(primary) = stage.endpoints.first() else {
            collector.push_error(ErrorRecord::from_error(&Error::internal(format!(
                "no endpoint selected for capability {}",
                stage.capability
            ))));
            return;
        };

        let mut chain = vec![primary.clone()];
        chain.extend(self.registry.fallbacks_for(primary));

        for endpoint_id in chain {
            match self.invoke_endpoint(ctx, stage, sink, collector, &endpoint_id).await {
                Ok(()) => return,
                Err(error) => {
                    let eligible = error.is_fallback_eligible();
                    sink.emit(ProgressEvent::error(format!("stage:{}", stage.id), error.kind()))
                        .await;
                    collector.push_error(ErrorRecord::for_endpoint(&error, &endpoint_id));
                    if !eligible {
                        return;
                    }
                    tracing::debug!(
                        stage_id = %stage.id,
                        %endpoint_id,
                        "walking fallback chain after {}",
                        error.kind()
                    );
                }
            }
        }
    }

    /// Inner fan-out: every listed endpoint invoked concurrently, no
    /// fallback walking. Results land in completion order.
    async fn invoke_fan_out(
        &self,
        ctx: &InvestigationContext,
        stage: &ExecutionStage,
        sink: &dyn ProgressSink,
        collector: &StageCollector,
    ) {
        let calls = stage.endpoints.iter().map(|endpoint_id| {
            let endpoint_id = endpoint_id.clone();
            async move {
                if let Err(error) = self
                    .invoke_endpoint(ctx, stage, sink, collector, &endpoint_id)
                    .await
                {
                    sink.emit(ProgressEvent::error(format!("stage:{}", stage.id), error.kind()))
                        .await;
                    collector.push_error(ErrorRecord::for_endpoint(&error, &endpoint_id));
                }
            }
        });
        join_all(calls).await;
    }

    async fn invoke_endpoint(
        &self,
        ctx: &InvestigationContext,
        stage: &ExecutionStage,
        sink: &dyn ProgressSink,
        collector: &StageCollector,
        endpoint_id: &str,
    ) -> Result<(), Error> {
        let endpoint = self.registry.lookup(endpoint_id)?;
        let client = self
            .clients
            .get(endpoint_id)
            .ok_or_else(|| Error::internal(format!("no client registered for '{}'", endpoint_id)))?;

        let retry = stage
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.config.retry.clone());
        let resilient = ResilientClient::new(
            Arc::clone(client),
            self.resilience.for_endpoint(endpoint),
            endpoint,
            retry,
        );

        collector.push_endpoint(endpoint_id);
        let outcome = resilient
            .invoke(ctx, &stage.capability.to_string(), &stage.params)
            .await;
        collector.add_attempts(outcome.attempts);

        let raw = outcome.result?;
        sink.emit(ProgressEvent::stage_record(
            &stage.id,
            RecordDigest::from_raw(&raw, stage.capability.to_string()),
        ))
        .await;
        collector.push_record(raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Params;
    use crate::config::{CircuitConfig, RetryConfig};
    use crate::planner::StageType;
    use crate::progress::{CollectingSink, NullSink, ProgressEventKind};
    use crate::registry::{ApiEndpoint, Capability, EndpointCategory};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted client: optional latency, then either an error or a
    /// payload. Tracks call counts and concurrency.
    struct StageClient {
        endpoint_id: String,
        latency: Duration,
        fail_first: usize,
        failure: fn(&str) -> Error,
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<String>>>,
    }

    impl StageClient {
        fn ok(endpoint_id: &str, order: Arc<Mutex<Vec<String>>>) -> Self {
            Self::scripted(endpoint_id, 0, |id| Error::transient(id, "unused"), order)
        }

        fn scripted(
            endpoint_id: &str,
            fail_first: usize,
            failure: fn(&str) -> Error,
            order: Arc<Mutex<Vec<String>>>,
        ) -> Self {
            Self {
                endpoint_id: endpoint_id.to_string(),
                latency: Duration::from_millis(10),
                fail_first,
                failure,
                calls: Arc::new(AtomicUsize::new(0)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                order,
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }
    }

    #[async_trait]
    impl ApiClient for StageClient {
        async fn invoke(
            &self,
            ctx: &InvestigationContext,
            _method: &str,
            _params: &Params,
        ) -> Result<RawResult, Error> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if let Ok(mut order) = self.order.lock() {
                order.push(self.endpoint_id.clone());
            }

            let cancel = ctx.cancel_token();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(self.latency) => {}
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                return Err((self.failure)(&self.endpoint_id));
            }
            Ok(RawResult::new(
                &self.endpoint_id,
                serde_json::json!({"numero": format!("{}", call), "objeto": "registro"}),
            ))
        }

        fn endpoint_id(&self) -> &str {
            &self.endpoint_id
        }
    }

    struct Harness {
        registry_entries: Vec<ApiEndpoint>,
        clients: HashMap<String, Arc<dyn ApiClient>>,
        order: Arc<Mutex<Vec<String>>>,
        config: EngineConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry_entries: Vec::new(),
                clients: HashMap::new(),
                order: Arc::new(Mutex::new(Vec::new())),
                config: EngineConfig::default().with_retry(RetryConfig {
                    max_attempts: 2,
                    base_backoff: Duration::from_millis(10),
                    max_backoff: Duration::from_millis(50),
                    backoff_factor: 2.0,
                    jitter: 0.0,
                }),
            }
        }

        fn endpoint(&mut self, endpoint: ApiEndpoint, client: StageClient) -> Arc<StageClient> {
            let client = Arc::new(client);
            self.clients
                .insert(endpoint.id.clone(), Arc::clone(&client) as Arc<dyn ApiClient>);
            self.registry_entries.push(endpoint);
            client
        }

        fn executor(self) -> DataFederationExecutor {
            let registry =
                ApiRegistry::with_default_priorities(self.registry_entries).unwrap();
            let resilience = Arc::new(ResilienceRegistry::new(
                CircuitConfig::default(),
                self.config.max_in_flight_per_endpoint,
            ));
            DataFederationExecutor::new(registry, resilience, self.clients, self.config)
        }
    }

    fn contracts_endpoint(id: &str) -> ApiEndpoint {
        ApiEndpoint::new(id, EndpointCategory::Federal)
            .with_capability(Capability::SearchContracts)
            .with_rate_per_minute(6000)
            .with_timeout(Duration::from_secs(5))
    }

    fn stage(id: &str, endpoint: &str) -> ExecutionStage {
        ExecutionStage::new(id, StageType::Fetch, Capability::SearchContracts)
            .with_endpoint(endpoint)
    }

    fn plan(stages: Vec<ExecutionStage>) -> ExecutionPlan {
        ExecutionPlan::new(
            "plan-test",
            crate::intent::Intent::ContractAnomalyDetection,
            stages,
            Duration::from_secs(5),
            ParallelismPolicy::DependencyDriven,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_order_enforced() {
        let mut harness = Harness::new();
        harness.endpoint(
            contracts_endpoint("ep-a"),
            StageClient::ok("ep-a", Arc::clone(&harness.order)),
        );
        harness.endpoint(
            contracts_endpoint("ep-b"),
            StageClient::ok("ep-b", Arc::clone(&harness.order)),
        );
        let order = Arc::clone(&harness.order);
        let executor = harness.executor();

        let results = executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![
                    stage("fetch", "ep-a"),
                    stage("enrich", "ep-b").with_dependency("fetch"),
                ]),
                &NullSink,
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == StageStatus::Completed));
        assert_eq!(*order.lock().unwrap(), vec!["ep-a", "ep-b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_stages_run_concurrently() {
        let mut harness = Harness::new();
        let a = harness.endpoint(
            contracts_endpoint("ep-a"),
            StageClient::ok("ep-a", Arc::clone(&harness.order))
                .with_latency(Duration::from_millis(100)),
        );
        harness.endpoint(
            contracts_endpoint("ep-b"),
            StageClient::ok("ep-b", Arc::clone(&harness.order))
                .with_latency(Duration::from_millis(100)),
        );
        let executor = harness.executor();

        let start = Instant::now();
        let results = executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![stage("fetch-1", "ep-a"), stage("fetch-2", "ep-b")]),
                &NullSink,
            )
            .await;
        let elapsed = Instant::now().duration_since(start);

        assert_eq!(results.len(), 2);
        // Both ran in one latency window rather than two.
        assert!(elapsed < Duration::from_millis(190), "elapsed {:?}", elapsed);
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_policy_serializes() {
        let mut harness = Harness::new();
        harness.endpoint(
            contracts_endpoint("ep-a"),
            StageClient::ok("ep-a", Arc::clone(&harness.order))
                .with_latency(Duration::from_millis(100)),
        );
        harness.endpoint(
            contracts_endpoint("ep-b"),
            StageClient::ok("ep-b", Arc::clone(&harness.order))
                .with_latency(Duration::from_millis(100)),
        );
        let executor = harness.executor();

        let sequential = ExecutionPlan::new(
            "plan-seq",
            crate::intent::Intent::ContractAnomalyDetection,
            vec![stage("fetch-1", "ep-a"), stage("fetch-2", "ep-b")],
            Duration::from_secs(5),
            ParallelismPolicy::StrictlySequential,
        )
        .unwrap();

        let start = Instant::now();
        executor
            .execute(&InvestigationContext::new(), &sequential, &NullSink)
            .await;
        let elapsed = Instant::now().duration_since(start);
        assert!(elapsed >= Duration::from_millis(200), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dependency_skips_dependents() {
        let mut harness = Harness::new();
        harness.endpoint(
            contracts_endpoint("ep-bad"),
            StageClient::scripted(
                "ep-bad",
                usize::MAX,
                |id| Error::invalid_request(id, "bad params"),
                Arc::clone(&harness.order),
            ),
        );
        harness.endpoint(
            contracts_endpoint("ep-ok"),
            StageClient::ok("ep-ok", Arc::clone(&harness.order)),
        );
        let executor = harness.executor();

        let results = executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![
                    stage("fetch", "ep-bad"),
                    stage("enrich", "ep-ok").with_dependency("fetch"),
                    stage("enrich-independent", "ep-ok")
                        .with_dependency("fetch")
                        .independent(),
                ]),
                &NullSink,
            )
            .await;

        let by_id: HashMap<&str, &StageResult> =
            results.iter().map(|r| (r.stage_id.as_str(), r)).collect();
        assert_eq!(by_id["fetch"].status, StageStatus::Failed);
        assert_eq!(by_id["enrich"].status, StageStatus::Skipped);
        assert_eq!(by_id["enrich-independent"].status, StageStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_walk_on_transient_failure() {
        let mut harness = Harness::new();
        let failing = harness.endpoint(
            contracts_endpoint("ep-a").with_fallback("ep-b"),
            StageClient::scripted(
                "ep-a",
                usize::MAX,
                |id| Error::transient(id, "503"),
                Arc::clone(&harness.order),
            ),
        );
        harness.endpoint(
            contracts_endpoint("ep-b"),
            StageClient::ok("ep-b", Arc::clone(&harness.order)),
        );
        let executor = harness.executor();

        let results = executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![stage("fetch", "ep-a")]),
                &NullSink,
            )
            .await;

        assert_eq!(results.len(), 1);
        let result = &results[0];
        // Primary retried to exhaustion, then the fallback produced data.
        assert_eq!(result.endpoints_invoked, vec!["ep-a", "ep-b"]);
        assert_eq!(result.status, StageStatus::Partial);
        assert_eq!(result.records.len(), 1);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_does_not_fall_back() {
        let mut harness = Harness::new();
        harness.endpoint(
            contracts_endpoint("ep-a").with_fallback("ep-b"),
            StageClient::scripted(
                "ep-a",
                usize::MAX,
                |id| Error::invalid_request(id, "bad year"),
                Arc::clone(&harness.order),
            ),
        );
        let fallback = harness.endpoint(
            contracts_endpoint("ep-b"),
            StageClient::ok("ep-b", Arc::clone(&harness.order)),
        );
        let executor = harness.executor();

        let results = executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![stage("fetch", "ep-a")]),
                &NullSink,
            )
            .await;

        assert_eq!(results[0].status, StageStatus::Failed);
        assert_eq!(results[0].endpoints_invoked, vec!["ep-a"]);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_deadline_fails_stage() {
        let mut harness = Harness::new();
        harness.endpoint(
            contracts_endpoint("ep-slow"),
            StageClient::ok("ep-slow", Arc::clone(&harness.order))
                .with_latency(Duration::from_secs(60)),
        );
        let executor = harness.executor();

        let results = executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![stage("fetch", "ep-slow")
                    .with_timeout(Duration::from_millis(200))]),
                &NullSink,
            )
            .await;

        assert_eq!(results[0].status, StageStatus::Failed);
        assert!(results[0]
            .errors
            .iter()
            .any(|e| e.kind == crate::error::ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_with_partial_records_still_fails() {
        let mut harness = Harness::new();
        harness.endpoint(
            contracts_endpoint("ep-fast"),
            StageClient::ok("ep-fast", Arc::clone(&harness.order)),
        );
        harness.endpoint(
            contracts_endpoint("ep-slow"),
            StageClient::ok("ep-slow", Arc::clone(&harness.order))
                .with_latency(Duration::from_secs(60)),
        );
        let executor = harness.executor();

        // Fan-out over a fast and a slow endpoint; the fast one delivers
        // before the stage deadline cuts the slow one off.
        let mut mixed = stage("mixed", "ep-fast")
            .fan_out()
            .with_timeout(Duration::from_millis(200));
        mixed.endpoints = vec!["ep-fast".to_string(), "ep-slow".to_string()];

        let results = executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![mixed]),
                &NullSink,
            )
            .await;

        // Records collected before the cutoff survive, but the expired
        // deadline fails the stage regardless.
        assert_eq!(results[0].status, StageStatus::Failed);
        assert_eq!(results[0].records.len(), 1);
        assert_eq!(results[0].records[0].endpoint_id, "ep-fast");
        assert!(results[0]
            .errors
            .iter()
            .any(|e| e.kind == crate::error::ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_drops_unstarted_stages() {
        let mut harness = Harness::new();
        for id in ["ep-1", "ep-2", "ep-3", "ep-4", "ep-5"] {
            harness.endpoint(
                contracts_endpoint(id),
                StageClient::ok(id, Arc::clone(&harness.order))
                    .with_latency(Duration::from_secs(1)),
            );
        }
        let executor = harness.executor();

        // A chain of five fetch stages; only the head starts before cancel.
        let chained = plan(vec![
            stage("s1", "ep-1"),
            stage("s2", "ep-2").with_dependency("s1"),
            stage("s3", "ep-3").with_dependency("s2"),
            stage("s4", "ep-4").with_dependency("s3"),
            stage("s5", "ep-5").with_dependency("s4"),
        ]);

        let ctx = InvestigationContext::new();
        let cancel_ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel_ctx.cancel();
        });

        let results = executor.execute(&ctx, &chained, &NullSink).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].stage_id, "s1");
        assert_eq!(results[0].status, StageStatus::Failed);
        assert!(results[0]
            .errors
            .iter()
            .any(|e| e.kind == crate::error::ErrorKind::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_fan_out_is_paced() {
        let mut harness = Harness::new();
        let client = harness.endpoint(
            contracts_endpoint("ep-limited")
                .with_rate_per_minute(60)
                .with_timeout(Duration::from_secs(600)),
            StageClient::ok("ep-limited", Arc::clone(&harness.order))
                .with_latency(Duration::from_millis(1)),
        );
        let executor = harness.executor();

        let mut fan_out_stage = stage("storm", "ep-limited")
            .fan_out()
            .with_timeout(Duration::from_secs(3600));
        fan_out_stage.endpoints = vec!["ep-limited".to_string(); 200];

        let start = Instant::now();
        let results = executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![fan_out_stage]),
                &NullSink,
            )
            .await;
        let elapsed = Instant::now().duration_since(start);

        assert_eq!(results[0].status, StageStatus::Completed);
        assert_eq!(results[0].records.len(), 200);
        assert_eq!(client.calls.load(Ordering::SeqCst), 200);
        // 60-token burst, then one token per second for the remaining 140.
        assert!(elapsed >= Duration::from_secs(139), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_endpoint_in_flight_bound() {
        let mut harness = Harness::new();
        let client = harness.endpoint(
            contracts_endpoint("ep-a"),
            StageClient::ok("ep-a", Arc::clone(&harness.order))
                .with_latency(Duration::from_millis(50)),
        );
        let executor = harness.executor();

        let mut fan_out_stage = stage("burst", "ep-a").fan_out();
        fan_out_stage.endpoints = vec!["ep-a".to_string(); 20];

        executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![fan_out_stage]),
                &NullSink,
            )
            .await;

        assert!(client.max_in_flight.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_causally_ordered_per_stage() {
        let mut harness = Harness::new();
        harness.endpoint(
            contracts_endpoint("ep-a"),
            StageClient::ok("ep-a", Arc::clone(&harness.order)),
        );
        let executor = harness.executor();
        let sink = CollectingSink::new();

        executor
            .execute(
                &InvestigationContext::new(),
                &plan(vec![stage("fetch", "ep-a")]),
                sink.as_ref(),
            )
            .await;

        let kinds: Vec<&'static str> = sink
            .events()
            .iter()
            .map(|e| match &e.kind {
                ProgressEventKind::StageStarted { .. } => "started",
                ProgressEventKind::StageRecord { .. } => "record",
                ProgressEventKind::StageCompleted { .. } => "completed",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["started", "record", "completed"]);
    }
}
