//! # lupa-core
//!
//! Investigation orchestration engine for Brazilian public-spending
//! transparency: classify a citizen query into an investigation intent,
//! plan a DAG of data-collection stages over a federated registry of
//! government APIs, execute it concurrently under rate limits and circuit
//! breakers, assemble an entity graph from the heterogeneous results, run
//! deterministic anomaly analyzers over it, and stream progress events
//! throughout.
//!
//! ## Core Components
//!
//! - **Registry**: static catalog of endpoints, capabilities and fallbacks
//! - **Resilience**: per-endpoint token bucket, circuit breaker, retries
//! - **Intent / Extract**: rule-based classification and entity extraction
//! - **Planner / Executor**: stage templates and the dependency-driven
//!   concurrent federation executor
//! - **Graph / Analyzers**: the frozen entity multigraph and the anomaly
//!   detectors that read it
//! - **Orchestrator**: the `investigate` entry point gluing it together
//!
//! ## Example
//!
//! ```rust,ignore
//! use lupa_core::{ApiRegistry, InvestigationContext, Orchestrator};
//!
//! let orchestrator = Orchestrator::builder(registry)
//!     .with_client(portal_client)
//!     .build();
//!
//! let result = orchestrator
//!     .investigate(InvestigationContext::new(), "contratos de saúde em MG em 2024")
//!     .await;
//! println!("{} anomalies", result.anomalies.len());
//! ```

pub mod analyzers;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod extract;
pub mod graph;
pub mod intent;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod registry;
pub mod resilience;
pub mod result;
pub mod store;
pub mod trace;

// Re-exports for convenience
pub use analyzers::{
    default_analyzers, run_analyzers, Analyzer, AnalyzerOutcome, Anomaly, AnomalyKind,
    BenfordViolationAnalyzer, CartelCliqueAnalyzer, DuplicateContractAnalyzer,
    PaymentMismatchAnalyzer, PriceDeviationAnalyzer, Severity, TemporalSpikeAnalyzer,
    VendorConcentrationAnalyzer,
};
pub use client::{ApiClient, HttpApiClient, HttpClientConfig, Params, RawResult};
pub use config::{
    AnalyzerConfig, BenfordConfig, CartelCliqueConfig, CircuitConfig, DuplicateContractConfig,
    EngineConfig, PaymentMismatchConfig, PriceDeviationConfig, ProgressConfig, RetryConfig,
    TemporalSpikeConfig, VendorConcentrationConfig,
};
pub use context::{ContextInfo, InvestigationContext, InvestigationId};
pub use error::{Error, ErrorKind, ErrorRecord, Result};
pub use executor::{DataFederationExecutor, StageResult, StageStatus};
pub use extract::{DateRange, Entities, EntityExtractor, Location};
pub use graph::{
    keys, Edge, EntityGraph, GraphBuilder, GraphSummary, Node, NodeType, Relationship,
    ShapeMapper,
};
pub use intent::{Classification, Intent, IntentClassifier, IntentScore};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use planner::{
    ExecutionPlan, ExecutionPlanner, ExecutionStage, ParallelismPolicy, StageType,
};
pub use progress::{
    export_events, ChannelSink, CollectingSink, ExportFormat, InvestigationSummary, NullSink,
    ProgressEvent, ProgressEventKind, ProgressSink, RecordDigest,
};
pub use registry::{ApiEndpoint, ApiRegistry, Capability, EndpointCategory};
pub use resilience::{
    BreakerState, CircuitBreaker, EndpointResilience, InvokeOutcome, ResilienceRegistry,
    ResilientClient, TokenBucket,
};
pub use result::{InvestigationResult, InvestigationStatus};
pub use store::{InvestigationRepository, SqliteInvestigationStore};
pub use trace::{StageDetail, Traceability};
