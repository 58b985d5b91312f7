//! The external investigation result shape.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::analyzers::Anomaly;
use crate::context::{ContextInfo, InvestigationId};
use crate::error::ErrorRecord;
use crate::executor::StageResult;
use crate::extract::Entities;
use crate::graph::GraphSummary;
use crate::intent::Intent;
use crate::planner::ExecutionPlan;
use crate::trace::Traceability;

/// Investigation lifecycle status. Created `Pending`, `Running` while the
/// plan executes, then a terminal `Completed` or `Failed`; results are
/// immutable once terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl InvestigationStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// The full result of one investigation.
///
/// Partial success is the norm: per-stage errors live in
/// `traceability.stage_details[].errors`, and the top-level `error` is set
/// only when the whole investigation is terminal-failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationResult {
    /// Sortable 26-character identifier
    pub investigation_id: InvestigationId,
    /// Caller identity and the original query
    pub context: ContextInfo,
    /// Classified intent
    pub intent: Intent,
    /// Classification confidence in [0, 1]
    pub confidence: f64,
    /// Extracted entities
    pub entities: Entities,
    /// The executed plan, absent when planning short-circuited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    /// Stage outcomes ordered by start time
    pub stage_results: Vec<StageResult>,
    /// Entity graph aggregate counts
    pub graph_summary: GraphSummary,
    /// Anomalies found by the analyzers
    pub anomalies: Vec<Anomaly>,
    /// Total wall-clock duration in seconds
    pub total_duration_sec: f64,
    /// Lifecycle status
    pub status: InvestigationStatus,
    /// Terminal failure cause; absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Progress events dropped under back-pressure
    pub dropped_events: u64,
    /// Provenance
    pub traceability: Traceability,
}

impl InvestigationResult {
    /// Set the total duration from a measured `Duration`.
    pub fn with_total_duration(mut self, duration: Duration) -> Self {
        self.total_duration_sec = duration.as_secs_f64();
        self
    }
}
