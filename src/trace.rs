//! Structured provenance attached to every investigation result.
//!
//! Traceability carries endpoint ids, stage timings and classified error
//! records only. No credentials, tokens or internal network identifiers
//! ever enter this structure; the serialization tests assert it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorRecord;
use crate::executor::{StageResult, StageStatus};

/// Per-stage provenance detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDetail {
    /// Stage identifier
    pub stage_id: String,
    /// Terminal stage status
    pub status: StageStatus,
    /// Stage duration in milliseconds
    pub duration_ms: u64,
    /// Endpoints invoked, in invocation order
    pub endpoints: Vec<String>,
    /// Classified errors recorded during the stage
    pub errors: Vec<ErrorRecord>,
}

/// Provenance for one investigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traceability {
    /// Endpoints that contributed data, in first-use order, deduplicated.
    /// Equals the union of endpoints over completed and partial stages.
    pub data_sources: Vec<String>,
    /// Endpoints invoked by each stage, in stage order
    pub apis_called_per_stage: Vec<Vec<String>>,
    /// Per-stage details
    pub stage_details: Vec<StageDetail>,
    /// Unique endpoints invoked across the investigation
    pub total_api_calls: usize,
    /// Analyzers that failed to run; their findings are absent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analyzer_errors: Vec<ErrorRecord>,
    /// When the investigation started
    pub started_at: DateTime<Utc>,
}

impl Traceability {
    /// Assemble traceability from executed stage results.
    pub fn from_stage_results(results: &[StageResult], started_at: DateTime<Utc>) -> Self {
        let mut data_sources: Vec<String> = Vec::new();
        for result in results {
            if !matches!(result.status, StageStatus::Completed | StageStatus::Partial) {
                continue;
            }
            for endpoint in &result.endpoints_invoked {
                if !data_sources.contains(endpoint) {
                    data_sources.push(endpoint.clone());
                }
            }
        }

        let mut unique: Vec<&str> = Vec::new();
        for result in results {
            for endpoint in &result.endpoints_invoked {
                if !unique.contains(&endpoint.as_str()) {
                    unique.push(endpoint);
                }
            }
        }

        Self {
            data_sources,
            apis_called_per_stage: results
                .iter()
                .map(|r| r.endpoints_invoked.clone())
                .collect(),
            stage_details: results
                .iter()
                .map(|r| StageDetail {
                    stage_id: r.stage_id.clone(),
                    status: r.status,
                    duration_ms: r.duration.as_millis() as u64,
                    endpoints: r.endpoints_invoked.clone(),
                    errors: r.errors.clone(),
                })
                .collect(),
            total_api_calls: unique.len(),
            analyzer_errors: Vec::new(),
            started_at,
        }
    }

    /// Traceability for a plan that never executed: a single synthetic
    /// stage detail carrying the given errors.
    pub fn placeholder_stage(
        stage_id: impl Into<String>,
        errors: Vec<ErrorRecord>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            data_sources: Vec::new(),
            apis_called_per_stage: vec![Vec::new()],
            stage_details: vec![StageDetail {
                stage_id: stage_id.into(),
                status: StageStatus::Skipped,
                duration_ms: 0,
                endpoints: Vec::new(),
                errors,
            }],
            total_api_calls: 0,
            analyzer_errors: Vec::new(),
            started_at,
        }
    }
}
