//! Progress events for observable investigation execution.
//!
//! Events serialize to JSON with a `type` tag and an RFC 3339 `ts` field;
//! consumers must ignore unknown fields. Events for one investigation are
//! strictly serialized through its sink; interleaving across
//! investigations is unspecified.
//!
//! Back-pressure contract: the channel sink waits a small bounded time for
//! space, then drops the event and counts it. Only progress/status events
//! go through sinks; collected records travel in stage results and are
//! never dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::analyzers::AnomalyKind;
use crate::client::RawResult;
use crate::error::ErrorKind;
use crate::executor::StageStatus;
use crate::planner::ExecutionPlan;

/// A small JSON-safe projection of a collected record. Never the raw
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDigest {
    /// Best-effort record identifier
    pub id: String,
    /// What kind of record this is (the capability that produced it)
    pub record_type: String,
    /// Short human-readable label
    pub label: String,
}

impl RecordDigest {
    /// Project a raw result into a digest.
    pub fn from_raw(raw: &RawResult, record_type: impl Into<String>) -> Self {
        let id = ["id", "numero", "numero_contrato", "cnpj"]
            .iter()
            .find_map(|key| raw.payload.get(key))
            .map(render_scalar)
            .unwrap_or_else(|| raw.endpoint_id.clone());
        let label = ["objeto", "descricao", "razao_social", "nome"]
            .iter()
            .find_map(|key| raw.payload.get(key))
            .map(render_scalar)
            .map(|s| truncate(&s, 80))
            .unwrap_or_default();
        Self {
            id,
            record_type: record_type.into(),
            label,
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Summary carried by the final event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationSummary {
    /// Investigation identifier
    pub investigation_id: String,
    /// Terminal status rendered as its enum string
    pub status: String,
    /// Number of anomalies found
    pub anomaly_count: usize,
    /// Wall-clock duration in milliseconds
    pub total_duration_ms: u64,
}

/// The progress event kinds, tagged for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEventKind {
    /// A plan was created for the investigation
    PlanCreated {
        plan_id: String,
        stage_count: usize,
        estimated_duration_ms: u64,
    },
    /// A stage began executing
    StageStarted {
        stage_id: String,
        endpoints: Vec<String>,
    },
    /// A record was collected during a stage
    StageRecord {
        stage_id: String,
        record: RecordDigest,
    },
    /// A stage reached a terminal status
    StageCompleted {
        stage_id: String,
        status: StageStatus,
        duration_ms: u64,
    },
    /// An analyzer finished
    AnalyzerCompleted {
        kind: AnomalyKind,
        anomaly_count: usize,
    },
    /// The investigation reached a terminal status
    InvestigationCompleted { summary: InvestigationSummary },
    /// An error was recorded
    Error {
        #[serde(rename = "where")]
        location: String,
        error_kind: ErrorKind,
    },
}

impl ProgressEventKind {
    /// Wrap into a timestamped event.
    pub fn at_now(self) -> ProgressEvent {
        ProgressEvent {
            kind: self,
            ts: Utc::now(),
        }
    }
}

/// A timestamped progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The event payload, flattened so `type` sits at the top level
    #[serde(flatten)]
    pub kind: ProgressEventKind,
    /// When the event was emitted (UTC)
    pub ts: DateTime<Utc>,
}

impl ProgressEvent {
    /// Convenience constructor used by the executor and orchestrator.
    pub fn plan_created(plan: &ExecutionPlan) -> Self {
        ProgressEventKind::PlanCreated {
            plan_id: plan.plan_id.clone(),
            stage_count: plan.stages.len(),
            estimated_duration_ms: plan.estimated_duration.as_millis() as u64,
        }
        .at_now()
    }

    /// Stage started.
    pub fn stage_started(stage_id: impl Into<String>, endpoints: Vec<String>) -> Self {
        ProgressEventKind::StageStarted {
            stage_id: stage_id.into(),
            endpoints,
        }
        .at_now()
    }

    /// Record collected.
    pub fn stage_record(stage_id: impl Into<String>, record: RecordDigest) -> Self {
        ProgressEventKind::StageRecord {
            stage_id: stage_id.into(),
            record,
        }
        .at_now()
    }

    /// Stage completed.
    pub fn stage_completed(
        stage_id: impl Into<String>,
        status: StageStatus,
        duration: Duration,
    ) -> Self {
        ProgressEventKind::StageCompleted {
            stage_id: stage_id.into(),
            status,
            duration_ms: duration.as_millis() as u64,
        }
        .at_now()
    }

    /// Analyzer finished.
    pub fn analyzer_completed(kind: AnomalyKind, anomaly_count: usize) -> Self {
        ProgressEventKind::AnalyzerCompleted {
            kind,
            anomaly_count,
        }
        .at_now()
    }

    /// Investigation finished.
    pub fn investigation_completed(summary: InvestigationSummary) -> Self {
        ProgressEventKind::InvestigationCompleted { summary }.at_now()
    }

    /// Error recorded.
    pub fn error(location: impl Into<String>, error_kind: ErrorKind) -> Self {
        ProgressEventKind::Error {
            location: location.into(),
            error_kind,
        }
        .at_now()
    }
}

/// Where progress events go.
///
/// `emit` returns whether the event was accepted; implementations must
/// never block unboundedly.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Offer an event to the sink.
    async fn emit(&self, event: ProgressEvent) -> bool;

    /// Events dropped so far under back-pressure.
    fn dropped_events(&self) -> u64 {
        0
    }
}

/// Sink that discards everything. The default when callers do not stream.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _event: ProgressEvent) -> bool {
        true
    }
}

/// Bounded-channel sink: waits up to `send_wait` for space, then drops the
/// event and increments the counter.
pub struct ChannelSink {
    sender: mpsc::Sender<ProgressEvent>,
    send_wait: Duration,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and its receiving half.
    pub fn new(buffer_size: usize, send_wait: Duration) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        (
            Self {
                sender,
                send_wait,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, event: ProgressEvent) -> bool {
        match tokio::time::timeout(self.send_wait, self.sender.send(event)).await {
            Ok(Ok(())) => true,
            _ => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Sink that buffers events in memory. Test helper.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    /// Create an empty collecting sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything collected so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn emit(&self, event: ProgressEvent) -> bool {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        true
    }
}

/// Export format for collected events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One JSON event per line
    JsonLines,
    /// Pretty-printed JSON array
    JsonPretty,
}

/// Serialize events for replay or inspection.
pub fn export_events(events: &[ProgressEvent], format: ExportFormat) -> String {
    match format {
        ExportFormat::JsonLines => events
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n"),
        ExportFormat::JsonPretty => {
            serde_json::to_string_pretty(events).unwrap_or_else(|_| "[]".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_type_tag_and_ts() {
        let event = ProgressEvent::stage_started("fetch-contracts", vec!["portal".into()]);
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "stage_started");
        assert_eq!(value["stage_id"], "fetch-contracts");
        assert!(value["ts"].is_string());
    }

    #[test]
    fn test_error_event_uses_where_field() {
        let event = ProgressEvent::error("executor", ErrorKind::Timeout);
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["where"], "executor");
        assert_eq!(value["error_kind"], "timeout");
    }

    #[test]
    fn test_unknown_fields_ignored_on_deserialize() {
        let wire = json!({
            "type": "analyzer_completed",
            "kind": "benford_violation",
            "anomaly_count": 2,
            "ts": "2024-06-01T00:00:00Z",
            "added_later": {"ignored": true}
        });
        let event: ProgressEvent = serde_json::from_value(wire).unwrap();
        assert!(matches!(
            event.kind,
            ProgressEventKind::AnalyzerCompleted {
                anomaly_count: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_record_digest_never_carries_payload() {
        let raw = RawResult::new(
            "portal",
            json!({
                "numero": "42/2024",
                "objeto": "Aquisição de insumos",
                "valor": 1_500_000.0,
                "segredo_interno": "não deve vazar"
            }),
        );
        let digest = RecordDigest::from_raw(&raw, "search_contracts");
        assert_eq!(digest.id, "42/2024");
        assert_eq!(digest.label, "Aquisição de insumos");
        let serialized = serde_json::to_string(&digest).unwrap();
        assert!(!serialized.contains("segredo_interno"));
        assert!(!serialized.contains("1500000"));
    }

    #[tokio::test]
    async fn test_channel_sink_drops_under_backpressure() {
        let (sink, mut receiver) = ChannelSink::new(1, Duration::from_millis(5));

        assert!(sink.emit(ProgressEvent::error("a", ErrorKind::Timeout)).await);
        // Channel full and nobody reading: the second emit drops.
        assert!(!sink.emit(ProgressEvent::error("b", ErrorKind::Timeout)).await);
        assert_eq!(sink.dropped_events(), 1);

        // Drain and the sink accepts again.
        receiver.recv().await.unwrap();
        assert!(sink.emit(ProgressEvent::error("c", ErrorKind::Timeout)).await);
    }

    #[test]
    fn test_export_json_lines() {
        let events = vec![
            ProgressEvent::error("a", ErrorKind::Timeout),
            ProgressEvent::error("b", ErrorKind::Cancelled),
        ];
        let exported = export_events(&events, ExportFormat::JsonLines);
        assert_eq!(exported.lines().count(), 2);
    }
}
