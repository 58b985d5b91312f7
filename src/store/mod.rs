//! Persistence port for terminal investigation results.
//!
//! The engine only needs a simple repository: save a terminal result,
//! load it back, list the most recent ones. The SQLite implementation
//! stores the serialized result keyed by the sortable investigation id,
//! so "recent" is an index walk in id order.
//!
//! Storage failures never change an investigation's outcome; the
//! orchestrator logs and records them.

mod schema;

pub use schema::SCHEMA_VERSION;

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::context::InvestigationId;
use crate::error::{Error, Result};
use crate::result::InvestigationResult;

/// Repository port for investigation results.
pub trait InvestigationRepository: Send + Sync {
    /// Persist a terminal result.
    fn save(&self, result: &InvestigationResult) -> Result<()>;

    /// Load a result by id.
    fn load(&self, id: &InvestigationId) -> Result<Option<InvestigationResult>>;

    /// The most recent results, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<InvestigationResult>>;
}

/// SQLite-backed investigation repository.
pub struct SqliteInvestigationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteInvestigationStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        if !schema::is_initialized(&conn) {
            schema::initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        schema::initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::internal(format!("failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::Storage(e.to_string()))
    }
}

impl InvestigationRepository for SqliteInvestigationStore {
    fn save(&self, result: &InvestigationResult) -> Result<()> {
        let serialized = serde_json::to_string(result)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO investigations (id, status, intent, started_at, result)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    result.investigation_id.as_str(),
                    result.status.to_string(),
                    result.intent.to_string(),
                    result.traceability.started_at.to_rfc3339(),
                    serialized,
                ],
            )?;
            Ok(())
        })
    }

    fn load(&self, id: &InvestigationId) -> Result<Option<InvestigationResult>> {
        let serialized: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT result FROM investigations WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()
        })?;
        match serialized {
            Some(serialized) => Ok(Some(serde_json::from_str(&serialized)?)),
            None => Ok(None),
        }
    }

    fn recent(&self, limit: usize) -> Result<Vec<InvestigationResult>> {
        let rows: Vec<String> = self.with_conn(|conn| {
            let mut statement = conn.prepare(
                "SELECT result FROM investigations ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = statement
                .query_map([limit as i64], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(rows)
        })?;
        rows.iter()
            .map(|serialized| serde_json::from_str(serialized).map_err(Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextInfo;
    use crate::extract::Entities;
    use crate::graph::GraphSummary;
    use crate::intent::Intent;
    use crate::result::InvestigationStatus;
    use crate::trace::Traceability;
    use chrono::Utc;

    fn result_with_id(id: InvestigationId) -> InvestigationResult {
        InvestigationResult {
            investigation_id: id,
            context: ContextInfo {
                user_id: Some("u-1".into()),
                session_id: None,
                query: "contratos de saúde".into(),
            },
            intent: Intent::ContractAnomalyDetection,
            confidence: 0.92,
            entities: Entities::default(),
            plan: None,
            stage_results: Vec::new(),
            graph_summary: GraphSummary::default(),
            anomalies: Vec::new(),
            total_duration_sec: 1.5,
            status: InvestigationStatus::Completed,
            error: None,
            dropped_events: 0,
            traceability: Traceability::from_stage_results(&[], Utc::now()),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = SqliteInvestigationStore::in_memory().unwrap();
        let result = result_with_id(InvestigationId::new());
        store.save(&result).unwrap();

        let loaded = store.load(&result.investigation_id).unwrap().unwrap();
        assert_eq!(loaded.investigation_id, result.investigation_id);
        assert_eq!(loaded.confidence, result.confidence);
        assert_eq!(
            serde_json::to_string(&loaded).unwrap(),
            serde_json::to_string(&result).unwrap()
        );
    }

    #[test]
    fn test_load_missing_is_none() {
        let store = SqliteInvestigationStore::in_memory().unwrap();
        assert!(store.load(&InvestigationId::new()).unwrap().is_none());
    }

    #[test]
    fn test_recent_orders_newest_first() {
        let store = SqliteInvestigationStore::in_memory().unwrap();
        // Sortable ids: creation order is lexicographic order.
        let early = uuid::Uuid::new_v7(uuid::Timestamp::from_unix(
            uuid::NoContext,
            1_700_000_000,
            0,
        ));
        let late = uuid::Uuid::new_v7(uuid::Timestamp::from_unix(
            uuid::NoContext,
            1_700_000_100,
            0,
        ));
        store
            .save(&result_with_id(InvestigationId::from_uuid(early)))
            .unwrap();
        store
            .save(&result_with_id(InvestigationId::from_uuid(late)))
            .unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(
            recent[0].investigation_id,
            InvestigationId::from_uuid(late)
        );

        let limited = store.recent(1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_save_is_upsert() {
        let store = SqliteInvestigationStore::in_memory().unwrap();
        let mut result = result_with_id(InvestigationId::new());
        store.save(&result).unwrap();
        result.confidence = 0.5;
        store.save(&result).unwrap();

        let loaded = store.load(&result.investigation_id).unwrap().unwrap();
        assert_eq!(loaded.confidence, 0.5);
        assert_eq!(store.recent(10).unwrap().len(), 1);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("investigations.db");
        {
            let store = SqliteInvestigationStore::open(&path).unwrap();
            store.save(&result_with_id(InvestigationId::new())).unwrap();
        }
        let reopened = SqliteInvestigationStore::open(&path).unwrap();
        assert_eq!(reopened.recent(10).unwrap().len(), 1);
    }
}
