//! Append-only feedback log and training-signal storage.
//!
//! The orchestrator emits boundary events here in parallel to its own event
//! log; downstream consumers use them for auditing and as training data.
//! Writes are fire-and-forget from the orchestrator's perspective: a failing
//! write is logged and never fails the investigation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::quality::{TrainingSignal, TrainingSignalSink};

/// Boundary events the orchestrator forwards to the feedback log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackEventType {
    InvestigationStarted,
    ContextGathered,
    InvestigationCompleted,
}

impl std::fmt::Display for FeedbackEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvestigationStarted => "investigation_started",
            Self::ContextGathered => "context_gathered",
            Self::InvestigationCompleted => "investigation_completed",
        };
        write!(f, "{}", s)
    }
}

/// Who caused a feedback event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    System,
    User,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
        }
    }
}

/// A stored feedback event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: FeedbackEventType,
    pub event_data: serde_json::Value,
    pub investigation_id: Option<String>,
    pub dataset_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub created_at: DateTime<Utc>,
}

/// Interface for emitting investigation feedback events.
#[async_trait]
pub trait FeedbackEmitter: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        tenant_id: Uuid,
        event_type: FeedbackEventType,
        event_data: serde_json::Value,
        investigation_id: Option<&str>,
        dataset_id: Option<&str>,
        actor_id: Option<Uuid>,
        actor_type: ActorType,
    ) -> Result<FeedbackEvent>;
}

const SCHEMA_VERSION: i32 = 1;

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    // WAL mode for concurrent readers while the run appends.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> rusqlite::Result<()> {
    // Append-only: no UPDATE or DELETE statement exists anywhere in this
    // module.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback_events (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            event_data TEXT NOT NULL,
            investigation_id TEXT,
            dataset_id TEXT,
            actor_id TEXT,
            actor_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_feedback_events_investigation
         ON feedback_events(investigation_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS training_signals (
            id TEXT PRIMARY KEY,
            signal_type TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            investigation_id TEXT NOT NULL,
            input_context TEXT NOT NULL,
            output_response TEXT NOT NULL,
            automated_score REAL NOT NULL,
            automated_dimensions TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        params![SCHEMA_VERSION],
    )?;

    Ok(())
}

/// SQLite-backed feedback store.
///
/// Implements both the feedback emitter and the training-signal sink; both
/// tables are append-only.
pub struct SqliteFeedbackStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteFeedbackStore {
    /// Open or create a feedback store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Feedback(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Feedback(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Feedback(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Feedback(e.to_string()))?;
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
            .map_err(|e| Error::Internal(format!("failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::Feedback(e.to_string()))
    }

    /// All stored events for one investigation, in insertion order.
    pub fn events_for_investigation(&self, investigation_id: &str) -> Result<Vec<FeedbackEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tenant_id, event_type, event_data, investigation_id,
                        dataset_id, actor_id, actor_type, created_at
                 FROM feedback_events WHERE investigation_id = ?1
                 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![investigation_id], row_to_event)?;
            rows.collect()
        })
    }

    /// Number of captured training signals.
    pub fn signal_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM training_signals", [], |row| {
                row.get::<_, i64>(0).map(|n| n as u64)
            })
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedbackEvent> {
    let parse_failure =
        |i: usize| rusqlite::Error::InvalidColumnType(i, "parse".to_string(), rusqlite::types::Type::Text);

    let id: String = row.get(0)?;
    let tenant_id: String = row.get(1)?;
    let event_type: String = row.get(2)?;
    let event_data: String = row.get(3)?;
    let actor_id: Option<String> = row.get(6)?;
    let actor_type: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(FeedbackEvent {
        id: id.parse().map_err(|_| parse_failure(0))?,
        tenant_id: tenant_id.parse().map_err(|_| parse_failure(1))?,
        event_type: serde_json::from_value(serde_json::Value::String(event_type))
            .map_err(|_| parse_failure(2))?,
        event_data: serde_json::from_str(&event_data).map_err(|_| parse_failure(3))?,
        investigation_id: row.get(4)?,
        dataset_id: row.get(5)?,
        actor_id: actor_id
            .map(|s| s.parse().map_err(|_| parse_failure(6)))
            .transpose()?,
        actor_type: serde_json::from_value(serde_json::Value::String(actor_type))
            .map_err(|_| parse_failure(7))?,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .map_err(|_| parse_failure(8))?,
    })
}

#[async_trait]
impl FeedbackEmitter for SqliteFeedbackStore {
    async fn emit(
        &self,
        tenant_id: Uuid,
        event_type: FeedbackEventType,
        event_data: serde_json::Value,
        investigation_id: Option<&str>,
        dataset_id: Option<&str>,
        actor_id: Option<Uuid>,
        actor_type: ActorType,
    ) -> Result<FeedbackEvent> {
        let event = FeedbackEvent {
            id: Uuid::new_v4(),
            tenant_id,
            event_type,
            event_data,
            investigation_id: investigation_id.map(str::to_string),
            dataset_id: dataset_id.map(str::to_string),
            actor_id,
            actor_type,
            created_at: Utc::now(),
        };

        let data = serde_json::to_string(&event.event_data)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feedback_events (
                    id, tenant_id, event_type, event_data, investigation_id,
                    dataset_id, actor_id, actor_type, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.id.to_string(),
                    event.tenant_id.to_string(),
                    event.event_type.to_string(),
                    data,
                    event.investigation_id,
                    event.dataset_id,
                    event.actor_id.map(|id| id.to_string()),
                    event.actor_type.to_string(),
                    event.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        Ok(event)
    }
}

#[async_trait]
impl TrainingSignalSink for SqliteFeedbackStore {
    async fn record_signal(&self, signal: TrainingSignal) -> Result<()> {
        let input_context = serde_json::to_string(&signal.input_context)?;
        let output_response = serde_json::to_string(&signal.output_response)?;
        let dimensions = serde_json::to_string(&signal.automated_dimensions)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO training_signals (
                    id, signal_type, tenant_id, investigation_id, input_context,
                    output_response, automated_score, automated_dimensions, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    Uuid::new_v4().to_string(),
                    signal.signal_type.to_string(),
                    signal.tenant_id.to_string(),
                    signal.investigation_id,
                    input_context,
                    output_response,
                    signal.automated_score,
                    dimensions,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }
}
