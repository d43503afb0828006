use std::fmt;
use std::path::Path;

use contracts::{Action, Event, Outcome, RoundRecord, RunConfig, RunStatus, SimulationRun};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRunSummary {
    pub run_id: String,
    pub schema_version: String,
    pub current_round: u32,
    pub max_rounds: u32,
    pub outcome: Outcome,
    pub updated_at: String,
}

/// A round snapshot at or before a requested round, plus the events needed
/// to replay forward from it.
#[derive(Debug, Clone)]
pub struct ReplaySlice {
    pub round: Option<RoundRecord>,
    pub events: Vec<Event>,
}

#[derive(Debug)]
pub enum PersistenceError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    NotAttached,
    RunAlreadyExists(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::NotAttached => write!(f, "sqlite store is not attached"),
            Self::RunAlreadyExists(run_id) => write!(f, "run already exists: {run_id}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// External checkpoint store: serializes the run history to SQLite so a
/// separate session can reload or replay it. The kernel itself never
/// touches durable storage.
#[derive(Debug)]
pub struct SqliteRunStore {
    conn: Connection,
}

impl SqliteRunStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn run_exists(&self, run_id: &str) -> Result<bool, PersistenceError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT run_id FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete_run(&mut self, run_id: &str) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM events WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM rounds WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM actions WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM runs WHERE run_id = ?1", params![run_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_runs(&self, page_size: usize) -> Result<Vec<PersistedRunSummary>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, schema_version, status_json, updated_at
             FROM runs
             ORDER BY updated_at DESC, run_id ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![page_size as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (run_id, schema_version, status_json, updated_at) = row?;
            let status: RunStatus = serde_json::from_str(&status_json)?;
            summaries.push(PersistedRunSummary {
                run_id,
                schema_version,
                current_round: status.current_round,
                max_rounds: status.max_rounds,
                outcome: status.outcome,
                updated_at,
            });
        }

        Ok(summaries)
    }

    /// Append-only delta flush: upsert the run row and insert anything new.
    /// `INSERT OR IGNORE` keeps re-flushing idempotent.
    pub fn persist_delta(
        &mut self,
        config: &RunConfig,
        status: &RunStatus,
        run: &SimulationRun,
        actions: &[Action],
        rounds: &[RoundRecord],
        events: &[Event],
    ) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;

        upsert_run(&tx, config, status, run)?;

        for action in actions {
            let action_json = serde_json::to_string(action)?;
            tx.execute(
                "INSERT OR IGNORE INTO actions (
                    run_id,
                    action_id,
                    issued_in_round,
                    issuer,
                    cost,
                    action_json,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    action.run_id.as_str(),
                    action.action_id.as_str(),
                    i64::from(action.issued_in_round),
                    action.issuer.as_str(),
                    i64::from(action.cost),
                    action_json,
                    round_stamp(action.issued_in_round),
                ],
            )?;
        }

        for record in rounds {
            let record_json = serde_json::to_string(record)?;
            tx.execute(
                "INSERT OR IGNORE INTO rounds (
                    run_id,
                    round,
                    mean_support,
                    outcome,
                    state_hash,
                    record_json,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.run_id.as_str(),
                    i64::from(record.round),
                    record.mean_support,
                    outcome_label(record.outcome),
                    record.state_hash.as_str(),
                    record_json,
                    record.created_at.as_str(),
                ],
            )?;
        }

        for event in events {
            let payload_json = serde_json::to_string(event)?;
            tx.execute(
                "INSERT OR IGNORE INTO events (
                    run_id,
                    event_id,
                    round,
                    sequence_in_round,
                    event_type,
                    payload_json,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.run_id.as_str(),
                    event.event_id.as_str(),
                    i64::from(event.round),
                    i64::try_from(event.sequence_in_round).unwrap_or(i64::MAX),
                    format!("{:?}", event.event_type),
                    payload_json,
                    event.created_at.as_str(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Reload a persisted history for cross-session resumption or display.
    pub fn load_run(&self, run_id: &str) -> Result<Option<SimulationRun>, PersistenceError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT run_json FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(raw) => Ok(Some(serde_json::from_str::<SimulationRun>(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn load_rounds_range(
        &self,
        run_id: &str,
        from_round: u32,
        to_round: u32,
    ) -> Result<Vec<RoundRecord>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT record_json
             FROM rounds
             WHERE run_id = ?1 AND round >= ?2 AND round <= ?3
             ORDER BY round ASC",
        )?;

        let rows = stmt.query_map(
            params![run_id, i64::from(from_round), i64::from(to_round)],
            |row| row.get::<_, String>(0),
        )?;

        let mut records = Vec::new();
        for row in rows {
            let payload = row?;
            records.push(serde_json::from_str::<RoundRecord>(&payload)?);
        }

        Ok(records)
    }

    pub fn load_latest_round_at_or_before(
        &self,
        run_id: &str,
        round: u32,
    ) -> Result<Option<RoundRecord>, PersistenceError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json
                 FROM rounds
                 WHERE run_id = ?1 AND round <= ?2
                 ORDER BY round DESC
                 LIMIT 1",
                params![run_id, i64::from(round)],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(raw) => Ok(Some(serde_json::from_str::<RoundRecord>(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn load_events_range(
        &self,
        run_id: &str,
        from_round: u32,
        to_round: u32,
    ) -> Result<Vec<Event>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json
             FROM events
             WHERE run_id = ?1 AND round >= ?2 AND round <= ?3
             ORDER BY round ASC, sequence_in_round ASC",
        )?;

        let rows = stmt.query_map(
            params![run_id, i64::from(from_round), i64::from(to_round)],
            |row| row.get::<_, String>(0),
        )?;

        let mut events = Vec::new();
        for row in rows {
            let payload = row?;
            events.push(serde_json::from_str::<Event>(&payload)?);
        }

        Ok(events)
    }

    pub fn replay_at_round(
        &self,
        run_id: &str,
        round: u32,
    ) -> Result<ReplaySlice, PersistenceError> {
        let record = self.load_latest_round_at_or_before(run_id, round)?;
        let from_round = record.as_ref().map(|rec| rec.round + 1).unwrap_or(0);
        let events = self.load_events_range(run_id, from_round, round)?;

        Ok(ReplaySlice {
            round: record,
            events,
        })
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                schema_version TEXT NOT NULL,
                config_json TEXT NOT NULL,
                status_json TEXT NOT NULL,
                run_json TEXT NOT NULL,
                outcome TEXT NOT NULL,
                max_rounds INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS actions (
                run_id TEXT NOT NULL,
                action_id TEXT NOT NULL,
                issued_in_round INTEGER NOT NULL,
                issuer TEXT NOT NULL,
                cost INTEGER NOT NULL,
                action_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, action_id)
            );

            CREATE TABLE IF NOT EXISTS rounds (
                run_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                mean_support REAL NOT NULL,
                outcome TEXT NOT NULL,
                state_hash TEXT NOT NULL,
                record_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, round)
            );

            CREATE TABLE IF NOT EXISTS events (
                run_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                sequence_in_round INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, event_id),
                UNIQUE (run_id, round, sequence_in_round)
            );

            CREATE INDEX IF NOT EXISTS idx_rounds_run_round ON rounds(run_id, round);
            CREATE INDEX IF NOT EXISTS idx_events_run_round ON events(run_id, round);
            CREATE INDEX IF NOT EXISTS idx_events_run_type_round ON events(run_id, event_type, round);
            CREATE INDEX IF NOT EXISTS idx_actions_run_round ON actions(run_id, issued_in_round);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', 'round-000000')",
            [],
        )?;

        Ok(())
    }
}

fn upsert_run(
    tx: &rusqlite::Transaction<'_>,
    config: &RunConfig,
    status: &RunStatus,
    run: &SimulationRun,
) -> Result<(), PersistenceError> {
    let config_json = serde_json::to_string(config)?;
    let status_json = serde_json::to_string(status)?;
    let run_json = serde_json::to_string(run)?;

    tx.execute(
        "INSERT INTO runs (
            run_id,
            schema_version,
            config_json,
            status_json,
            run_json,
            outcome,
            max_rounds,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(run_id) DO UPDATE SET
            schema_version = excluded.schema_version,
            config_json = excluded.config_json,
            status_json = excluded.status_json,
            run_json = excluded.run_json,
            outcome = excluded.outcome,
            max_rounds = excluded.max_rounds,
            updated_at = excluded.updated_at",
        params![
            config.run_id.as_str(),
            config.schema_version.as_str(),
            config_json,
            status_json,
            run_json,
            outcome_label(status.outcome),
            i64::from(config.max_rounds),
            "round-000000",
            round_stamp(status.current_round),
        ],
    )?;

    Ok(())
}

fn outcome_label(outcome: Outcome) -> String {
    outcome.to_string()
}

fn round_stamp(round: u32) -> String {
    format!("round-{round:06}")
}
