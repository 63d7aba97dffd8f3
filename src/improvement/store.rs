//! SQLite-backed persistence for improvements, their status history,
//! settings snapshots and scanner metadata.
//!
//! One connection is shared behind an async mutex; every status change is a
//! compare-and-swap executed in a single transaction with its history row.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::error::{ImprovementError, Result};
use super::record::{FixAction, Improvement, Severity, Status};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared handle to the pipeline database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        // Other processes share the file; wait out their write locks
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Self::from_connection(conn)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        Self::init_schema(&conn).context("Failed to initialize improvement schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS improvements (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                suggestion TEXT NOT NULL,
                severity TEXT NOT NULL,
                auto_fixable INTEGER NOT NULL DEFAULT 0,
                fix_action TEXT,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL,
                rejection_reason TEXT,
                backup_id TEXT,
                approved_at TEXT,
                applied_at TEXT,
                rejected_at TEXT,
                rolled_back_at TEXT
            );

            CREATE TABLE IF NOT EXISTS improvement_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                improvement_id TEXT NOT NULL,
                from_status TEXT,
                to_status TEXT NOT NULL,
                at TEXT NOT NULL,
                note TEXT,
                FOREIGN KEY (improvement_id) REFERENCES improvements(id)
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS backups (
                id TEXT PRIMARY KEY,
                improvement_id TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS leases (
                name TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_improvements_status ON improvements(status);
            CREATE INDEX IF NOT EXISTS idx_improvements_category ON improvements(category);
            CREATE INDEX IF NOT EXISTS idx_history_improvement ON improvement_history(improvement_id);
        "#)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Claim the named lease for `owner` unless another owner holds an
    /// unexpired one. Works across every process sharing the database file.
    pub async fn try_acquire_lease(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        let conn = self.lock().await;
        let changed = conn.execute(
            "INSERT INTO leases (name, owner, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at
             WHERE leases.expires_at <= ?4",
            params![name, owner, expires_at, now],
        )?;
        Ok(changed == 1)
    }

    /// Drop the named lease if `owner` still holds it
    pub async fn release_lease(&self, name: &str, owner: &str) -> Result<()> {
        let conn = self.lock().await;
        release_lease_with(&conn, name, owner)?;
        Ok(())
    }

    /// Release without awaiting, for use from `Drop`. Falls back to a
    /// spawned task when the connection is busy; an unreleased lease expires.
    pub(crate) fn release_lease_now(&self, name: &str, owner: &str) {
        if let Ok(conn) = self.conn.try_lock() {
            if let Err(e) = release_lease_with(&conn, name, owner) {
                warn!("Could not release lease {}: {}", name, e);
            }
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let db = self.clone();
                let (name, owner) = (name.to_string(), owner.to_string());
                handle.spawn(async move {
                    if let Err(e) = db.release_lease(&name, &owner).await {
                        warn!("Could not release lease {}: {}", name, e);
                    }
                });
            }
            Err(_) => warn!("Lease {} left to expire", name),
        }
    }

    /// Read a metadata value
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock().await;
        let value = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// Write a metadata value
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn release_lease_with(conn: &Connection, name: &str, owner: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM leases WHERE name = ?1 AND owner = ?2", params![name, owner])
}

/// AND-combined filter for listing improvements. `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct ImprovementFilter {
    pub status: Option<Status>,
    pub category: Option<String>,
    pub severity: Option<Severity>,
}

impl ImprovementFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(Status::Pending),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// One row of an improvement's audit trail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub from_status: Option<Status>,
    pub to_status: Status,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A requested status change
#[derive(Debug, Clone)]
pub struct Transition<'a> {
    pub id: &'a str,
    pub allowed_from: &'a [Status],
    pub to: Status,
    pub rejection_reason: Option<&'a str>,
    pub backup_id: Option<&'a str>,
    pub note: Option<String>,
}

/// Result of a compare-and-swap status change
#[derive(Debug)]
pub enum TransitionOutcome {
    Changed(Improvement),
    /// The record exists but its status was not in `allowed_from`
    Conflict(Status),
    Missing,
}

const SELECT_COLUMNS: &str = "id, category, title, description, suggestion, severity, auto_fixable, \
    fix_action, created_at, status, rejection_reason, backup_id, approved_at, applied_at, \
    rejected_at, rolled_back_at";

/// Durable store of improvement records
#[derive(Clone)]
pub struct ImprovementStore {
    db: Database,
}

impl ImprovementStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert a record unless its id already exists. Returns true if inserted.
    pub async fn insert_if_absent(&self, improvement: &Improvement) -> Result<bool> {
        let fix_json = improvement
            .fix_action
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            r#"INSERT OR IGNORE INTO improvements
               (id, category, title, description, suggestion, severity, auto_fixable,
                fix_action, created_at, status)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                improvement.id,
                improvement.category,
                improvement.title,
                improvement.description,
                improvement.suggestion,
                improvement.severity.as_str(),
                improvement.auto_fixable,
                fix_json,
                improvement.created_at.to_rfc3339(),
                Status::Pending.as_str(),
            ],
        )?;

        if inserted == 0 {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO improvement_history (improvement_id, from_status, to_status, at, note)
             VALUES (?1, NULL, ?2, ?3, ?4)",
            params![
                improvement.id,
                Status::Pending.as_str(),
                improvement.created_at.to_rfc3339(),
                Some("detected"),
            ],
        )?;
        tx.commit()?;

        debug!("Stored improvement {}", improvement.id);
        Ok(true)
    }

    /// Look up a record by id
    pub async fn get(&self, id: &str) -> Result<Option<Improvement>> {
        let conn = self.db.lock().await;
        Ok(Self::get_with(&conn, id)?)
    }

    fn get_with(conn: &Connection, id: &str) -> rusqlite::Result<Option<Improvement>> {
        let sql = format!("SELECT {} FROM improvements WHERE id = ?1", SELECT_COLUMNS);
        conn.query_row(&sql, params![id], row_to_improvement).optional()
    }

    /// List records matching every set filter, oldest first
    pub async fn list(&self, filter: &ImprovementFilter) -> Result<Vec<Improvement>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(ref category) = filter.category {
            values.push(category.clone());
            clauses.push(format!("category = ?{}", values.len()));
        }
        if let Some(severity) = filter.severity {
            values.push(severity.as_str().to_string());
            clauses.push(format!("severity = ?{}", values.len()));
        }

        let mut sql = format!("SELECT {} FROM improvements", SELECT_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_improvement)?;

        let mut improvements = Vec::new();
        for row in rows {
            improvements.push(row?);
        }
        Ok(improvements)
    }

    /// Atomically move a record to `to` if its current status is allowed
    pub async fn transition(&self, change: Transition<'_>) -> Result<TransitionOutcome> {
        let timestamp_column = match change.to {
            Status::Approved => "approved_at",
            Status::Rejected => "rejected_at",
            Status::Applied => "applied_at",
            Status::RolledBack => "rolled_back_at",
            Status::Pending => {
                return Err(ImprovementError::InvalidArgument(
                    "no transition re-enters pending".to_string(),
                ))
            }
        };

        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row("SELECT status FROM improvements WHERE id = ?1", params![change.id], |row| row.get(0))
            .optional()?;

        let current = match current {
            Some(s) => s.parse::<Status>()?,
            None => return Ok(TransitionOutcome::Missing),
        };

        if !change.allowed_from.contains(&current) {
            return Ok(TransitionOutcome::Conflict(current));
        }

        let sql = format!(
            "UPDATE improvements
             SET status = ?1, {} = ?2,
                 rejection_reason = COALESCE(?3, rejection_reason),
                 backup_id = COALESCE(?4, backup_id)
             WHERE id = ?5 AND status = ?6",
            timestamp_column
        );
        let changed = tx.execute(
            &sql,
            params![
                change.to.as_str(),
                now,
                change.rejection_reason,
                change.backup_id,
                change.id,
                current.as_str(),
            ],
        )?;

        if changed == 0 {
            return Ok(TransitionOutcome::Conflict(current));
        }

        tx.execute(
            "INSERT INTO improvement_history (improvement_id, from_status, to_status, at, note)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![change.id, current.as_str(), change.to.as_str(), now, change.note],
        )?;

        let updated = Self::get_with(&tx, change.id)?;
        tx.commit()?;

        match updated {
            Some(improvement) => Ok(TransitionOutcome::Changed(improvement)),
            None => Ok(TransitionOutcome::Missing),
        }
    }

    /// Status history of one record, oldest first
    pub async fn history(&self, id: &str) -> Result<Vec<HistoryEntry>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT from_status, to_status, at, note FROM improvement_history
             WHERE improvement_id = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![id], |row| {
            let from: Option<String> = row.get(0)?;
            let to: String = row.get(1)?;
            Ok(HistoryEntry {
                from_status: from.map(|s| parse_status(0, &s)).transpose()?,
                to_status: parse_status(1, &to)?,
                at: parse_timestamp(2, row.get(2)?)?,
                note: row.get(3)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Number of records in every status, zeros included
    pub async fn status_counts(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts: BTreeMap<String, usize> = Status::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();

        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached("SELECT status, COUNT(*) FROM improvements GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count as usize);
        }
        Ok(counts)
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_status(idx: usize, value: &str) -> rusqlite::Result<Status> {
    value.parse::<Status>().map_err(|e| conversion_error(idx, e))
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_optional_timestamp(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(idx, v)).transpose()
}

fn row_to_improvement(row: &Row<'_>) -> rusqlite::Result<Improvement> {
    let severity: String = row.get(5)?;
    let fix_action: Option<String> = row.get(7)?;
    let status: String = row.get(9)?;

    let fix_action = fix_action
        .map(|json| serde_json::from_str::<FixAction>(&json))
        .transpose()
        .map_err(|e| conversion_error(7, e))?;

    Ok(Improvement {
        id: row.get(0)?,
        category: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        suggestion: row.get(4)?,
        severity: severity.parse::<Severity>().map_err(|e| conversion_error(5, e))?,
        auto_fixable: row.get(6)?,
        fix_action,
        created_at: parse_timestamp(8, row.get(8)?)?,
        status: parse_status(9, &status)?,
        rejection_reason: row.get(10)?,
        backup_id: row.get(11)?,
        approved_at: parse_optional_timestamp(12, row.get(12)?)?,
        applied_at: parse_optional_timestamp(13, row.get(13)?)?,
        rejected_at: parse_optional_timestamp(14, row.get(14)?)?,
        rolled_back_at: parse_optional_timestamp(15, row.get(15)?)?,
    })
}
