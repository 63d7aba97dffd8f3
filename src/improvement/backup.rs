//! Backup/restore engine for applied improvements
//!
//! Snapshots capture the entire settings domain, since a fix action may be
//! absent or describe only part of what it touches. Restores write the
//! captured values back verbatim: last restore wins, no merging.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use super::error::{ImprovementError, Result};
use super::settings::{SettingsLock, SettingsMap};
use super::store::Database;

/// A captured copy of the settings domain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub improvement_id: String,
    pub created_at: DateTime<Utc>,
    pub values: SettingsMap,
}

/// Owns every snapshot; improvement records only hold the id
#[derive(Clone)]
pub struct BackupEngine {
    db: Database,
}

impl BackupEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Capture the settings domain under a fresh backup id.
    ///
    /// The caller holds the settings lock until its mutation is done.
    pub async fn snapshot(
        &self,
        settings: &SettingsLock<'_>,
        improvement_id: &str,
    ) -> Result<Snapshot> {
        let snapshot = Snapshot {
            id: format!("bak-{}", uuid::Uuid::new_v4().simple()),
            improvement_id: improvement_id.to_string(),
            created_at: Utc::now(),
            values: settings.all().await?,
        };

        let json = serde_json::to_string(&snapshot.values)?;
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO backups (id, improvement_id, snapshot, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![snapshot.id, snapshot.improvement_id, json, snapshot.created_at.to_rfc3339()],
        )?;

        info!(
            "Created backup {} for improvement {} ({} settings)",
            snapshot.id,
            improvement_id,
            snapshot.values.len()
        );
        Ok(snapshot)
    }

    /// Load a stored snapshot
    pub async fn get(&self, backup_id: &str) -> Result<Option<Snapshot>> {
        let row: Option<(String, String, String)> = {
            let conn = self.db.lock().await;
            conn.query_row(
                "SELECT improvement_id, snapshot, created_at FROM backups WHERE id = ?1",
                params![backup_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
        };

        let Some((improvement_id, json, created_at)) = row else {
            return Ok(None);
        };

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| ImprovementError::InvalidArgument(format!("corrupt backup timestamp: {}", e)))?;

        Ok(Some(Snapshot {
            id: backup_id.to_string(),
            improvement_id,
            created_at,
            values: serde_json::from_str(&json)?,
        }))
    }

    /// Write a snapshot's values back over the settings domain
    pub async fn restore(&self, settings: &SettingsLock<'_>, backup_id: &str) -> Result<Snapshot> {
        let snapshot = self
            .get(backup_id)
            .await?
            .ok_or_else(|| ImprovementError::NotFound(format!("backup {}", backup_id)))?;

        settings.replace_all(&snapshot.values).await?;

        info!("Restored backup {} ({} settings)", backup_id, snapshot.values.len());
        Ok(snapshot)
    }

    /// Drop a snapshot that will never be restored
    pub async fn discard(&self, backup_id: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        let removed = conn.execute("DELETE FROM backups WHERE id = ?1", params![backup_id])?;
        debug!("Discarded backup {}", backup_id);
        Ok(removed > 0)
    }
}
