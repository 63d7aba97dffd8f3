//! Settings domain - the assistant's mutable configuration values
//!
//! A durable key → JSON value map. Every write goes through one exclusive
//! gate, so apply and rollback can hold the domain still between taking a
//! snapshot and mutating it.
//!
//! The gate has two layers: an async mutex orders callers inside this
//! process, and a lease row in the database excludes every other process
//! sharing the file. A lease left behind by a crashed process expires.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::error::Result;
use super::store::Database;

const SETTINGS_LEASE: &str = "settings";
const LEASE_POLL: Duration = Duration::from_millis(25);

/// Default lease lifetime; must outlast the slowest apply
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(600);

/// Every setting at one instant
pub type SettingsMap = BTreeMap<String, serde_json::Value>;

/// Durable settings store
#[derive(Clone)]
pub struct SettingsStore {
    db: Database,
    gate: Arc<Mutex<()>>,
    lease_ttl: Duration,
}

impl SettingsStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            gate: Arc::new(Mutex::new(())),
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    /// How long a held gate stays valid if its holder never releases it
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Read a single setting
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        read_one(&self.db, key).await
    }

    /// Read the whole settings domain
    pub async fn all(&self) -> Result<SettingsMap> {
        read_all(&self.db).await
    }

    /// Write a setting, waiting for any in-flight apply or rollback
    pub async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let settings = self.lock().await?;
        settings.set(key, value).await
    }

    /// Take the exclusive write gate, waiting for holders in this and any
    /// other process to release it
    pub async fn lock(&self) -> Result<SettingsLock<'_>> {
        let guard = self.gate.lock().await;
        let owner = Uuid::new_v4().to_string();

        let mut waited = false;
        while !self.db.try_acquire_lease(SETTINGS_LEASE, &owner, self.lease_ttl).await? {
            if !waited {
                debug!("Settings gate held by another process, waiting");
                waited = true;
            }
            tokio::time::sleep(LEASE_POLL).await;
        }

        Ok(SettingsLock {
            db: &self.db,
            owner,
            _guard: guard,
        })
    }
}

/// Exclusive access to the settings domain. Dropping it releases the gate.
pub struct SettingsLock<'a> {
    db: &'a Database,
    owner: String,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for SettingsLock<'_> {
    fn drop(&mut self) {
        // Runs before `_guard` drops, so the lease is gone before the next local waiter wakes
        self.db.release_lease_now(SETTINGS_LEASE, &self.owner);
    }
}

impl SettingsLock<'_> {
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        read_one(self.db, key).await
    }

    pub async fn all(&self) -> Result<SettingsMap> {
        read_all(self.db).await
    }

    pub async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(&value)?;
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        debug!("Setting {} updated", key);
        Ok(())
    }

    /// Replace the whole domain with `values`; keys absent from it are removed
    pub async fn replace_all(&self, values: &SettingsMap) -> Result<()> {
        let encoded = values
            .iter()
            .map(|(k, v)| -> Result<(String, String)> { Ok((k.clone(), serde_json::to_string(v)?)) })
            .collect::<Result<Vec<_>>>()?;

        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM settings", [])?;
        for (key, json) in &encoded {
            tx.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, json, now],
            )?;
        }
        tx.commit()?;

        debug!("Settings domain replaced ({} keys)", encoded.len());
        Ok(())
    }
}

async fn read_one(db: &Database, key: &str) -> Result<Option<serde_json::Value>> {
    let raw: Option<String> = {
        let conn = db.lock().await;
        conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?
    };
    Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
}

async fn read_all(db: &Database) -> Result<SettingsMap> {
    let raw: Vec<(String, String)> = {
        let conn = db.lock().await;
        let mut stmt = conn.prepare_cached("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let collected = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        collected
    };

    let mut settings = SettingsMap::new();
    for (key, json) in raw {
        settings.insert(key, serde_json::from_str(&json)?);
    }
    Ok(settings)
}
