//! Lifecycle engine - the only component allowed to change an
//! improvement's status.
//!
//! ```text
//! pending ──approve──▶ approved ──apply──▶ applied ──rollback──▶ rolled_back
//!    │                    │
//!    └──────reject────────┴──────▶ rejected
//! ```
//!
//! Apply and rollback hold the settings lock for their whole
//! read-check-snapshot-mutate-transition sequence, so two concurrent
//! applies of one id serialize and the second sees `applied`. The lock is
//! shared with every process on the same database. Reject takes it too, so
//! it can never land in the middle of an apply.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::applier::{AppliedChange, Appliers};
use super::backup::{BackupEngine, Snapshot};
use super::error::{ImprovementError, Result};
use super::record::{Improvement, Status};
use super::settings::{SettingsLock, SettingsStore};
use super::store::{
    HistoryEntry, ImprovementFilter, ImprovementStore, Transition, TransitionOutcome,
};

/// Result of a successful apply
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub improvement: Improvement,
    pub backup_id: String,
    pub change: AppliedChange,
}

/// Enforces the approval/apply/rollback state machine
pub struct ImprovementManager {
    store: ImprovementStore,
    settings: SettingsStore,
    backups: BackupEngine,
    appliers: Appliers,
}

impl ImprovementManager {
    pub fn new(
        store: ImprovementStore,
        settings: SettingsStore,
        backups: BackupEngine,
        appliers: Appliers,
    ) -> Self {
        Self {
            store,
            settings,
            backups,
            appliers,
        }
    }

    pub fn store(&self) -> &ImprovementStore {
        &self.store
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn backups(&self) -> &BackupEngine {
        &self.backups
    }

    /// Persist a candidate unless its id is already known.
    ///
    /// Existing records are never touched, whatever their status, so a
    /// rescan cannot reset an approved or applied item. Returns true for
    /// genuinely new ids.
    pub async fn add(&self, candidate: &Improvement) -> Result<bool> {
        let mut fresh = candidate.clone();
        fresh.status = Status::Pending;
        fresh.rejection_reason = None;
        fresh.backup_id = None;
        fresh.approved_at = None;
        fresh.applied_at = None;
        fresh.rejected_at = None;
        fresh.rolled_back_at = None;

        let inserted = self.store.insert_if_absent(&fresh).await?;
        if inserted {
            info!(
                "New improvement {} [{}/{}]: {}",
                fresh.id, fresh.category, fresh.severity, fresh.title
            );
        } else {
            debug!("Improvement {} already known, skipping", fresh.id);
        }
        Ok(inserted)
    }

    pub async fn get(&self, id: &str) -> Result<Improvement> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ImprovementError::NotFound(id.to_string()))
    }

    pub async fn list(&self, filter: &ImprovementFilter) -> Result<Vec<Improvement>> {
        self.store.list(filter).await
    }

    pub async fn history(&self, id: &str) -> Result<Vec<HistoryEntry>> {
        // Distinguish "unknown id" from "no history"
        self.get(id).await?;
        self.store.history(id).await
    }

    /// pending → approved
    pub async fn approve(&self, id: &str) -> Result<Improvement> {
        let outcome = self
            .store
            .transition(Transition {
                id,
                allowed_from: &[Status::Pending],
                to: Status::Approved,
                rejection_reason: None,
                backup_id: None,
                note: None,
            })
            .await?;

        let improvement = expect_changed(id, outcome, |status| ImprovementError::InvalidTransition {
            id: id.to_string(),
            action: "approve",
            status,
        })?;
        info!("Approved improvement {}", id);
        Ok(improvement)
    }

    /// pending | approved → rejected
    pub async fn reject(&self, id: &str, reason: Option<&str>) -> Result<Improvement> {
        let _settings = self.settings.lock().await?;

        let outcome = self
            .store
            .transition(Transition {
                id,
                allowed_from: &[Status::Pending, Status::Approved],
                to: Status::Rejected,
                rejection_reason: reason,
                backup_id: None,
                note: reason.map(|r| r.to_string()),
            })
            .await?;

        let improvement = expect_changed(id, outcome, |status| ImprovementError::InvalidTransition {
            id: id.to_string(),
            action: "reject",
            status,
        })?;
        let because = reason.map(|r| format!(": {}", r)).unwrap_or_default();
        info!("Rejected improvement {}{}", id, because);
        Ok(improvement)
    }

    /// approved → applied, taking a settings snapshot first.
    ///
    /// Either the fix is applied and the record carries its backup id, or the
    /// settings domain is put back, the snapshot is dropped and the record
    /// stays `approved`.
    pub async fn apply(&self, id: &str) -> Result<ApplyOutcome> {
        let settings = self.settings.lock().await?;

        let improvement = self.get(id).await?;
        if improvement.status != Status::Approved {
            return Err(ImprovementError::NotApproved {
                id: id.to_string(),
                status: improvement.status,
            });
        }

        let snapshot = self.backups.snapshot(&settings, id).await?;

        let change = match self.appliers.apply(improvement.fix_action.as_ref(), &settings).await {
            Ok(change) => change,
            Err(e) => {
                warn!("Applying improvement {} failed: {:#}", id, e);
                let mut reason = format!("{:#}", e);
                if let Err(restore) = self.undo_apply(&settings, &snapshot).await {
                    reason.push_str(&not_restored(&snapshot, &restore));
                }
                return Err(ImprovementError::ApplyFailed {
                    id: id.to_string(),
                    reason,
                });
            }
        };

        let outcome = self
            .store
            .transition(Transition {
                id,
                allowed_from: &[Status::Approved],
                to: Status::Applied,
                rejection_reason: None,
                backup_id: Some(&snapshot.id),
                note: Some(format!("backup {}", snapshot.id)),
            })
            .await;

        let applied = match outcome {
            Ok(outcome) => expect_changed(id, outcome, |status| ImprovementError::NotApproved {
                id: id.to_string(),
                status,
            }),
            Err(e) => Err(e),
        };

        match applied {
            Ok(improvement) => {
                info!("Applied improvement {} (backup {})", id, snapshot.id);
                Ok(ApplyOutcome {
                    improvement,
                    backup_id: snapshot.id,
                    change,
                })
            }
            Err(e) => {
                // Status moved under us; put the settings back
                warn!("Improvement {} changed during apply: {}", id, e);
                match self.undo_apply(&settings, &snapshot).await {
                    Ok(()) => Err(e),
                    Err(restore) => Err(ImprovementError::ApplyFailed {
                        id: id.to_string(),
                        reason: format!("{}{}", e, not_restored(&snapshot, &restore)),
                    }),
                }
            }
        }
    }

    /// applied → rolled_back, restoring the snapshot taken at apply time
    pub async fn rollback(&self, id: &str) -> Result<Improvement> {
        let settings = self.settings.lock().await?;

        let improvement = self.get(id).await?;
        if improvement.status != Status::Applied {
            return Err(ImprovementError::NotApplied {
                id: id.to_string(),
                status: improvement.status,
            });
        }

        let backup_id =
            improvement.backup_id.clone().ok_or_else(|| ImprovementError::RestoreFailed {
                id: id.to_string(),
                reason: "no backup recorded".to_string(),
            })?;

        if let Err(e) = self.backups.restore(&settings, &backup_id).await {
            warn!("Restoring backup {} for {} failed: {}", backup_id, id, e);
            return Err(ImprovementError::RestoreFailed {
                id: id.to_string(),
                reason: e.to_string(),
            });
        }

        let outcome = self
            .store
            .transition(Transition {
                id,
                allowed_from: &[Status::Applied],
                to: Status::RolledBack,
                rejection_reason: None,
                backup_id: None,
                note: Some(format!("restored backup {}", backup_id)),
            })
            .await?;

        let improvement = expect_changed(id, outcome, |status| ImprovementError::NotApplied {
            id: id.to_string(),
            status,
        })?;
        info!("Rolled back improvement {} from backup {}", id, backup_id);
        Ok(improvement)
    }

    /// Put the pre-apply settings back and drop the snapshot. On failure the
    /// snapshot is kept so the settings can still be recovered from it.
    async fn undo_apply(&self, settings: &SettingsLock<'_>, snapshot: &Snapshot) -> Result<()> {
        if let Err(e) = settings.replace_all(&snapshot.values).await {
            error!(
                "Could not restore settings after failed apply of {}: {}",
                snapshot.improvement_id, e
            );
            return Err(e);
        }
        if let Err(e) = self.backups.discard(&snapshot.id).await {
            warn!("Could not discard backup {}: {}", snapshot.id, e);
        }
        Ok(())
    }
}

fn not_restored(snapshot: &Snapshot, cause: &ImprovementError) -> String {
    format!(
        "; settings were left modified and could not be restored from backup {}: {}",
        snapshot.id, cause
    )
}

fn expect_changed<F>(id: &str, outcome: TransitionOutcome, conflict: F) -> Result<Improvement>
where
    F: FnOnce(Status) -> ImprovementError,
{
    match outcome {
        TransitionOutcome::Changed(improvement) => Ok(improvement),
        TransitionOutcome::Conflict(status) => Err(conflict(status)),
        TransitionOutcome::Missing => Err(ImprovementError::NotFound(id.to_string())),
    }
}
