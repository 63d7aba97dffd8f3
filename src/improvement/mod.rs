//! Self-improvement pipeline
//!
//! Detectors propose improvements, the user approves or rejects them, and
//! approved fixes are applied against the settings domain with a snapshot
//! that can be rolled back. Past decisions feed filter suggestions.
//!
//! Everything is owned by one [`ImprovementPipeline`] built at startup and
//! handed to the tool dispatcher.

pub mod applier;
pub mod backup;
pub mod detectors;
pub mod error;
pub mod feedback;
pub mod manager;
pub mod record;
pub mod scanner;
pub mod settings;
pub mod store;

use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::ImprovementConfig;

pub use applier::{AppliedChange, Appliers, CommandInstaller, PackageInstaller};
pub use backup::{BackupEngine, Snapshot};
pub use detectors::{Detector, ScanContext};
pub use error::{DetectorError, ImprovementError};
pub use feedback::{DecisionCounts, FeedbackAnalytics, FeedbackStats, FilterSuggestion};
pub use manager::{ApplyOutcome, ImprovementManager};
pub use record::{FixAction, Improvement, Severity, Status};
pub use scanner::{ScanRun, Scanner};
pub use settings::{SettingsMap, SettingsStore, DEFAULT_LEASE_TTL};
pub use store::{Database, HistoryEntry, ImprovementFilter, ImprovementStore};

const MAX_INTERVAL_HOURS: u64 = 24 * 365 * 10;
const LEASE_GRACE: Duration = Duration::from_secs(60);

/// Aggregate view returned by the stats operation
#[derive(Debug, Clone, Serialize)]
pub struct ImprovementStats {
    pub status_counts: BTreeMap<String, usize>,
    pub feedback_stats: FeedbackStats,
    pub suggested_filters: Vec<FilterSuggestion>,
}

/// Scanner, lifecycle engine and analytics over one record store
pub struct ImprovementPipeline {
    manager: Arc<ImprovementManager>,
    scanner: Scanner,
    feedback: FeedbackAnalytics,
}

impl ImprovementPipeline {
    /// Open the configured on-disk store with the built-in detectors
    pub fn open(config: &ImprovementConfig) -> anyhow::Result<Self> {
        let path = config.database_path()?;
        let db = Database::open(&path)
            .with_context(|| format!("Failed to open improvement store at {}", path.display()))?;
        info!("Improvement store: {}", path.display());

        let installer: Arc<dyn PackageInstaller> =
            Arc::new(CommandInstaller::new(config.installer_command.clone()));
        Ok(Self::build(db, config, detectors::default_detectors(config), installer))
    }

    /// Assemble a pipeline from explicit parts
    pub fn build(
        db: Database,
        config: &ImprovementConfig,
        detectors: Vec<Arc<dyn Detector>>,
        installer: Arc<dyn PackageInstaller>,
    ) -> Self {
        let apply_timeout = Duration::from_secs(config.apply_timeout_secs);
        // The settings gate must outlive an apply that runs to its timeout
        let settings = SettingsStore::new(db.clone())
            .with_lease_ttl(apply_timeout.saturating_add(LEASE_GRACE).max(DEFAULT_LEASE_TTL));

        let store = ImprovementStore::new(db.clone());
        let manager = Arc::new(ImprovementManager::new(
            store.clone(),
            settings,
            BackupEngine::new(db),
            Appliers::new(installer, apply_timeout),
        ));

        // Capped at ten years; chrono panics on out-of-range durations
        let interval =
            chrono::Duration::hours(config.scan_interval_hours.min(MAX_INTERVAL_HOURS) as i64);
        let scanner = Scanner::new(detectors, Arc::clone(&manager), interval)
            .with_excluded_categories(config.excluded_categories.clone());
        let feedback =
            FeedbackAnalytics::new(store, config.rejection_threshold, config.min_decisions);

        Self {
            manager,
            scanner,
            feedback,
        }
    }

    pub fn manager(&self) -> &ImprovementManager {
        &self.manager
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn feedback(&self) -> &FeedbackAnalytics {
        &self.feedback
    }

    pub fn settings(&self) -> &SettingsStore {
        self.manager.settings()
    }

    pub async fn stats(&self) -> error::Result<ImprovementStats> {
        Ok(ImprovementStats {
            status_counts: self.manager.store().status_counts().await?,
            feedback_stats: self.feedback.get_feedback_stats().await?,
            suggested_filters: self.feedback.get_filter_suggestions().await?,
        })
    }
}
