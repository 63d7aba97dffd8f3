//! Scanner - runs the detector set under an interval policy
//!
//! Detectors run in parallel on the blocking pool. A detector that errors or
//! panics is logged and recorded in the run's `errors`; the others carry on.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::detectors::{Detector, ScanContext};
use super::error::{DetectorError, ImprovementError, Result};
use super::manager::ImprovementManager;
use super::record::Improvement;

const LAST_SCAN_KEY: &str = "scanner.last_scan_time";

/// Outcome of one scan invocation
#[derive(Debug, Clone, Serialize)]
pub struct ScanRun {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Every candidate produced by this run, new or already known
    pub improvements: Vec<Improvement>,
    /// How many candidates had ids the store had never seen
    pub new_improvements: usize,
    pub errors: Vec<DetectorError>,
}

impl ScanRun {
    fn skipped(started_at: DateTime<Utc>, message: &str) -> Self {
        Self {
            success: false,
            message: Some(message.to_string()),
            started_at,
            improvements: Vec::new(),
            new_improvements: 0,
            errors: Vec::new(),
        }
    }
}

pub struct Scanner {
    detectors: Vec<Arc<dyn Detector>>,
    manager: Arc<ImprovementManager>,
    interval: Duration,
    excluded_categories: Vec<String>,
}

impl Scanner {
    pub fn new(
        detectors: Vec<Arc<dyn Detector>>,
        manager: Arc<ImprovementManager>,
        interval: Duration,
    ) -> Self {
        Self {
            detectors,
            manager,
            interval,
            excluded_categories: Vec::new(),
        }
    }

    /// Categories skipped by full scans (an explicit category scan still runs)
    pub fn with_excluded_categories(mut self, categories: Vec<String>) -> Self {
        self.excluded_categories = categories;
        self
    }

    /// Names accepted by [`Scanner::scan_category`]
    pub fn categories(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub async fn last_scan_time(&self) -> Result<Option<DateTime<Utc>>> {
        let raw = self.manager.store().database().get_meta(LAST_SCAN_KEY).await?;
        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)))
    }

    /// Rate limiter for unforced scans
    pub async fn should_scan(&self, force: bool) -> Result<bool> {
        if force {
            return Ok(true);
        }
        Ok(match self.last_scan_time().await? {
            None => true,
            Some(last) => Utc::now() - last >= self.interval,
        })
    }

    /// Run every detector, unless the interval has not elapsed and `force` is off
    pub async fn run_full_scan(&self, force: bool) -> Result<ScanRun> {
        let started_at = Utc::now();

        if !self.should_scan(force).await? {
            debug!("Skipping scan: interval not reached");
            return Ok(ScanRun::skipped(started_at, "interval not reached"));
        }

        let detectors: Vec<Arc<dyn Detector>> = self
            .detectors
            .iter()
            .filter(|d| !self.excluded_categories.iter().any(|c| c == d.name()))
            .cloned()
            .collect();

        info!("Starting improvement scan with {} detector(s)", detectors.len());
        let run = self.run_detectors(detectors, started_at).await?;

        self.manager
            .store()
            .database()
            .set_meta(LAST_SCAN_KEY, &started_at.to_rfc3339())
            .await?;

        info!(
            "Scan complete: {} candidate(s), {} new, {} detector error(s)",
            run.improvements.len(),
            run.new_improvements,
            run.errors.len()
        );
        Ok(run)
    }

    /// Run a single detector by name, ignoring the interval
    pub async fn scan_category(&self, category: &str) -> Result<ScanRun> {
        let detector = self
            .detectors
            .iter()
            .find(|d| d.name() == category)
            .cloned()
            .ok_or_else(|| ImprovementError::UnknownCategory(category.to_string()))?;

        info!("Starting {} scan", category);
        self.run_detectors(vec![detector], Utc::now()).await
    }

    async fn run_detectors(
        &self,
        detectors: Vec<Arc<dyn Detector>>,
        started_at: DateTime<Utc>,
    ) -> Result<ScanRun> {
        let ctx = Arc::new(ScanContext {
            settings: self.manager.settings().all().await?,
        });

        let tasks = detectors.into_iter().map(|detector| {
            let ctx = Arc::clone(&ctx);
            let name = detector.name();
            let handle = tokio::task::spawn_blocking(move || detector.detect(&ctx));
            async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(DetectorError::new(name, format!("detector panicked: {}", e))),
                }
            }
        });

        let mut improvements = Vec::new();
        let mut errors = Vec::new();

        for result in join_all(tasks).await {
            match result {
                Ok(found) => improvements.extend(
                    found
                        .into_iter()
                        .filter(|imp| !self.excluded_categories.contains(&imp.category)),
                ),
                Err(e) => {
                    warn!("{}", e);
                    errors.push(e);
                }
            }
        }

        let mut new_improvements = 0;
        for improvement in &improvements {
            if self.manager.add(improvement).await? {
                new_improvements += 1;
            }
        }

        Ok(ScanRun {
            success: true,
            message: None,
            started_at,
            improvements,
            new_improvements,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::improvement::applier::{Appliers, CommandInstaller};
    use crate::improvement::backup::BackupEngine;
    use crate::improvement::record::{Severity, Status};
    use crate::improvement::settings::SettingsStore;
    use crate::improvement::store::{Database, ImprovementFilter, ImprovementStore};

    struct Fixed {
        name: &'static str,
        ids: Vec<&'static str>,
    }

    impl Detector for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn detect(&self, _ctx: &ScanContext) -> std::result::Result<Vec<Improvement>, DetectorError> {
            Ok(self
                .ids
                .iter()
                .map(|id| Improvement::new(*id, self.name, Severity::Low, "t", "d", "s"))
                .collect())
        }
    }

    struct Failing;

    impl Detector for Failing {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn detect(&self, _ctx: &ScanContext) -> std::result::Result<Vec<Improvement>, DetectorError> {
            Err(DetectorError::new("broken", "registry unreachable"))
        }
    }

    struct Panicking;

    impl Detector for Panicking {
        fn name(&self) -> &'static str {
            "panicky"
        }

        fn detect(&self, _ctx: &ScanContext) -> std::result::Result<Vec<Improvement>, DetectorError> {
            panic!("boom")
        }
    }

    fn manager() -> Arc<ImprovementManager> {
        let db = Database::open_in_memory().unwrap();
        Arc::new(ImprovementManager::new(
            ImprovementStore::new(db.clone()),
            SettingsStore::new(db.clone()),
            BackupEngine::new(db),
            Appliers::new(Arc::new(CommandInstaller::new("pip")), std::time::Duration::from_secs(5)),
        ))
    }

    fn fixed(name: &'static str, ids: Vec<&'static str>) -> Arc<dyn Detector> {
        Arc::new(Fixed { name, ids })
    }

    #[tokio::test]
    async fn test_failing_detector_does_not_abort_scan() {
        let scanner = Scanner::new(
            vec![
                fixed("configuration", vec!["a", "b"]),
                Arc::new(Failing),
                fixed("dependencies", vec!["c"]),
                fixed("best_practices", vec!["d"]),
            ],
            manager(),
            Duration::hours(24),
        );

        let run = scanner.run_full_scan(false).await.unwrap();
        assert!(run.success);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].detector, "broken");

        let mut ids: Vec<&str> = run.improvements.iter().map(|i| i.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(run.new_improvements, 4);
    }

    #[tokio::test]
    async fn test_panicking_detector_is_isolated() {
        let scanner = Scanner::new(
            vec![Arc::new(Panicking), fixed("configuration", vec!["a"])],
            manager(),
            Duration::hours(24),
        );

        let run = scanner.run_full_scan(true).await.unwrap();
        assert!(run.success);
        assert_eq!(run.improvements.len(), 1);
        assert_eq!(run.errors[0].detector, "panicky");
    }

    #[tokio::test]
    async fn test_interval_gates_unforced_scans() {
        let scanner = Scanner::new(vec![fixed("configuration", vec!["a"])], manager(), Duration::hours(1));

        assert!(scanner.should_scan(false).await.unwrap());
        scanner.run_full_scan(false).await.unwrap();
        assert!(scanner.last_scan_time().await.unwrap().is_some());

        let skipped = scanner.run_full_scan(false).await.unwrap();
        assert!(!skipped.success);
        assert_eq!(skipped.message.as_deref(), Some("interval not reached"));

        assert!(scanner.run_full_scan(true).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_rescan_does_not_duplicate_or_reset() {
        let manager = manager();
        let scanner = Scanner::new(vec![fixed("configuration", vec!["a"])], manager.clone(), Duration::zero());

        scanner.run_full_scan(false).await.unwrap();
        manager.approve("a").await.unwrap();

        let run = scanner.run_full_scan(false).await.unwrap();
        assert_eq!(run.new_improvements, 0);
        assert_eq!(manager.get("a").await.unwrap().status, Status::Approved);
        assert_eq!(manager.list(&ImprovementFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_category_scan() {
        let scanner = Scanner::new(
            vec![fixed("configuration", vec!["a"]), fixed("dependencies", vec!["b"])],
            manager(),
            Duration::hours(24),
        );
        scanner.run_full_scan(false).await.unwrap();

        // Runs despite the interval, and only the named detector
        let run = scanner.scan_category("dependencies").await.unwrap();
        assert!(run.success);
        assert_eq!(run.improvements.len(), 1);
        assert_eq!(run.improvements[0].id, "b");

        assert!(matches!(
            scanner.scan_category("styling").await,
            Err(ImprovementError::UnknownCategory(_))
        ));
    }

    #[tokio::test]
    async fn test_excluded_categories_skip_full_scans_only() {
        let scanner = Scanner::new(
            vec![fixed("configuration", vec!["a"]), fixed("code_quality", vec!["b"])],
            manager(),
            Duration::hours(24),
        )
        .with_excluded_categories(vec!["code_quality".to_string()]);

        let run = scanner.run_full_scan(true).await.unwrap();
        assert_eq!(run.improvements.len(), 1);
        assert_eq!(run.improvements[0].id, "a");
    }
}
