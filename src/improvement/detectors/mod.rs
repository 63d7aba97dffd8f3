//! Detector set - independent, side-effect-free checks that propose
//! improvements for one concern area each.

pub mod best_practices;
pub mod code_quality;
pub mod configuration;
pub mod dependencies;

use std::sync::Arc;

use super::error::DetectorError;
use super::record::Improvement;
use super::settings::SettingsMap;
use crate::config::ImprovementConfig;

pub use best_practices::BestPracticesDetector;
pub use code_quality::{CodeQualityDetector, PatternRule};
pub use configuration::{Bound, ConfigurationDetector, SettingRule};
pub use dependencies::DependencyDetector;

/// Read-only view of the system handed to every detector
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    pub settings: SettingsMap,
}

/// One concern area of the scan.
///
/// `detect` must not mutate anything and returns an empty list when there
/// is nothing to report. An `Err` is isolated by the scanner.
pub trait Detector: Send + Sync {
    /// Scan category this detector answers to
    fn name(&self) -> &'static str;

    fn detect(&self, ctx: &ScanContext) -> Result<Vec<Improvement>, DetectorError>;
}

/// The built-in detector set, configured from `[improvements]`
pub fn default_detectors(config: &ImprovementConfig) -> Vec<Arc<dyn Detector>> {
    vec![
        Arc::new(ConfigurationDetector::with_defaults()),
        Arc::new(DependencyDetector::new(
            config.requirements_path.clone(),
            config.minimum_versions.clone(),
        )),
        Arc::new(CodeQualityDetector::new(
            config.source_dirs.clone(),
            config.deprecated_patterns.clone(),
        )),
        Arc::new(BestPracticesDetector::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_detector_names_are_unique() {
        let detectors = default_detectors(&ImprovementConfig::default());
        let mut names: Vec<&str> = detectors.iter().map(|d| d.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names, vec!["best_practices", "code_quality", "configuration", "dependencies"]);
    }
}
