//! Operational best-practice checks over the settings domain

use serde_json::{json, Value};

use super::{Detector, ScanContext};
use crate::improvement::error::DetectorError;
use crate::improvement::record::{stable_id, FixAction, Improvement, Severity};

const NAME: &str = "best_practices";

struct Practice {
    key: &'static str,
    expected: Value,
    category: &'static str,
    severity: Severity,
    title: &'static str,
    rationale: &'static str,
    /// An unset key counts as a violation
    required: bool,
    /// When non-empty, only these values count as violations
    flagged_values: &'static [&'static str],
}

impl Practice {
    fn violated_by(&self, value: &Value) -> bool {
        if *value == self.expected {
            return false;
        }
        self.flagged_values.is_empty()
            || value
                .as_str()
                .is_some_and(|v| self.flagged_values.iter().any(|f| f.eq_ignore_ascii_case(v)))
    }
}

fn practices() -> Vec<Practice> {
    vec![
        Practice {
            key: "security.require_https",
            expected: json!(true),
            category: "security",
            severity: Severity::Critical,
            title: "Require HTTPS for remote access",
            rationale: "Remote commands and session tokens travel in clear text otherwise",
            required: true,
            flagged_values: &[],
        },
        Practice {
            key: "backup.enabled",
            expected: json!(true),
            category: NAME,
            severity: Severity::High,
            title: "Enable scheduled record-store backups",
            rationale: "Schedules, scenes and device pairings are lost with the disk",
            required: true,
            flagged_values: &[],
        },
        Practice {
            key: "logging.level",
            expected: json!("info"),
            category: NAME,
            severity: Severity::Low,
            title: "Turn off debug logging",
            rationale: "Debug logs grow quickly and include raw device payloads",
            required: false,
            flagged_values: &["debug", "trace"],
        },
    ]
}

pub struct BestPracticesDetector {
    practices: Vec<Practice>,
}

impl BestPracticesDetector {
    pub fn new() -> Self {
        Self { practices: practices() }
    }
}

impl Default for BestPracticesDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for BestPracticesDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, ctx: &ScanContext) -> Result<Vec<Improvement>, DetectorError> {
        let mut found = Vec::new();

        for practice in &self.practices {
            let current = match ctx.settings.get(practice.key) {
                Some(value) if !practice.violated_by(value) => continue,
                Some(value) => format!("currently {}", value),
                None if practice.required => "not set".to_string(),
                None => continue,
            };

            found.push(
                Improvement::new(
                    stable_id(NAME, practice.key),
                    practice.category,
                    practice.severity,
                    practice.title,
                    format!("'{}' is {}. {}.", practice.key, current, practice.rationale),
                    format!("Set {} to {}", practice.key, practice.expected),
                )
                .with_fix(FixAction::config_update(practice.key, practice.expected.clone())),
            );
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::improvement::settings::SettingsMap;

    #[test]
    fn test_empty_settings_flag_required_practices() {
        let found = BestPracticesDetector::new().detect(&ScanContext::default()).unwrap();
        let categories: Vec<&str> = found.iter().map(|i| i.category.as_str()).collect();
        assert_eq!(categories, vec!["security", "best_practices"]);
        assert_eq!(found[0].severity, Severity::Critical);
    }

    #[test]
    fn test_compliant_settings_report_nothing() {
        let mut settings = SettingsMap::new();
        settings.insert("security.require_https".to_string(), json!(true));
        settings.insert("backup.enabled".to_string(), json!(true));
        settings.insert("logging.level".to_string(), json!("info"));

        let found = BestPracticesDetector::new().detect(&ScanContext { settings }).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_debug_logging_is_flagged() {
        let mut settings = SettingsMap::new();
        settings.insert("security.require_https".to_string(), json!(true));
        settings.insert("backup.enabled".to_string(), json!(true));
        settings.insert("logging.level".to_string(), json!("debug"));

        let found = BestPracticesDetector::new().detect(&ScanContext { settings }).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fix_action, Some(FixAction::config_update("logging.level", "info")));
    }

    #[test]
    fn test_quieter_log_levels_are_left_alone() {
        for level in ["warn", "error", "WARN"] {
            let mut settings = SettingsMap::new();
            settings.insert("security.require_https".to_string(), json!(true));
            settings.insert("backup.enabled".to_string(), json!(true));
            settings.insert("logging.level".to_string(), json!(level));

            let found = BestPracticesDetector::new().detect(&ScanContext { settings }).unwrap();
            assert!(found.is_empty(), "{} was flagged", level);
        }

        let mut settings = SettingsMap::new();
        settings.insert("security.require_https".to_string(), json!(true));
        settings.insert("backup.enabled".to_string(), json!(true));
        settings.insert("logging.level".to_string(), json!("trace"));
        let found = BestPracticesDetector::new().detect(&ScanContext { settings }).unwrap();
        assert_eq!(found.len(), 1);
    }
}
