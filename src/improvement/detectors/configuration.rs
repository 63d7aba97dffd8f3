//! Configuration detector - compares assistant settings against
//! recommended bounds and proposes `config_update` fixes.

use serde_json::{json, Value};

use super::{Detector, ScanContext};
use crate::improvement::error::DetectorError;
use crate::improvement::record::{stable_id, FixAction, Improvement, Severity};

const NAME: &str = "configuration";

/// Acceptable range for a numeric setting
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    AtLeast(f64),
    AtMost(f64),
    Between(f64, f64),
}

impl Bound {
    fn contains(&self, value: f64) -> bool {
        match *self {
            Bound::AtLeast(min) => value >= min,
            Bound::AtMost(max) => value <= max,
            Bound::Between(min, max) => value >= min && value <= max,
        }
    }

    fn describe(&self) -> String {
        match self {
            Bound::AtLeast(min) => format!("at least {}", min),
            Bound::AtMost(max) => format!("at most {}", max),
            Bound::Between(min, max) => format!("between {} and {}", min, max),
        }
    }
}

/// One recommended setting
#[derive(Debug, Clone)]
pub struct SettingRule {
    pub key: String,
    pub bound: Bound,
    pub recommended: Value,
    pub severity: Severity,
    pub rationale: String,
    /// Report the key when it is not set at all
    pub flag_when_missing: bool,
}

pub struct ConfigurationDetector {
    rules: Vec<SettingRule>,
}

impl ConfigurationDetector {
    pub fn new(rules: Vec<SettingRule>) -> Self {
        Self { rules }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_rules())
    }
}

fn default_rules() -> Vec<SettingRule> {
    vec![
        SettingRule {
            key: "cache_ttl".to_string(),
            bound: Bound::AtLeast(300.0),
            recommended: json!(300),
            severity: Severity::Medium,
            rationale: "Device state is re-fetched from vendor APIs on every command \
                when the cache expires quickly"
                .to_string(),
            flag_when_missing: true,
        },
        SettingRule {
            key: "http_timeout_secs".to_string(),
            bound: Bound::Between(5.0, 60.0),
            recommended: json!(15),
            severity: Severity::Medium,
            rationale: "Adapter calls either fail spuriously or hang the tool loop outside this range".to_string(),
            flag_when_missing: false,
        },
        SettingRule {
            key: "device_poll_interval_secs".to_string(),
            bound: Bound::AtLeast(30.0),
            recommended: json!(60),
            severity: Severity::Low,
            rationale: "Aggressive polling drains battery devices and trips vendor rate limits".to_string(),
            flag_when_missing: false,
        },
        SettingRule {
            key: "history_retention_days".to_string(),
            bound: Bound::AtMost(90.0),
            recommended: json!(30),
            severity: Severity::Low,
            rationale: "Unbounded history slows record-store queries".to_string(),
            flag_when_missing: false,
        },
    ]
}

impl Detector for ConfigurationDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, ctx: &ScanContext) -> Result<Vec<Improvement>, DetectorError> {
        let mut found = Vec::new();

        for rule in &self.rules {
            let (title, description) = match ctx.settings.get(&rule.key) {
                None if rule.flag_when_missing => (
                    format!("Set {}", rule.key),
                    format!("'{}' is not configured. {}.", rule.key, rule.rationale),
                ),
                None => continue,
                Some(value) => {
                    let Some(number) = value.as_f64() else {
                        return Err(DetectorError::new(
                            NAME,
                            format!("setting '{}' is not numeric: {}", rule.key, value),
                        ));
                    };
                    if rule.bound.contains(number) {
                        continue;
                    }
                    (
                        format!("Adjust {}", rule.key),
                        format!(
                            "'{}' is {} but should be {}. {}.",
                            rule.key,
                            value,
                            rule.bound.describe(),
                            rule.rationale
                        ),
                    )
                }
            };

            found.push(
                Improvement::new(
                    stable_id(NAME, &rule.key),
                    NAME,
                    rule.severity,
                    title,
                    description,
                    format!("Set {} to {}", rule.key, rule.recommended),
                )
                .with_fix(FixAction::config_update(rule.key.clone(), rule.recommended.clone())),
            );
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::improvement::settings::SettingsMap;

    fn ctx(pairs: &[(&str, Value)]) -> ScanContext {
        let settings: SettingsMap = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        ScanContext { settings }
    }

    #[test]
    fn test_missing_cache_ttl_is_flagged() {
        let found = ConfigurationDetector::with_defaults().detect(&ctx(&[])).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fix_action, Some(FixAction::config_update("cache_ttl", 300)));
    }

    #[test]
    fn test_out_of_range_values() {
        let found = ConfigurationDetector::with_defaults()
            .detect(&ctx(&[
                ("cache_ttl", json!(600)),
                ("http_timeout_secs", json!(120)),
                ("device_poll_interval_secs", json!(5)),
            ]))
            .unwrap();

        let keys: Vec<&str> = found
            .iter()
            .filter_map(|i| match &i.fix_action {
                Some(FixAction::ConfigUpdate { key, .. }) => Some(key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["http_timeout_secs", "device_poll_interval_secs"]);
    }

    #[test]
    fn test_ids_are_stable_across_scans() {
        let detector = ConfigurationDetector::with_defaults();
        let a = detector.detect(&ctx(&[])).unwrap();
        let b = detector.detect(&ctx(&[])).unwrap();
        assert_eq!(a[0].id, b[0].id);
    }

    #[test]
    fn test_non_numeric_value_is_a_detector_error() {
        let err = ConfigurationDetector::with_defaults()
            .detect(&ctx(&[("cache_ttl", json!("five minutes"))]))
            .unwrap_err();
        assert_eq!(err.detector, "configuration");
    }
}
