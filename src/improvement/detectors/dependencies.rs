//! Dependency freshness detector
//!
//! Reads a requirements-style manifest (`name==version` per line) and
//! proposes `pip_upgrade` fixes for pins older than the configured minimums.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use super::{Detector, ScanContext};
use crate::improvement::error::DetectorError;
use crate::improvement::record::{stable_id, FixAction, Improvement, Severity};

const NAME: &str = "dependencies";

pub struct DependencyDetector {
    manifest: Option<PathBuf>,
    minimum_versions: BTreeMap<String, String>,
}

impl DependencyDetector {
    pub fn new(manifest: Option<PathBuf>, minimum_versions: BTreeMap<String, String>) -> Self {
        Self {
            manifest,
            minimum_versions,
        }
    }
}

impl Detector for DependencyDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, _ctx: &ScanContext) -> Result<Vec<Improvement>, DetectorError> {
        let Some(ref manifest) = self.manifest else {
            debug!("No requirements manifest configured, skipping dependency scan");
            return Ok(Vec::new());
        };

        let content = std::fs::read_to_string(manifest)
            .map_err(|e| DetectorError::new(NAME, format!("cannot read {}: {}", manifest.display(), e)))?;

        let mut found = Vec::new();
        for (package, pinned) in parse_pins(&content) {
            let Some(minimum) = self.minimum_versions.get(&package) else {
                continue;
            };
            let Some(ordering) = compare_versions(&pinned, minimum) else {
                debug!("Skipping {}: cannot compare '{}' with '{}'", package, pinned, minimum);
                continue;
            };
            if ordering != std::cmp::Ordering::Less {
                continue;
            }

            let severity = if major(&pinned) < major(minimum) {
                Severity::High
            } else {
                Severity::Medium
            };

            found.push(
                Improvement::new(
                    stable_id(NAME, &format!("{}=={}", package, minimum)),
                    NAME,
                    severity,
                    format!("Upgrade {} to {}", package, minimum),
                    format!(
                        "{} is pinned to {} in {}, below the minimum supported {}",
                        package,
                        pinned,
                        manifest.display(),
                        minimum
                    ),
                    format!("Upgrade {} from {} to {}", package, pinned, minimum),
                )
                .with_fix(FixAction::pip_upgrade(package.clone(), minimum.clone())),
            );
        }

        Ok(found)
    }
}

/// Extract exact pins, ignoring comments, options and unpinned requirements
fn parse_pins(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty() && !line.starts_with('-'))
        .filter_map(|line| {
            let (name, version) = line.split_once("==")?;
            // Drop extras and environment markers: "uvicorn[standard]==0.29; python_version>'3.8'"
            let name = name.split('[').next().unwrap_or(name).trim().to_lowercase();
            let version = version.split(';').next().unwrap_or(version).trim().to_string();
            if name.is_empty() || version.is_empty() {
                None
            } else {
                Some((name, version))
            }
        })
        .collect()
}

fn version_parts(version: &str) -> Vec<u32> {
    version
        .split('.')
        .map_while(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .collect()
}

fn major(version: &str) -> u32 {
    version_parts(version).first().copied().unwrap_or(0)
}

/// Compare dotted numeric versions, padding the shorter with zeros
fn compare_versions(a: &str, b: &str) -> Option<std::cmp::Ordering> {
    let a_parts = version_parts(a);
    let b_parts = version_parts(b);
    if a_parts.is_empty() || b_parts.is_empty() {
        return None;
    }

    for i in 0..std::cmp::max(a_parts.len(), b_parts.len()) {
        let left = a_parts.get(i).unwrap_or(&0);
        let right = b_parts.get(i).unwrap_or(&0);
        if left != right {
            return Some(left.cmp(right));
        }
    }
    Some(std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;
    use std::io::Write;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("2.31.0", "2.32.0"), Some(Ordering::Less));
        assert_eq!(compare_versions("2.32", "2.32.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions("10.0", "9.9.9"), Some(Ordering::Greater));
        assert_eq!(compare_versions("1.0rc1", "1.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions("latest", "1.0"), None);
    }

    #[test]
    fn test_parse_pins() {
        let pins = parse_pins(
            "# core\nrequests==2.31.0\n-r base.txt\nUvicorn[standard]==0.29.0 ; python_version > '3.8'\nflask>=2\n\n",
        );
        assert_eq!(
            pins,
            vec![
                ("requests".to_string(), "2.31.0".to_string()),
                ("uvicorn".to_string(), "0.29.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_outdated_pins_become_upgrades() {
        let mut manifest = tempfile::NamedTempFile::new().unwrap();
        writeln!(manifest, "requests==2.31.0\naiohttp==3.9.5\nphue==1.1").unwrap();

        let minimums: BTreeMap<String, String> = [
            ("requests".to_string(), "2.32.0".to_string()),
            ("aiohttp".to_string(), "3.9.0".to_string()),
            ("phue".to_string(), "2.0".to_string()),
        ]
        .into_iter()
        .collect();

        let found = DependencyDetector::new(Some(manifest.path().to_path_buf()), minimums)
            .detect(&ScanContext::default())
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].fix_action, Some(FixAction::pip_upgrade("requests", "2.32.0")));
        assert_eq!(found[0].severity, Severity::Medium);
        assert_eq!(found[1].fix_action, Some(FixAction::pip_upgrade("phue", "2.0")));
        assert_eq!(found[1].severity, Severity::High);
    }

    #[test]
    fn test_no_manifest_reports_nothing() {
        let found = DependencyDetector::new(None, BTreeMap::new())
            .detect(&ScanContext::default())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_unreadable_manifest_is_a_detector_error() {
        let err = DependencyDetector::new(Some(PathBuf::from("/nonexistent/requirements.txt")), BTreeMap::new())
            .detect(&ScanContext::default())
            .unwrap_err();
        assert_eq!(err.detector, "dependencies");
    }
}
