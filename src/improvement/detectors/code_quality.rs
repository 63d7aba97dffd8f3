//! Code pattern detector
//!
//! Walks the configured source directories and flags lines matching
//! deprecated-pattern regexes. Findings are advisory: no fix action.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use walkdir::WalkDir;

use super::{Detector, ScanContext};
use crate::improvement::error::DetectorError;
use crate::improvement::record::{stable_id, Improvement, Severity};

const NAME: &str = "code_quality";

/// Files larger than this are skipped
const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Line numbers quoted per finding
const MAX_LINES_REPORTED: usize = 5;

/// A deprecated or risky code pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
    pub title: String,
    pub suggestion: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_severity() -> Severity {
    Severity::Low
}

fn default_category() -> String {
    NAME.to_string()
}

/// Patterns checked when none are configured
pub fn default_pattern_rules() -> Vec<PatternRule> {
    vec![
        PatternRule {
            pattern: r"datetime\.utcnow\(".to_string(),
            title: "Deprecated datetime.utcnow()".to_string(),
            suggestion: "Use datetime.now(timezone.utc)".to_string(),
            severity: Severity::Low,
            category: NAME.to_string(),
        },
        PatternRule {
            pattern: r"asyncio\.get_event_loop\(".to_string(),
            title: "Deprecated asyncio.get_event_loop()".to_string(),
            suggestion: "Use asyncio.get_running_loop() inside coroutines".to_string(),
            severity: Severity::Medium,
            category: NAME.to_string(),
        },
        PatternRule {
            pattern: r"verify\s*=\s*False".to_string(),
            title: "TLS certificate verification disabled".to_string(),
            suggestion: "Remove verify=False and trust the device's certificate explicitly".to_string(),
            severity: Severity::High,
            category: "security".to_string(),
        },
    ]
}

pub struct CodeQualityDetector {
    roots: Vec<PathBuf>,
    rules: Vec<PatternRule>,
}

impl CodeQualityDetector {
    pub fn new(roots: Vec<PathBuf>, rules: Vec<PatternRule>) -> Self {
        Self { roots, rules }
    }
}

impl Detector for CodeQualityDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(&self, _ctx: &ScanContext) -> Result<Vec<Improvement>, DetectorError> {
        let compiled = self
            .rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (rule, re))
                    .map_err(|e| DetectorError::new(NAME, format!("invalid pattern '{}': {}", rule.pattern, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut found = Vec::new();

        for root in &self.roots {
            if !root.is_dir() {
                return Err(DetectorError::new(
                    NAME,
                    format!("source directory not found: {}", root.display()),
                ));
            }

            for entry in WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_hidden(e))
                .filter_map(|e| match e {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        debug!("Skipping unreadable path under {}: {}", root.display(), err);
                        None
                    }
                })
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                    continue;
                }
                // Binary or non-UTF-8 files are not source
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };

                for (rule, re) in &compiled {
                    let lines: Vec<usize> = content
                        .lines()
                        .enumerate()
                        .filter(|(_, line)| re.is_match(line))
                        .map(|(i, _)| i + 1)
                        .collect();

                    if lines.is_empty() {
                        continue;
                    }

                    let path = entry.path().display().to_string();
                    let quoted: Vec<String> =
                        lines.iter().take(MAX_LINES_REPORTED).map(|n| n.to_string()).collect();
                    let more = if lines.len() > MAX_LINES_REPORTED {
                        format!(" (+{} more)", lines.len() - MAX_LINES_REPORTED)
                    } else {
                        String::new()
                    };

                    found.push(Improvement::new(
                        stable_id(NAME, &format!("{}|{}", rule.pattern, path)),
                        rule.category.clone(),
                        rule.severity,
                        format!("{} in {}", rule.title, entry.file_name().to_string_lossy()),
                        format!("{} matches /{}/ on line(s) {}{}", path, rule.pattern, quoted.join(", "), more),
                        rule.suggestion.clone(),
                    ));
                }
            }
        }

        Ok(found)
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_deprecated_calls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lights.py"),
            "import datetime\nnow = datetime.datetime.utcnow()\nok = 1\nlater = datetime.datetime.utcnow()\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("clean.py"), "print('hi')\n").unwrap();

        let found = CodeQualityDetector::new(vec![dir.path().to_path_buf()], default_pattern_rules())
            .detect(&ScanContext::default())
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].category, "code_quality");
        assert!(found[0].description.contains("line(s) 2, 4"));
        assert!(!found[0].auto_fixable);
    }

    #[test]
    fn test_rule_category_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hue.py"), "requests.get(url, verify=False)\n").unwrap();

        let found = CodeQualityDetector::new(vec![dir.path().to_path_buf()], default_pattern_rules())
            .detect(&ScanContext::default())
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].category, "security");
        assert_eq!(found[0].severity, Severity::High);
    }

    #[test]
    fn test_hidden_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".venv")).unwrap();
        std::fs::write(dir.path().join(".venv").join("lib.py"), "datetime.utcnow()\n").unwrap();

        let found = CodeQualityDetector::new(vec![dir.path().to_path_buf()], default_pattern_rules())
            .detect(&ScanContext::default())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_invalid_pattern_fails_detector() {
        let dir = tempfile::tempdir().unwrap();
        let rule = PatternRule {
            pattern: "(unclosed".to_string(),
            title: "bad".to_string(),
            suggestion: "none".to_string(),
            severity: Severity::Low,
            category: NAME.to_string(),
        };
        let err = CodeQualityDetector::new(vec![dir.path().to_path_buf()], vec![rule])
            .detect(&ScanContext::default())
            .unwrap_err();
        assert!(err.message.contains("invalid pattern"));
    }

    #[test]
    fn test_missing_root_fails_detector() {
        let err = CodeQualityDetector::new(vec![PathBuf::from("/nonexistent/src")], default_pattern_rules())
            .detect(&ScanContext::default())
            .unwrap_err();
        assert!(err.message.contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subtree_does_not_stop_the_walk() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("hidden.py"), "datetime.utcnow()\n").unwrap();
        std::fs::write(dir.path().join("lights.py"), "datetime.utcnow()\n").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        let result = CodeQualityDetector::new(vec![dir.path().to_path_buf()], default_pattern_rules())
            .detect(&ScanContext::default());
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Root can still read the locked directory; either way the walk finishes
        let found = result.unwrap();
        assert!(found.iter().any(|i| i.description.contains("lights.py")));
    }
}
