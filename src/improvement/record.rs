//! Improvement records - the unit flowing through the pipeline
//!
//! A record has an immutable identity (id, category, severity, fix action)
//! and a mutable lifecycle status owned by the manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::ImprovementError;

/// Severity of a detected improvement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = ImprovementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(ImprovementError::InvalidArgument(format!(
                "unknown severity '{}' (expected low, medium, high or critical)",
                other
            ))),
        }
    }
}

/// Lifecycle status of an improvement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Approved,
    Rejected,
    Applied,
    RolledBack,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Pending,
        Status::Approved,
        Status::Rejected,
        Status::Applied,
        Status::RolledBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::Applied => "applied",
            Status::RolledBack => "rolled_back",
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Rejected | Status::RolledBack)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = ImprovementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "approved" => Ok(Status::Approved),
            "rejected" => Ok(Status::Rejected),
            "applied" => Ok(Status::Applied),
            "rolled_back" => Ok(Status::RolledBack),
            other => Err(ImprovementError::InvalidArgument(format!(
                "unknown status '{}'",
                other
            ))),
        }
    }
}

/// Machine-executable remedy attached to an improvement.
///
/// Serialized as a flat object tagged by `type`. Payloads with a type this
/// build does not know are kept verbatim in [`FixAction::Unrecognized`] so
/// they survive a round trip through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum FixAction {
    /// Set a key in the settings domain
    ConfigUpdate {
        key: String,
        value: serde_json::Value,
    },
    /// Upgrade a pinned Python package
    PipUpgrade {
        package: String,
        version: String,
    },
    /// Unknown action type; applying it mutates nothing
    Unrecognized {
        kind: String,
        payload: serde_json::Value,
    },
}

impl FixAction {
    pub fn config_update(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        FixAction::ConfigUpdate {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn pip_upgrade(package: impl Into<String>, version: impl Into<String>) -> Self {
        FixAction::PipUpgrade {
            package: package.into(),
            version: version.into(),
        }
    }

    /// The `type` tag as written on the wire
    pub fn kind(&self) -> &str {
        match self {
            FixAction::ConfigUpdate { .. } => "config_update",
            FixAction::PipUpgrade { .. } => "pip_upgrade",
            FixAction::Unrecognized { kind, .. } => kind,
        }
    }
}

impl From<serde_json::Value> for FixAction {
    fn from(value: serde_json::Value) -> Self {
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            "config_update" => {
                let key = value.get("key").and_then(|k| k.as_str());
                if let (Some(key), Some(v)) = (key, value.get("value")) {
                    return FixAction::ConfigUpdate {
                        key: key.to_string(),
                        value: v.clone(),
                    };
                }
            }
            "pip_upgrade" => {
                if let (Some(package), Some(version)) = (
                    value.get("package").and_then(|p| p.as_str()),
                    value.get("version").and_then(|v| v.as_str()),
                ) {
                    return FixAction::PipUpgrade {
                        package: package.to_string(),
                        version: version.to_string(),
                    };
                }
            }
            _ => {}
        }

        // Malformed known types land here too, so apply stays a no-op
        FixAction::Unrecognized { kind, payload: value }
    }
}

impl From<FixAction> for serde_json::Value {
    fn from(action: FixAction) -> Self {
        match action {
            FixAction::ConfigUpdate { key, value } => serde_json::json!({
                "type": "config_update",
                "key": key,
                "value": value,
            }),
            FixAction::PipUpgrade { package, version } => serde_json::json!({
                "type": "pip_upgrade",
                "package": package,
                "version": version,
            }),
            FixAction::Unrecognized { payload, .. } => payload,
        }
    }
}

/// A single detected optimization opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub id: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub suggestion: String,
    pub severity: Severity,
    pub auto_fixable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_action: Option<FixAction>,
    pub created_at: DateTime<Utc>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl Improvement {
    /// Create a pending improvement with no fix action
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            title: title.into(),
            description: description.into(),
            suggestion: suggestion.into(),
            severity,
            auto_fixable: false,
            fix_action: None,
            created_at: Utc::now(),
            status: Status::Pending,
            rejection_reason: None,
            backup_id: None,
            approved_at: None,
            applied_at: None,
            rejected_at: None,
            rolled_back_at: None,
        }
    }

    /// Attach a fix action; the record becomes auto-fixable
    pub fn with_fix(mut self, action: FixAction) -> Self {
        self.auto_fixable = true;
        self.fix_action = Some(action);
        self
    }
}

/// Stable id for a detector finding, so rescans of the same subject dedup.
///
/// `imp-` followed by the first 12 hex digits of sha256(detector, subject).
pub fn stable_id(detector: &str, subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(detector.as_bytes());
    hasher.update([0u8]);
    hasher.update(subject.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("imp-{}", &digest[..12])
}
