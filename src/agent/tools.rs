//! Tool definitions for the agent
//!
//! Exposes the improvement pipeline as tools the LLM loop can call. Every
//! call produces a flat JSON object carrying at least `success`; domain
//! errors are reported as `{success: false, error}` and never raised.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::improvement::error::{ImprovementError, Result};
use crate::improvement::{ImprovementFilter, ImprovementPipeline, Severity, Status};

/// Tool definition for LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool execution context
#[derive(Clone)]
pub struct ToolContext {
    pub pipeline: Arc<ImprovementPipeline>,
}

impl ToolContext {
    pub fn new(pipeline: Arc<ImprovementPipeline>) -> Self {
        Self { pipeline }
    }
}

/// Tool call from LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Tool execution result, serialized flat: `data` fields sit next to `success`
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ToolResult {
    fn ok(message: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            data,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            data: Map::new(),
        }
    }

    /// The flat JSON object handed back to the caller
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self)
            .unwrap_or_else(|e| json!({ "success": false, "error": e.to_string() }))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

/// The closed set of improvement operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImprovementTool {
    ScanForImprovements,
    ListPendingImprovements,
    ApproveImprovement,
    RejectImprovement,
    ApplyImprovement,
    RollbackImprovement,
    GetImprovementStats,
    GetImprovement,
    ListImprovements,
    GetImprovementHistory,
}

impl ImprovementTool {
    pub const ALL: [ImprovementTool; 10] = [
        ImprovementTool::ScanForImprovements,
        ImprovementTool::ListPendingImprovements,
        ImprovementTool::ApproveImprovement,
        ImprovementTool::RejectImprovement,
        ImprovementTool::ApplyImprovement,
        ImprovementTool::RollbackImprovement,
        ImprovementTool::GetImprovementStats,
        ImprovementTool::GetImprovement,
        ImprovementTool::ListImprovements,
        ImprovementTool::GetImprovementHistory,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ImprovementTool::ScanForImprovements => "scan_for_improvements",
            ImprovementTool::ListPendingImprovements => "list_pending_improvements",
            ImprovementTool::ApproveImprovement => "approve_improvement",
            ImprovementTool::RejectImprovement => "reject_improvement",
            ImprovementTool::ApplyImprovement => "apply_improvement",
            ImprovementTool::RollbackImprovement => "rollback_improvement",
            ImprovementTool::GetImprovementStats => "get_improvement_stats",
            ImprovementTool::GetImprovement => "get_improvement",
            ImprovementTool::ListImprovements => "list_improvements",
            ImprovementTool::GetImprovementHistory => "get_improvement_history",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ImprovementTool::ScanForImprovements => {
                "Scan the assistant for possible improvements (configuration, dependencies, code_quality, \
                best_practices). Unforced scans run at most once per scan interval. Pass a category to scan \
                just that area regardless of the interval."
            }
            ImprovementTool::ListPendingImprovements => {
                "List improvements waiting for the user's decision, optionally filtered by category and severity."
            }
            ImprovementTool::ApproveImprovement => {
                "Approve a pending improvement. Approval does not change anything yet; call apply_improvement next."
            }
            ImprovementTool::RejectImprovement => {
                "Reject a pending or approved improvement, optionally with the user's reason."
            }
            ImprovementTool::ApplyImprovement => {
                "Apply an approved improvement. A backup of the settings is taken first so the change can be \
                rolled back. Fails if the improvement is not approved."
            }
            ImprovementTool::RollbackImprovement => {
                "Undo an applied improvement by restoring the backup taken when it was applied."
            }
            ImprovementTool::GetImprovementStats => {
                "Counts per status, approve/reject feedback per category and severity, and categories the user \
                may want to exclude from future scans."
            }
            ImprovementTool::GetImprovement => "Show one improvement with its fix action and timestamps.",
            ImprovementTool::ListImprovements => {
                "List improvements in any status. Filters combine with AND."
            }
            ImprovementTool::GetImprovementHistory => {
                "Show every status change of one improvement in order."
            }
        }
    }

    fn parameters(&self) -> Value {
        let id = json!({ "type": "string", "description": "Improvement id (e.g. imp-3f2a9c1d04be)" });
        let category = json!({ "type": "string", "description": "Category such as configuration, dependencies, code_quality, best_practices or security" });
        let severity = json!({ "type": "string", "enum": ["low", "medium", "high", "critical"] });
        let statuses: Vec<&str> = Status::ALL.iter().map(|s| s.as_str()).collect();

        match self {
            ImprovementTool::ScanForImprovements => json!({
                "type": "object",
                "properties": {
                    "force": { "type": "boolean", "description": "Ignore the scan interval" },
                    "category": category
                }
            }),
            ImprovementTool::ListPendingImprovements => json!({
                "type": "object",
                "properties": { "category": category, "severity": severity }
            }),
            ImprovementTool::ListImprovements => json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": statuses },
                    "category": category,
                    "severity": severity
                }
            }),
            ImprovementTool::RejectImprovement => json!({
                "type": "object",
                "properties": {
                    "id": id,
                    "reason": { "type": "string", "description": "Why the user rejected it" }
                },
                "required": ["id"]
            }),
            ImprovementTool::GetImprovementStats => json!({ "type": "object", "properties": {} }),
            ImprovementTool::ApproveImprovement
            | ImprovementTool::ApplyImprovement
            | ImprovementTool::RollbackImprovement
            | ImprovementTool::GetImprovement
            | ImprovementTool::GetImprovementHistory => json!({
                "type": "object",
                "properties": { "id": id },
                "required": ["id"]
            }),
        }
    }

    pub fn definition(&self) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

impl std::fmt::Display for ImprovementTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ImprovementTool {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ImprovementTool::ALL
            .iter()
            .copied()
            .find(|tool| tool.name() == s)
            .ok_or_else(|| format!("Unknown tool: {}", s))
    }
}

/// Built-in tools available to the agent
pub fn builtin_tools() -> Vec<Tool> {
    ImprovementTool::ALL.iter().map(|tool| tool.definition()).collect()
}

/// Execute a tool call. Never fails: errors come back as `success: false`.
pub async fn execute_tool(call: &ToolCall, ctx: &ToolContext) -> ToolResult {
    let tool = match call.name.parse::<ImprovementTool>() {
        Ok(tool) => tool,
        Err(e) => return ToolResult::failure(e),
    };

    debug!("Executing tool {} with {}", tool, call.arguments);
    match execute_improvement_tool(tool, &call.arguments, &ctx.pipeline).await {
        Ok(result) => result,
        Err(e) => ToolResult::failure(e.to_string()),
    }
}

async fn execute_improvement_tool(
    tool: ImprovementTool,
    args: &Value,
    pipeline: &ImprovementPipeline,
) -> Result<ToolResult> {
    let manager = pipeline.manager();

    match tool {
        ImprovementTool::ScanForImprovements => {
            let run = match optional_str(args, "category")? {
                Some(category) => pipeline.scanner().scan_category(category).await?,
                None => {
                    let force = optional_bool(args, "force")?.unwrap_or(false);
                    pipeline.scanner().run_full_scan(force).await?
                }
            };

            if !run.success {
                let reason = run.message.unwrap_or_else(|| "scan skipped".to_string());
                return Ok(ToolResult::failure(reason));
            }

            Ok(ToolResult::ok(
                format!(
                    "Found {} improvement(s), {} new",
                    run.improvements.len(),
                    run.new_improvements
                ),
                json!({
                    "improvements_found": run.improvements.len(),
                    "new_improvements_added": run.new_improvements,
                    "improvements": run.improvements,
                    "errors": run.errors,
                    "started_at": run.started_at,
                }),
            ))
        }
        ImprovementTool::ListPendingImprovements => {
            let filter = ImprovementFilter {
                status: Some(Status::Pending),
                category: optional_str(args, "category")?.map(str::to_string),
                severity: optional_parse::<Severity>(args, "severity")?,
            };
            let improvements = manager.list(&filter).await?;
            Ok(ToolResult::ok(
                format!("{} pending improvement(s)", improvements.len()),
                json!({ "count": improvements.len(), "improvements": improvements }),
            ))
        }
        ImprovementTool::ListImprovements => {
            let filter = ImprovementFilter {
                status: optional_parse::<Status>(args, "status")?,
                category: optional_str(args, "category")?.map(str::to_string),
                severity: optional_parse::<Severity>(args, "severity")?,
            };
            let improvements = manager.list(&filter).await?;
            Ok(ToolResult::ok(
                format!("{} improvement(s)", improvements.len()),
                json!({ "count": improvements.len(), "improvements": improvements }),
            ))
        }
        ImprovementTool::ApproveImprovement => {
            let id = required_str(args, "id")?;
            let improvement = manager.approve(id).await?;
            Ok(ToolResult::ok(
                format!("Approved {}", id),
                json!({ "id": id, "status": improvement.status }),
            ))
        }
        ImprovementTool::RejectImprovement => {
            let id = required_str(args, "id")?;
            let reason = optional_str(args, "reason")?;
            let improvement = manager.reject(id, reason).await?;
            Ok(ToolResult::ok(
                format!("Rejected {}", id),
                json!({
                    "id": id,
                    "status": improvement.status,
                    "rejection_reason": improvement.rejection_reason,
                }),
            ))
        }
        ImprovementTool::ApplyImprovement => {
            let id = required_str(args, "id")?;
            let outcome = manager.apply(id).await?;
            Ok(ToolResult::ok(
                format!("Applied {} (backup {})", id, outcome.backup_id),
                json!({
                    "id": id,
                    "status": outcome.improvement.status,
                    "backup_id": outcome.backup_id,
                    "change": outcome.change,
                }),
            ))
        }
        ImprovementTool::RollbackImprovement => {
            let id = required_str(args, "id")?;
            let improvement = manager.rollback(id).await?;
            Ok(ToolResult::ok(
                format!("Rolled back {}", id),
                json!({
                    "id": id,
                    "status": improvement.status,
                    "backup_id": improvement.backup_id,
                }),
            ))
        }
        ImprovementTool::GetImprovementStats => {
            let stats = pipeline.stats().await?;
            Ok(ToolResult::ok("Improvement statistics", serde_json::to_value(stats)?))
        }
        ImprovementTool::GetImprovement => {
            let id = required_str(args, "id")?;
            let improvement = manager.get(id).await?;
            Ok(ToolResult::ok(improvement.title.clone(), json!({ "improvement": improvement })))
        }
        ImprovementTool::GetImprovementHistory => {
            let id = required_str(args, "id")?;
            let history = manager.history(id).await?;
            Ok(ToolResult::ok(
                format!("{} status change(s)", history.len()),
                json!({ "id": id, "history": history }),
            ))
        }
    }
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    optional_str(args, field)?
        .ok_or_else(|| ImprovementError::InvalidArgument(format!("Missing '{}' argument", field)))
}

fn optional_str<'a>(args: &'a Value, field: &str) -> Result<Option<&'a str>> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(ImprovementError::InvalidArgument(format!(
            "'{}' must be a string, got {}",
            field, other
        ))),
    }
}

fn optional_bool(args: &Value, field: &str) -> Result<Option<bool>> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(ImprovementError::InvalidArgument(format!(
            "'{}' must be a boolean, got {}",
            field, other
        ))),
    }
}

fn optional_parse<T>(args: &Value, field: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = ImprovementError>,
{
    optional_str(args, field)?.map(str::parse).transpose()
}
