//! Test the improvement tools through the dispatcher
use home_agent::agent::tools::{builtin_tools, execute_tool, ToolCall, ToolContext};
use home_agent::config::ImprovementConfig;
use home_agent::improvement::detectors::ConfigurationDetector;
use home_agent::improvement::{CommandInstaller, Database, ImprovementPipeline};
use serde_json::{json, Value};
use std::sync::Arc;

fn context() -> ToolContext {
    let pipeline = ImprovementPipeline::build(
        Database::open_in_memory().unwrap(),
        &ImprovementConfig::default(),
        vec![Arc::new(ConfigurationDetector::with_defaults())],
        Arc::new(CommandInstaller::new("pip")),
    );
    ToolContext::new(Arc::new(pipeline))
}

async fn call(ctx: &ToolContext, name: &str, arguments: Value) -> Value {
    execute_tool(&ToolCall::new(name, arguments), ctx).await.to_json()
}

#[tokio::test]
async fn test_unknown_tool_is_structured_failure() {
    let ctx = context();
    let result = call(&ctx, "format_disk", json!({})).await;
    assert_eq!(result, json!({ "success": false, "error": "Unknown tool: format_disk" }));
}

#[tokio::test]
async fn test_full_lifecycle_through_tools() {
    let ctx = context();
    ctx.pipeline.settings().set("cache_ttl", json!(60)).await.unwrap();

    let scan = call(&ctx, "scan_for_improvements", json!({})).await;
    assert_eq!(scan["success"], true);
    assert_eq!(scan["improvements_found"], 1);
    assert_eq!(scan["new_improvements_added"], 1);
    assert_eq!(scan["errors"], json!([]));

    let pending = call(&ctx, "list_pending_improvements", json!({ "category": "configuration" })).await;
    assert_eq!(pending["count"], 1);
    let id = pending["improvements"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(pending["improvements"][0]["fix_action"]["type"], "config_update");

    let approved = call(&ctx, "approve_improvement", json!({ "id": id })).await;
    assert_eq!(approved["status"], "approved");

    let applied = call(&ctx, "apply_improvement", json!({ "id": id })).await;
    assert_eq!(applied["success"], true);
    assert_eq!(applied["status"], "applied");
    assert!(applied["backup_id"].as_str().unwrap().starts_with("bak-"));

    let again = call(&ctx, "apply_improvement", json!({ "id": id })).await;
    assert_eq!(again["success"], false);
    assert!(again["error"].as_str().unwrap().contains("not approved"));

    let rolled_back = call(&ctx, "rollback_improvement", json!({ "id": id })).await;
    assert_eq!(rolled_back["status"], "rolled_back");
    assert_eq!(ctx.pipeline.settings().get("cache_ttl").await.unwrap(), Some(json!(60)));

    let history = call(&ctx, "get_improvement_history", json!({ "id": id })).await;
    let statuses: Vec<&str> = history["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["to_status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["pending", "approved", "applied", "rolled_back"]);

    let shown = call(&ctx, "get_improvement", json!({ "id": id })).await;
    assert_eq!(shown["improvement"]["status"], "rolled_back");
}

#[tokio::test]
async fn test_scan_interval_and_unknown_category() {
    let ctx = context();
    assert_eq!(call(&ctx, "scan_for_improvements", json!({})).await["success"], true);

    let skipped = call(&ctx, "scan_for_improvements", json!({})).await;
    assert_eq!(skipped["success"], false);
    assert_eq!(skipped["error"], "interval not reached");

    let forced = call(&ctx, "scan_for_improvements", json!({ "force": true })).await;
    assert_eq!(forced["success"], true);
    assert_eq!(forced["new_improvements_added"], 0);

    let unknown = call(&ctx, "scan_for_improvements", json!({ "category": "styling" })).await;
    assert_eq!(unknown["success"], false);
    assert!(unknown["error"].as_str().unwrap().contains("styling"));
}

#[tokio::test]
async fn test_reject_and_stats() {
    let ctx = context();
    call(&ctx, "scan_for_improvements", json!({})).await;
    let pending = call(&ctx, "list_pending_improvements", json!({})).await;
    let id = pending["improvements"][0]["id"].as_str().unwrap().to_string();

    let rejected = call(&ctx, "reject_improvement", json!({ "id": id, "reason": "I like short caches" })).await;
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["rejection_reason"], "I like short caches");

    let stats = call(&ctx, "get_improvement_stats", json!({})).await;
    assert_eq!(stats["success"], true);
    assert_eq!(stats["status_counts"]["rejected"], 1);
    assert_eq!(stats["status_counts"]["pending"], 0);
    assert_eq!(stats["feedback_stats"]["by_category"]["configuration"]["rejected"], 1);
    assert_eq!(stats["suggested_filters"], json!([]));

    let listed = call(&ctx, "list_improvements", json!({ "status": "rejected" })).await;
    assert_eq!(listed["count"], 1);
}

#[tokio::test]
async fn test_bad_arguments_are_reported() {
    let ctx = context();

    let missing = call(&ctx, "approve_improvement", json!({})).await;
    assert_eq!(missing["success"], false);
    assert!(missing["error"].as_str().unwrap().contains("Missing 'id'"));

    let bad_severity = call(&ctx, "list_pending_improvements", json!({ "severity": "urgent" })).await;
    assert_eq!(bad_severity["success"], false);

    let not_found = call(&ctx, "rollback_improvement", json!({ "id": "imp-000000000000" })).await;
    assert!(not_found["error"].as_str().unwrap().contains("not found"));
}

#[test]
fn test_every_tool_is_described() {
    let names: Vec<String> = builtin_tools().into_iter().map(|t| t.name).collect();
    for expected in [
        "scan_for_improvements",
        "list_pending_improvements",
        "approve_improvement",
        "reject_improvement",
        "apply_improvement",
        "rollback_improvement",
        "get_improvement_stats",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {}", expected);
    }
}
