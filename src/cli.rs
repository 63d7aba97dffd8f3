//! CLI interface for home-agent

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::agent::tools::{execute_tool, ImprovementTool, ToolCall, ToolContext};
use crate::config::Config;
use crate::improvement::ImprovementPipeline;

#[derive(Parser)]
#[command(name = "home-agent")]
#[command(about = "Home assistant self-improvement pipeline", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for, review and apply improvements
    Improve {
        #[command(subcommand)]
        command: ImproveCommands,
    },
    /// Inspect and edit the assistant settings that fixes act on
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Print the tool definitions exposed to the LLM
    Tools,
}

#[derive(Subcommand)]
enum ImproveCommands {
    /// Run the detectors
    Scan {
        /// Ignore the scan interval
        #[arg(short, long)]
        force: bool,
        /// Scan a single category
        #[arg(short, long)]
        category: Option<String>,
    },
    /// List improvements (pending only unless --status is given)
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long)]
        severity: Option<String>,
    },
    /// Show one improvement
    Show { id: String },
    /// Show the status history of one improvement
    History { id: String },
    Approve { id: String },
    Reject {
        id: String,
        #[arg(short, long)]
        reason: Option<String>,
    },
    Apply { id: String },
    Rollback { id: String },
    /// Status counts, feedback and filter suggestions
    Stats,
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// List every setting
    List,
    Get { key: String },
    /// Set a value; parsed as JSON when possible, otherwise stored as a string
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
    /// Print the default configuration
    Default,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Improve { command } => {
            let (tool, arguments) = match command {
                ImproveCommands::Scan { force, category } => {
                    (ImprovementTool::ScanForImprovements, json!({ "force": force, "category": category }))
                }
                ImproveCommands::List { status: None, category, severity } => (
                    ImprovementTool::ListPendingImprovements,
                    json!({ "category": category, "severity": severity }),
                ),
                ImproveCommands::List { status, category, severity } => (
                    ImprovementTool::ListImprovements,
                    json!({ "status": status, "category": category, "severity": severity }),
                ),
                ImproveCommands::Show { id } => (ImprovementTool::GetImprovement, json!({ "id": id })),
                ImproveCommands::History { id } => (ImprovementTool::GetImprovementHistory, json!({ "id": id })),
                ImproveCommands::Approve { id } => (ImprovementTool::ApproveImprovement, json!({ "id": id })),
                ImproveCommands::Reject { id, reason } => {
                    (ImprovementTool::RejectImprovement, json!({ "id": id, "reason": reason }))
                }
                ImproveCommands::Apply { id } => (ImprovementTool::ApplyImprovement, json!({ "id": id })),
                ImproveCommands::Rollback { id } => (ImprovementTool::RollbackImprovement, json!({ "id": id })),
                ImproveCommands::Stats => (ImprovementTool::GetImprovementStats, json!({})),
            };

            let ctx = ToolContext::new(Arc::new(open_pipeline()?));
            let result = execute_tool(&ToolCall::new(tool.name(), arguments), &ctx).await;
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);

            if !result.success {
                bail!("{} failed", tool);
            }
        }
        Commands::Settings { command } => {
            let pipeline = open_pipeline()?;
            let settings = pipeline.settings();
            match command {
                SettingsCommands::List => {
                    let all = settings.all().await?;
                    if all.is_empty() {
                        println!("No settings stored.");
                    }
                    for (key, value) in all {
                        println!("{} = {}", key, value);
                    }
                }
                SettingsCommands::Get { key } => match settings.get(&key).await? {
                    Some(value) => println!("{}", value),
                    None => bail!("Setting '{}' is not set", key),
                },
                SettingsCommands::Set { key, value } => {
                    let parsed = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
                    settings.set(&key, parsed.clone()).await?;
                    println!("{} = {}", key, parsed);
                }
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => crate::config::show_config()?,
            ConfigCommands::Path => println!("{}", crate::config::config_path()?.display()),
            ConfigCommands::Default => print!("{}", crate::config::default_config_toml()),
        },
        Commands::Tools => {
            let tools = crate::agent::tools::builtin_tools();
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
    }

    Ok(())
}

fn open_pipeline() -> Result<ImprovementPipeline> {
    let config = Config::load().context("Failed to load configuration")?;
    ImprovementPipeline::open(&config.improvements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_reject_with_reason() {
        let cli = Cli::try_parse_from(["home-agent", "improve", "reject", "imp-1", "--reason", "too noisy"]).unwrap();
        match cli.command {
            Commands::Improve {
                command: ImproveCommands::Reject { id, reason },
            } => {
                assert_eq!(id, "imp-1");
                assert_eq!(reason.as_deref(), Some("too noisy"));
            }
            _ => panic!("expected improve reject"),
        }
    }
}
