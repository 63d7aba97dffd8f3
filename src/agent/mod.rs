//! Agent module - tool surface exposed to the LLM loop

pub mod tools;

pub use tools::{
    builtin_tools, execute_tool, ImprovementTool, Tool, ToolCall, ToolContext, ToolResult,
};
