//! Tool system for the primary session
//!
//! This module provides:
//! - `Tool` trait - Interface for implementing tools
//! - `ToolResult` / `ToolContext` - Execution result and hidden turn context
//! - `ToolRegistry` - Registry for managing available tools
//! - `worker_tools` - The tools that create, drive and destroy workers

mod registry;
mod tool;

/// Worker management tools
pub mod worker_tools;

// Core exports
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolDefinition, ToolInputSchema, ToolResult};

pub use worker_tools::{
    worker_tool_registry, CreateWorkerTool, KillWorkerTool, ListWorkersTool, SendToWorkerTool,
};
