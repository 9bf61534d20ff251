//! Agent host sessions
//!
//! This module provides the seam between the coordinator and the agent host:
//! - `AgentClient` / `AgentSession` - Traits for creating and driving sessions
//! - `SessionConfig` - Model, system message and tools for a session
//! - `HttpAgentClient` - HTTP/SSE implementation against a remote agent host

pub mod client;
pub mod http;

pub use client::{AgentClient, AgentSession, SessionConfig};
pub use http::{HttpAgentClient, HttpAgentSession};
