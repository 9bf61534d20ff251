//! Agent session seam
//!
//! `AgentClient` creates and resumes network-backed sessions; `AgentSession`
//! is a handle on one of them. The coordinator only talks to these traits,
//! so the HTTP backend and the test doubles are interchangeable.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{AssistantResult, ConnectionState, EventSender, TurnContext};
use crate::tools::ToolRegistry;

/// Configuration used when creating or resuming a session
#[derive(Clone)]
pub struct SessionConfig {
    /// Model identifier
    pub model: String,

    /// Whether the host should stream incremental content
    pub streaming: bool,

    /// System message for the session
    pub system_message: Option<String>,

    /// Summary of recent conversation, seeded into fresh sessions
    pub context_summary: Option<String>,

    /// Working directory or other working context (workers)
    pub working_directory: Option<String>,

    /// Tools the session may invoke during a turn
    pub tools: Arc<ToolRegistry>,
}

impl SessionConfig {
    /// Create a new configuration for `model` with no tools
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            streaming: true,
            system_message: None,
            context_summary: None,
            working_directory: None,
            tools: Arc::new(ToolRegistry::new()),
        }
    }

    /// Set streaming
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Set the system message
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Set the context summary
    pub fn with_context_summary(mut self, summary: impl Into<String>) -> Self {
        self.context_summary = Some(summary.into());
        self
    }

    /// Set the working directory
    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Set the tool registry
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("model", &self.model)
            .field("streaming", &self.streaming)
            .field("has_context_summary", &self.context_summary.is_some())
            .field("working_directory", &self.working_directory)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// A single network-backed conversational session
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Opaque, resumable session identifier
    fn session_id(&self) -> &str;

    /// Send one turn and wait for its final text
    ///
    /// Incremental content is streamed on `events` while the turn runs.
    /// Callers bound the call with their own timeout.
    async fn send(
        &self,
        prompt: &str,
        turn: TurnContext,
        events: EventSender,
    ) -> AssistantResult<String>;

    /// Abort the turn currently in flight, if any
    async fn abort(&self) -> AssistantResult<()>;

    /// Release the local handle, keeping the remote session resumable
    async fn disconnect(&self) -> AssistantResult<()> {
        Ok(())
    }

    /// Destroy the remote session
    async fn destroy(&self) -> AssistantResult<()>;
}

/// Client that creates and resumes sessions on the agent host
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Create a brand-new session
    async fn create_session(&self, config: &SessionConfig) -> AssistantResult<Arc<dyn AgentSession>>;

    /// Resume a previously created session by identifier
    async fn resume_session(
        &self,
        session_id: &str,
        config: &SessionConfig,
    ) -> AssistantResult<Arc<dyn AgentSession>>;

    /// Delete a session by identifier without holding a handle
    async fn delete_session(&self, session_id: &str) -> AssistantResult<()>;

    /// Probe the current connection state
    async fn connection_state(&self) -> ConnectionState;

    /// Tear down and recreate the low-level network client
    async fn reset(&self) -> AssistantResult<()>;
}
