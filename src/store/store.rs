//! Durable state store contract
//!
//! The coordinator needs three things from durable storage: a key/value slot
//! for the primary session pointer, a mirror row per live worker, and a
//! bounded conversation log used to seed fresh sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AssistantResult, Channel, WorkerStatus};

/// Key holding the resumable identifier of the primary session
pub const PRIMARY_SESSION_KEY: &str = "primary_session_id";

/// Default number of conversation log entries kept
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 100;

/// Durable mirror of a live worker session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Unique worker name
    pub name: String,

    /// Remote session identifier
    pub session_id: String,

    /// Working directory or other working context
    pub working_context: String,

    /// Current status
    pub status: WorkerStatus,

    /// Output (or error) of the most recent task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output: Option<String>,

    /// Channel that created the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Channel>,

    /// When the worker was created
    pub created_at: DateTime<Utc>,

    /// When the row was last written
    pub updated_at: DateTime<Utc>,
}

/// Who produced a conversation log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRole {
    User,
    Assistant,
}

/// One entry of the bounded conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationLogEntry {
    /// Who produced the content
    pub role: LogRole,

    /// Message content
    pub content: String,

    /// Channel the turn came from
    pub channel: Channel,

    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,
}

impl ConversationLogEntry {
    /// Create an entry stamped with the current time
    pub fn new(role: LogRole, content: impl Into<String>, channel: Channel) -> Self {
        Self {
            role,
            content: content.into(),
            channel,
            timestamp: Utc::now(),
        }
    }
}

/// Key/value, worker-mirror and conversation-log persistence
///
/// Implementations must be safe to call from any task. No transaction
/// spanning several calls is required.
pub trait StateStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> AssistantResult<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> AssistantResult<()>;

    /// Remove a value; removing a missing key is not an error
    fn remove(&self, key: &str) -> AssistantResult<()>;

    /// Insert or replace a worker mirror row
    fn upsert_worker(&self, record: &WorkerRecord) -> AssistantResult<()>;

    /// Delete a worker mirror row; deleting a missing row is not an error
    fn delete_worker(&self, name: &str) -> AssistantResult<()>;

    /// List all worker mirror rows, sorted by name
    fn list_workers(&self) -> AssistantResult<Vec<WorkerRecord>>;

    /// Append to the conversation log, dropping the oldest entries past the bound
    fn append_log(&self, entry: &ConversationLogEntry) -> AssistantResult<()>;

    /// The most recent `limit` log entries, oldest first
    fn recent_log(&self, limit: usize) -> AssistantResult<Vec<ConversationLogEntry>>;
}

/// Render log entries as a plain-text recap for seeding a fresh session
pub fn summarize_log(entries: &[ConversationLogEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }

    let mut summary = String::from("Recent conversation before this session was restored:\n");
    for entry in entries {
        let who = match entry.role {
            LogRole::User => "User",
            LogRole::Assistant => "Assistant",
        };
        summary.push_str(&format!(
            "[{}] {} ({}): {}\n",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            who,
            entry.channel,
            entry.content
        ));
    }
    Some(summary)
}
