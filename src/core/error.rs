//! Assistant error types and their retry classification

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Errors that can occur while coordinating sessions, workers and turns
#[derive(Error, Debug)]
pub enum AssistantError {
    /// Network-level failure talking to the agent host
    #[error("Network error: {0}")]
    Network(String),

    /// A remote call exceeded its upper bound
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport closed underneath an in-flight call
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The remote session no longer exists
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The remote session exists but can no longer be used
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Agent host answered with an error status
    #[error("Agent host error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },

    /// A worker with this name is already registered
    #[error("Worker already exists: {0}")]
    DuplicateWorker(String),

    /// No worker with this name is registered
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// The worker is already processing a task
    #[error("Worker is busy: {0}")]
    WorkerBusy(String),

    /// Malformed input from a caller or tool invocation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The turn was cancelled before it completed
    #[error("Request cancelled")]
    Cancelled,

    /// A turn failed on every allowed attempt
    #[error("Failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total number of attempts made
        attempts: u32,
        /// Message of the final failure
        last: String,
    },

    /// Durable state store failure
    #[error("State store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// How the coordinator treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff. `session_gone` forces a brand-new session.
    Transient {
        /// The remote session no longer exists server-side
        session_gone: bool,
    },
    /// Surface immediately, never retry
    Logical,
    /// Retries exhausted
    Fatal,
}

impl ErrorClass {
    /// Whether the error should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Transient { .. })
    }
}

fn session_gone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(not found|expired|stale|no such session|unknown session)")
            .expect("session-gone pattern is valid")
    })
}

fn transient_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(econnreset|econnrefused|connection (reset|refused|closed)|timed? ?out|socket hang up|broken pipe|stream closed|transport closed|network|unavailable)",
        )
        .expect("transient pattern is valid")
    })
}

/// Classify free-form error text the way the agent host reports failures
pub fn classify_message(message: &str) -> ErrorClass {
    if session_gone_pattern().is_match(message) {
        ErrorClass::Transient { session_gone: true }
    } else if transient_pattern().is_match(message) {
        ErrorClass::Transient {
            session_gone: false,
        }
    } else {
        ErrorClass::Logical
    }
}

impl AssistantError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        AssistantError::Other(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        AssistantError::Store(msg.into())
    }

    /// Classify this error for retry purposes
    pub fn class(&self) -> ErrorClass {
        match self {
            AssistantError::Network(_)
            | AssistantError::Timeout(_)
            | AssistantError::ConnectionClosed(_) => ErrorClass::Transient {
                session_gone: false,
            },
            AssistantError::SessionNotFound(_) | AssistantError::SessionExpired(_) => {
                ErrorClass::Transient { session_gone: true }
            }
            AssistantError::Api { status, message } => match status {
                404 | 410 => ErrorClass::Transient { session_gone: true },
                408 | 429 | 500..=599 => match classify_message(message) {
                    gone @ ErrorClass::Transient { session_gone: true } => gone,
                    _ => ErrorClass::Transient {
                        session_gone: false,
                    },
                },
                _ => classify_message(message),
            },
            AssistantError::Io(e) => match e.kind() {
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::TimedOut => ErrorClass::Transient {
                    session_gone: false,
                },
                _ => ErrorClass::Logical,
            },
            AssistantError::Other(message) => classify_message(message),
            AssistantError::RetriesExhausted { .. } => ErrorClass::Fatal,
            AssistantError::DuplicateWorker(_)
            | AssistantError::UnknownWorker(_)
            | AssistantError::WorkerBusy(_)
            | AssistantError::InvalidInput(_)
            | AssistantError::Cancelled
            | AssistantError::Store(_)
            | AssistantError::Serialization(_)
            | AssistantError::InvalidConfig(_) => ErrorClass::Logical,
        }
    }

    /// Whether the error is worth retrying
    pub fn is_transient(&self) -> bool {
        self.class().is_transient()
    }

    /// Whether the error says the remote session is gone
    pub fn is_session_gone(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient { session_gone: true })
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AssistantError::Timeout(Duration::ZERO)
        } else if let Some(status) = err.status() {
            AssistantError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            AssistantError::Network(err.to_string())
        }
    }
}

/// Result type alias for assistant operations
pub type AssistantResult<T> = Result<T, AssistantError>;
