//! Turn input/output types shared by the queue, sessions and channel adapters

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::channel::Channel;

/// Incremental events emitted by a session while a turn is in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Incremental text output
    Delta(String),

    /// The session started executing a tool
    ToolStarted {
        /// Tool call ID
        id: String,
        /// Tool name
        name: String,
    },

    /// A tool finished executing
    ToolFinished {
        /// Tool call ID
        id: String,
        /// Whether the tool reported an error
        is_error: bool,
    },
}

/// Sender half used by sessions to stream events for one turn
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiver half consumed by the turn queue
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Context attached to every send
#[derive(Debug, Clone, PartialEq)]
pub struct TurnContext {
    /// Channel the turn came from
    pub source: Channel,
}

impl TurnContext {
    /// Create a context for a turn from `source`
    pub fn new(source: Channel) -> Self {
        Self { source }
    }
}

/// Callback receiving `(text, done)` updates for one submitted turn
///
/// Invoked with `done = false` for every partial update and exactly once
/// with `done = true` for the terminal update.
pub type DeliveryCallback = Box<dyn FnMut(&str, bool) + Send>;

/// One update delivered to a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Accumulated text so far, or the final text / error message
    pub text: String,
    /// Whether this is the terminal update
    pub done: bool,
}

/// Build a delivery callback that forwards updates into a channel
///
/// Useful for adapters that want to consume updates as a stream.
pub fn delivery_channel() -> (DeliveryCallback, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: DeliveryCallback = Box::new(move |text: &str, done: bool| {
        let _ = tx.send(Delivery {
            text: text.to_string(),
            done,
        });
    });
    (callback, rx)
}

/// Format an error for terminal delivery
pub fn error_text(err: &impl std::fmt::Display) -> String {
    format!("Error: {}", err)
}
