//! Core types for the assistant daemon
//!
//! This module provides the fundamental types used throughout the crate:
//! - `Channel` / `ChannelKind` - Where a turn came from and where replies go
//! - `SessionEvent` / `DeliveryCallback` - Turn streaming and delivery types
//! - `ConnectionState` / `WorkerStatus` - Liveness and worker lifecycle
//! - `AssistantError` - Error types and retry classification

pub mod channel;
pub mod error;
pub mod output;
pub mod state;

pub use channel::{Channel, ChannelKind};
pub use error::{classify_message, AssistantError, AssistantResult, ErrorClass};
pub use output::{
    delivery_channel, error_text, Delivery, DeliveryCallback, EventReceiver, EventSender,
    SessionEvent, TurnContext,
};
pub use state::{ConnectionState, WorkerStatus};
