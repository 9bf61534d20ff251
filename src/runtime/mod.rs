//! Session coordination runtime
//!
//! This module provides the moving parts of the coordinator:
//! - `SessionLifecycle` - Owns, resumes and health-checks the primary session
//! - `TurnQueue` - FIFO, single-flight serializer with bounded retries
//! - `WorkerRegistry` - Named worker sessions with automatic teardown
//! - `BackgroundFeeder` - Turns worker completions into primary turns
//! - `Coordinator` - Wires all of the above together
//!
//! Every component runs on Tokio tasks; shared state sits behind mutexes
//! that are never held across an await, except the lifecycle lock that
//! coalesces concurrent session creation.

pub mod coordinator;
pub mod feeder;
pub mod lifecycle;
pub mod queue;
pub mod workers;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use feeder::{completion_prompt, BackgroundFeeder, LogNotifier, Notifier};
pub use lifecycle::SessionLifecycle;
pub use queue::{QueuedTurn, RetryPolicy, TurnQueue};
pub use workers::{
    validate_worker_name, CompletionReceiver, CompletionSender, WorkerCompletion, WorkerRegistry,
    WorkerSettings, WorkerSummary,
};
