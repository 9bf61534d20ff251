//! Durable state store
//!
//! - `StateStore` - the persistence contract the coordinator consumes
//! - `FileStateStore` - JSON files under a data directory
//! - `MemoryStateStore` - in-memory, for tests and ephemeral runs

pub mod file;
pub mod memory;
pub mod store;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use store::{
    summarize_log, ConversationLogEntry, LogRole, StateStore, WorkerRecord,
    DEFAULT_MAX_LOG_ENTRIES, PRIMARY_SESSION_KEY,
};
