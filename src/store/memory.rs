//! In-memory state store

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::core::AssistantResult;

use super::store::{ConversationLogEntry, StateStore, WorkerRecord, DEFAULT_MAX_LOG_ENTRIES};

#[derive(Debug, Default)]
struct MemoryInner {
    kv: HashMap<String, String>,
    workers: BTreeMap<String, WorkerRecord>,
    log: VecDeque<ConversationLogEntry>,
}

/// Non-durable `StateStore`, for tests and ephemeral runs
#[derive(Debug)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryInner>,
    max_log_entries: usize,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
        }
    }

    /// Set how many conversation log entries are kept
    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> AssistantResult<Option<String>> {
        Ok(self.lock().kv.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AssistantResult<()> {
        self.lock().kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AssistantResult<()> {
        self.lock().kv.remove(key);
        Ok(())
    }

    fn upsert_worker(&self, record: &WorkerRecord) -> AssistantResult<()> {
        self.lock()
            .workers
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn delete_worker(&self, name: &str) -> AssistantResult<()> {
        self.lock().workers.remove(name);
        Ok(())
    }

    fn list_workers(&self) -> AssistantResult<Vec<WorkerRecord>> {
        Ok(self.lock().workers.values().cloned().collect())
    }

    fn append_log(&self, entry: &ConversationLogEntry) -> AssistantResult<()> {
        let mut inner = self.lock();
        inner.log.push_back(entry.clone());
        while inner.log.len() > self.max_log_entries {
            inner.log.pop_front();
        }
        Ok(())
    }

    fn recent_log(&self, limit: usize) -> AssistantResult<Vec<ConversationLogEntry>> {
        let inner = self.lock();
        let skip = inner.log.len().saturating_sub(limit);
        Ok(inner.log.iter().skip(skip).cloned().collect())
    }
}
