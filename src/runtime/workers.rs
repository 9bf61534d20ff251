//! WorkerRegistry - Named, independent worker sessions
//!
//! Workers are created by the primary session through tools, run one task
//! at a time in the background, and are torn down automatically once a
//! task finishes. Completions are reported on an mpsc channel so the
//! primary session can summarize them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::{
    error_text, AssistantError, AssistantResult, Channel, TurnContext, WorkerStatus,
};
use crate::session::{AgentClient, AgentSession, SessionConfig};
use crate::store::{StateStore, WorkerRecord};

/// Default upper bound for one worker task
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of a finished worker task
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCompletion {
    /// Worker name
    pub name: String,

    /// Channel that created the worker
    pub origin: Option<Channel>,

    /// Final text, or the error message on failure
    pub output: String,

    /// Whether the task succeeded
    pub success: bool,
}

/// Sender half used to report completions
pub type CompletionSender = mpsc::UnboundedSender<WorkerCompletion>;

/// Receiver half consumed by the background feeder
pub type CompletionReceiver = mpsc::UnboundedReceiver<WorkerCompletion>;

/// Snapshot of a live worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSummary {
    pub name: String,
    pub session_id: String,
    pub working_context: String,
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Channel>,
    pub created_at: DateTime<Utc>,
}

/// Settings applied to every worker session
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Model for worker sessions
    pub model: String,

    /// Optional system message for worker sessions
    pub system_message: Option<String>,

    /// Upper bound for one task
    pub dispatch_timeout: Duration,
}

impl WorkerSettings {
    /// Create settings for `model` with the default timeout
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_message: None,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Set the dispatch timeout
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Set the system message
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }
}

struct WorkerEntry {
    session: Arc<dyn AgentSession>,
    working_context: String,
    status: WorkerStatus,
    origin: Option<Channel>,
    created_at: DateTime<Utc>,
}

impl WorkerEntry {
    fn record(&self, name: &str) -> WorkerRecord {
        WorkerRecord {
            name: name.to_string(),
            session_id: self.session.session_id().to_string(),
            working_context: self.working_context.clone(),
            status: self.status,
            last_output: None,
            origin: self.origin.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    fn summary(&self, name: &str) -> WorkerSummary {
        WorkerSummary {
            name: name.to_string(),
            session_id: self.session.session_id().to_string(),
            working_context: self.working_context.clone(),
            status: self.status,
            origin: self.origin.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    workers: HashMap<String, WorkerEntry>,
    /// Names whose session is being created
    reserved: HashSet<String>,
}

fn worker_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("worker name pattern is valid"))
}

/// Check that `name` is a usable worker name
pub fn validate_worker_name(name: &str) -> AssistantResult<()> {
    if worker_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(AssistantError::InvalidInput(format!(
            "worker name '{}' must be 1-64 characters of letters, digits, '-' or '_'",
            name
        )))
    }
}

/// Registry of live worker sessions
pub struct WorkerRegistry {
    client: Arc<dyn AgentClient>,
    store: Arc<dyn StateStore>,
    completions: CompletionSender,
    settings: WorkerSettings,
    state: Mutex<RegistryState>,
}

impl WorkerRegistry {
    /// Create an empty registry reporting completions on `completions`
    pub fn new(
        client: Arc<dyn AgentClient>,
        store: Arc<dyn StateStore>,
        completions: CompletionSender,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            client,
            store,
            completions,
            settings,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, record: &WorkerRecord) {
        if let Err(e) = self.store.upsert_worker(record) {
            tracing::warn!(worker = %record.name, "[WorkerRegistry] Failed to persist worker: {}", e);
        }
    }

    fn forget(&self, name: &str) {
        if let Err(e) = self.store.delete_worker(name) {
            tracing::warn!(worker = %name, "[WorkerRegistry] Failed to delete worker row: {}", e);
        }
    }

    // =========================================================================
    // Creation and dispatch
    // =========================================================================

    /// Create a named worker and optionally hand it its first task
    ///
    /// Returns an acknowledgement for the caller; the task itself runs in
    /// the background.
    pub async fn create_worker(
        self: &Arc<Self>,
        name: &str,
        working_context: &str,
        initial_prompt: Option<&str>,
        origin: Option<Channel>,
    ) -> AssistantResult<String> {
        validate_worker_name(name)?;

        {
            let mut state = self.lock();
            if state.workers.contains_key(name) || state.reserved.contains(name) {
                return Err(AssistantError::DuplicateWorker(name.to_string()));
            }
            state.reserved.insert(name.to_string());
        }

        let mut config =
            SessionConfig::new(&self.settings.model).with_working_directory(working_context);
        if let Some(message) = &self.settings.system_message {
            config = config.with_system_message(message.clone());
        }

        let session = match self.client.create_session(&config).await {
            Ok(session) => session,
            Err(e) => {
                self.lock().reserved.remove(name);
                tracing::warn!(worker = %name, "[WorkerRegistry] Session creation failed: {}", e);
                return Err(e);
            }
        };

        let entry = WorkerEntry {
            session,
            working_context: working_context.to_string(),
            status: WorkerStatus::Idle,
            origin,
            created_at: Utc::now(),
        };
        let record = entry.record(name);

        {
            let mut state = self.lock();
            state.reserved.remove(name);
            state.workers.insert(name.to_string(), entry);
        }
        self.persist(&record);
        tracing::info!(worker = %name, session_id = %record.session_id, "[WorkerRegistry] Worker created");

        match initial_prompt.filter(|p| !p.trim().is_empty()) {
            Some(prompt) => {
                self.dispatch(name, prompt)?;
                Ok(format!(
                    "Worker '{}' created and task dispatched. The result will be reported when it finishes.",
                    name
                ))
            }
            None => Ok(format!(
                "Worker '{}' created in {} and is idle.",
                name, working_context
            )),
        }
    }

    /// Hand an idle worker a new task
    pub fn send(self: &Arc<Self>, name: &str, prompt: &str) -> AssistantResult<String> {
        if prompt.trim().is_empty() {
            return Err(AssistantError::InvalidInput("prompt must not be empty".into()));
        }

        self.dispatch(name, prompt)?;
        Ok(format!(
            "Task sent to worker '{}'. The result will be reported when it finishes.",
            name
        ))
    }

    fn dispatch(self: &Arc<Self>, name: &str, prompt: &str) -> AssistantResult<()> {
        let (session, origin, record) = {
            let mut state = self.lock();
            let entry = state
                .workers
                .get_mut(name)
                .ok_or_else(|| AssistantError::UnknownWorker(name.to_string()))?;
            if entry.status.is_running() {
                return Err(AssistantError::WorkerBusy(name.to_string()));
            }
            entry.status = WorkerStatus::Running;
            (entry.session.clone(), entry.origin.clone(), entry.record(name))
        };
        self.persist(&record);

        tracing::info!(worker = %name, "[WorkerRegistry] Task dispatched");

        let registry = self.clone();
        let name = name.to_string();
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            registry.run_task(name, session, origin, prompt).await;
        });

        Ok(())
    }

    async fn run_task(
        &self,
        name: String,
        session: Arc<dyn AgentSession>,
        origin: Option<Channel>,
        prompt: String,
    ) {
        // Workers stream nothing upward; only the final text matters
        let (events, _events_rx) = mpsc::unbounded_channel();
        let turn = TurnContext::new(Channel::background(&name, origin));
        let timeout = self.settings.dispatch_timeout;

        let result = match tokio::time::timeout(timeout, session.send(&prompt, turn, events)).await
        {
            Ok(result) => result,
            Err(_) => {
                if let Err(e) = session.abort().await {
                    tracing::debug!(worker = %name, "[WorkerRegistry] Abort after timeout failed: {}", e);
                }
                Err(AssistantError::Timeout(timeout))
            }
        };

        let (output, success) = match result {
            Ok(text) => (text, true),
            Err(e) => {
                tracing::warn!(worker = %name, "[WorkerRegistry] Task failed: {}", e);
                (error_text(&e), false)
            }
        };

        // A killed (or killed and recreated) worker reports nothing
        let removed = {
            let mut state = self.lock();
            let same_session = state
                .workers
                .get(&name)
                .is_some_and(|entry| entry.session.session_id() == session.session_id());
            if same_session {
                state.workers.remove(&name)
            } else {
                None
            }
        };
        let Some(entry) = removed else {
            tracing::debug!(worker = %name, "[WorkerRegistry] Worker killed during task, dropping result");
            return;
        };
        self.forget(&name);

        if let Err(e) = session.destroy().await {
            tracing::warn!(worker = %name, "[WorkerRegistry] Failed to destroy session: {}", e);
        }
        tracing::info!(worker = %name, success, "[WorkerRegistry] Task finished, worker torn down");

        let completion = WorkerCompletion {
            name,
            origin: entry.origin,
            output,
            success,
        };
        if self.completions.send(completion).is_err() {
            tracing::warn!("[WorkerRegistry] Completion receiver closed");
        }
    }

    // =========================================================================
    // Teardown and inspection
    // =========================================================================

    /// Remove a worker and destroy its session
    ///
    /// A task in flight is abandoned and reports nothing.
    pub async fn kill(&self, name: &str) -> AssistantResult<()> {
        let entry = self
            .lock()
            .workers
            .remove(name)
            .ok_or_else(|| AssistantError::UnknownWorker(name.to_string()))?;
        self.forget(name);

        if entry.status.is_running() {
            if let Err(e) = entry.session.abort().await {
                tracing::debug!(worker = %name, "[WorkerRegistry] Abort failed: {}", e);
            }
        }
        if let Err(e) = entry.session.destroy().await {
            tracing::warn!(worker = %name, "[WorkerRegistry] Failed to destroy session: {}", e);
        }

        tracing::info!(worker = %name, "[WorkerRegistry] Worker killed");
        Ok(())
    }

    /// Snapshot of every live worker, sorted by name
    pub fn list(&self) -> Vec<WorkerSummary> {
        let state = self.lock();
        let mut summaries: Vec<WorkerSummary> = state
            .workers
            .iter()
            .map(|(name, entry)| entry.summary(name))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Number of workers with a task in flight
    pub fn running_count(&self) -> usize {
        self.lock()
            .workers
            .values()
            .filter(|e| e.status.is_running())
            .count()
    }

    /// Number of live workers
    pub fn len(&self) -> usize {
        self.lock().workers.len()
    }

    /// Whether no worker is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete sessions mirrored by a previous process that are not live here
    ///
    /// Returns how many orphans were reaped.
    pub async fn reap_orphans(&self) -> AssistantResult<usize> {
        let records = self.store.list_workers()?;
        let mut reaped = 0;

        for record in records {
            if self.lock().workers.contains_key(&record.name) {
                continue;
            }

            if let Err(e) = self.client.delete_session(&record.session_id).await {
                tracing::warn!(
                    worker = %record.name,
                    session_id = %record.session_id,
                    "[WorkerRegistry] Failed to delete orphaned session: {}",
                    e
                );
            }
            self.forget(&record.name);
            reaped += 1;
        }

        if reaped > 0 {
            tracing::info!("[WorkerRegistry] Reaped {} orphaned worker(s)", reaped);
        }
        Ok(reaped)
    }

    /// Kill every live worker
    pub async fn shutdown_all(&self) -> usize {
        let names: Vec<String> = self.lock().workers.keys().cloned().collect();
        let mut killed = 0;

        for name in names {
            match self.kill(&name).await {
                Ok(()) => killed += 1,
                Err(e) => tracing::debug!(worker = %name, "[WorkerRegistry] Skipped during shutdown: {}", e),
            }
        }

        killed
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.len())
            .field("settings", &self.settings)
            .finish()
    }
}
