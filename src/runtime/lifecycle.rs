//! SessionLifecycle - Owns the primary session
//!
//! The lifecycle manager is responsible for:
//! - Resuming the persisted primary session, or creating a new one
//! - Persisting the identifier of every newly created session
//! - Coalescing concurrent `ensure_session` and client reset calls
//! - Polling connection liveness and invalidating the session when it drops

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::{AssistantResult, ConnectionState};
use crate::session::{AgentClient, AgentSession, SessionConfig};
use crate::store::{summarize_log, StateStore, PRIMARY_SESSION_KEY};

/// Default interval between liveness probes
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of log entries summarized into a fresh session
pub const DEFAULT_HISTORY_SUMMARY_ENTRIES: usize = 20;

/// Manages the single long-lived primary session
pub struct SessionLifecycle {
    client: Arc<dyn AgentClient>,
    store: Arc<dyn StateStore>,
    config: SessionConfig,
    liveness_interval: Duration,
    history_summary_entries: usize,

    /// The live primary session; held across creation so callers coalesce
    current: Mutex<Option<Arc<dyn AgentSession>>>,

    /// Last observed liveness
    liveness: StdMutex<ConnectionState>,

    /// Serializes client resets
    reset_lock: Mutex<()>,

    /// Bumped after every completed reset
    reset_generation: AtomicU64,
}

impl SessionLifecycle {
    /// Create a lifecycle manager; no session is opened until first use
    pub fn new(
        client: Arc<dyn AgentClient>,
        store: Arc<dyn StateStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            history_summary_entries: DEFAULT_HISTORY_SUMMARY_ENTRIES,
            current: Mutex::new(None),
            liveness: StdMutex::new(ConnectionState::Unknown),
            reset_lock: Mutex::new(()),
            reset_generation: AtomicU64::new(0),
        }
    }

    /// Set the liveness probe interval
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Set how many log entries seed a fresh session after a failed resume
    pub fn with_history_summary_entries(mut self, entries: usize) -> Self {
        self.history_summary_entries = entries;
        self
    }

    /// Get the session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // =========================================================================
    // Session access
    // =========================================================================

    /// Return the live primary session, resuming or creating one if needed
    ///
    /// Concurrent callers wait on the same attempt and never create
    /// duplicate sessions. Creation failures propagate and leave no
    /// identifier persisted.
    pub async fn ensure_session(&self) -> AssistantResult<Arc<dyn AgentSession>> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            return Ok(session.clone());
        }

        let session = self.open_session().await?;
        *current = Some(session.clone());
        self.set_liveness(ConnectionState::Connected);

        Ok(session)
    }

    /// Invalidate the primary session so the next `ensure_session` rebuilds it
    ///
    /// The persisted identifier is kept, so the rebuild tries to resume first.
    pub async fn mark_dead(&self) {
        let previous = self.current.lock().await.take();
        if let Some(session) = previous {
            tracing::info!(session_id = %session.session_id(), "[Lifecycle] Primary session invalidated");
        }
        self.set_liveness(ConnectionState::Disconnected);
    }

    /// Invalidate the session and forget its identifier
    ///
    /// Used when the host reports the session gone, so the next
    /// `ensure_session` creates a fresh one instead of resuming.
    pub async fn discard_persisted(&self) {
        self.mark_dead().await;
        if let Err(e) = self.store.remove(PRIMARY_SESSION_KEY) {
            tracing::warn!("[Lifecycle] Failed to clear persisted session id: {}", e);
        }
    }

    /// Identifier of the live primary session, if any
    pub async fn current_session_id(&self) -> Option<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|s| s.session_id().to_string())
    }

    /// Last observed liveness
    pub fn liveness(&self) -> ConnectionState {
        *self
            .liveness
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_liveness(&self, state: ConnectionState) {
        *self
            .liveness
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    async fn open_session(&self) -> AssistantResult<Arc<dyn AgentSession>> {
        let persisted = match self.store.get(PRIMARY_SESSION_KEY) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("[Lifecycle] Failed to read persisted session id: {}", e);
                None
            }
        };

        if let Some(session_id) = &persisted {
            match self.client.resume_session(session_id, &self.config).await {
                Ok(session) => {
                    tracing::info!(session_id = %session.session_id(), "[Lifecycle] Resumed primary session");
                    if session.session_id() != session_id {
                        self.persist_session_id(session.session_id());
                    }
                    return Ok(session);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "[Lifecycle] Resume failed, creating a new session"
                    );
                }
            }
        }

        let mut config = self.config.clone();
        if persisted.is_some() {
            config.context_summary = self.context_summary();
        }

        let session = self.client.create_session(&config).await?;
        self.persist_session_id(session.session_id());
        tracing::info!(session_id = %session.session_id(), "[Lifecycle] Created primary session");

        Ok(session)
    }

    fn persist_session_id(&self, session_id: &str) {
        if let Err(e) = self.store.set(PRIMARY_SESSION_KEY, session_id) {
            tracing::warn!("[Lifecycle] Failed to persist session id: {}", e);
        }
    }

    fn context_summary(&self) -> Option<String> {
        if self.history_summary_entries == 0 {
            return None;
        }

        match self.store.recent_log(self.history_summary_entries) {
            Ok(entries) => summarize_log(&entries),
            Err(e) => {
                tracing::warn!("[Lifecycle] Failed to read conversation log: {}", e);
                None
            }
        }
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    /// Tear down and recreate the low-level client
    ///
    /// A caller that arrives while another reset is running waits for it and
    /// then returns without resetting again.
    pub async fn reset_client(&self) -> AssistantResult<()> {
        let observed = self.reset_generation.load(Ordering::SeqCst);
        let _guard = self.reset_lock.lock().await;

        if self.reset_generation.load(Ordering::SeqCst) != observed {
            tracing::debug!("[Lifecycle] Reset already performed by another caller");
            return Ok(());
        }

        tracing::info!("[Lifecycle] Resetting agent client");
        let result = self.client.reset().await;
        self.reset_generation.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Probe the connection once; reset and invalidate if it is not up
    pub async fn check_liveness(&self) -> ConnectionState {
        let state = self.client.connection_state().await;

        if state.is_connected() {
            self.set_liveness(ConnectionState::Connected);
            return state;
        }

        tracing::warn!(?state, "[Lifecycle] Agent host not connected, resetting client");
        if let Err(e) = self.reset_client().await {
            tracing::warn!("[Lifecycle] Client reset failed: {}", e);
        }
        self.mark_dead().await;

        state
    }

    /// Spawn the background liveness monitor
    ///
    /// The monitor holds only a weak reference and exits once the lifecycle
    /// manager is dropped.
    pub fn spawn_liveness_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.liveness_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(lifecycle) = weak.upgrade() else {
                    break;
                };
                lifecycle.check_liveness().await;
            }

            tracing::debug!("[Lifecycle] Liveness monitor stopped");
        })
    }

    /// Release the primary session at process shutdown
    pub async fn shutdown(&self) {
        let previous = self.current.lock().await.take();
        if let Some(session) = previous {
            if let Err(e) = session.disconnect().await {
                tracing::warn!("[Lifecycle] Disconnect failed: {}", e);
            }
            tracing::info!(session_id = %session.session_id(), "[Lifecycle] Primary session released");
        }
    }
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("liveness", &self.liveness())
            .field("liveness_interval", &self.liveness_interval)
            .finish()
    }
}
