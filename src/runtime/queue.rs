//! TurnQueue - Serializes turns onto the primary session
//!
//! Every prompt, from any channel or from background completions, goes
//! through this queue. Exactly one turn is in flight at a time and turns
//! are processed in submission order; a retried turn goes back to the
//! head of the queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{
    error_text, AssistantError, AssistantResult, Channel, DeliveryCallback, SessionEvent,
    TurnContext,
};
use crate::store::{ConversationLogEntry, LogRole, StateStore};

use super::lifecycle::SessionLifecycle;

/// Default upper bound for one turn
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(300);

/// Retry limits for recoverable turn failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before each retry; the last value repeats
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay before retry number `retry` (zero-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff
            .get(retry as usize)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(10),
            ],
        )
    }
}

/// A turn waiting for, or undergoing, processing
pub struct QueuedTurn {
    /// Prompt text
    pub prompt: String,

    /// Channel the turn came from
    pub source: Channel,

    /// Retries consumed so far
    pub retry_count: u32,

    deliver: DeliveryCallback,
}

impl QueuedTurn {
    fn new(prompt: String, source: Channel, deliver: DeliveryCallback) -> Self {
        Self {
            prompt,
            source,
            retry_count: 0,
            deliver,
        }
    }

    fn partial(&mut self, text: &str) {
        (self.deliver)(text, false);
    }

    fn finish(mut self, text: &str) {
        (self.deliver)(text, true);
    }
}

impl std::fmt::Debug for QueuedTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTurn")
            .field("source", &self.source)
            .field("retry_count", &self.retry_count)
            .field("prompt_len", &self.prompt.len())
            .finish()
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedTurn>,
    draining: bool,
    /// Token of the turn in flight, or of the backoff wait before a retry
    active: Option<CancellationToken>,
}

/// What the drain loop does after a turn attempt
enum Next {
    Continue,
    Backoff(Duration, CancellationToken),
}

/// FIFO, single-flight serializer for the primary session
#[derive(Clone)]
pub struct TurnQueue {
    state: Arc<Mutex<QueueState>>,
    lifecycle: Arc<SessionLifecycle>,
    policy: RetryPolicy,
    turn_timeout: Duration,
    log_store: Option<Arc<dyn StateStore>>,
}

impl TurnQueue {
    /// Create a queue in front of `lifecycle`
    pub fn new(lifecycle: Arc<SessionLifecycle>, policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            lifecycle,
            policy,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            log_store: None,
        }
    }

    /// Set the per-turn timeout
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Record completed turns in the conversation log of `store`
    pub fn with_log_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.log_store = Some(store);
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Enqueue a turn; `deliver` receives its partial and terminal updates
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, prompt: impl Into<String>, source: Channel, deliver: DeliveryCallback) {
        let turn = QueuedTurn::new(prompt.into(), source, deliver);
        tracing::debug!(source = %turn.source, "[TurnQueue] Turn submitted");

        let start_drain = {
            let mut state = self.lock();
            state.pending.push_back(turn);
            !std::mem::replace(&mut state.draining, true)
        };

        if start_drain {
            let queue = self.clone();
            tokio::spawn(async move { queue.drain().await });
        }
    }

    /// Cancel the turn in flight and every pending turn
    ///
    /// Each pending turn receives a terminal cancellation error. Returns
    /// whether anything was cancelled.
    pub fn cancel(&self) -> bool {
        let (drained, active) = {
            let mut state = self.lock();
            let drained: Vec<QueuedTurn> = state.pending.drain(..).collect();
            (drained, state.active.clone())
        };

        let message = error_text(&AssistantError::Cancelled);
        let drained_count = drained.len();
        for turn in drained {
            turn.finish(&message);
        }

        let had_active = match active {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };

        if had_active || drained_count > 0 {
            tracing::info!(
                pending = drained_count,
                in_flight = had_active,
                "[TurnQueue] Cancelled"
            );
        }

        had_active || drained_count > 0
    }

    /// Number of turns waiting behind the one in flight
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether a turn is in flight or queued
    pub fn is_busy(&self) -> bool {
        let state = self.lock();
        state.draining || !state.pending.is_empty()
    }

    // =========================================================================
    // Drain loop
    // =========================================================================

    async fn drain(self) {
        loop {
            // Pop and arm the token under one lock so a cancel never misses the turn
            let (turn, token) = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(turn) => {
                        let token = CancellationToken::new();
                        state.active = Some(token.clone());
                        (turn, token)
                    }
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            if let Next::Backoff(delay, backoff) = self.process(turn, token).await {
                self.wait_backoff(delay, backoff).await;
            }
        }
    }

    async fn wait_backoff(&self, delay: Duration, token: CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("[TurnQueue] Backoff interrupted by cancel");
            }
            _ = tokio::time::sleep(delay) => {}
        }

        self.lock().active = None;
    }

    async fn process(&self, mut turn: QueuedTurn, token: CancellationToken) -> Next {
        let result = self.attempt(&mut turn, &token).await;
        let cancelled = {
            let mut state = self.lock();
            state.active = None;
            token.is_cancelled()
        };

        let err = match result {
            Ok(text) => {
                let prompt = turn.prompt.clone();
                let source = turn.source.clone();
                turn.finish(&text);
                self.record_exchange(prompt, text, source);
                return Next::Continue;
            }
            // A cancel that raced the failure still wins over a retry
            Err(_) if cancelled => {
                turn.finish(&error_text(&AssistantError::Cancelled));
                return Next::Continue;
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            tracing::warn!(source = %turn.source, error = %err, "[TurnQueue] Turn failed");
            turn.finish(&error_text(&err));
            return Next::Continue;
        }

        if turn.retry_count >= self.policy.max_retries {
            self.invalidate_session(&err).await;
            let exhausted = AssistantError::RetriesExhausted {
                attempts: turn.retry_count + 1,
                last: err.to_string(),
            };
            tracing::error!(source = %turn.source, error = %exhausted, "[TurnQueue] Giving up on turn");
            turn.finish(&error_text(&exhausted));
            return Next::Continue;
        }

        let delay = self.policy.delay_for(turn.retry_count);
        turn.retry_count += 1;
        tracing::warn!(
            source = %turn.source,
            attempt = turn.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "[TurnQueue] Recoverable failure, retrying"
        );

        // Requeue and arm the backoff token before awaiting the lifecycle,
        // so a cancel arriving during invalidation still reaches the turn
        let backoff = CancellationToken::new();
        {
            let mut state = self.lock();
            state.pending.push_front(turn);
            state.active = Some(backoff.clone());
        }

        self.invalidate_session(&err).await;
        Next::Backoff(delay, backoff)
    }

    async fn invalidate_session(&self, err: &AssistantError) {
        if err.is_session_gone() {
            self.lifecycle.discard_persisted().await;
        } else {
            self.lifecycle.mark_dead().await;
        }
    }

    async fn attempt(
        &self,
        turn: &mut QueuedTurn,
        token: &CancellationToken,
    ) -> AssistantResult<String> {
        let session = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(AssistantError::Cancelled),
            session = self.lifecycle.ensure_session() => session?,
        };

        let prompt = turn.prompt.clone();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let send = session.send(&prompt, TurnContext::new(turn.source.clone()), events_tx);
        tokio::pin!(send);

        let deadline = tokio::time::sleep(self.turn_timeout);
        tokio::pin!(deadline);

        let mut text = String::new();
        let result = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    if let Err(e) = session.abort().await {
                        tracing::debug!("[TurnQueue] Abort failed: {}", e);
                    }
                    break Err(AssistantError::Cancelled);
                }
                Some(event) = events_rx.recv() => {
                    if let SessionEvent::Delta(delta) = event {
                        text.push_str(&delta);
                        turn.partial(&text);
                    }
                }
                result = &mut send => break result,
                _ = &mut deadline => {
                    if let Err(e) = session.abort().await {
                        tracing::debug!("[TurnQueue] Abort after timeout failed: {}", e);
                    }
                    break Err(AssistantError::Timeout(self.turn_timeout));
                }
            }
        };

        if result.is_ok() {
            while let Ok(event) = events_rx.try_recv() {
                if let SessionEvent::Delta(delta) = event {
                    text.push_str(&delta);
                    turn.partial(&text);
                }
            }
        }

        result
    }

    fn record_exchange(&self, prompt: String, reply: String, source: Channel) {
        let Some(store) = self.log_store.clone() else {
            return;
        };

        // Logging must never delay the next turn
        tokio::task::spawn_blocking(move || {
            let entries = [
                ConversationLogEntry::new(LogRole::User, prompt, source.clone()),
                ConversationLogEntry::new(LogRole::Assistant, reply, source),
            ];
            for entry in &entries {
                if let Err(e) = store.append_log(entry) {
                    tracing::warn!("[TurnQueue] Failed to record conversation: {}", e);
                    break;
                }
            }
        });
    }
}

impl std::fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TurnQueue")
            .field("pending", &state.pending.len())
            .field("draining", &state.draining)
            .field("policy", &self.policy)
            .finish()
    }
}
