//! Test doubles for the agent host and notification channels

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::{
    AssistantError, AssistantResult, Channel, ConnectionState, Delivery, EventSender,
    SessionEvent, TurnContext,
};
use crate::runtime::Notifier;
use crate::session::{AgentClient, AgentSession, SessionConfig};
use crate::tools::{ToolContext, ToolRegistry};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// What a mock session does with a prompt
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SendBehavior {
    /// Reply "echo: <prompt>", streamed in two deltas
    Echo,
    /// Fail with `AssistantError::Other(message)`
    Fail(String),
    /// Never complete
    Hang,
}

struct MockState {
    behavior: Mutex<SendBehavior>,
    fail_next: Mutex<(usize, String)>,
    send_delay: Mutex<Duration>,
    create_delay: Mutex<Duration>,
    reset_delay: Mutex<Duration>,
    reject_resume: AtomicBool,
    fail_create: AtomicBool,
    fail_destroy: AtomicBool,
    connection: Mutex<ConnectionState>,

    next_id: AtomicUsize,
    created: AtomicUsize,
    resume_attempts: AtomicUsize,
    resets: AtomicUsize,
    aborts: AtomicUsize,
    disconnects: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sent: Mutex<Vec<(String, Channel)>>,
    create_configs: Mutex<Vec<SessionConfig>>,
    deleted: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
}

/// Scriptable in-process agent host
#[derive(Clone)]
pub(crate) struct MockClient {
    state: Arc<MockState>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                behavior: Mutex::new(SendBehavior::Echo),
                fail_next: Mutex::new((0, String::new())),
                send_delay: Mutex::new(Duration::ZERO),
                create_delay: Mutex::new(Duration::ZERO),
                reset_delay: Mutex::new(Duration::ZERO),
                reject_resume: AtomicBool::new(false),
                fail_create: AtomicBool::new(false),
                fail_destroy: AtomicBool::new(false),
                connection: Mutex::new(ConnectionState::Connected),
                next_id: AtomicUsize::new(1),
                created: AtomicUsize::new(0),
                resume_attempts: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
                aborts: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
                create_configs: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
                destroyed: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn as_agent_client(&self) -> Arc<dyn AgentClient> {
        Arc::new(self.clone())
    }

    // Scripting

    pub fn set_behavior(&self, behavior: SendBehavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    /// Fail the next `count` sends with a connection-reset error
    pub fn fail_next_sends(&self, count: usize) {
        self.fail_next_sends_with(count, "connection reset by peer");
    }

    pub fn fail_next_sends_with(&self, count: usize, message: &str) {
        *self.state.fail_next.lock().unwrap() = (count, message.to_string());
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.state.send_delay.lock().unwrap() = delay;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.state.create_delay.lock().unwrap() = delay;
    }

    pub fn set_reset_delay(&self, delay: Duration) {
        *self.state.reset_delay.lock().unwrap() = delay;
    }

    pub fn reject_resume(&self, reject: bool) {
        self.state.reject_resume.store(reject, Ordering::SeqCst);
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.state.fail_destroy.store(fail, Ordering::SeqCst);
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.state.connection.lock().unwrap() = state;
    }

    // Instrumentation

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn resume_attempts(&self) -> usize {
        self.state.resume_attempts.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.state.aborts.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn sent_prompts(&self) -> Vec<String> {
        self.state.sent.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn sent_sources(&self) -> Vec<Channel> {
        self.state.sent.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn last_create_config(&self) -> Option<SessionConfig> {
        self.state.create_configs.lock().unwrap().last().cloned()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.deleted.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.state.destroyed.lock().unwrap().clone()
    }

    /// Wait until at least `count` sends have started
    pub async fn wait_for_sends(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while self.state.sent.lock().unwrap().len() < count {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {} sends", count);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn session(&self, id: String, config: &SessionConfig) -> Arc<dyn AgentSession> {
        Arc::new(MockSession {
            id,
            tools: config.tools.clone(),
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl AgentClient for MockClient {
    async fn create_session(&self, config: &SessionConfig) -> AssistantResult<Arc<dyn AgentSession>> {
        let delay = *self.state.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(AssistantError::Network("connection refused".into()));
        }

        self.state.created.fetch_add(1, Ordering::SeqCst);
        self.state.create_configs.lock().unwrap().push(config.clone());
        let id = format!("mock-{}", self.state.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(self.session(id, config))
    }

    async fn resume_session(
        &self,
        session_id: &str,
        config: &SessionConfig,
    ) -> AssistantResult<Arc<dyn AgentSession>> {
        self.state.resume_attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.reject_resume.load(Ordering::SeqCst) {
            return Err(AssistantError::SessionNotFound(session_id.to_string()));
        }
        Ok(self.session(session_id.to_string(), config))
    }

    async fn delete_session(&self, session_id: &str) -> AssistantResult<()> {
        self.state.deleted.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn connection_state(&self) -> ConnectionState {
        *self.state.connection.lock().unwrap()
    }

    async fn reset(&self) -> AssistantResult<()> {
        let delay = *self.state.reset_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct InFlight(Arc<MockState>);

impl InFlight {
    fn enter(state: &Arc<MockState>) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockSession {
    id: String,
    tools: Arc<ToolRegistry>,
    state: Arc<MockState>,
}

#[async_trait]
impl AgentSession for MockSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn send(&self, prompt: &str, turn: TurnContext, events: EventSender) -> AssistantResult<String> {
        self.state
            .sent
            .lock()
            .unwrap()
            .push((prompt.to_string(), turn.source.clone()));
        let _in_flight = InFlight::enter(&self.state);

        // "tool:<name> <json>" makes the session call one of its tools
        if let Some(call) = prompt.strip_prefix("tool:") {
            let (name, input) = call.split_once(' ').unwrap_or((call, "{}"));
            let input: Value = serde_json::from_str(input).unwrap_or(Value::Null);
            let result = self
                .tools
                .execute_or_error(name, &input, &ToolContext::new(turn.source))
                .await;
            return Ok(result.output);
        }

        {
            let mut fail_next = self.state.fail_next.lock().unwrap();
            if fail_next.0 > 0 {
                fail_next.0 -= 1;
                return Err(AssistantError::Other(fail_next.1.clone()));
            }
        }

        let delay = *self.state.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.state.behavior.lock().unwrap().clone();
        match behavior {
            SendBehavior::Echo => {
                let reply = format!("echo: {}", prompt);
                let split = reply
                    .char_indices()
                    .map(|(i, _)| i)
                    .nth(reply.chars().count() / 2)
                    .unwrap_or(reply.len());
                let _ = events.send(SessionEvent::Delta(reply[..split].to_string()));
                let _ = events.send(SessionEvent::Delta(reply[split..].to_string()));
                Ok(reply)
            }
            SendBehavior::Fail(message) => Err(AssistantError::Other(message)),
            SendBehavior::Hang => std::future::pending().await,
        }
    }

    async fn abort(&self) -> AssistantResult<()> {
        self.state.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> AssistantResult<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> AssistantResult<()> {
        self.state.destroyed.lock().unwrap().push(self.id.clone());
        if self.state.fail_destroy.load(Ordering::SeqCst) {
            return Err(AssistantError::Network("connection reset".into()));
        }
        Ok(())
    }
}

/// Collect delivery updates up to and including the terminal one
pub(crate) async fn collect_until_done(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Vec<Delivery> {
    let mut updates = Vec::new();
    loop {
        let update = tokio::time::timeout(WAIT_LIMIT, rx.recv())
            .await
            .expect("terminal update in time")
            .expect("delivery channel open");
        let done = update.done;
        updates.push(update);
        if done {
            return updates;
        }
    }
}

/// Notifier that records every call
pub(crate) struct RecordingNotifier {
    calls: Mutex<Vec<(String, Option<Channel>)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Wait until at least `count` notifications arrived, then return them all
    pub async fn wait_for(&self, count: usize) -> Vec<(String, Option<Channel>)> {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            {
                let calls = self.calls.lock().unwrap();
                if calls.len() >= count {
                    return calls.clone();
                }
            }
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {} notifications", count);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, text: &str, channel: Option<&Channel>) {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), channel.cloned()));
    }
}
