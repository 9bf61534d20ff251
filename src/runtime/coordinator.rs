//! Coordinator - The assembled session-coordination layer
//!
//! Wires the lifecycle manager, the turn queue, the worker registry and the
//! background feeder together, and is what channel adapters talk to.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::{AssistantResult, Channel, DeliveryCallback};
use crate::session::{AgentClient, SessionConfig};
use crate::store::StateStore;
use crate::tools::worker_tool_registry;

use super::feeder::{BackgroundFeeder, Notifier};
use super::lifecycle::{SessionLifecycle, DEFAULT_HISTORY_SUMMARY_ENTRIES, DEFAULT_LIVENESS_INTERVAL};
use super::queue::{RetryPolicy, TurnQueue, DEFAULT_TURN_TIMEOUT};
use super::workers::{CompletionReceiver, WorkerRegistry, WorkerSettings, WorkerSummary};

/// Settings for a `Coordinator`
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Model for the primary session
    pub model: String,

    /// System message for the primary session
    pub system_message: Option<String>,

    /// Whether the primary session streams partial output
    pub streaming: bool,

    /// Interval between liveness probes
    pub liveness_interval: Duration,

    /// Upper bound for one primary turn
    pub turn_timeout: Duration,

    /// Log entries used to seed a fresh session after a failed resume
    pub history_summary_entries: usize,

    /// Retry policy for recoverable turn failures
    pub retry: RetryPolicy,

    /// Worker session settings
    pub workers: WorkerSettings,
}

impl CoordinatorConfig {
    /// Defaults for `model`; workers use the same model
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            workers: WorkerSettings::new(model.clone()),
            model,
            system_message: None,
            streaming: true,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            history_summary_entries: DEFAULT_HISTORY_SUMMARY_ENTRIES,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the worker settings
    pub fn with_workers(mut self, workers: WorkerSettings) -> Self {
        self.workers = workers;
        self
    }

    /// Set the turn timeout
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Set the liveness probe interval
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }
}

/// Front door of the session-coordination layer
pub struct Coordinator {
    lifecycle: Arc<SessionLifecycle>,
    queue: TurnQueue,
    workers: Arc<WorkerRegistry>,
    feeder: BackgroundFeeder,
    completions: Mutex<Option<CompletionReceiver>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Build every component; nothing runs until `start`
    pub fn new(
        config: CoordinatorConfig,
        client: Arc<dyn AgentClient>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        // Completions flow back over a channel so the registry never needs
        // a handle on the queue that owns its tools
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let workers = Arc::new(WorkerRegistry::new(
            client.clone(),
            store.clone(),
            completions_tx,
            config.workers.clone(),
        ));

        let mut session_config = SessionConfig::new(&config.model)
            .with_streaming(config.streaming)
            .with_tools(Arc::new(worker_tool_registry(workers.clone())));
        if let Some(message) = &config.system_message {
            session_config = session_config.with_system_message(message.clone());
        }

        let lifecycle = Arc::new(
            SessionLifecycle::new(client, store.clone(), session_config)
                .with_liveness_interval(config.liveness_interval)
                .with_history_summary_entries(config.history_summary_entries),
        );

        let queue = TurnQueue::new(lifecycle.clone(), config.retry.clone())
            .with_turn_timeout(config.turn_timeout)
            .with_log_store(store);

        let feeder = BackgroundFeeder::new(queue.clone(), notifier);

        Self {
            lifecycle,
            queue,
            workers,
            feeder,
            completions: Mutex::new(Some(completions_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Reap orphans, start background tasks and warm up the primary session
    ///
    /// A failed warm-up is logged; the first turn tries again.
    pub async fn start(&self) -> AssistantResult<()> {
        let Some(completions) = self
            .completions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        else {
            tracing::debug!("[Coordinator] Already started");
            return Ok(());
        };

        if let Err(e) = self.workers.reap_orphans().await {
            tracing::warn!("[Coordinator] Orphan reaping failed: {}", e);
        }

        let feeder = self.feeder.clone();
        let feeder_task = tokio::spawn(feeder.run(completions));
        let monitor_task = self.lifecycle.spawn_liveness_monitor();
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend([feeder_task, monitor_task]);

        match self.lifecycle.ensure_session().await {
            Ok(session) => {
                tracing::info!(session_id = %session.session_id(), "[Coordinator] Primary session ready")
            }
            Err(e) => tracing::warn!("[Coordinator] Warm-up failed, will retry on first turn: {}", e),
        }

        Ok(())
    }

    /// Enqueue a prompt from `source`
    pub fn submit(&self, prompt: impl Into<String>, source: Channel, deliver: DeliveryCallback) {
        self.queue.submit(prompt, source, deliver);
    }

    /// Cancel the turn in flight and every pending turn
    pub fn cancel(&self) -> bool {
        self.queue.cancel()
    }

    /// Snapshot of every live worker
    pub fn list_workers(&self) -> Vec<WorkerSummary> {
        self.workers.list()
    }

    /// Number of workers with a task in flight
    pub fn running_workers(&self) -> usize {
        self.workers.running_count()
    }

    /// The lifecycle manager
    pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        &self.lifecycle
    }

    /// The worker registry
    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.workers
    }

    /// The turn queue
    pub fn queue(&self) -> &TurnQueue {
        &self.queue
    }

    /// Stop background tasks, tear down workers, then release the primary session
    pub async fn shutdown(&self) {
        tracing::info!("[Coordinator] Shutting down");

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        self.queue.cancel();

        let killed = self.workers.shutdown_all().await;
        if killed > 0 {
            tracing::info!("[Coordinator] Tore down {} worker(s)", killed);
        }

        self.lifecycle.shutdown().await;
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("lifecycle", &self.lifecycle)
            .field("queue", &self.queue)
            .field("workers", &self.workers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{delivery_channel, WorkerStatus};
    use crate::store::{MemoryStateStore, WorkerRecord, PRIMARY_SESSION_KEY};
    use crate::testing::{collect_until_done, MockClient, RecordingNotifier, SendBehavior};
    use chrono::Utc;

    struct Fixture {
        client: MockClient,
        store: Arc<MemoryStateStore>,
        notifier: Arc<RecordingNotifier>,
        coordinator: Coordinator,
    }

    fn fixture() -> Fixture {
        let client = MockClient::new();
        let store = Arc::new(MemoryStateStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let config = CoordinatorConfig::new("primary-model")
            .with_retry(RetryPolicy::new(2, vec![Duration::from_millis(5)]))
            .with_workers(WorkerSettings::new("worker-model"));
        let coordinator = Coordinator::new(
            config,
            client.as_agent_client(),
            store.clone(),
            notifier.clone(),
        );
        Fixture {
            client,
            store,
            notifier,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_start_warms_up_and_reaps() {
        let f = fixture();
        let now = Utc::now();
        f.store
            .upsert_worker(&WorkerRecord {
                name: "stale".into(),
                session_id: "stale-session".into(),
                working_context: "/x".into(),
                status: WorkerStatus::Running,
                last_output: None,
                origin: None,
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        f.coordinator.start().await.unwrap();

        assert_eq!(f.client.created(), 1);
        assert!(f.store.get(PRIMARY_SESSION_KEY).unwrap().is_some());
        assert_eq!(f.client.deleted(), vec!["stale-session".to_string()]);
        assert!(f.store.list_workers().unwrap().is_empty());

        // The primary session carries the worker tools
        let config = f.client.last_create_config().unwrap();
        assert_eq!(config.model, "primary-model");
        assert_eq!(
            config.tools.tool_names(),
            vec!["create_worker", "kill_worker", "list_workers", "send_to_worker"]
        );

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_survives_host_down() {
        let f = fixture();
        f.client.fail_create(true);
        f.coordinator.start().await.unwrap();
        assert_eq!(f.store.get(PRIMARY_SESSION_KEY).unwrap(), None);

        f.client.fail_create(false);
        let (deliver, mut rx) = delivery_channel();
        f.coordinator.submit("hello", Channel::Terminal, deliver);
        assert_eq!(collect_until_done(&mut rx).await.last().unwrap().text, "echo: hello");
    }

    #[tokio::test]
    async fn test_worker_result_routed_to_origin() {
        let f = fixture();
        f.coordinator.start().await.unwrap();

        // The primary session calls the create_worker tool during a Telegram turn
        let (deliver, mut rx) = delivery_channel();
        f.coordinator.submit(
            r#"tool:create_worker {"name":"scout","working_directory":"/srv/repo","prompt":"count files"}"#,
            Channel::Telegram { chat_id: 42 },
            deliver,
        );
        let ack = collect_until_done(&mut rx).await;
        assert!(ack.last().unwrap().text.contains("scout"));

        let calls = f.notifier.wait_for(1).await;
        assert_eq!(calls[0].1, Some(Channel::Telegram { chat_id: 42 }));
        assert!(calls[0].0.contains("Worker 'scout' finished its task"));
        assert!(calls[0].0.contains("echo: count files"));

        // The worker tore itself down
        assert!(f.coordinator.list_workers().is_empty());
        assert_eq!(f.coordinator.running_workers(), 0);
        assert!(f.store.list_workers().unwrap().is_empty());

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_workers_then_session() {
        let f = fixture();
        f.coordinator.start().await.unwrap();
        f.coordinator
            .workers()
            .create_worker("idle-one", "/w", None, Some(Channel::Terminal))
            .await
            .unwrap();
        assert_eq!(f.coordinator.list_workers().len(), 1);

        f.coordinator.shutdown().await;

        assert!(f.coordinator.list_workers().is_empty());
        assert_eq!(f.client.destroyed().len(), 1);
        assert_eq!(f.client.disconnects(), 1);
        // The primary session stays resumable
        assert!(f.store.get(PRIMARY_SESSION_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancel_through_coordinator() {
        let f = fixture();
        f.client.set_behavior(SendBehavior::Hang);
        f.coordinator.start().await.unwrap();

        let (deliver, mut rx) = delivery_channel();
        f.coordinator.submit("stuck", Channel::Terminal, deliver);
        f.client.wait_for_sends(1).await;

        assert!(f.coordinator.cancel());
        assert_eq!(
            collect_until_done(&mut rx).await.last().unwrap().text,
            "Error: Request cancelled"
        );

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_harmless() {
        let f = fixture();
        f.coordinator.start().await.unwrap();
        f.coordinator.start().await.unwrap();
        assert_eq!(f.client.created(), 1);
        f.coordinator.shutdown().await;
    }
}
