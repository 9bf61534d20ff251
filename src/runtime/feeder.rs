//! BackgroundFeeder - Feeds worker completions back into the primary session
//!
//! Each completion becomes a synthetic turn on the primary queue. The
//! primary session's reply is pushed to the worker's originating channel,
//! or to every channel when the origin is unknown.

use std::sync::Arc;

use crate::core::{Channel, DeliveryCallback};

use super::queue::TurnQueue;
use super::workers::{CompletionReceiver, WorkerCompletion};

/// Pushes unsolicited messages to users
pub trait Notifier: Send + Sync {
    /// Deliver `text` to `channel`, or to every channel when `None`
    fn notify(&self, text: &str, channel: Option<&Channel>);
}

/// Notifier that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, text: &str, channel: Option<&Channel>) {
        match channel {
            Some(channel) => tracing::info!(%channel, "[Notify] {}", text),
            None => tracing::info!("[Notify] (all channels) {}", text),
        }
    }
}

/// Build the prompt that reports a finished worker task
pub fn completion_prompt(completion: &WorkerCompletion) -> String {
    let outcome = if completion.success {
        "finished its task"
    } else {
        "failed"
    };
    format!(
        "[Background task completed] Worker '{}' {}. It has been shut down.\n\n\
         Output:\n{}\n\n\
         Summarize the result for the user.",
        completion.name, outcome, completion.output
    )
}

/// Turns worker completions into primary-session turns
#[derive(Clone)]
pub struct BackgroundFeeder {
    queue: TurnQueue,
    notifier: Arc<dyn Notifier>,
}

impl BackgroundFeeder {
    /// Create a feeder submitting to `queue` and replying through `notifier`
    pub fn new(queue: TurnQueue, notifier: Arc<dyn Notifier>) -> Self {
        Self { queue, notifier }
    }

    /// Submit one completion as a background turn
    pub fn on_worker_complete(&self, completion: WorkerCompletion) {
        let prompt = completion_prompt(&completion);
        let source = Channel::background(&completion.name, completion.origin);
        let reply_to = source.reply_channel().cloned();
        let notifier = self.notifier.clone();

        let deliver: DeliveryCallback = Box::new(move |text: &str, done: bool| {
            if done {
                notifier.notify(text, reply_to.as_ref());
            }
        });

        tracing::info!(%source, "[BackgroundFeeder] Feeding worker completion");
        self.queue.submit(prompt, source, deliver);
    }

    /// Consume completions until every sender is gone
    pub async fn run(self, mut completions: CompletionReceiver) {
        while let Some(completion) = completions.recv().await {
            self.on_worker_complete(completion);
        }
        tracing::debug!("[BackgroundFeeder] Completion channel closed");
    }
}

impl std::fmt::Debug for BackgroundFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundFeeder")
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{RetryPolicy, SessionLifecycle};
    use crate::session::SessionConfig;
    use crate::store::MemoryStateStore;
    use crate::testing::{MockClient, RecordingNotifier};

    fn completion(origin: Option<Channel>, success: bool) -> WorkerCompletion {
        WorkerCompletion {
            name: "indexer".into(),
            origin,
            output: "42 files".into(),
            success,
        }
    }

    fn feeder(client: &MockClient, notifier: Arc<RecordingNotifier>) -> BackgroundFeeder {
        let lifecycle = Arc::new(SessionLifecycle::new(
            client.as_agent_client(),
            Arc::new(MemoryStateStore::new()),
            SessionConfig::new("m"),
        ));
        BackgroundFeeder::new(TurnQueue::new(lifecycle, RetryPolicy::default()), notifier)
    }

    #[test]
    fn test_completion_prompt() {
        let ok = completion_prompt(&completion(None, true));
        assert!(ok.starts_with("[Background task completed] Worker 'indexer' finished its task"));
        assert!(ok.contains("42 files"));

        let failed = completion_prompt(&completion(None, false));
        assert!(failed.contains("Worker 'indexer' failed"));
    }

    #[tokio::test]
    async fn test_reply_goes_to_origin() {
        let client = MockClient::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let feeder = feeder(&client, notifier.clone());

        feeder.on_worker_complete(completion(Some(Channel::Telegram { chat_id: 5 }), true));
        let calls = notifier.wait_for(1).await;

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, Some(Channel::Telegram { chat_id: 5 }));
        assert!(calls[0].0.starts_with("echo: [Background task completed]"));
    }

    #[tokio::test]
    async fn test_unknown_origin_notifies_everyone() {
        let client = MockClient::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let feeder = feeder(&client, notifier.clone());

        feeder.on_worker_complete(completion(None, true));
        let calls = notifier.wait_for(1).await;
        assert_eq!(calls[0].1, None);
    }

    #[tokio::test]
    async fn test_background_turn_source() {
        let client = MockClient::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let feeder = feeder(&client, notifier.clone());

        feeder.on_worker_complete(completion(Some(Channel::Terminal), true));
        notifier.wait_for(1).await;

        let sources = client.sent_sources();
        assert_eq!(
            sources,
            vec![Channel::background("indexer", Some(Channel::Terminal))]
        );
    }

    #[tokio::test]
    async fn test_run_until_closed() {
        let client = MockClient::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let feeder = feeder(&client, notifier.clone());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let task = tokio::spawn(feeder.run(rx));
        tx.send(completion(None, true)).unwrap();
        tx.send(completion(Some(Channel::Terminal), false)).unwrap();
        drop(tx);

        task.await.unwrap();
        let calls = notifier.wait_for(2).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, Some(Channel::Terminal));
    }
}
