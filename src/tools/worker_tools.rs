//! Worker management tools exposed to the primary session
//!
//! - `create_worker` - Create a named worker, optionally with a first task
//! - `send_to_worker` - Hand an idle worker a task
//! - `list_workers` - Show live workers and their status
//! - `kill_worker` - Destroy a worker
//!
//! Tasks run in the background; these tools return an acknowledgement
//! immediately and the result is reported as a later turn.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::registry::ToolRegistry;
use super::tool::{Tool, ToolContext, ToolDefinition, ToolInputSchema, ToolResult};
use crate::runtime::WorkerRegistry;

/// Build a registry holding the four worker tools
pub fn worker_tool_registry(workers: Arc<WorkerRegistry>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(CreateWorkerTool::new(workers.clone()));
    registry.register(SendToWorkerTool::new(workers.clone()));
    registry.register(ListWorkersTool::new(workers.clone()));
    registry.register(KillWorkerTool::new(workers));
    registry
}

fn parse_input<T: serde::de::DeserializeOwned>(input: &Value) -> std::result::Result<T, ToolResult> {
    serde_json::from_value(input.clone()).map_err(|e| ToolResult::error(format!("Invalid input: {}", e)))
}

// =============================================================================
// create_worker
// =============================================================================

/// Create a named worker session
pub struct CreateWorkerTool {
    workers: Arc<WorkerRegistry>,
}

#[derive(Debug, Deserialize)]
struct CreateWorkerInput {
    name: String,
    #[serde(alias = "working_context")]
    working_directory: String,
    #[serde(default)]
    prompt: Option<String>,
}

impl CreateWorkerTool {
    pub fn new(workers: Arc<WorkerRegistry>) -> Self {
        Self { workers }
    }
}

#[async_trait]
impl Tool for CreateWorkerTool {
    fn name(&self) -> &str {
        "create_worker"
    }

    fn description(&self) -> &str {
        "Create a named background worker with its own session. If a prompt is given the \
         worker starts on it immediately; its result is reported back when it finishes and \
         the worker is then shut down."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: ToolInputSchema::object(
                json!({
                    "name": {
                        "type": "string",
                        "description": "Unique worker name (letters, digits, '-' or '_')"
                    },
                    "working_directory": {
                        "type": "string",
                        "description": "Directory the worker operates in"
                    },
                    "prompt": {
                        "type": "string",
                        "description": "Optional first task for the worker"
                    }
                }),
                &["name", "working_directory"],
            ),
        }
    }

    async fn execute(&self, input: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let input: CreateWorkerInput = match parse_input(input) {
            Ok(input) => input,
            Err(result) => return Ok(result),
        };

        let result = self
            .workers
            .create_worker(
                &input.name,
                &input.working_directory,
                input.prompt.as_deref(),
                ctx.origin.clone(),
            )
            .await;

        Ok(match result {
            Ok(ack) => ToolResult::success(ack),
            Err(e) => ToolResult::error(e.to_string()),
        })
    }
}

// =============================================================================
// send_to_worker
// =============================================================================

/// Hand an idle worker a new task
pub struct SendToWorkerTool {
    workers: Arc<WorkerRegistry>,
}

#[derive(Debug, Deserialize)]
struct SendToWorkerInput {
    name: String,
    prompt: String,
}

impl SendToWorkerTool {
    pub fn new(workers: Arc<WorkerRegistry>) -> Self {
        Self { workers }
    }
}

#[async_trait]
impl Tool for SendToWorkerTool {
    fn name(&self) -> &str {
        "send_to_worker"
    }

    fn description(&self) -> &str {
        "Send a task to an idle worker. Fails if the worker is unknown or already busy."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: ToolInputSchema::object(
                json!({
                    "name": { "type": "string", "description": "Worker name" },
                    "prompt": { "type": "string", "description": "Task for the worker" }
                }),
                &["name", "prompt"],
            ),
        }
    }

    async fn execute(&self, input: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let input: SendToWorkerInput = match parse_input(input) {
            Ok(input) => input,
            Err(result) => return Ok(result),
        };

        Ok(match self.workers.send(&input.name, &input.prompt) {
            Ok(ack) => ToolResult::success(ack),
            Err(e) => ToolResult::error(e.to_string()),
        })
    }
}

// =============================================================================
// list_workers
// =============================================================================

/// List live workers
pub struct ListWorkersTool {
    workers: Arc<WorkerRegistry>,
}

impl ListWorkersTool {
    pub fn new(workers: Arc<WorkerRegistry>) -> Self {
        Self { workers }
    }
}

#[async_trait]
impl Tool for ListWorkersTool {
    fn name(&self) -> &str {
        "list_workers"
    }

    fn description(&self) -> &str {
        "List live workers with their status and working directory."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: ToolInputSchema::object(json!({}), &[]),
        }
    }

    async fn execute(&self, _input: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let workers = self.workers.list();
        if workers.is_empty() {
            return Ok(ToolResult::success("No active workers."));
        }

        Ok(ToolResult::success(serde_json::to_string_pretty(&workers)?))
    }
}

// =============================================================================
// kill_worker
// =============================================================================

/// Destroy a worker
pub struct KillWorkerTool {
    workers: Arc<WorkerRegistry>,
}

#[derive(Debug, Deserialize)]
struct KillWorkerInput {
    name: String,
}

impl KillWorkerTool {
    pub fn new(workers: Arc<WorkerRegistry>) -> Self {
        Self { workers }
    }
}

#[async_trait]
impl Tool for KillWorkerTool {
    fn name(&self) -> &str {
        "kill_worker"
    }

    fn description(&self) -> &str {
        "Destroy a worker. Any task it is running is abandoned."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: ToolInputSchema::object(
                json!({ "name": { "type": "string", "description": "Worker name" } }),
                &["name"],
            ),
        }
    }

    async fn execute(&self, input: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let input: KillWorkerInput = match parse_input(input) {
            Ok(input) => input,
            Err(result) => return Ok(result),
        };

        Ok(match self.workers.kill(&input.name).await {
            Ok(()) => ToolResult::success(format!("Worker '{}' destroyed.", input.name)),
            Err(e) => ToolResult::error(e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Channel;
    use crate::runtime::WorkerSettings;
    use crate::store::MemoryStateStore;
    use crate::testing::{MockClient, SendBehavior};
    use tokio::sync::mpsc;

    fn setup() -> (MockClient, Arc<WorkerRegistry>, ToolRegistry) {
        let client = MockClient::new();
        // These tests only look at acknowledgements
        let (tx, _) = mpsc::unbounded_channel();
        let workers = Arc::new(WorkerRegistry::new(
            client.as_agent_client(),
            Arc::new(MemoryStateStore::new()),
            tx,
            WorkerSettings::new("m"),
        ));
        let tools = worker_tool_registry(workers.clone());
        (client, workers, tools)
    }

    #[test]
    fn test_registry_has_all_tools() {
        let (_client, _workers, tools) = setup();
        assert_eq!(
            tools.tool_names(),
            vec!["create_worker", "kill_worker", "list_workers", "send_to_worker"]
        );
        let defs = tools.definitions();
        let create = defs.iter().find(|d| d.name == "create_worker").unwrap();
        assert_eq!(
            create.input_schema.required,
            Some(vec!["name".to_string(), "working_directory".to_string()])
        );
    }

    #[tokio::test]
    async fn test_create_records_origin() {
        let (_client, workers, tools) = setup();
        let ctx = ToolContext::new(Channel::Http { client_id: "web".into() });

        let result = tools
            .execute_or_error(
                "create_worker",
                &json!({ "name": "w1", "working_directory": "/tmp" }),
                &ctx,
            )
            .await;

        assert!(!result.is_error, "{}", result.output);
        assert_eq!(
            workers.list()[0].origin,
            Some(Channel::Http { client_id: "web".into() })
        );
    }

    #[tokio::test]
    async fn test_create_duplicate_is_tool_error() {
        let (_client, _workers, tools) = setup();
        let ctx = ToolContext::default();
        let input = json!({ "name": "w1", "working_directory": "/tmp" });

        assert!(!tools.execute_or_error("create_worker", &input, &ctx).await.is_error);
        let second = tools.execute_or_error("create_worker", &input, &ctx).await;
        assert!(second.is_error);
        assert!(second.output.contains("already exists"));
    }

    #[tokio::test]
    async fn test_invalid_input_is_tool_error() {
        let (_client, _workers, tools) = setup();
        let result = tools
            .execute_or_error("create_worker", &json!({ "name": 5 }), &ToolContext::default())
            .await;
        assert!(result.is_error);
        assert!(result.output.starts_with("Invalid input"));
    }

    #[tokio::test]
    async fn test_send_busy_and_unknown() {
        let (client, _workers, tools) = setup();
        client.set_behavior(SendBehavior::Hang);
        let ctx = ToolContext::default();

        let unknown = tools
            .execute_or_error("send_to_worker", &json!({ "name": "nope", "prompt": "x" }), &ctx)
            .await;
        assert!(unknown.is_error);
        assert!(unknown.output.contains("Unknown worker"));

        tools
            .execute_or_error(
                "create_worker",
                &json!({ "name": "busy", "working_directory": "/", "prompt": "first" }),
                &ctx,
            )
            .await;
        client.wait_for_sends(1).await;

        let busy = tools
            .execute_or_error("send_to_worker", &json!({ "name": "busy", "prompt": "again" }), &ctx)
            .await;
        assert!(busy.is_error);
        assert!(busy.output.contains("busy"));
    }

    #[tokio::test]
    async fn test_list_and_kill() {
        let (_client, workers, tools) = setup();
        let ctx = ToolContext::default();

        let empty = tools.execute_or_error("list_workers", &json!({}), &ctx).await;
        assert_eq!(empty.output, "No active workers.");

        workers.create_worker("w2", "/srv", None, None).await.unwrap();
        let listed = tools.execute_or_error("list_workers", &json!({}), &ctx).await;
        assert!(listed.output.contains("\"name\": \"w2\""));
        assert!(listed.output.contains("\"status\": \"idle\""));

        let killed = tools.execute_or_error("kill_worker", &json!({ "name": "w2" }), &ctx).await;
        assert!(!killed.is_error);
        assert!(workers.is_empty());

        let again = tools.execute_or_error("kill_worker", &json!({ "name": "w2" }), &ctx).await;
        assert!(again.is_error);
    }
}
