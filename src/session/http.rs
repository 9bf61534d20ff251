//! HTTP backend for agent sessions
//!
//! Talks to a remote agent host over JSON requests and an SSE turn stream:
//!
//! - `POST /sessions` create, `POST /sessions/{id}/resume` resume
//! - `POST /sessions/{id}/turns` send a turn, answered with `text/event-stream`
//!   carrying `delta`, `tool_call`, `done` and `error` events
//! - `POST /sessions/{id}/tool_results` answer a `tool_call`
//! - `POST /sessions/{id}/abort`, `DELETE /sessions/{id}`
//! - `GET /health` liveness probe

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::sync::RwLock;
use tokio_util::io::StreamReader;

use crate::core::{
    AssistantError, AssistantResult, Channel, ConnectionState, EventSender, SessionEvent,
    TurnContext,
};
use crate::tools::{ToolContext, ToolDefinition, ToolRegistry, ToolResult};

use super::client::{AgentClient, AgentSession, SessionConfig};

/// Timeout for the liveness probe
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    model: &'a str,
    streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_directory: Option<&'a str>,
    tools: Vec<ToolDefinition>,
}

impl<'a> SessionRequest<'a> {
    fn from_config(config: &'a SessionConfig) -> Self {
        Self {
            model: &config.model,
            streaming: config.streaming,
            system_message: config.system_message.as_deref(),
            context_summary: config.context_summary.as_deref(),
            working_directory: config.working_directory.as_deref(),
            tools: config.tools.definitions(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct TurnRequest<'a> {
    prompt: &'a str,
    source: &'a Channel,
}

#[derive(Debug, Serialize)]
struct ToolResultRequest<'a> {
    call_id: &'a str,
    output: &'a str,
    is_error: bool,
}

/// One event on a turn's SSE stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum TurnStreamEvent {
    Delta {
        text: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Done {
        #[serde(default)]
        text: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Parse a single SSE line into a turn event
///
/// Non-data lines, keep-alives and unparseable payloads yield `None`.
pub(crate) fn parse_sse_line(line: &str) -> Option<TurnStreamEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str(data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("[HttpAgent] Failed to parse stream event: {}", e);
            None
        }
    }
}

fn turn_event_stream(response: Response) -> impl Stream<Item = AssistantResult<TurnStreamEvent>> + Send {
    let byte_stream = response.bytes_stream();
    let stream_reader = StreamReader::new(
        byte_stream.map(|result| result.map_err(std::io::Error::other)),
    );
    let buf_reader = tokio::io::BufReader::new(stream_reader);

    async_stream::try_stream! {
        let mut lines = buf_reader.lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| AssistantError::ConnectionClosed(e.to_string()))?
        {
            if let Some(event) = parse_sse_line(&line) {
                yield event;
            }
        }
    }
}

async fn check_status(response: Response) -> AssistantResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    tracing::debug!("[HttpAgent] Error response: {} - {}", status, message);

    Err(AssistantError::Api {
        status: status.as_u16(),
        message,
    })
}

fn build_http_client(connect_timeout: Duration) -> AssistantResult<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| AssistantError::Network(format!("failed to build HTTP client: {}", e)))
}

// ============================================================================
// Transport shared by the client and its sessions
// ============================================================================

#[derive(Clone)]
struct Transport {
    base_url: String,
    api_key: Option<String>,
    connect_timeout: Duration,
    /// Replaced wholesale by `reset()`
    http: Arc<RwLock<Client>>,
}

impl Transport {
    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let client = self.http.read().await.clone();
        let url = format!("{}{}", self.base_url, path);
        let builder = client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn open_session(&self, path: &str, config: &SessionConfig) -> AssistantResult<String> {
        let response = self
            .request(Method::POST, path)
            .await
            .json(&SessionRequest::from_config(config))
            .timeout(self.connect_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: SessionResponse = response.json().await?;
        Ok(body.session_id)
    }
}

// ============================================================================
// Client
// ============================================================================

/// `AgentClient` backed by a remote agent host over HTTP
pub struct HttpAgentClient {
    transport: Transport,
}

impl HttpAgentClient {
    /// Create a client for the agent host at `base_url`
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> AssistantResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!("[HttpAgent] Using agent host at {}", base_url);

        Ok(Self {
            transport: Transport {
                base_url,
                api_key: None,
                connect_timeout: request_timeout,
                http: Arc::new(RwLock::new(build_http_client(request_timeout)?)),
            },
        })
    }

    /// Set the bearer token sent with every request
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.transport.api_key = api_key;
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.transport.base_url
    }

    fn session_handle(&self, session_id: String, config: &SessionConfig) -> Arc<dyn AgentSession> {
        Arc::new(HttpAgentSession {
            session_id,
            transport: self.transport.clone(),
            tools: config.tools.clone(),
        })
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn create_session(&self, config: &SessionConfig) -> AssistantResult<Arc<dyn AgentSession>> {
        let session_id = self.transport.open_session("/sessions", config).await?;
        tracing::info!(session_id = %session_id, "[HttpAgent] Created session");
        Ok(self.session_handle(session_id, config))
    }

    async fn resume_session(
        &self,
        session_id: &str,
        config: &SessionConfig,
    ) -> AssistantResult<Arc<dyn AgentSession>> {
        let path = format!("/sessions/{}/resume", session_id);
        let resumed_id = self.transport.open_session(&path, config).await?;
        tracing::info!(session_id = %resumed_id, "[HttpAgent] Resumed session");
        Ok(self.session_handle(resumed_id, config))
    }

    async fn delete_session(&self, session_id: &str) -> AssistantResult<()> {
        let path = format!("/sessions/{}", session_id);
        let response = self
            .transport
            .request(Method::DELETE, &path)
            .await
            .timeout(self.transport.connect_timeout)
            .send()
            .await?;

        match check_status(response).await {
            Ok(_) => Ok(()),
            Err(AssistantError::Api { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn connection_state(&self) -> ConnectionState {
        let result = self
            .transport
            .request(Method::GET, "/health")
            .await
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => ConnectionState::Connected,
            Ok(response) => {
                tracing::debug!("[HttpAgent] Health probe returned {}", response.status());
                ConnectionState::Unknown
            }
            Err(e) => {
                tracing::debug!("[HttpAgent] Health probe failed: {}", e);
                ConnectionState::Disconnected
            }
        }
    }

    async fn reset(&self) -> AssistantResult<()> {
        let fresh = build_http_client(self.transport.connect_timeout)?;
        *self.transport.http.write().await = fresh;
        tracing::info!("[HttpAgent] HTTP client recreated");
        Ok(())
    }
}

impl std::fmt::Debug for HttpAgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAgentClient")
            .field("base_url", &self.transport.base_url)
            .field("has_api_key", &self.transport.api_key.is_some())
            .finish()
    }
}

// ============================================================================
// Session
// ============================================================================

/// Handle on one remote session
pub struct HttpAgentSession {
    session_id: String,
    transport: Transport,
    tools: Arc<ToolRegistry>,
}

impl HttpAgentSession {
    async fn post_tool_result(&self, call_id: &str, result: &ToolResult) -> AssistantResult<()> {
        let path = format!("/sessions/{}/tool_results", self.session_id);
        let response = self
            .transport
            .request(Method::POST, &path)
            .await
            .json(&ToolResultRequest {
                call_id,
                output: &result.output,
                is_error: result.is_error,
            })
            .timeout(self.transport.connect_timeout)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl AgentSession for HttpAgentSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(
        &self,
        prompt: &str,
        turn: TurnContext,
        events: EventSender,
    ) -> AssistantResult<String> {
        let path = format!("/sessions/{}/turns", self.session_id);
        let response = self
            .transport
            .request(Method::POST, &path)
            .await
            .header("Accept", "text/event-stream")
            .header("X-Request-Id", uuid::Uuid::new_v4().to_string())
            .json(&TurnRequest {
                prompt,
                source: &turn.source,
            })
            .send()
            .await?;
        let response = check_status(response).await?;

        let stream = turn_event_stream(response);
        futures::pin_mut!(stream);

        let tool_ctx = ToolContext::new(turn.source.clone());
        let mut text = String::new();

        while let Some(event) = stream.next().await {
            match event? {
                TurnStreamEvent::Delta { text: delta } => {
                    text.push_str(&delta);
                    let _ = events.send(SessionEvent::Delta(delta));
                }
                TurnStreamEvent::ToolCall {
                    call_id,
                    name,
                    input,
                } => {
                    let _ = events.send(SessionEvent::ToolStarted {
                        id: call_id.clone(),
                        name: name.clone(),
                    });
                    let result = self.tools.execute_or_error(&name, &input, &tool_ctx).await;
                    self.post_tool_result(&call_id, &result).await?;
                    let _ = events.send(SessionEvent::ToolFinished {
                        id: call_id,
                        is_error: result.is_error,
                    });
                }
                TurnStreamEvent::Done { text: final_text } => {
                    return Ok(final_text.unwrap_or(text));
                }
                TurnStreamEvent::Error { message } => {
                    return Err(AssistantError::Other(message));
                }
            }
        }

        Err(AssistantError::ConnectionClosed(
            "turn stream ended before completion".to_string(),
        ))
    }

    async fn abort(&self) -> AssistantResult<()> {
        let path = format!("/sessions/{}/abort", self.session_id);
        let response = self
            .transport
            .request(Method::POST, &path)
            .await
            .timeout(self.transport.connect_timeout)
            .send()
            .await?;
        check_status(response).await?;
        tracing::debug!(session_id = %self.session_id, "[HttpAgent] Abort requested");
        Ok(())
    }

    async fn disconnect(&self) -> AssistantResult<()> {
        tracing::debug!(session_id = %self.session_id, "[HttpAgent] Disconnected");
        Ok(())
    }

    async fn destroy(&self) -> AssistantResult<()> {
        let path = format!("/sessions/{}", self.session_id);
        let response = self
            .transport
            .request(Method::DELETE, &path)
            .await
            .timeout(self.transport.connect_timeout)
            .send()
            .await?;

        match check_status(response).await {
            Ok(_) | Err(AssistantError::Api { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line(r#"data: {"type":"delta","text":"Hi"}"#),
            Some(TurnStreamEvent::Delta { text: "Hi".into() })
        );
        assert_eq!(
            parse_sse_line(r#"data:{"type":"done"}"#),
            Some(TurnStreamEvent::Done { text: None })
        );
        assert_eq!(
            parse_sse_line(r#"data: {"type":"error","message":"session expired"}"#),
            Some(TurnStreamEvent::Error {
                message: "session expired".into()
            })
        );
        assert!(matches!(
            parse_sse_line(
                r#"data: {"type":"tool_call","call_id":"c1","name":"list_workers"}"#
            ),
            Some(TurnStreamEvent::ToolCall { input: Value::Null, .. })
        ));
    }

    #[test]
    fn test_parse_sse_ignores_noise() {
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: message"), None);
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line("data: {not json"), None);
    }

    #[test]
    fn test_session_request_shape() {
        let config = SessionConfig::new("model-x").with_context_summary("recap");
        let value = serde_json::to_value(SessionRequest::from_config(&config)).unwrap();
        assert_eq!(value["model"], "model-x");
        assert_eq!(value["streaming"], true);
        assert_eq!(value["context_summary"], "recap");
        assert!(value.get("system_message").is_none());
        assert_eq!(value["tools"], json!([]));
    }

    /// Read one HTTP request (headers plus Content-Length body) from a socket
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serve canned responses, one connection each, recording request lines
    async fn serve(responses: Vec<(&'static str, String)>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (content_type, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                let _ = tx.send(request.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    content_type,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{}", addr), rx)
    }

    #[tokio::test]
    async fn test_create_and_stream_turn() {
        let sse = concat!(
            "data: {\"type\":\"delta\",\"text\":\"Hel\"}\n\n",
            ": keep-alive\n\n",
            "data: {\"type\":\"delta\",\"text\":\"lo\"}\n\n",
            "data: {\"type\":\"done\"}\n\n",
        );
        let (base_url, mut requests) = serve(vec![
            ("application/json", r#"{"session_id":"s-1"}"#.to_string()),
            ("text/event-stream", sse.to_string()),
        ])
        .await;

        let client = HttpAgentClient::new(base_url, Duration::from_secs(5)).unwrap();
        let session = client
            .create_session(&SessionConfig::new("model-x"))
            .await
            .unwrap();
        assert_eq!(session.session_id(), "s-1");

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let text = session
            .send("hello", TurnContext::new(Channel::Terminal), events_tx)
            .await
            .unwrap();
        assert_eq!(text, "Hello");

        assert_eq!(
            events_rx.recv().await,
            Some(SessionEvent::Delta("Hel".into()))
        );
        assert_eq!(events_rx.recv().await, Some(SessionEvent::Delta("lo".into())));

        assert_eq!(requests.recv().await.unwrap(), "POST /sessions HTTP/1.1");
        assert_eq!(
            requests.recv().await.unwrap(),
            "POST /sessions/s-1/turns HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_stream_error_event_is_classified() {
        let sse = "data: {\"type\":\"error\",\"message\":\"Session s-9 not found\"}\n\n";
        let (base_url, _requests) = serve(vec![
            ("application/json", r#"{"session_id":"s-9"}"#.to_string()),
            ("text/event-stream", sse.to_string()),
        ])
        .await;

        let client = HttpAgentClient::new(base_url, Duration::from_secs(5)).unwrap();
        let session = client
            .resume_session("s-9", &SessionConfig::new("model-x"))
            .await
            .unwrap();

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let err = session
            .send("hi", TurnContext::new(Channel::Terminal), events_tx)
            .await
            .unwrap_err();
        assert!(err.is_session_gone());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_transient() {
        let sse = "data: {\"type\":\"delta\",\"text\":\"partial\"}\n\n";
        let (base_url, _requests) = serve(vec![
            ("application/json", r#"{"session_id":"s-2"}"#.to_string()),
            ("text/event-stream", sse.to_string()),
        ])
        .await;

        let client = HttpAgentClient::new(base_url, Duration::from_secs(5)).unwrap();
        let session = client
            .create_session(&SessionConfig::new("model-x"))
            .await
            .unwrap();

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let err = session
            .send("hi", TurnContext::new(Channel::Terminal), events_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::ConnectionClosed(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_disconnected() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpAgentClient::new(format!("http://{}/", addr), Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), format!("http://{}", addr));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);

        let Err(err) = client.create_session(&SessionConfig::new("model-x")).await else {
            panic!("session creation should fail without a listener");
        };
        assert!(err.is_transient());

        client.reset().await.unwrap();
    }
}
