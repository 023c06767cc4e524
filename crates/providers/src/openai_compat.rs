//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, LM Studio, and any endpoint
//! exposing `/chat/completions` in the OpenAI shape.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling
//! - Cancellation of in-flight requests

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use marginalia_config::AppConfig;
use marginalia_core::error::ProviderError;
use marginalia_core::message::{Message, MessageToolCall};
use marginalia_core::provider::*;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sse::{StreamDecoder, WireUsage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// An OpenAI-compatible chat-completion provider.
#[derive(Debug, Clone)]
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider with the default timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::with_timeout(name, base_url, api_key, DEFAULT_TIMEOUT)
    }

    /// Create a provider whose requests give up after `timeout`.
    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Build the provider described by the application config.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("no API key configured".into()))?;
        Self::with_timeout(
            config.provider_name.clone(),
            config.base_url.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
                tool_calls: (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Build the JSON request body. `tools` is omitted when there are none
    /// and `stream` is only present in streaming mode.
    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    /// POST the body and return the response once its status is known to be
    /// a success. Error statuses are turned into errors carrying the body.
    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        if stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            sent = builder.send() => sent.map_err(|e| ProviderError::Network(e.to_string()))?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            text = response.text() => text.map_err(|e| {
                ProviderError::Network(format!("reading {status} error body: {e}"))
            })?,
        };
        warn!(provider = %self.name, status = status.as_u16(), body = %error_body, "Provider returned error");

        Err(match status.as_u16() {
            429 => ProviderError::RateLimited(error_body),
            401 | 403 => ProviderError::AuthenticationFailed(error_body),
            code => ProviderError::ApiError {
                status_code: code,
                message: error_body,
            },
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, ProviderError> {
        let body = Self::request_body(&request, false);
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(&body, false, cancel).await?;
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            text = response.text() => text.map_err(|e| ProviderError::Network(e.to_string()))?,
        };

        let api_response: ApiResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(format!("{e}: {text}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(CompletionResult {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from)
                .unwrap_or_default(),
            usage: api_response.usage.map(Usage::from),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        sink: &mut DeltaSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, ProviderError> {
        let body = Self::request_body(&request, true);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body, true, cancel).await?;
        let mut byte_stream = response.bytes_stream();
        let mut decoder = StreamDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                next = byte_stream.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    decoder.push(&bytes, sink);
                    if decoder.is_done() {
                        break;
                    }
                }
                Some(Err(e)) => return Err(ProviderError::StreamInterrupted(e.to_string())),
                None => break,
            }
        }

        Ok(decoder.finish(sink))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(tools: Vec<ToolDefinition>) -> ProviderRequest {
        ProviderRequest {
            model: "gpt-test".into(),
            messages: vec![Message::system("be brief"), Message::user("2+2?")],
            temperature: 0.2,
            max_tokens: None,
            tools,
        }
    }

    fn calc_definition() -> ToolDefinition {
        ToolDefinition {
            name: "calc".into(),
            description: "Evaluate arithmetic".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    async fn provider_for(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test", format!("{}/v1/", server.uri()), "sk-test").unwrap()
    }

    async fn last_body(server: &MockServer) -> serde_json::Value {
        let requests = server.received_requests().await.unwrap();
        requests.last().unwrap().body_json().unwrap()
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url().contains("localhost:11434"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("x", "http://host/v1///", "k").unwrap();
        assert_eq!(provider.endpoint(), "http://host/v1/chat/completions");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![MessageToolCall {
                id: "call_1".into(),
                name: "calc".into(),
                arguments: r#"{"expr":"2+2"}"#.into(),
            }],
        );
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg, Message::user("hi")]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "calc");
        assert_eq!(tc[0].r#type, "function");
        assert!(api_msgs[1].tool_calls.is_none());
        assert!(api_msgs[1].tool_call_id.is_none());
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "4");
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn body_omits_tools_and_stream_when_absent() {
        let body = OpenAiCompatProvider::request_body(&request(vec![]), false);
        assert!(body.get("tools").is_none());
        assert!(body.get("stream").is_none());
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn streaming_body_shape() {
        let body = OpenAiCompatProvider::request_body(&request(vec![calc_definition()]), true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "calc");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn complete_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cmpl-1",
                "model": "gpt-test",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_9",
                            "type": "function",
                            "function": {"name": "calc", "arguments": "{\"expr\":\"2+2\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let result = provider
            .complete(request(vec![calc_definition()]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.content.is_none());
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.tool_calls[0].id, "call_9");
        assert_eq!(result.tool_calls[0].arguments, r#"{"expr":"2+2"}"#);
        assert_eq!(result.usage.unwrap().total_tokens, 8);
    }

    #[tokio::test]
    async fn error_status_surfaces_body_verbatim() {
        let server = MockServer::start().await;
        let body = r#"{"error":{"message":"model `nope` does not exist"}}"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string(body))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let mut deltas = 0;
        let mut sink = |_: &Delta| deltas += 1;
        let err = provider
            .stream(request(vec![]), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ProviderError::ApiError {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 404);
                assert_eq!(message, body);
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
        assert_eq!(deltas, 0);
    }

    #[tokio::test]
    async fn truncated_error_body_is_a_network_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Answers one request with a 500 whose body stops short of its length.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let provider =
            OpenAiCompatProvider::new("test", format!("http://{addr}/v1"), "sk-test").unwrap();
        let err = provider
            .complete(request(vec![]), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProviderError::Network(reason) => assert!(reason.contains("500"), "{reason}"),
            other => panic!("expected Network, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_failure_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let err = provider
            .complete(request(vec![]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(ref b) if b == "invalid key"));
    }

    #[tokio::test]
    async fn stream_decodes_sse_body() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"The answer\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" is 4\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let mut chunks = Vec::new();
        let mut sink = |d: &Delta| {
            if let Some(c) = &d.content {
                chunks.push(c.clone());
            }
        };
        let result = provider
            .stream(request(vec![]), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(chunks, ["The answer", " is 4"]);
        assert_eq!(result.content.as_deref(), Some("The answer is 4"));
        assert_eq!(result.finish_reason, FinishReason::Stop);

        let body = last_body(&server).await;
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: [DONE]\n", "text/event-stream")
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let mut sink = |_: &Delta| {};
        let err = provider
            .stream(request(vec![]), &mut sink, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn from_config_requires_key() {
        let config = AppConfig::default();
        let err = OpenAiCompatProvider::from_config(&config).unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
