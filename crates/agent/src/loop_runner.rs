//! The agent reasoning loop implementation.

use std::sync::Arc;

use marginalia_config::AppConfig;
use marginalia_core::message::{Message, MessageToolCall};
use marginalia_core::provider::{CompletionResult, Delta, Provider, ProviderRequest, Usage};
use marginalia_core::tool::ToolRegistry;
use marginalia_core::AgentConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::outcome::{AgentError, AgentOutcome, EXHAUSTED_MESSAGE};
use crate::stream_event::{AgentStreamEvent, EventSink};

/// The core agent loop that orchestrates model calls and tool execution.
///
/// One `AgentLoop` may serve any number of concurrent runs; each run owns
/// only the history it is given.
pub struct AgentLoop {
    /// The chat-completion backend
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Tool registry, fully populated before the first run
    tools: Arc<ToolRegistry>,

    /// Iteration ceiling, system prompt and temperature
    config: AgentConfig,

    /// Optional max tokens per model turn
    max_tokens: Option<u32>,

    /// Stream each turn instead of waiting for the complete response
    streaming: bool,
}

impl AgentLoop {
    /// Create a new agent loop. Fails if `config` is invalid.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> marginalia_core::Result<Self> {
        config.validate()?;
        Ok(Self {
            provider,
            model: model.into(),
            tools,
            config,
            max_tokens: None,
            streaming: true,
        })
    }

    /// Create an agent loop from the application config.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        app: &AppConfig,
    ) -> marginalia_core::Result<Self> {
        let agent = Self::new(provider, &app.model, tools, app.agent_config())?
            .with_streaming(app.agent.stream);
        Ok(match app.max_tokens {
            Some(max) => agent.with_max_tokens(max),
            None => agent,
        })
    }

    /// Set the max tokens per model turn.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Choose between streaming and single-response requests.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Drive the conversation in `history` until the model answers without
    /// requesting tools, the iteration ceiling is hit, or `cancel` fires.
    ///
    /// `history` starts as the caller's messages. The loop prefixes it with
    /// the configured system message, then appends one assistant
    /// message per tool round (carrying the tool-call manifest) followed by
    /// one tool message per call, in request order. The final answer is
    /// returned, not appended.
    pub async fn run(
        &self,
        history: &mut Vec<Message>,
        events: &mut EventSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        info!(
            model = %self.model,
            messages = history.len(),
            tools = self.tools.len(),
            "Starting agent run"
        );

        history.insert(0, Message::system(&self.config.system_prompt));

        let tool_definitions = self.tools.to_schemas();
        let mut round_texts: Vec<String> = Vec::new();
        let mut tool_calls_made = 0usize;
        let mut usage: Option<Usage> = None;

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            debug!(iteration, history = history.len(), "Agent loop iteration");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: history.clone(),
                temperature: self.config.temperature,
                max_tokens: self.max_tokens,
                tools: tool_definitions.clone(),
            };

            let result = self.call_model(request, events, cancel).await?;
            usage = add_usage(usage, result.usage);

            if !result.has_tool_calls() {
                events(AgentStreamEvent::Done {
                    usage,
                    iterations: iteration,
                    tool_calls_made,
                    exhausted: false,
                });
                return Ok(AgentOutcome::Completed {
                    text: result.content.unwrap_or_default(),
                    iterations: iteration,
                    tool_calls_made,
                });
            }

            debug!(tool_count = result.tool_calls.len(), "Executing tool calls");

            let CompletionResult {
                content,
                tool_calls,
                ..
            } = result;
            let text = content.unwrap_or_default();
            if !text.trim().is_empty() {
                round_texts.push(text.clone());
            }
            history.push(Message::assistant_with_tool_calls(text, tool_calls.clone()));

            // Sequential: later calls may depend on earlier ones, and the
            // model expects results in the order it asked for them.
            for call in &tool_calls {
                if cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }

                let arguments = parse_arguments(call);
                events(AgentStreamEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: arguments.clone(),
                });

                let output = self.tools.execute(&call.name, arguments).await;
                tool_calls_made += 1;

                events(AgentStreamEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output: output.clone(),
                });
                history.push(Message::tool_result(&call.id, output));
            }

            // Loop back; the model will see the tool results and decide what to do next
        }

        let iterations = self.config.max_iterations;
        warn!(
            iterations,
            tool_calls_made, "Max tool iterations reached without a final answer"
        );

        events(AgentStreamEvent::Done {
            usage,
            iterations,
            tool_calls_made,
            exhausted: true,
        });

        let partial = if round_texts.is_empty() {
            EXHAUSTED_MESSAGE.to_string()
        } else {
            round_texts.join("\n\n")
        };

        Ok(AgentOutcome::IterationExhausted {
            partial,
            iterations,
            tool_calls_made,
        })
    }

    /// One round-trip to the model, forwarding live output to `events`.
    async fn call_model(
        &self,
        request: ProviderRequest,
        events: &mut EventSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, AgentError> {
        if !self.streaming {
            let result = self.provider.complete(request, cancel).await?;
            if let Some(content) = result.content.as_ref().filter(|c| !c.is_empty()) {
                events(AgentStreamEvent::Chunk {
                    content: content.clone(),
                });
            }
            return Ok(result);
        }

        let mut sink = |delta: &Delta| forward_delta(delta, &mut *events);
        Ok(self.provider.stream(request, &mut sink, cancel).await?)
    }
}

/// Translate a provider delta into the events a front end cares about.
fn forward_delta(delta: &Delta, events: &mut EventSink<'_>) {
    if let Some(content) = &delta.content {
        events(AgentStreamEvent::Chunk {
            content: content.clone(),
        });
    }
    for entry in delta.tool_calls.iter().flatten() {
        let name = entry.function.as_ref().and_then(|f| f.name.as_deref());
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            events(AgentStreamEvent::ToolCallPending {
                index: entry.index,
                name: name.to_string(),
            });
        }
    }
}

/// Parse a tool call's argument string into the object handed to the tool.
///
/// Anything that is not a JSON object becomes `{}`; a bad argument string
/// must not end the run.
fn parse_arguments(call: &MessageToolCall) -> serde_json::Value {
    let empty = || serde_json::Value::Object(serde_json::Map::new());

    if call.arguments.trim().is_empty() {
        return empty();
    }

    match serde_json::from_str::<serde_json::Value>(&call.arguments) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(_) => {
            warn!(tool = %call.name, call_id = %call.id, "Tool arguments are not an object, using {{}}");
            empty()
        }
        Err(e) => {
            warn!(
                tool = %call.name,
                call_id = %call.id,
                error = %e,
                "Malformed tool arguments, using {{}}"
            );
            empty()
        }
    }
}

fn add_usage(total: Option<Usage>, turn: Option<Usage>) -> Option<Usage> {
    match (total, turn) {
        (Some(a), Some(b)) => Some(Usage {
            prompt_tokens: a.prompt_tokens.saturating_add(b.prompt_tokens),
            completion_tokens: a.completion_tokens.saturating_add(b.completion_tokens),
            total_tokens: a.total_tokens.saturating_add(b.total_tokens),
        }),
        (a, b) => a.or(b),
    }
}
