//! Transport abstraction for model calls

use std::{pin::Pin, sync::Arc, time::Duration};

use askdb_ai::{
    Context, Message, Model, ResponseFormat, Result, StreamOptions, ToolSchema,
    providers::{LlmProvider, openai::OpenAIProvider},
    stream::{MessageBuilder, MessageEvent},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::events::AgentEvent;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Check if an error message describes a transient failure
fn is_retryable_error(error: &str) -> bool {
    // Rate limit errors
    if error.contains("429") || error.contains("rate limit") || error.contains("Rate limit") {
        return true;
    }
    // Transient network errors
    if error.contains("timeout") || error.contains("Timeout") {
        return true;
    }
    if error.contains("connection") || error.contains("Connection") {
        return true;
    }
    // Server errors (5xx)
    if error.contains("500")
        || error.contains("502")
        || error.contains("503")
        || error.contains("504")
    {
        return true;
    }
    error.contains("overloaded") || error.contains("Overloaded")
}

/// Configuration for a single model call
#[derive(Debug, Clone)]
pub struct AgentRunConfig {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Available tools (as API definitions)
    pub tools: Vec<ToolSchema>,
    /// Model to use
    pub model: Model,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Temperature
    pub temperature: Option<f32>,
    /// Structured output contract
    pub response_format: Option<ResponseFormat>,
}

impl AgentRunConfig {
    /// A config for `model` with no prompt, tools or overrides
    pub fn for_model(model: Model) -> Self {
        Self {
            system_prompt: None,
            tools: vec![],
            model,
            max_tokens: None,
            temperature: None,
            response_format: None,
        }
    }
}

/// A stream of agent events
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Model invocation interface used by the agent and the graders
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one model call over `messages`, streaming events.
    ///
    /// The stream ends with `TurnEnd` on success or `Error` on failure.
    async fn run(
        &self,
        messages: Vec<Message>,
        config: &AgentRunConfig,
        cancel: CancellationToken,
    ) -> Result<AgentEventStream>;
}

/// Direct provider transport - calls the LLM API with retries
pub struct ProviderTransport {
    provider: Arc<dyn LlmProvider>,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    /// Create a transport for an OpenAI-compatible endpoint
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_provider(Arc::new(OpenAIProvider::new(api_key)))
    }

    /// Create a transport over any provider
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn run(
        &self,
        messages: Vec<Message>,
        config: &AgentRunConfig,
        cancel: CancellationToken,
    ) -> Result<AgentEventStream> {
        let context = Context {
            system_prompt: config.system_prompt.clone(),
            messages,
            tools: config.tools.clone(),
        };
        let options = StreamOptions {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            response_format: config.response_format.clone(),
        };

        let model = config.model.clone();
        let provider = self.provider.clone();
        let retry_config = self.retry_config.clone();

        let event_stream: AgentEventStream = Box::pin(stream! {
            yield AgentEvent::TurnStart { turn_number: 1 };

            let mut attempt = 0u32;
            let message_stream;

            loop {
                if cancel.is_cancelled() {
                    yield AgentEvent::Error { message: "Cancelled".to_string() };
                    return;
                }

                match provider.stream(&model, &context, &options).await {
                    Ok(s) => {
                        message_stream = s;
                        break;
                    }
                    Err(e) => {
                        // Typed check first, string fallback for wrapped errors
                        let error_msg = e.to_string();
                        let retryable = e.is_retryable() || is_retryable_error(&error_msg);

                        if attempt < retry_config.max_retries && retryable {
                            let delay = retry_config.delay_for_attempt(attempt);
                            tracing::warn!(
                                "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                                attempt + 1,
                                retry_config.max_retries + 1,
                                error_msg,
                                delay
                            );
                            attempt += 1;
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }

                        yield AgentEvent::Error { message: error_msg };
                        return;
                    }
                }
            }

            let mut message_stream = message_stream;
            let mut builder = MessageBuilder::new();
            let mut final_message = None;
            let mut final_usage = askdb_ai::Usage::default();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => None,
                    event = message_stream.next() => Some(event),
                };
                let Some(next) = next else {
                    yield AgentEvent::Error { message: "Cancelled".to_string() };
                    return;
                };
                let Some(event) = next else {
                    break;
                };

                builder.process_event(&event);

                match &event {
                    MessageEvent::Start { message } => {
                        yield AgentEvent::MessageStart { message: message.clone() };
                    }
                    MessageEvent::TextDelta { .. } | MessageEvent::ToolCallDelta { .. } => {
                        let partial = Message::assistant(builder.current_content());
                        yield AgentEvent::MessageUpdate { message: partial };
                    }
                    MessageEvent::Done { message, usage, .. } => {
                        final_message = Some(message.clone());
                        final_usage = usage.clone();
                        yield AgentEvent::MessageEnd { message: message.clone() };
                    }
                    MessageEvent::Error { message } => {
                        yield AgentEvent::Error { message: message.clone() };
                        return;
                    }
                    MessageEvent::ToolCallStart { .. } => {}
                }
            }

            match final_message {
                Some(msg) => {
                    yield AgentEvent::TurnEnd {
                        turn_number: 1,
                        message: msg,
                        usage: final_usage,
                    };
                }
                None => {
                    yield AgentEvent::Error {
                        message: "Model stream ended without a complete message".to_string(),
                    };
                }
            }
        });

        Ok(event_stream)
    }
}
