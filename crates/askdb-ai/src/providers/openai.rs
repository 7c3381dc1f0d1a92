//! OpenAI-compatible Chat Completions provider
//!
//! Works against any endpoint that speaks the `/chat/completions` streaming
//! protocol (OpenAI, Mistral, Ollama, vLLM, ...).

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::LlmProvider;
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{
        AssistantMetadata, Content, Context, Message, Model, ResponseFormat, StopReason,
        StreamOptions, Usage,
    },
};

/// Client for an OpenAI-compatible endpoint
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAIProvider {
    /// Create a new provider with an API key (empty for keyless local servers)
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    fn headers(&self, model: &Model) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if !self.api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| Error::InvalidApiKey)?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        for (key, value) in &model.headers {
            match (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => tracing::warn!("Skipping invalid model header '{}'", key),
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        if model.base_url.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "model '{}' has no base URL",
                model.id
            )));
        }

        let request = build_request(model, context, options);
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));
        let request_builder = self
            .client
            .post(&url)
            .headers(self.headers(model)?)
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

fn build_request(model: &Model, context: &Context, options: &StreamOptions) -> OpenAIRequest {
    let mut messages = Vec::new();

    if let Some(ref system_prompt) = context.system_prompt {
        messages.push(OpenAIMessage::text("system", system_prompt.clone()));
    }

    for msg in &context.messages {
        messages.push(convert_message(msg));
    }

    let tools = if context.tools.is_empty() {
        None
    } else {
        Some(
            context
                .tools
                .iter()
                .map(|t| OpenAITool {
                    tool_type: "function".to_string(),
                    function: OpenAIFunction {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                    },
                })
                .collect(),
        )
    };

    let has_tools = tools.is_some();
    OpenAIRequest {
        model: model.id.clone(),
        messages,
        stream: true,
        stream_options: Some(serde_json::json!({ "include_usage": true })),
        max_tokens: Some(options.max_tokens.unwrap_or(model.max_tokens)),
        temperature: options.temperature,
        tools,
        tool_choice: has_tools.then(|| serde_json::json!("auto")),
        response_format: options.response_format.as_ref().map(json_schema_format),
    }
}

fn json_schema_format(format: &ResponseFormat) -> serde_json::Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": format.name,
            "schema": format.schema,
            "strict": true,
        }
    })
}

fn convert_message(msg: &Message) -> OpenAIMessage {
    match msg {
        Message::System { content } => OpenAIMessage::text("system", content.clone()),
        Message::User { content, .. } => {
            let has_images = content.iter().any(|c| matches!(c, Content::Image { .. }));
            if !has_images {
                return OpenAIMessage::text("user", msg.text());
            }

            let parts = content
                .iter()
                .filter_map(|c| match c {
                    Content::Text { text } => Some(ContentPart::Text { text: text.clone() }),
                    Content::Image { url } => Some(ContentPart::ImageUrl {
                        image_url: ImageUrl { url: url.clone() },
                    }),
                    Content::ToolCall { .. } => None,
                })
                .collect();

            OpenAIMessage {
                role: "user".to_string(),
                content: Some(MessageContent::Parts(parts)),
                tool_calls: None,
                tool_call_id: None,
            }
        }
        Message::Assistant { content, .. } => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for c in content {
                match c {
                    Content::Text { text } => text_parts.push(text.clone()),
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => {
                        tool_calls.push(OpenAIToolCall {
                            id: id.clone(),
                            call_type: "function".to_string(),
                            function: OpenAIFunctionCall {
                                name: name.clone(),
                                arguments: arguments.to_string(),
                            },
                        });
                    }
                    Content::Image { .. } => {}
                }
            }

            OpenAIMessage {
                role: "assistant".to_string(),
                content: (!text_parts.is_empty())
                    .then(|| MessageContent::Text(text_parts.join(""))),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Message::ToolResult {
            tool_call_id,
            content,
            ..
        } => OpenAIMessage {
            role: "tool".to_string(),
            content: Some(MessageContent::Text(content.clone())),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut tool_calls: Vec<(String, String, String)> = Vec::new(); // (id, name, args)
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        let start_message = Message::Assistant {
            content: vec![],
            metadata: AssistantMetadata {
                model: Some(model.id.clone()),
                ..Default::default()
            },
        };
        yield MessageEvent::Start { message: start_message };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let chunk: StreamChunk = match serde_json::from_str(&msg.data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            event_source.close();
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    };

                    for choice in &chunk.choices {
                        if let Some(ref content) = choice.delta.content {
                            if !content.is_empty() {
                                accumulated_text.push_str(content);
                                yield MessageEvent::TextDelta {
                                    content_index: 0,
                                    delta: content.clone(),
                                };
                            }
                        }

                        if let Some(ref tcs) = choice.delta.tool_calls {
                            for tc in tcs {
                                let idx = tc.index as usize;
                                while tool_calls.len() <= idx {
                                    tool_calls.push((String::new(), String::new(), String::new()));
                                }

                                if let Some(ref id) = tc.id {
                                    tool_calls[idx].0 = id.clone();
                                }
                                let Some(ref function) = tc.function else {
                                    continue;
                                };
                                if let Some(ref name) = function.name {
                                    tool_calls[idx].1 = name.clone();
                                    // Text occupies slot 0, tool calls follow it
                                    yield MessageEvent::ToolCallStart {
                                        content_index: idx + 1,
                                        id: tool_calls[idx].0.clone(),
                                        name: name.clone(),
                                    };
                                }
                                if let Some(ref args) = function.arguments {
                                    tool_calls[idx].2.push_str(args);
                                    yield MessageEvent::ToolCallDelta {
                                        content_index: idx + 1,
                                        delta: args.clone(),
                                    };
                                }
                            }
                        }

                        if let Some(ref reason) = choice.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(ref stream_usage) = chunk.usage {
                        usage.input = stream_usage.prompt_tokens;
                        usage.output = stream_usage.completion_tokens;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let body = response.text().await.unwrap_or_default();
                    yield MessageEvent::Error {
                        message: format!("HTTP {}: {}", status.as_u16(), body),
                    };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }
        event_source.close();

        let mut content = Vec::new();
        if !accumulated_text.is_empty() {
            content.push(Content::Text {
                text: accumulated_text,
            });
        }

        for (id, name, args) in tool_calls {
            if !name.is_empty() {
                // Some local servers omit call ids; correlation still needs one
                let id = if id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    id
                };
                let arguments = if args.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&args).unwrap_or(serde_json::json!({}))
                };
                content.push(Content::ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
        }

        let stop_reason = match finish_reason.as_deref() {
            Some("length") => StopReason::Length,
            Some("tool_calls") => StopReason::ToolUse,
            _ if content.iter().any(Content::is_tool_call) => StopReason::ToolUse,
            _ => StopReason::Stop,
        };

        let final_message = Message::Assistant {
            content,
            metadata: AssistantMetadata {
                model: Some(model.id.clone()),
                usage: usage.clone(),
                stop_reason: Some(stop_reason),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        };

        yield MessageEvent::Done {
            message: final_message,
            stop_reason,
            usage,
        };
    }
}

// Request types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAIMessage {
    fn text(role: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Text(text)),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: i32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolSchema;

    fn model() -> Model {
        Model::new("mistral-small-latest", "https://api.mistral.ai/v1")
    }

    #[test]
    fn test_request_includes_system_and_tools() {
        let mut context = Context::with_system("be brief");
        context.push(Message::user("How many customers?"));
        context.tools.push(ToolSchema::new(
            "ListTablesTool",
            "List tables",
            serde_json::json!({"type": "object", "properties": {}}),
        ));

        let request = build_request(&model(), &context, &StreamOptions::default());
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "be brief");
        assert_eq!(json["messages"][1]["content"], "How many customers?");
        assert_eq!(json["tools"][0]["function"]["name"], "ListTablesTool");
        assert_eq!(json["tool_choice"], "auto");
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_request_response_format_and_temperature() {
        let context = Context::default();
        let options = StreamOptions {
            temperature: Some(0.1),
            response_format: Some(ResponseFormat {
                name: "verdict".into(),
                schema: serde_json::json!({"type": "object"}),
            }),
            ..Default::default()
        };

        let json = serde_json::to_value(build_request(&model(), &context, &options)).unwrap();
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["name"], "verdict");
        assert!((json["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_convert_assistant_tool_calls_and_results() {
        let assistant = Message::assistant(vec![Content::tool_call(
            "call_1",
            "ExecuteQuery",
            serde_json::json!({"sql_statement": "SELECT 1"}),
        )]);
        let json = serde_json::to_value(convert_message(&assistant)).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("content").is_none());
        assert_eq!(json["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            json["tool_calls"][0]["function"]["arguments"],
            r#"{"sql_statement":"SELECT 1"}"#
        );

        let result = Message::tool_result("call_1", "ExecuteQuery", "[[1]]", false);
        let json = serde_json::to_value(convert_message(&result)).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["content"], "[[1]]");
    }

    #[test]
    fn test_convert_user_with_image_uses_parts() {
        let msg = Message::user_with_content(vec![
            Content::text("what is this chart?"),
            Content::image("https://example.com/chart.png"),
        ]);
        let json = serde_json::to_value(convert_message(&msg)).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "https://example.com/chart.png"
        );
    }

    #[tokio::test]
    async fn test_stream_rejects_missing_base_url() {
        let provider = OpenAIProvider::new("");
        let model = Model::new("local", "");
        let result = provider
            .stream(&model, &Context::default(), &StreamOptions::default())
            .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
