//! Streaming event types and utilities

use crate::types::{AssistantMetadata, Content, Message, StopReason, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a completion streams in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Initial message structure
    Start { message: Message },
    /// Text content delta
    TextDelta { content_index: usize, delta: String },
    /// Tool call started
    ToolCallStart {
        content_index: usize,
        id: String,
        name: String,
    },
    /// Tool call arguments delta (partial JSON)
    ToolCallDelta { content_index: usize, delta: String },
    /// Message completed successfully
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred
    Error { message: String },
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Accumulates streaming deltas into a partial assistant message
#[derive(Debug, Default)]
pub struct MessageBuilder {
    buffers: Vec<ContentBuffer>,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

#[derive(Debug)]
enum ContentBuffer {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
}

impl MessageBuilder {
    /// Create a new message builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the message state
    pub fn process_event(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::TextDelta {
                content_index,
                delta,
            } => {
                if !matches!(self.buffers.get(*content_index), Some(ContentBuffer::Text(_))) {
                    self.ensure_buffer(*content_index, ContentBuffer::Text(String::new()));
                }
                if let Some(ContentBuffer::Text(text)) = self.buffers.get_mut(*content_index) {
                    text.push_str(delta);
                }
            }
            MessageEvent::ToolCallStart {
                content_index,
                id,
                name,
            } => {
                self.ensure_buffer(
                    *content_index,
                    ContentBuffer::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments_json: String::new(),
                    },
                );
            }
            MessageEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                if let Some(ContentBuffer::ToolCall { arguments_json, .. }) =
                    self.buffers.get_mut(*content_index)
                {
                    arguments_json.push_str(delta);
                }
            }
            MessageEvent::Done {
                stop_reason, usage, ..
            } => {
                self.stop_reason = Some(*stop_reason);
                self.usage = usage.clone();
            }
            _ => {}
        }
    }

    /// Build the final message
    pub fn build(self) -> Message {
        Message::Assistant {
            content: self.current_content(),
            metadata: AssistantMetadata {
                usage: self.usage,
                stop_reason: self.stop_reason,
                timestamp: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        }
    }

    /// Get the current partial message state
    pub fn current_content(&self) -> Vec<Content> {
        self.buffers
            .iter()
            .map(|buf| match buf {
                ContentBuffer::Text(text) => Content::Text { text: text.clone() },
                ContentBuffer::ToolCall {
                    id,
                    name,
                    arguments_json,
                } => Content::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    // Partial JSON does not parse until the call is complete
                    arguments: serde_json::from_str(arguments_json).unwrap_or_default(),
                },
            })
            .collect()
    }

    fn ensure_buffer(&mut self, index: usize, default: ContentBuffer) {
        while self.buffers.len() <= index {
            self.buffers.push(ContentBuffer::Text(String::new()));
        }
        self.buffers[index] = default;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates_text() {
        let mut builder = MessageBuilder::new();
        for delta in ["There ", "are ", "59."] {
            builder.process_event(&MessageEvent::TextDelta {
                content_index: 0,
                delta: delta.into(),
            });
        }
        assert_eq!(builder.build().text(), "There are 59.");
    }

    #[test]
    fn test_builder_tool_call_arguments() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::ToolCallStart {
            content_index: 0,
            id: "call_1".into(),
            name: "ExecuteQuery".into(),
        });
        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 0,
            delta: r#"{"sql_statement": "SELECT "#.into(),
        });

        // Incomplete arguments are visible as null until the JSON closes
        match &builder.current_content()[0] {
            Content::ToolCall { arguments, .. } => assert!(arguments.is_null()),
            other => panic!("expected tool call, got {:?}", other),
        }

        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 0,
            delta: r#"1"}"#.into(),
        });
        let msg = builder.build();
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2["sql_statement"], "SELECT 1");
    }
}
