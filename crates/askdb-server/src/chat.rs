//! Inbound chat wire format and outbound SSE frames

use askdb_agent::RunOptions;
use askdb_ai::{Content, Message};
use serde::{Deserialize, Serialize};

/// Sent when a run finishes without any answer text
pub const NO_RESPONSE: &str = "No response was generated. Please try again.";

/// Body of `POST /api/chat`
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Extra instructions for this conversation
    #[serde(default)]
    pub system: Option<String>,
    /// Tools declared by the frontend. Accepted, never executed.
    #[serde(default)]
    pub tools: Vec<FrontendTool>,
    pub messages: Vec<WireMessage>,
}

impl ChatRequest {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            system_prompt: self.system.clone(),
            show_query: None,
        }
    }
}

/// A tool the frontend renders itself; only its name is kept
#[derive(Debug, Deserialize)]
pub struct FrontendTool {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum WireMessage {
    System { content: String },
    User { content: Vec<UserPart> },
    Assistant { content: Vec<AssistantPart> },
    Tool { content: Vec<ToolResultPart> },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UserPart {
    Text {
        text: String,
    },
    Image {
        image: String,
    },
    File {
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AssistantPart {
    Text {
        text: String,
    },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
pub struct ToolResultPart {
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(rename = "isError", default)]
    pub is_error: Option<bool>,
}

/// Flatten wire messages into the agent's message model.
///
/// Assistant text parts are joined with a space, each tool result becomes
/// its own message, and file parts are dropped.
pub fn to_messages(wire: Vec<WireMessage>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(wire.len());
    for msg in wire {
        match msg {
            WireMessage::System { content } => messages.push(Message::system(content)),
            WireMessage::User { content } => {
                let content = content
                    .into_iter()
                    .filter_map(|part| match part {
                        UserPart::Text { text } => Some(Content::text(text)),
                        UserPart::Image { image } => Some(Content::image(image)),
                        UserPart::File { mime_type, .. } => {
                            tracing::debug!("Dropping {} file part", mime_type);
                            None
                        }
                    })
                    .collect();
                messages.push(Message::user_with_content(content));
            }
            WireMessage::Assistant { content } => {
                let mut texts = vec![];
                let mut calls = vec![];
                for part in content {
                    match part {
                        AssistantPart::Text { text } => texts.push(text),
                        AssistantPart::ToolCall {
                            tool_call_id,
                            tool_name,
                            args,
                        } => calls.push(Content::tool_call(tool_call_id, tool_name, args)),
                    }
                }

                let text = texts.join(" ");
                let mut blocks = Vec::with_capacity(calls.len() + 1);
                if !text.is_empty() {
                    blocks.push(Content::text(text));
                }
                blocks.extend(calls);
                messages.push(Message::assistant(blocks));
            }
            WireMessage::Tool { content } => {
                for part in content {
                    let result = match part.result {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    messages.push(Message::tool_result(
                        part.tool_call_id,
                        part.tool_name,
                        result,
                        part.is_error.unwrap_or(false),
                    ));
                }
            }
        }
    }
    messages
}

/// One SSE `data:` payload
#[derive(Debug, Serialize)]
pub struct TextDelta<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "textDelta")]
    text_delta: &'a str,
}

impl<'a> TextDelta<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            kind: "text-delta",
            text_delta: text,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Split an answer into word deltas, each but the last keeping one
/// trailing space. An empty answer becomes a single [`NO_RESPONSE`] delta.
pub fn answer_deltas(answer: &str) -> Vec<String> {
    let words: Vec<&str> = answer.split_whitespace().collect();
    if words.is_empty() {
        return vec![NO_RESPONSE.to_string()];
    }
    let last = words.len() - 1;
    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            if i < last {
                format!("{} ", word)
            } else {
                word.to_string()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: serde_json::Value) -> ChatRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_full_request_converts() {
        let request = parse(serde_json::json!({
            "system": "Be brief.",
            "tools": [{ "name": "showChart", "parameters": {} }],
            "messages": [
                { "role": "system", "content": "You are helpful." },
                { "role": "user", "content": [
                    { "type": "text", "text": "Top artists?" },
                    { "type": "image", "image": "https://example.com/a.png", "mimeType": "image/png" },
                    { "type": "file", "data": "aGVsbG8=", "mimeType": "text/plain" }
                ]},
                { "role": "assistant", "content": [
                    { "type": "text", "text": "Let me" },
                    { "type": "text", "text": "check." },
                    { "type": "tool-call", "toolCallId": "c1", "toolName": "showChart", "args": { "kind": "bar" } }
                ]},
                { "role": "tool", "content": [
                    { "type": "tool-result", "toolCallId": "c1", "toolName": "showChart", "result": "shown" },
                    { "type": "tool-result", "toolCallId": "c2", "toolName": "showChart", "result": { "ok": false }, "isError": true }
                ]}
            ]
        }));
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.run_options().system_prompt.as_deref(), Some("Be brief."));

        let messages = to_messages(request.messages);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role(), "system");

        match &messages[1] {
            Message::User { content, .. } => assert_eq!(content.len(), 2),
            other => panic!("expected user message, got {:?}", other),
        }
        assert_eq!(messages[1].text(), "Top artists?");

        assert_eq!(messages[2].text(), "Let me check.");
        let calls = messages[2].tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "c1");

        match &messages[4] {
            Message::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => {
                assert_eq!(tool_call_id, "c2");
                assert_eq!(content, r#"{"ok":false}"#);
                assert!(*is_error);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
        assert_eq!(messages[3].text(), "shown");
    }

    #[test]
    fn test_minimal_request() {
        let request = parse(serde_json::json!({
            "messages": [{ "role": "user", "content": [{ "type": "text", "text": "hi" }] }]
        }));
        assert!(request.system.is_none());
        assert!(request.tools.is_empty());
        assert_eq!(to_messages(request.messages)[0].text(), "hi");
    }

    #[test]
    fn test_answer_deltas() {
        assert_eq!(
            answer_deltas("There are  3\ncustomers."),
            vec!["There ", "are ", "3 ", "customers."]
        );
        assert_eq!(answer_deltas("   "), vec![NO_RESPONSE]);
    }

    #[test]
    fn test_text_delta_json() {
        assert_eq!(
            TextDelta::new("hi ").to_json(),
            r#"{"type":"text-delta","textDelta":"hi "}"#
        );
    }
}
