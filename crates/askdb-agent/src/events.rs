//! Agent event types

use askdb_ai::{Message, Usage};
use serde::{Deserialize, Serialize};

use crate::grader::GradeVerdict;

/// Where the loop goes after a decide step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    CallTools,
    Grade,
    Terminate,
}

/// Events emitted during agent execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Agent started processing a question
    AgentStart { question: String },

    /// A new model call started
    TurnStart { turn_number: u32 },

    /// Message streaming started
    MessageStart { message: Message },

    /// Message content updated during streaming
    MessageUpdate { message: Message },

    /// Message completed
    MessageEnd { message: Message },

    /// A model call completed
    TurnEnd {
        turn_number: u32,
        message: Message,
        usage: Usage,
    },

    /// The loop picked its next stage
    Decision { route: Route },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// A grader returned a verdict
    Graded { verdict: GradeVerdict },

    /// Grading failed and the model gets another attempt
    RevisionRequested { retry_count: u32, feedback: String },

    /// Grading failed with no retries left
    GradingExhausted { retry_count: u32 },

    /// Agent finished processing
    AgentEnd {
        total_turns: u32,
        total_usage: Usage,
    },

    /// Error occurred
    Error { message: String },
}
