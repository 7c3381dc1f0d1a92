//! Activity log: a plain-text record of what the model did

use askdb_agent::{AgentEvent, events::Route};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Tracing target routed to the activity log file
pub const TARGET: &str = "askdb::activity";

const PREVIEW_CHARS: usize = 500;

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// The activity record for an event, if it gets one
pub fn describe(event: &AgentEvent) -> Option<String> {
    let line = match event {
        AgentEvent::AgentStart { question } => format!("QUESTION: {}", question),
        AgentEvent::ToolExecutionStart {
            tool_name,
            arguments,
            ..
        } => format!("TOOL_CALL: {} with args: {}", tool_name, arguments),
        AgentEvent::ToolExecutionEnd {
            tool_name, result, ..
        } => format!(
            "TOOL_RESULT: {} returned: {}",
            tool_name,
            truncate_chars(result, PREVIEW_CHARS)
        ),
        AgentEvent::TurnEnd { message, .. } => {
            let text = message.text();
            if text.is_empty() {
                return None;
            }
            format!("LLM_RESPONSE: {}", truncate_chars(&text, PREVIEW_CHARS))
        }
        AgentEvent::Decision { route } => {
            let route = match route {
                Route::CallTools => "call_tools",
                Route::Grade => "grade",
                Route::Terminate => "terminate",
            };
            format!("DECISION: {}", route)
        }
        AgentEvent::Graded { verdict } => format!(
            "GRADE: {} {} - {}",
            verdict.grader,
            if verdict.passed { "APPROVED" } else { "NEEDS_REVISION" },
            truncate_chars(&verdict.rationale, PREVIEW_CHARS)
        ),
        AgentEvent::RevisionRequested { retry_count, .. } => {
            format!("REVISION: attempt {}", retry_count)
        }
        AgentEvent::GradingExhausted { retry_count } => {
            format!("GRADING_EXHAUSTED: after {} revisions", retry_count)
        }
        AgentEvent::Error { message } => format!("ERROR: {}", message),
        _ => return None,
    };
    Some(line)
}

/// Log every describable event until the agent goes away
pub fn spawn(mut receiver: broadcast::Receiver<AgentEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        tracing::info!(target: TARGET, "{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Activity log skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
