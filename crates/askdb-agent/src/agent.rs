//! The agent loop
//!
//! A run walks an explicit [`Step`] machine over a fresh
//! [`ConversationState`]:
//!
//! ```text
//! ExtractQuestion -> Decide -> CallTools -> Decide -> ...
//!                           -> Grade -> Decide (with feedback) | Terminate
//!                           -> Terminate
//! ```
//!
//! Every step returns a [`StatePatch`] plus the next step; the patch is the
//! only way state changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use askdb_ai::{Message, Model, Usage};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    error::{Error, Result},
    events::{AgentEvent, Route},
    grader::{BoxedGrader, GradeInput},
    guard::SqlGuard,
    prompt::{SYSTEM_PROMPT, compose_system_prompt, revision_instruction},
    state::{ConversationState, StatePatch},
    tool::{BoxedTool, ToolResult, to_api_tool},
    tools::{sql_tools, table_names},
    transport::{AgentRunConfig, Transport},
};

/// Default cap on model calls per run
pub const DEFAULT_MAX_TURNS: u32 = 25;

/// Default number of failed grading cycles before giving up
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Grading stage configuration
#[derive(Debug, Clone)]
pub struct GradingConfig {
    pub enabled: bool,
    pub max_retries: u32,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base system prompt
    pub system_prompt: String,
    /// Model used for decide steps
    pub model: Model,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub grading: GradingConfig,
    /// Model calls allowed per run
    pub max_turns: u32,
    /// Append the executed SQL to the formatted response
    pub show_query: bool,
}

impl AgentConfig {
    /// Defaults around `model`
    pub fn new(model: Model) -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            model,
            max_tokens: None,
            temperature: None,
            grading: GradingConfig::default(),
            max_turns: DEFAULT_MAX_TURNS,
            show_query: false,
        }
    }
}

/// Per-run overrides
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Extra instructions appended to the base system prompt
    pub system_prompt: Option<String>,
    /// Overrides [`AgentConfig::show_query`]
    pub show_query: Option<bool>,
}

/// A tool call lifted out of an assistant message
#[derive(Debug, Clone)]
struct PendingCall {
    id: String,
    name: String,
    arguments: serde_json::Value,
}

/// Loop stages
#[derive(Debug)]
enum Step {
    ExtractQuestion,
    Decide,
    CallTools(Vec<PendingCall>),
    Grade,
    Terminate,
}

/// The agent: injected collaborators plus configuration.
///
/// Holds no per-run state, so one `Arc<Agent>` can serve concurrent runs.
pub struct Agent {
    config: AgentConfig,
    tools: Vec<BoxedTool>,
    graders: Vec<BoxedGrader>,
    db: Option<Arc<dyn Database>>,
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<AgentEvent>,
    /// Cached compiled JSON schema validators keyed by tool name
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl Agent {
    /// Create a new agent
    pub fn new(config: AgentConfig, transport: Arc<dyn Transport>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            tools: vec![],
            graders: vec![],
            db: None,
            transport,
            event_tx,
            schema_cache: HashMap::new(),
        }
    }

    /// Attach a database and install the SQL tool set over it
    pub fn with_database(mut self, db: Arc<dyn Database>, guard: SqlGuard) -> Self {
        self.set_tools(sql_tools(db.clone(), guard));
        self.db = Some(db);
        self
    }

    /// Set the graders, run in the given order
    pub fn with_graders(mut self, graders: Vec<BoxedGrader>) -> Self {
        self.graders = graders;
        self
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Get the agent config
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Set tools (replaces existing)
    pub fn set_tools(&mut self, tools: Vec<BoxedTool>) {
        self.schema_cache.clear();
        for tool in &tools {
            self.cache_tool_schema(tool);
        }
        self.tools = tools;
    }

    /// Compile and cache the JSON schema validator for a tool.
    fn cache_tool_schema(&mut self, tool: &BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
    }

    /// Answer the conversation in `messages`.
    ///
    /// Returns the terminal state; the answer is in
    /// `final_approved_response` and `formatted_response`.
    pub async fn run(
        &self,
        messages: Vec<Message>,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> Result<ConversationState> {
        let mut state = ConversationState::new(messages);
        let result = self.drive(&mut state, options, &cancel).await;

        match &result {
            Ok(()) => {
                let _ = self.event_tx.send(AgentEvent::AgentEnd {
                    total_turns: state.turns,
                    total_usage: state.usage.clone(),
                });
            }
            Err(e) => {
                let _ = self.event_tx.send(AgentEvent::Error {
                    message: e.to_string(),
                });
            }
        }

        result.map(|()| state)
    }

    async fn drive(
        &self,
        state: &mut ConversationState,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let run_config = self.build_run_config(options);
        let show_query = options.show_query.unwrap_or(self.config.show_query);
        let mut step = Step::ExtractQuestion;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let (patch, next) = match step {
                Step::ExtractQuestion => self.extract_question(state),
                Step::Decide => self.decide(state, &run_config, cancel).await?,
                Step::CallTools(calls) => self.call_tools(calls, cancel).await?,
                Step::Grade => self.grade(state, cancel).await?,
                Step::Terminate => {
                    let patch = self.terminate(state, show_query);
                    state.apply(patch);
                    return Ok(());
                }
            };
            state.apply(patch);
            step = next;
        }
    }

    /// Build the decide-step config for one run.
    fn build_run_config(&self, options: &RunOptions) -> AgentRunConfig {
        AgentRunConfig {
            system_prompt: Some(compose_system_prompt(
                &self.config.system_prompt,
                options.system_prompt.as_deref(),
            )),
            tools: self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            ..AgentRunConfig::for_model(self.config.model.clone())
        }
    }

    fn extract_question(&self, state: &ConversationState) -> (StatePatch, Step) {
        if state.messages.is_empty() {
            return (StatePatch::default(), Step::Terminate);
        }
        let question = state
            .messages
            .iter()
            .find(|m| m.is_user())
            .map(|m| m.text())
            .unwrap_or_default();

        let _ = self.event_tx.send(AgentEvent::AgentStart {
            question: question.clone(),
        });
        let patch = StatePatch {
            user_question: Some(question),
            ..Default::default()
        };
        (patch, Step::Decide)
    }

    async fn decide(
        &self,
        state: &ConversationState,
        run_config: &AgentRunConfig,
        cancel: &CancellationToken,
    ) -> Result<(StatePatch, Step)> {
        if state.turns >= self.config.max_turns {
            return Err(Error::TurnLimit(self.config.max_turns));
        }

        let mut context = state.messages.clone();
        if !state.grading_feedback.is_empty() {
            // Seen by this call only, never recorded in history
            context.push(Message::user(revision_instruction(&state.grading_feedback)));
        }

        let mut event_stream = self
            .transport
            .run(context, run_config, cancel.clone())
            .await?;

        let turn_number = state.turns + 1;
        let mut assistant_message = None;
        let mut turn_usage = Usage::default();
        while let Some(event) = event_stream.next().await {
            match event {
                AgentEvent::TurnStart { .. } => {
                    let _ = self.event_tx.send(AgentEvent::TurnStart { turn_number });
                }
                AgentEvent::TurnEnd { message, usage, .. } => {
                    let _ = self.event_tx.send(AgentEvent::TurnEnd {
                        turn_number,
                        message: message.clone(),
                        usage: usage.clone(),
                    });
                    assistant_message = Some(message);
                    turn_usage = usage;
                }
                AgentEvent::Error { message } => {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    return Err(Error::Other(message));
                }
                other => {
                    let _ = self.event_tx.send(other);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let message = assistant_message
            .ok_or_else(|| Error::Other("Model returned no message".to_string()))?;

        let calls: Vec<PendingCall> = message
            .tool_calls()
            .into_iter()
            .map(|(id, name, arguments)| PendingCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.clone(),
            })
            .collect();

        // Tool calls win over any text in the same reply
        let (route, next) = if !calls.is_empty() {
            (Route::CallTools, Step::CallTools(calls))
        } else if self.should_grade(state) {
            (Route::Grade, Step::Grade)
        } else {
            (Route::Terminate, Step::Terminate)
        };
        tracing::debug!("turn {} decision: {:?}", turn_number, route);
        let _ = self.event_tx.send(AgentEvent::Decision { route });

        let patch = StatePatch {
            messages: vec![message],
            turns: 1,
            usage: Some(turn_usage),
            ..Default::default()
        };
        Ok((patch, next))
    }

    fn should_grade(&self, state: &ConversationState) -> bool {
        self.config.grading.enabled
            && !self.graders.is_empty()
            && state.ready_for_grading
            && !state.grading_exhausted
    }

    /// Execute tool calls in model order, one result per call.
    async fn call_tools(
        &self,
        calls: Vec<PendingCall>,
        cancel: &CancellationToken,
    ) -> Result<(StatePatch, Step)> {
        let mut patch = StatePatch::default();

        for call in calls {
            let _ = self.event_tx.send(AgentEvent::ToolExecutionStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let result = match self.tools.iter().find(|t| t.name() == call.name) {
                Some(tool) => {
                    let validation_error = self
                        .schema_cache
                        .get(call.name.as_str())
                        .and_then(|validator| validate_with_validator(&call.arguments, validator));

                    match validation_error {
                        Some(err) => ToolResult::error(err),
                        None => {
                            tokio::select! {
                                _ = cancel.cancelled() => return Err(Error::Cancelled),
                                result = tool.execute(&call.id, call.arguments, cancel.clone()) => result,
                            }
                        }
                    }
                }
                None => ToolResult::error(format!("Tool not found: {}", call.name)),
            };

            let _ = self.event_tx.send(AgentEvent::ToolExecutionEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result: result.content.clone(),
                is_error: result.is_error,
            });

            if let Some(query) = &result.query {
                patch.record_query(query);
            }
            patch.messages.push(Message::tool_result(
                call.id,
                call.name,
                result.content,
                result.is_error,
            ));
        }

        Ok((patch, Step::Decide))
    }

    /// Run graders in order, stopping at the first failure.
    async fn grade(
        &self,
        state: &ConversationState,
        cancel: &CancellationToken,
    ) -> Result<(StatePatch, Step)> {
        let tables = match &self.db {
            Some(db) => table_names(db.as_ref()).await.unwrap_or_else(|e| {
                tracing::warn!("Could not list tables for grading: {}", e);
                vec![]
            }),
            None => vec![],
        };
        let input = GradeInput {
            question: state.user_question.clone().unwrap_or_default(),
            sql: state.executed_query.clone(),
            result: state.query_result.clone(),
            tables,
        };

        let mut verdicts = BTreeMap::new();
        let mut failed = None;
        for grader in &self.graders {
            let verdict = grader.grade(&input, cancel.clone()).await?;
            let _ = self.event_tx.send(AgentEvent::Graded {
                verdict: verdict.clone(),
            });
            let passed = verdict.passed;
            verdicts.insert(verdict.grader.clone(), verdict);
            if !passed {
                failed = Some(grader);
                break;
            }
        }

        let mut patch = StatePatch {
            verdicts: Some(verdicts),
            ..Default::default()
        };

        let Some(grader) = failed else {
            patch.grading_feedback = Some(String::new());
            return Ok((patch, Step::Terminate));
        };

        if state.retry_count < self.config.grading.max_retries {
            let retry_count = state.retry_count + 1;
            let feedback = grader.remediation().to_string();
            let _ = self.event_tx.send(AgentEvent::RevisionRequested {
                retry_count,
                feedback: feedback.clone(),
            });
            patch.retry_count = Some(retry_count);
            patch.grading_feedback = Some(feedback);
        } else {
            // One last unconditional pass to phrase the answer
            let _ = self.event_tx.send(AgentEvent::GradingExhausted {
                retry_count: state.retry_count,
            });
            patch.grading_feedback = Some(String::new());
            patch.grading_exhausted = Some(true);
        }
        Ok((patch, Step::Decide))
    }

    fn terminate(&self, state: &ConversationState, show_query: bool) -> StatePatch {
        let answer = state.last_assistant_text();
        let formatted = if show_query && !answer.is_empty() && !state.executed_query.is_empty() {
            format_with_query(&answer, &state.executed_query)
        } else {
            answer.clone()
        };

        StatePatch {
            is_final_response: Some(true),
            final_approved_response: Some(answer),
            formatted_response: Some(formatted),
            ..Default::default()
        }
    }
}

/// Append the executed statement to an answer
pub fn format_with_query(answer: &str, sql: &str) -> String {
    format!(
        "{}\n\n---\n**SQL Query executed:**\n\n```sql\n{}\n```",
        answer,
        sql.trim()
    )
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
