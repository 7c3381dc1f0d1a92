//! Graders: second-opinion model calls that judge an executed query
//!
//! A grader sees the user's question together with the SQL that ran (or its
//! result) and returns a pass/fail [`GradeVerdict`]. When a verdict fails, the
//! agent hands the grader's [`Grader::remediation`] text back to the model as
//! an extra instruction for its next attempt.

use std::sync::Arc;

use askdb_ai::{Message, Model, ResponseFormat};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    events::AgentEvent,
    transport::{AgentRunConfig, Transport},
};

/// Outcome of one grader over one executed query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeVerdict {
    pub grader: String,
    pub passed: bool,
    pub rationale: String,
}

/// What a grader gets to look at
#[derive(Debug, Clone, Default)]
pub struct GradeInput {
    pub question: String,
    pub sql: String,
    pub result: String,
    pub tables: Vec<String>,
}

#[async_trait]
pub trait Grader: Send + Sync {
    /// Stable name, used as the verdict key
    fn name(&self) -> &str;

    /// Instruction given to the model when this grader fails
    fn remediation(&self) -> &str;

    async fn grade(&self, input: &GradeInput, cancel: CancellationToken) -> Result<GradeVerdict>;
}

/// Type alias for a boxed grader
pub type BoxedGrader = Arc<dyn Grader>;

const SQL_SENSE_INSTRUCTIONS: &str = "You review SQL written by another assistant to answer a \
business question against a SQLite database. Think step by step about whether the query's \
approach can logically answer the question: the tables it reads, how they are joined, the \
filters, and the level of aggregation. Do not write a corrected query. Set is_sensible to \
false if the approach cannot answer the question, and explain what should be rethought. If \
you cannot produce JSON, end your answer with either NEEDS_REVISION or APPROVED.";

const SQL_SENSE_REMEDIATION: &str = "A reviewer found that the query you executed does not \
logically answer the user's question. Re-examine which tables and fields are relevant, explore \
them again if needed, and execute a corrected query before answering.";

const DATA_SENSE_INSTRUCTIONS: &str = "You review the data returned for a business question. \
Think step by step about whether the result plausibly answers the question. Watch for empty \
results presented as an answer, totals at the wrong level of detail, and values that cannot be \
right for the question asked. Set is_sensible to false if the result does not answer the \
question, and explain why. If you cannot produce JSON, end your answer with either \
NEEDS_REVISION or APPROVED.";

const DATA_SENSE_REMEDIATION: &str = "A reviewer found that the data you retrieved does not \
plausibly answer the user's question (for example an empty result or the wrong level of \
aggregation). Check your assumptions about the data, run a better query, and then answer.";

pub const DEFAULT_TEMPERATURE: f32 = 0.1;

fn render_sql_sense(input: &GradeInput) -> String {
    format!(
        "USER QUESTION: {}\nAVAILABLE TABLES: {}\nEXECUTED QUERY: {}",
        input.question,
        input.tables.join(", "),
        input.sql
    )
}

fn render_data_sense(input: &GradeInput) -> String {
    format!(
        "USER QUESTION: {}\nQUERY RESULT: {}",
        input.question, input.result
    )
}

fn verdict_format() -> ResponseFormat {
    ResponseFormat {
        name: "grade_verdict".to_string(),
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "reasoning": { "type": "string" },
                "is_sensible": { "type": "boolean" }
            },
            "required": ["reasoning", "is_sensible"],
            "additionalProperties": false
        }),
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    reasoning: String,
    is_sensible: bool,
}

/// Turn a grader reply into a verdict.
///
/// Prefers the structured JSON body; falls back to the `NEEDS_REVISION` /
/// `APPROVED` markers, and passes replies that carry neither.
fn parse_verdict(grader: &str, reply: &str) -> GradeVerdict {
    let body = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Ok(raw) = serde_json::from_str::<RawVerdict>(body) {
        return GradeVerdict {
            grader: grader.to_string(),
            passed: raw.is_sensible,
            rationale: raw.reasoning,
        };
    }

    let passed = if reply.contains("NEEDS_REVISION") {
        false
    } else {
        if !reply.contains("APPROVED") {
            tracing::warn!("Grader '{}' returned no verdict, treating as passed", grader);
        }
        true
    };
    GradeVerdict {
        grader: grader.to_string(),
        passed,
        rationale: reply.trim().to_string(),
    }
}

/// A grader backed by a separate, low-temperature model call
pub struct LlmGrader {
    name: &'static str,
    instructions: &'static str,
    remediation: &'static str,
    render: fn(&GradeInput) -> String,
    transport: Arc<dyn Transport>,
    model: Model,
    temperature: f32,
}

impl LlmGrader {
    /// Judges whether the executed SQL can answer the question
    pub fn sql_sense(transport: Arc<dyn Transport>, model: Model) -> Self {
        Self {
            name: "sql_sense",
            instructions: SQL_SENSE_INSTRUCTIONS,
            remediation: SQL_SENSE_REMEDIATION,
            render: render_sql_sense,
            transport,
            model,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Judges whether the returned data plausibly answers the question
    pub fn data_sense(transport: Arc<dyn Transport>, model: Model) -> Self {
        Self {
            name: "data_sense",
            instructions: DATA_SENSE_INSTRUCTIONS,
            remediation: DATA_SENSE_REMEDIATION,
            render: render_data_sense,
            transport,
            model,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn failure(&self, message: impl Into<String>) -> Error {
        Error::Grader {
            grader: self.name.to_string(),
            message: message.into(),
        }
    }
}

/// The default grading pipeline: SQL sense, then data sense
pub fn default_graders(
    transport: Arc<dyn Transport>,
    model: Model,
    temperature: f32,
) -> Vec<BoxedGrader> {
    vec![
        Arc::new(LlmGrader::sql_sense(transport.clone(), model.clone()).with_temperature(temperature)),
        Arc::new(LlmGrader::data_sense(transport, model).with_temperature(temperature)),
    ]
}

#[async_trait]
impl Grader for LlmGrader {
    fn name(&self) -> &str {
        self.name
    }

    fn remediation(&self) -> &str {
        self.remediation
    }

    async fn grade(&self, input: &GradeInput, cancel: CancellationToken) -> Result<GradeVerdict> {
        let config = AgentRunConfig {
            system_prompt: Some(self.instructions.to_string()),
            temperature: Some(self.temperature),
            response_format: Some(verdict_format()),
            ..AgentRunConfig::for_model(self.model.clone())
        };
        let prompt = Message::user((self.render)(input));

        let mut stream = self
            .transport
            .run(vec![prompt], &config, cancel.clone())
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        let mut reply = None;
        while let Some(event) = stream.next().await {
            match event {
                AgentEvent::TurnEnd { message, .. } => reply = Some(message.text()),
                AgentEvent::Error { message } => {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    return Err(self.failure(message));
                }
                _ => {}
            }
        }

        let reply = reply.ok_or_else(|| self.failure("no reply from model"))?;
        let verdict = parse_verdict(self.name, &reply);
        tracing::debug!(
            "Grader '{}' verdict: passed={}",
            verdict.grader,
            verdict.passed
        );
        Ok(verdict)
    }
}
