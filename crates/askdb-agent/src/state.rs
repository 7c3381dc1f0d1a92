//! Per-run conversation state and its reducer

use std::collections::BTreeMap;

use askdb_ai::{Message, Usage};

use crate::{grader::GradeVerdict, tool::ExecutedQuery};

/// Everything one run knows. Created fresh per run and only changed
/// through [`ConversationState::apply`].
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    /// Append-only history
    pub messages: Vec<Message>,
    /// Text of the first user message, set once
    pub user_question: Option<String>,
    /// Latest statement submitted to the query tool
    pub executed_query: String,
    /// Latest rendered result (or refusal) from the query tool
    pub query_result: String,
    /// The latest statement passed the guard and ran
    pub ready_for_grading: bool,
    /// Failed grading cycles so far
    pub retry_count: u32,
    /// Remediation for the next decide step, empty when none
    pub grading_feedback: String,
    /// Retries ran out, grading is off for the rest of the run
    pub grading_exhausted: bool,
    /// Latest verdict per grader, from the most recent cycle only
    pub verdicts: BTreeMap<String, GradeVerdict>,
    pub is_final_response: bool,
    pub final_approved_response: String,
    /// The approved answer, plus the executed SQL when requested
    pub formatted_response: String,
    /// Model calls made
    pub turns: u32,
    pub usage: Usage,
}

/// A partial update returned by each loop step.
///
/// Merge rules: `messages` append; `turns` and `usage` accumulate;
/// `user_question` is write-once; `verdicts` replaces the whole map;
/// every other present field overwrites.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub messages: Vec<Message>,
    pub user_question: Option<String>,
    pub executed_query: Option<String>,
    pub query_result: Option<String>,
    pub ready_for_grading: Option<bool>,
    pub retry_count: Option<u32>,
    pub grading_feedback: Option<String>,
    pub grading_exhausted: Option<bool>,
    pub verdicts: Option<BTreeMap<String, GradeVerdict>>,
    pub is_final_response: Option<bool>,
    pub final_approved_response: Option<String>,
    pub formatted_response: Option<String>,
    pub turns: u32,
    pub usage: Option<Usage>,
}

impl StatePatch {
    /// Record a statement that went through the query tool
    pub fn record_query(&mut self, query: &ExecutedQuery) {
        self.executed_query = Some(query.sql.clone());
        self.query_result = Some(query.result.clone());
        self.ready_for_grading = Some(query.accepted);
    }
}

impl ConversationState {
    /// Start a run from the caller's messages
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Merge a patch into the state
    pub fn apply(&mut self, patch: StatePatch) {
        self.messages.extend(patch.messages);

        if self.user_question.is_none() {
            self.user_question = patch.user_question;
        }
        if let Some(v) = patch.executed_query {
            self.executed_query = v;
        }
        if let Some(v) = patch.query_result {
            self.query_result = v;
        }
        if let Some(v) = patch.ready_for_grading {
            self.ready_for_grading = v;
        }
        if let Some(v) = patch.retry_count {
            self.retry_count = v;
        }
        if let Some(v) = patch.grading_feedback {
            self.grading_feedback = v;
        }
        if let Some(v) = patch.grading_exhausted {
            self.grading_exhausted = v;
        }
        if let Some(v) = patch.verdicts {
            self.verdicts = v;
        }
        if let Some(v) = patch.is_final_response {
            self.is_final_response = v;
        }
        if let Some(v) = patch.final_approved_response {
            self.final_approved_response = v;
        }
        if let Some(v) = patch.formatted_response {
            self.formatted_response = v;
        }

        self.turns += patch.turns;
        if let Some(usage) = patch.usage {
            self.usage.add(&usage);
        }
    }

    /// Text of the most recent assistant message, empty if it has none
    pub fn last_assistant_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .map(|m| m.text())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_append() {
        let mut state = ConversationState::new(vec![Message::user("q")]);
        state.apply(StatePatch {
            messages: vec![Message::assistant_text("a")],
            ..Default::default()
        });
        state.apply(StatePatch {
            messages: vec![Message::user("q2")],
            ..Default::default()
        });
        let texts: Vec<String> = state.messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["q", "a", "q2"]);
    }

    #[test]
    fn test_user_question_is_write_once() {
        let mut state = ConversationState::default();
        state.apply(StatePatch {
            user_question: Some("first".into()),
            ..Default::default()
        });
        state.apply(StatePatch {
            user_question: Some("second".into()),
            ..Default::default()
        });
        assert_eq!(state.user_question.as_deref(), Some("first"));
    }

    #[test]
    fn test_query_fields_overwrite() {
        let mut state = ConversationState::default();
        for (sql, result) in [("SELECT 1", "[[1]]"), ("SELECT 2", "[[2]]")] {
            let mut patch = StatePatch::default();
            patch.record_query(&ExecutedQuery {
                sql: sql.into(),
                result: result.into(),
                accepted: true,
            });
            state.apply(patch);
        }
        assert_eq!(state.executed_query, "SELECT 2");
        assert_eq!(state.query_result, "[[2]]");
        assert!(state.ready_for_grading);

        let mut patch = StatePatch::default();
        patch.record_query(&ExecutedQuery {
            sql: "SELECT * FROM t".into(),
            result: "rejected".into(),
            accepted: false,
        });
        state.apply(patch);
        assert!(!state.ready_for_grading);
    }

    #[test]
    fn test_absent_fields_are_kept() {
        let mut state = ConversationState {
            grading_feedback: "fix it".into(),
            retry_count: 2,
            ..Default::default()
        };
        state.apply(StatePatch::default());
        assert_eq!(state.grading_feedback, "fix it");
        assert_eq!(state.retry_count, 2);
    }

    #[test]
    fn test_verdicts_replace_whole_map() {
        let verdict = |name: &str, passed| GradeVerdict {
            grader: name.into(),
            passed,
            rationale: String::new(),
        };
        let mut state = ConversationState::default();
        state.apply(StatePatch {
            verdicts: Some(BTreeMap::from([
                ("sql_sense".to_string(), verdict("sql_sense", true)),
                ("data_sense".to_string(), verdict("data_sense", false)),
            ])),
            ..Default::default()
        });
        state.apply(StatePatch {
            verdicts: Some(BTreeMap::from([(
                "sql_sense".to_string(),
                verdict("sql_sense", false),
            )])),
            ..Default::default()
        });
        assert_eq!(state.verdicts.len(), 1);
        assert!(!state.verdicts["sql_sense"].passed);
    }

    #[test]
    fn test_turns_and_usage_accumulate() {
        let mut state = ConversationState::default();
        for _ in 0..2 {
            state.apply(StatePatch {
                turns: 1,
                usage: Some(Usage { input: 7, output: 2 }),
                ..Default::default()
            });
        }
        assert_eq!(state.turns, 2);
        assert_eq!(state.usage, Usage { input: 14, output: 4 });
    }

    #[test]
    fn test_last_assistant_text() {
        let mut state = ConversationState::new(vec![
            Message::user("q"),
            Message::assistant_text("There are 3."),
            Message::tool_result("c1", "ExecuteQuery", "[[3]]", false),
        ]);
        assert_eq!(state.last_assistant_text(), "There are 3.");

        // An empty final reply is the answer, not an older one
        state.messages.push(Message::assistant_text(""));
        assert_eq!(state.last_assistant_text(), "");
        assert_eq!(ConversationState::default().last_assistant_text(), "");
    }
}
