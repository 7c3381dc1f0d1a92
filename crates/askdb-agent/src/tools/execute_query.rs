//! Execute query tool

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::EXECUTE_QUERY;
use crate::{
    db::Database,
    guard::SqlGuard,
    tool::{ExecutedQuery, Tool, ToolResult, string_arg},
};

const NO_ROWS: &str = "The query returned no rows.";

/// Tool that runs a model-authored statement after the guard accepts it
pub struct ExecuteQueryTool {
    db: Arc<dyn Database>,
    guard: SqlGuard,
}

impl ExecuteQueryTool {
    pub fn new(db: Arc<dyn Database>, guard: SqlGuard) -> Self {
        Self { db, guard }
    }
}

#[async_trait]
impl Tool for ExecuteQueryTool {
    fn name(&self) -> &str {
        EXECUTE_QUERY
    }

    fn description(&self) -> &str {
        "Use this tool once you built the query that will retrieve results answering the \
         user's question. Beware that this tool has safeguards and will reject your query \
         if it could potentially yield large results."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "sql_statement": {
                    "type": "string",
                    "description": "A correct SQLite SELECT statement that retrieves results answering the user's question"
                }
            },
            "required": ["sql_statement"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let Some(sql) = string_arg(&arguments, "sql_statement") else {
            return ToolResult::error("Missing required argument: sql_statement");
        };

        if let Err(rejection) = self.guard.check(sql) {
            tracing::debug!("ExecuteQuery rejected ({:?}): {}", rejection, sql);
            let refusal = rejection.message();
            return ToolResult::text(refusal).with_query(ExecutedQuery {
                sql: sql.to_string(),
                result: refusal.to_string(),
                accepted: false,
            });
        }

        let mut result = self.db.run_no_throw(sql, false).await;
        if result.is_empty() {
            result = NO_ROWS.to_string();
        }

        ToolResult::text(result.clone()).with_query(ExecutedQuery {
            sql: sql.to_string(),
            result,
            accepted: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::sample_db;
    use crate::guard::UNBOUNDED_REFUSAL;

    async fn run(sql: &str) -> ToolResult {
        ExecuteQueryTool::new(Arc::new(sample_db()), SqlGuard::default())
            .execute(
                "c1",
                json!({ "sql_statement": sql }),
                CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_count_query_executes() {
        let result = run("SELECT COUNT(*) FROM customers").await;
        assert_eq!(result.content, "[[3]]");
        let query = result.query.unwrap();
        assert!(query.accepted);
        assert_eq!(query.sql, "SELECT COUNT(*) FROM customers");
        assert_eq!(query.result, "[[3]]");
    }

    #[tokio::test]
    async fn test_unbounded_select_is_rejected() {
        let result = run("SELECT * FROM customers").await;
        assert!(!result.is_error);
        assert_eq!(result.content, UNBOUNDED_REFUSAL);
        let query = result.query.unwrap();
        assert!(!query.accepted);
        assert_eq!(query.result, UNBOUNDED_REFUSAL);
    }

    #[tokio::test]
    async fn test_empty_result_is_explained() {
        let result = run("SELECT name FROM customers WHERE country = 'Peru' LIMIT 5").await;
        assert_eq!(result.content, NO_ROWS);
        assert!(result.query.unwrap().accepted);
    }

    #[tokio::test]
    async fn test_read_only_guard_blocks_writes() {
        let result = run("DELETE FROM customers").await;
        assert!(!result.query.unwrap().accepted);
    }

    #[tokio::test]
    async fn test_semicolon_in_literal_is_not_a_second_statement() {
        let result = run("SELECT COUNT(*) FROM customers WHERE name = 'a;b'").await;
        assert_eq!(result.content, "[[0]]");
        assert!(result.query.unwrap().accepted);
    }
}
