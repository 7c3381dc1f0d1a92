//! Sample rows tool

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::quote_table;
use crate::{
    db::{Database, truncate_result},
    guard::SqlGuard,
    tool::{Tool, ToolResult, string_arg},
};

const SAMPLE_SIZE: usize = 2;

/// Tool that shows a couple of rows, with column names, from one table
pub struct SampleRowsTool {
    db: Arc<dyn Database>,
    guard: SqlGuard,
}

impl SampleRowsTool {
    pub fn new(db: Arc<dyn Database>, guard: SqlGuard) -> Self {
        Self { db, guard }
    }
}

#[async_trait]
impl Tool for SampleRowsTool {
    fn name(&self) -> &str {
        "GetSampleRows"
    }

    fn description(&self) -> &str {
        "Use this tool once the relevant tables have been selected, to get sample rows \
         from a table (including column names). Takes a single table; call it again for \
         other tables. From there, build the query that answers the user's question."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "selected_table": {
                    "type": "string",
                    "description": "Name of a table in the database"
                }
            },
            "required": ["selected_table"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let Some(table) = string_arg(&arguments, "selected_table") else {
            return ToolResult::error("Missing required argument: selected_table");
        };

        let sql = format!("SELECT * FROM {} LIMIT {}", quote_table(table), SAMPLE_SIZE);
        if let Err(rejection) = self.guard.check(&sql) {
            return ToolResult::text(rejection.message());
        }

        match self.db.query(&sql).await {
            Ok(rows) if rows.is_empty() => ToolResult::text(format!(
                "Table {} has no rows. Columns: {}",
                table,
                rows.columns.join(", ")
            )),
            Ok(rows) => ToolResult::text(truncate_result(
                rows.render(true),
                self.db.max_result_chars(),
            )),
            Err(e) => {
                tracing::debug!("GetSampleRows failed: {}", e);
                ToolResult::text(format!("Error: {}", e))
            }
        }
    }
}
