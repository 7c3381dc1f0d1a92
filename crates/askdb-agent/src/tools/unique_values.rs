//! Distinct values lookup for a single text column

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::quote_ident;
use crate::{
    db::Database,
    guard::SqlGuard,
    tool::{Tool, ToolResult, string_arg},
};

const MAX_VALUES: usize = 20;

const TEXT_TYPES: &[&str] = &["varchar", "nvarchar", "char", "nchar", "text", "string"];

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Whether a declared column type counts as text. `VARCHAR(40)` is `varchar`.
fn is_text_type(declared: &str) -> bool {
    let base = declared
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    TEXT_TYPES.contains(&base.as_str())
}

/// Tool that returns up to 20 distinct values of one text column
pub struct UniqueValuesTool {
    db: Arc<dyn Database>,
    guard: SqlGuard,
}

impl UniqueValuesTool {
    pub fn new(db: Arc<dyn Database>, guard: SqlGuard) -> Self {
        Self { db, guard }
    }
}

#[async_trait]
impl Tool for UniqueValuesTool {
    fn name(&self) -> &str {
        "GetUniqueColumnValues"
    }

    fn description(&self) -> &str {
        "Retrieve up to 20 unique values for a single TEXT column from a selected table. \
         Only one column is supported per call."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "schema_name": {
                    "type": "string",
                    "description": "Schema where the table resides (use \"main\" for the default schema)"
                },
                "table_name": {
                    "type": "string",
                    "description": "Table name"
                },
                "column_name": {
                    "type": "string",
                    "description": "Single column name to retrieve unique values for"
                }
            },
            "required": ["schema_name", "table_name", "column_name"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let column = string_arg(&arguments, "column_name").unwrap_or_default();
        if !IDENTIFIER.is_match(column) {
            return ToolResult::text("Invalid column name provided.");
        }
        let Some(table) = string_arg(&arguments, "table_name") else {
            return ToolResult::error("Missing required argument: table_name");
        };
        let schema = string_arg(&arguments, "schema_name")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("main");

        let info_sql = format!(
            "PRAGMA {}.table_info({})",
            quote_ident(schema),
            quote_ident(table)
        );
        if let Err(rejection) = self.guard.check(&info_sql) {
            tracing::debug!("GetUniqueColumnValues rejected: {}", info_sql);
            return ToolResult::text(rejection.message());
        }

        // table_info rows: (cid, name, type, notnull, dflt_value, pk)
        let info = match self.db.query(&info_sql).await {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!("table_info failed: {}", e);
                return ToolResult::text("Failed to retrieve column information.");
            }
        };
        let Some(declared_type) = info
            .rows
            .iter()
            .find(|row| row.get(1).and_then(|v| v.as_text()) == Some(column))
            .map(|row| row.get(2).and_then(|v| v.as_text()).unwrap_or_default())
        else {
            return ToolResult::text(format!("Column '{}' does not exist in {}.", column, table));
        };

        if !is_text_type(declared_type) {
            return ToolResult::text(format!(
                "Column '{}' is not of a TEXT type and cannot be used.",
                column
            ));
        }

        let values_sql = format!(
            "SELECT DISTINCT {} FROM {}.{} LIMIT {}",
            quote_ident(column),
            quote_ident(schema),
            quote_ident(table),
            MAX_VALUES
        );
        if let Err(rejection) = self.guard.check(&values_sql) {
            return ToolResult::text(rejection.message());
        }

        match self.db.query(&values_sql).await {
            Ok(rows) => {
                let values: Vec<serde_json::Value> = rows
                    .rows
                    .into_iter()
                    .filter_map(|row| row.into_iter().next())
                    .map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null))
                    .collect();
                ToolResult::text(serde_json::Value::Array(values).to_string())
            }
            Err(e) => {
                tracing::debug!("distinct values failed: {}", e);
                ToolResult::text("Failed to retrieve column values.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::sample_db;

    async fn run(args: serde_json::Value) -> ToolResult {
        UniqueValuesTool::new(Arc::new(sample_db()), SqlGuard::default())
            .execute("c1", args, CancellationToken::new())
            .await
    }

    #[test]
    fn test_text_types_ignore_length_suffix() {
        assert!(is_text_type("VARCHAR(40)"));
        assert!(is_text_type("nvarchar (255)"));
        assert!(is_text_type("TEXT"));
        assert!(!is_text_type("INTEGER"));
        assert!(!is_text_type("NUMERIC(10,2)"));
        assert!(!is_text_type(""));
    }

    #[tokio::test]
    async fn test_returns_distinct_values() {
        let result = run(json!({
            "schema_name": "main",
            "table_name": "customers",
            "column_name": "country"
        }))
        .await;
        let values: Vec<String> = serde_json::from_str(&result.content).unwrap();
        let mut sorted = values.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["Finland", "UK", "USA"]);
    }

    #[tokio::test]
    async fn test_rejects_bad_identifier() {
        let result = run(json!({
            "schema_name": "main",
            "table_name": "customers",
            "column_name": "name; DROP TABLE customers"
        }))
        .await;
        assert_eq!(result.content, "Invalid column name provided.");
    }

    #[tokio::test]
    async fn test_rejects_missing_column() {
        let result = run(json!({
            "schema_name": "main",
            "table_name": "customers",
            "column_name": "email"
        }))
        .await;
        assert_eq!(result.content, "Column 'email' does not exist in customers.");
    }

    #[tokio::test]
    async fn test_rejects_non_text_column() {
        let result = run(json!({
            "schema_name": "",
            "table_name": "customers",
            "column_name": "credit"
        }))
        .await;
        assert_eq!(
            result.content,
            "Column 'credit' is not of a TEXT type and cannot be used."
        );
    }

    #[tokio::test]
    async fn test_unknown_schema_fails_cleanly() {
        let result = run(json!({
            "schema_name": "sales",
            "table_name": "customers",
            "column_name": "country"
        }))
        .await;
        assert_eq!(result.content, "Failed to retrieve column information.");
    }
}
