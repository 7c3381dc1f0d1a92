//! List tables tool

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, DbError},
    tool::{Tool, ToolResult},
};

const LIST_TABLES_SQL: &str =
    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

/// Names of the user tables in the database
pub async fn table_names(db: &dyn Database) -> Result<Vec<String>, DbError> {
    let rows = db.query(LIST_TABLES_SQL).await?;
    Ok(rows
        .rows
        .iter()
        .filter_map(|row| row.first().and_then(|v| v.as_text()).map(str::to_string))
        .collect())
}

/// Tool that enumerates the tables available for querying
pub struct ListTablesTool {
    db: Arc<dyn Database>,
}

impl ListTablesTool {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &str {
        "ListTablesTool"
    }

    fn description(&self) -> &str {
        "Use this tool to get all the available table names, then choose those that \
         might be relevant to the user's question."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        _arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        match table_names(self.db.as_ref()).await {
            Ok(names) if names.is_empty() => ToolResult::text("No tables found."),
            Ok(names) => ToolResult::text(json!(names).to_string()),
            Err(e) => ToolResult::text(format!("Error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SqliteDatabase, tests::sample_db};

    #[tokio::test]
    async fn test_lists_user_tables() {
        let tool = ListTablesTool::new(Arc::new(sample_db()));
        let result = tool
            .execute("c1", json!({}), CancellationToken::new())
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, r#"["customers","invoices"]"#);
    }

    #[tokio::test]
    async fn test_empty_database() {
        let db = SqliteDatabase::from_connection(rusqlite::Connection::open_in_memory().unwrap());
        let tool = ListTablesTool::new(Arc::new(db));
        let result = tool
            .execute("c1", json!({}), CancellationToken::new())
            .await;
        assert_eq!(result.content, "No tables found.");
    }
}
