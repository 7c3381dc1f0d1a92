//! Database exploration and query tools

mod execute_query;
mod list_tables;
mod sample_rows;
mod unique_values;

use std::sync::Arc;

pub use execute_query::ExecuteQueryTool;
pub use list_tables::{ListTablesTool, table_names};
pub use sample_rows::SampleRowsTool;
pub use unique_values::UniqueValuesTool;

use crate::{db::Database, guard::SqlGuard, tool::BoxedTool};

/// Name of the only tool whose results feed grading
pub const EXECUTE_QUERY: &str = "ExecuteQuery";

/// The full tool set over one database, in the order offered to the model
pub fn sql_tools(db: Arc<dyn Database>, guard: SqlGuard) -> Vec<BoxedTool> {
    vec![
        Arc::new(ListTablesTool::new(db.clone())),
        Arc::new(SampleRowsTool::new(db.clone(), guard)),
        Arc::new(UniqueValuesTool::new(db.clone(), guard)),
        Arc::new(ExecuteQueryTool::new(db, guard)),
    ]
}

/// Double-quote an identifier for SQLite
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a table name, keeping a `schema.table` qualifier as two identifiers
pub(crate) fn quote_table(name: &str) -> String {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
            format!("{}.{}", quote_ident(schema), quote_ident(table))
        }
        _ => quote_ident(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::sample_db;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("customers"), "\"customers\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_quote_table() {
        assert_eq!(quote_table("customers"), "\"customers\"");
        assert_eq!(quote_table("main.customers"), "\"main\".\"customers\"");
        assert_eq!(quote_table(".customers"), "\".customers\"");
        assert_eq!(quote_table("main.\"x"), "\"main\".\"\"\"x\"");
    }

    #[test]
    fn test_sql_tools_names() {
        let tools = sql_tools(Arc::new(sample_db()), SqlGuard::default());
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "ListTablesTool",
                "GetSampleRows",
                "GetUniqueColumnValues",
                EXECUTE_QUERY
            ]
        );
    }
}
