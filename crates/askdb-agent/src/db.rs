//! Database access facade
//!
//! [`Database`] is the seam the tools talk to. [`SqliteDatabase`] is the
//! bundled implementation: one read-only connection behind a mutex, queried
//! on the blocking pool.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, types::ValueRef};
use serde::Serialize;
use thiserror::Error;

/// Default cap on rendered query output handed back to the model
pub const DEFAULT_MAX_RESULT_CHARS: usize = 20_000;

/// Errors from the database layer. Tools turn these into text.
#[derive(Error, Debug)]
pub enum DbError {
    /// Driver error
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking task panicked or was cancelled
    #[error("database task failed: {0}")]
    Join(String),
}

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// Binary data is summarized by its size
    Blob(String),
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => SqlValue::Blob(format!("<blob {} bytes>", bytes.len())),
        }
    }
}

impl SqlValue {
    /// Text content, if this is a text cell
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A materialized rowset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as JSON: arrays per row, or objects keyed by column name.
    pub fn render(&self, include_columns: bool) -> String {
        let rendered = if include_columns {
            let objects: Vec<serde_json::Map<String, serde_json::Value>> = self
                .rows
                .iter()
                .map(|row| {
                    self.columns
                        .iter()
                        .cloned()
                        .zip(row.iter().map(to_json))
                        .collect()
                })
                .collect();
            serde_json::to_string(&objects)
        } else {
            serde_json::to_string(&self.rows)
        };
        // Serializing plain values into a string cannot fail
        rendered.unwrap_or_default()
    }
}

fn to_json(value: &SqlValue) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Cut `text` to at most `max` characters, noting how much was dropped.
pub fn truncate_result(text: String, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text;
    }
    let kept: String = text.chars().take(max).collect();
    format!("{}\n... (truncated, {} more characters)", kept, total - max)
}

/// Read access to the business database
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a statement and collect every row
    async fn query(&self, sql: &str) -> Result<QueryRows, DbError>;

    /// Cap applied by [`Database::run_no_throw`]
    fn max_result_chars(&self) -> usize {
        DEFAULT_MAX_RESULT_CHARS
    }

    /// Run a statement and render the outcome as text. Never fails:
    /// an empty rowset renders as an empty string and a driver error as
    /// `Error: <message>`.
    async fn run_no_throw(&self, sql: &str, include_columns: bool) -> String {
        match self.query(sql).await {
            Ok(rows) if rows.is_empty() => String::new(),
            Ok(rows) => truncate_result(rows.render(include_columns), self.max_result_chars()),
            Err(e) => {
                tracing::debug!("query failed: {}", e);
                format!("Error: {}", e)
            }
        }
    }
}

/// SQLite-backed [`Database`]
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    max_result_chars: usize,
}

impl SqliteDatabase {
    /// Open a database file read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            max_result_chars: DEFAULT_MAX_RESULT_CHARS,
        }
    }

    pub fn with_max_result_chars(mut self, max: usize) -> Self {
        self.max_result_chars = max;
        self
    }
}

fn query_blocking(conn: &Connection, sql: &str) -> Result<QueryRows, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(SqlValue::from(row.get_ref(i)?));
        }
        out.push(values);
    }

    Ok(QueryRows { columns, rows: out })
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn query(&self, sql: &str) -> Result<QueryRows, DbError> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            query_blocking(&conn, &sql)
        })
        .await
        .map_err(|e| DbError::Join(e.to_string()))?
    }

    fn max_result_chars(&self) -> usize {
        self.max_result_chars
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory store shaped like a small sales database.
    pub(crate) fn sample_db() -> SqliteDatabase {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (
                 id INTEGER PRIMARY KEY,
                 name VARCHAR(40) NOT NULL,
                 country NVARCHAR(40),
                 credit REAL,
                 avatar BLOB
             );
             CREATE TABLE invoices (id INTEGER PRIMARY KEY, customer_id INTEGER, total NUMERIC(10,2));
             INSERT INTO customers (name, country, credit, avatar) VALUES
                 ('Ada', 'UK', 10.5, x'0102'),
                 ('Grace', 'USA', NULL, NULL),
                 ('Linus', 'Finland', 3.0, NULL);
             INSERT INTO invoices (customer_id, total) VALUES (1, 9.99), (2, 1.98);",
        )
        .unwrap();
        SqliteDatabase::from_connection(conn)
    }

    #[tokio::test]
    async fn test_query_collects_columns_and_values() {
        let db = sample_db();
        let rows = db
            .query("SELECT name, credit, avatar FROM customers ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["name", "credit", "avatar"]);
        assert_eq!(rows.rows.len(), 3);
        assert_eq!(rows.rows[0][0], SqlValue::Text("Ada".into()));
        assert_eq!(rows.rows[0][1], SqlValue::Real(10.5));
        assert_eq!(rows.rows[0][2], SqlValue::Blob("<blob 2 bytes>".into()));
        assert_eq!(rows.rows[1][1], SqlValue::Null);
    }

    #[tokio::test]
    async fn test_run_no_throw_renders_rows() {
        let db = sample_db();
        let out = db.run_no_throw("SELECT COUNT(*) FROM customers", false).await;
        assert_eq!(out, "[[3]]");

        let out = db
            .run_no_throw("SELECT id, name FROM customers WHERE id = 2", true)
            .await;
        assert_eq!(out, r#"[{"id":2,"name":"Grace"}]"#);
    }

    #[tokio::test]
    async fn test_run_no_throw_empty_and_error() {
        let db = sample_db();
        let out = db
            .run_no_throw("SELECT * FROM customers WHERE name = 'nobody' LIMIT 1", false)
            .await;
        assert_eq!(out, "");

        let out = db.run_no_throw("SELECT * FROM missing_table", false).await;
        assert!(out.starts_with("Error: "), "got: {}", out);
        assert!(out.contains("missing_table"));
    }

    #[tokio::test]
    async fn test_run_no_throw_truncates() {
        let db = sample_db().with_max_result_chars(10);
        let out = db.run_no_throw("SELECT name FROM customers", false).await;
        assert!(out.starts_with("[[\"Ada\"],["));
        assert!(out.contains("truncated"));
    }

    #[test]
    fn test_truncate_result_keeps_short_text() {
        assert_eq!(truncate_result("abc".into(), 3), "abc");
        assert_eq!(
            truncate_result("abcdef".into(), 3),
            "abc\n... (truncated, 3 more characters)"
        );
    }

    #[test]
    fn test_open_read_only_rejects_missing_file() {
        let dir = std::env::temp_dir().join("askdb-db-test-missing");
        let result = SqliteDatabase::open(dir.join("nope.sqlite"));
        assert!(result.is_err());
    }
}
