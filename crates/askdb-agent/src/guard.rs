//! Lexical SQL safety checks
//!
//! These are keyword heuristics over the upper-cased statement, not a
//! parser. A keyword inside a string literal counts the same as a real
//! clause.

use std::sync::LazyLock;

use regex::Regex;

/// Refusal returned for unbounded row scans
pub const UNBOUNDED_REFUSAL: &str = "Query rejected: potential to return a large number of rows. \
     Please include a LIMIT clause (e.g., SELECT * ... LIMIT 100 ...) or use aggregation.";

/// Refusal returned for statements that could modify the database
pub const UNSAFE_REFUSAL: &str =
    "A query has been rejected by the preprocessing script due to a potential unsafe statement.";

const MUTATING_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "ATTACH", "DETACH",
    "VACUUM", "REINDEX",
];

static ROW_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bLIMIT\b|\bTOP\b|\bFETCH\s+FIRST\b").unwrap());

static AGGREGATE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(COUNT|SUM|AVG|MIN|MAX|TOTAL|GROUP_CONCAT)\s*\(").unwrap()
});

static GROUP_BY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bGROUP\s+BY\b").unwrap());

fn normalize(sql: &str) -> String {
    sql.trim().to_uppercase()
}

/// A `SELECT` with no `LIMIT` and no aggregation marker.
pub fn is_risky(sql: &str) -> bool {
    let stmt = normalize(sql);
    stmt.starts_with("SELECT")
        && !["LIMIT", "COUNT(", "SUM(", "AVG(", "GROUP BY"]
            .iter()
            .any(|marker| stmt.contains(marker))
}

/// Stricter check for large stores: any `SELECT`/`WITH` query without a row
/// bound, unless it collapses to a single aggregate row.
pub fn may_yield_large_result(sql: &str) -> bool {
    let stmt = normalize(sql);
    if !(stmt.starts_with("SELECT") || stmt.starts_with("WITH")) {
        return false;
    }
    if ROW_BOUND.is_match(&stmt) {
        return false;
    }
    let single_row_aggregate = AGGREGATE_CALL.is_match(&stmt) && !GROUP_BY.is_match(&stmt);
    !single_row_aggregate
}

/// A write/DDL statement, or more than one statement.
pub fn is_mutating(sql: &str) -> bool {
    let stmt = normalize(sql);
    let first_word = stmt
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default();
    if MUTATING_KEYWORDS.contains(&first_word) {
        return true;
    }
    statement_count(&stmt) > 1
}

/// Non-empty statements separated by `;` outside quoted spans.
///
/// Doubled quotes (`'it''s'`) close and reopen the span, which leaves the
/// state unchanged.
fn statement_count(sql: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;
    let mut has_content = false;
    for c in sql.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' || c == '`' => {
                quote = Some(c);
                has_content = true;
            }
            None if c == ';' => {
                if has_content {
                    count += 1;
                }
                has_content = false;
            }
            None if !c.is_whitespace() => has_content = true,
            None => {}
        }
    }
    if has_content {
        count += 1;
    }
    count
}

/// Why a statement was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Could modify data or schema
    Mutating,
    /// Could return an unbounded number of rows
    Unbounded,
}

impl Rejection {
    /// The fixed refusal text shown to the model
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::Mutating => UNSAFE_REFUSAL,
            Rejection::Unbounded => UNBOUNDED_REFUSAL,
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Gate run in front of every database call built from model input
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlGuard {
    /// Also apply [`may_yield_large_result`]
    pub strict: bool,
}

impl SqlGuard {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn check(&self, sql: &str) -> Result<(), Rejection> {
        if is_mutating(sql) {
            return Err(Rejection::Mutating);
        }
        if is_risky(sql) || (self.strict && may_yield_large_result(sql)) {
            return Err(Rejection::Unbounded);
        }
        Ok(())
    }
}
