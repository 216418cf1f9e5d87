//! Read-only check run on every statement before it reaches the engine.
//!
//! Applies to compiled plans and to oracle-authored test queries alike.

use datafusion::sql::sqlparser::ast::Statement;
use datafusion::sql::sqlparser::dialect::GenericDialect;
use datafusion::sql::sqlparser::parser::Parser;
use datafusion::sql::sqlparser::tokenizer::{Token, Tokenizer};
use thiserror::Error;

/// Unquoted keywords that mark a statement as something other than a pure read.
pub const FORBIDDEN_VERBS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "DROP", "CREATE", "ALTER", "TRUNCATE",
    "RENAME", "GRANT", "REVOKE", "COPY", "ATTACH", "DETACH", "INSTALL", "LOAD", "PRAGMA",
    "EXPORT", "IMPORT", "INTO", "SET", "CALL", "EXECUTE", "VACUUM",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardViolation {
    #[error("empty statement")]
    Empty,
    #[error("forbidden keyword {0}")]
    ForbiddenVerb(String),
    #[error("expected exactly one statement, found {0}")]
    StatementCount(usize),
    #[error("statement is not a query")]
    NotAQuery,
    #[error("unparsable statement: {0}")]
    Unparsable(String),
}

/// Accept only a single SELECT-style query with no write keywords outside quotes.
pub fn ensure_read_only(sql: &str) -> Result<(), GuardViolation> {
    if sql.trim().trim_end_matches(';').trim().is_empty() {
        return Err(GuardViolation::Empty);
    }

    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| GuardViolation::Unparsable(e.to_string()))?;
    for token in &tokens {
        if let Token::Word(word) = token {
            if word.quote_style.is_some() {
                continue;
            }
            let upper = word.value.to_ascii_uppercase();
            if FORBIDDEN_VERBS.contains(&upper.as_str()) {
                return Err(GuardViolation::ForbiddenVerb(upper));
            }
        }
    }

    let statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| GuardViolation::Unparsable(e.to_string()))?;
    match statements.as_slice() {
        [Statement::Query(_)] => Ok(()),
        [_] => Err(GuardViolation::NotAQuery),
        other => Err(GuardViolation::StatementCount(other.len())),
    }
}
