//! Raw SQL text safety policy.
//!
//! A deliberately syntactic check: the text must read as a SELECT or WITH
//! statement, and must not contain any forbidden table name as a
//! case-insensitive substring. No SQL is parsed; an identifier appearing
//! inside a string literal or comment still trips the scan. That coarse
//! behavior is the contract, not a shortcut to be tightened later.

use thiserror::Error;

/// A reason the safety validator refused a piece of SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryViolation {
    /// Text was empty or whitespace-only
    #[error("query must not be empty")]
    EmptyText,

    /// Text does not start with SELECT or WITH
    #[error("only SELECT/WITH queries are permitted")]
    NotReadOnly,

    /// Text contains a forbidden table name
    #[error("query references forbidden table '{0}'")]
    ForbiddenTable(String),
}

/// Validates raw SQL text against the read-only and blacklist rules.
///
/// The text is trimmed and uppercased only for the prefix check; the
/// forbidden-name scan runs case-insensitively over the raw text.
///
/// # Errors
/// Returns the first violation found, in check order: empty text, non-read
/// shape, forbidden table reference.
pub fn validate_query_text(sql: &str, forbidden: &[String]) -> Result<(), QueryViolation> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(QueryViolation::EmptyText);
    }

    let upper = trimmed.to_uppercase();
    if !upper.starts_with("SELECT") && !upper.starts_with("WITH") {
        return Err(QueryViolation::NotReadOnly);
    }

    let haystack = sql.to_lowercase();
    for table in forbidden {
        let name = table.trim();
        if name.is_empty() {
            continue;
        }
        if haystack.contains(&name.to_lowercase()) {
            return Err(QueryViolation::ForbiddenTable(name.to_string()));
        }
    }

    Ok(())
}
