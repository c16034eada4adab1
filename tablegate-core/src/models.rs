//! Core data models shared across the gateway.
//!
//! Values flowing through the gateway are represented as an explicit sum
//! type ([`FieldValue`]) inside insertion-ordered maps, never as reflected
//! dynamic objects. Construction from JSON goes through the inferencer in
//! [`crate::params`]; there is deliberately no `Deserialize` impl for
//! `FieldValue`, so the inference precedence rules cannot be bypassed.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw JSON object payload as received from a caller.
///
/// Built with `serde_json`'s `preserve_order` feature, so column order in
/// CRUD payloads follows the caller's document.
pub type JsonMap = serde_json::Map<String, Value>;

/// Normalized, typed parameter map keyed by `@`-prefixed parameter names.
///
/// Insertion-ordered; duplicate input names overwrite in place.
pub type ParamMap = IndexMap<String, FieldValue>;

/// A single typed scalar value bound as a query parameter or column value.
///
/// Serializes untagged, so a `ParamMap` renders as a plain JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    BigInt(i64),
    /// Double-precision float
    Double(f64),
    /// Plain text
    Text(String),
    /// Date/time without timezone (timezone-carrying input is converted to
    /// its UTC instant during inference)
    DateTime(chrono::NaiveDateTime),
    /// UUID
    Uuid(uuid::Uuid),
    /// Opaque serialized JSON (arrays/objects are not typed recursively)
    Raw(String),
}

/// Relational backends the gateway can be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    /// PostgreSQL (postgres:// or postgresql://)
    PostgreSql,
    /// MariaDB / MySQL (mysql:// or mariadb://)
    MariaDb,
    /// Microsoft SQL Server (mssql:// or sqlserver://), recognized but no
    /// driver is built in
    SqlServer,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::PostgreSql => write!(f, "PostgreSQL"),
            Backend::MariaDb => write!(f, "MariaDB"),
            Backend::SqlServer => write!(f, "SQL Server"),
        }
    }
}

/// Tabular result of the parametrized-query and stored-procedure paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    /// Column names in select order
    pub columns: Vec<String>,
    /// Row values, one `Vec` per row, aligned with `columns`
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// An empty result set (used when a procedure yields no rows).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of a storage-level insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertReceipt {
    /// Rows written (1 for a successful single-row insert)
    pub rows_affected: u64,
    /// Auto-generated key when the backend reports one
    pub generated_key: Option<Value>,
}

/// Result of a create operation: success flag, generated key info, and the
/// caller's record echoed back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOutcome {
    /// True when at least one row was written
    pub created: bool,
    /// Auto-generated key when the backend reports one
    pub generated_key: Option<Value>,
    /// The record as supplied by the caller
    pub record: JsonMap,
}

/// Tagged credential-check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialOutcome {
    /// No stored secret found for the given user value
    NotFound,
    /// Stored secret found but the supplied secret does not match
    WrongSecret,
    /// Supplied secret matches the stored hash
    Valid,
}

/// Result of a credential verification, carrying the HTTP-equivalent status
/// code and a fixed human-readable message.
///
/// An unknown user or a wrong secret is data, not an error: the caller
/// receives a tagged outcome, never an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CredentialCheck {
    /// Tagged outcome
    pub outcome: CredentialOutcome,
    /// HTTP-equivalent status code (404 / 401 / 200)
    pub status: u16,
    /// Fixed message for the outcome
    pub message: &'static str,
}

impl CredentialCheck {
    /// No stored secret found: 404 "user not found".
    pub fn not_found() -> Self {
        Self {
            outcome: CredentialOutcome::NotFound,
            status: 404,
            message: "user not found",
        }
    }

    /// Secret mismatch: 401 "incorrect secret".
    pub fn wrong_secret() -> Self {
        Self {
            outcome: CredentialOutcome::WrongSecret,
            status: 401,
            message: "incorrect secret",
        }
    }

    /// Secret matches: 200 "valid".
    pub fn valid() -> Self {
        Self {
            outcome: CredentialOutcome::Valid,
            status: 200,
            message: "valid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_serializes_untagged() {
        let mut params = ParamMap::new();
        params.insert("@name".to_string(), FieldValue::Text("Ana".to_string()));
        params.insert("@age".to_string(), FieldValue::Int(30));
        params.insert("@note".to_string(), FieldValue::Null);

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["@name"], serde_json::json!("Ana"));
        assert_eq!(json["@age"], serde_json::json!(30));
        assert_eq!(json["@note"], serde_json::Value::Null);
    }

    #[test]
    fn test_field_value_datetime_serializes_as_string() {
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        let json = serde_json::to_value(FieldValue::DateTime(dt)).unwrap();
        assert!(json.as_str().unwrap().starts_with("2024-03-15T10:30:00"));
    }

    #[test]
    fn test_param_map_preserves_insertion_order() {
        let mut params = ParamMap::new();
        params.insert("@z".to_string(), FieldValue::Int(1));
        params.insert("@a".to_string(), FieldValue::Int(2));
        params.insert("@m".to_string(), FieldValue::Int(3));

        let keys: Vec<&str> = params.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["@z", "@a", "@m"]);
    }

    #[test]
    fn test_credential_check_constructors() {
        let not_found = CredentialCheck::not_found();
        assert_eq!(not_found.status, 404);
        assert_eq!(not_found.message, "user not found");

        let wrong = CredentialCheck::wrong_secret();
        assert_eq!(wrong.status, 401);
        assert_eq!(wrong.message, "incorrect secret");

        let valid = CredentialCheck::valid();
        assert_eq!(valid.status, 200);
        assert_eq!(valid.message, "valid");
        assert_eq!(valid.outcome, CredentialOutcome::Valid);
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::PostgreSql.to_string(), "PostgreSQL");
        assert_eq!(Backend::MariaDb.to_string(), "MariaDB");
        assert_eq!(Backend::SqlServer.to_string(), "SQL Server");
    }

    #[test]
    fn test_result_set_empty() {
        let set = ResultSet::empty();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
        assert!(set.columns.is_empty());
    }
}
