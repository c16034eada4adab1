//! Dialect-shared SQL assembly.
//!
//! Pure string builders used by the storage drivers: identifier quoting,
//! placeholder syntax, CRUD statement shapes, and the rewriter that turns
//! `@name` references into positional placeholders. Identifier quoting is
//! the only defense the drivers need here because every value travels as a
//! bind parameter, never as spliced text.

use crate::Result;
use crate::error::GatewayError;
use crate::models::{FieldValue, ParamMap};

/// SQL flavor differences that matter to the builders: identifier quoting
/// and placeholder syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL: `"ident"` quoting, `$N` placeholders
    Postgres,
    /// MySQL/MariaDB: `` `ident` `` quoting, `?` placeholders
    MySql,
}

impl Dialect {
    /// Quotes a single identifier, doubling embedded quote characters.
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Self::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            Self::MySql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Quotes a possibly dotted name (`schema.object`) part by part.
    pub fn quote_qualified(self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// The placeholder for the `index`-th bind parameter (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${index}"),
            Self::MySql => "?".to_string(),
        }
    }

    /// A table reference with its optional schema qualifier.
    pub fn table_ref(self, table: &str, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote_ident(schema), self.quote_ident(table)),
            None => self.quote_ident(table),
        }
    }
}

/// `SELECT *` over a whole table with an optional row limit.
pub fn select_all(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    limit: Option<i64>,
) -> String {
    let mut stmt = format!("SELECT * FROM {}", dialect.table_ref(table, schema));
    if let Some(limit) = limit {
        stmt.push_str(&format!(" LIMIT {limit}"));
    }
    stmt
}

/// `SELECT *` filtered on one key column; binds the key value.
pub fn select_by_key(dialect: Dialect, table: &str, schema: Option<&str>, key: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = {}",
        dialect.table_ref(table, schema),
        dialect.quote_ident(key),
        dialect.placeholder(1)
    )
}

/// Single-row `INSERT`; binds one value per column, in column order.
pub fn insert(dialect: Dialect, table: &str, schema: Option<&str>, columns: &[&str]) -> String {
    let column_list = columns
        .iter()
        .map(|c| dialect.quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let value_list = (1..=columns.len())
        .map(|i| dialect.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({column_list}) VALUES ({value_list})",
        dialect.table_ref(table, schema)
    )
}

/// Keyed `UPDATE`; binds the column values first and the key value last.
pub fn update(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    columns: &[&str],
    key: &str,
) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = {}", dialect.quote_ident(c), dialect.placeholder(i + 1)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE {} = {}",
        dialect.table_ref(table, schema),
        dialect.quote_ident(key),
        dialect.placeholder(columns.len() + 1)
    )
}

/// Keyed `DELETE`; binds the key value.
pub fn delete(dialect: Dialect, table: &str, schema: Option<&str>, key: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = {}",
        dialect.table_ref(table, schema),
        dialect.quote_ident(key),
        dialect.placeholder(1)
    )
}

/// Secret-hash lookup for credential checks; binds the user value.
pub fn select_secret_hash(
    dialect: Dialect,
    table: &str,
    schema: Option<&str>,
    secret_field: &str,
    user_field: &str,
) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = {} LIMIT 1",
        dialect.quote_ident(secret_field),
        dialect.table_ref(table, schema),
        dialect.quote_ident(user_field),
        dialect.placeholder(1)
    )
}

/// Stored-procedure invocation; binds one value per parameter, in map
/// order. PostgreSQL invokes set-returning functions via `SELECT * FROM`,
/// MySQL via `CALL`.
pub fn call_procedure(dialect: Dialect, name: &str, param_count: usize) -> String {
    let args = (1..=param_count)
        .map(|i| dialect.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ");
    match dialect {
        Dialect::Postgres => format!("SELECT * FROM {}({args})", dialect.quote_qualified(name)),
        Dialect::MySql => format!("CALL {}({args})", dialect.quote_qualified(name)),
    }
}

/// Rewrites `@name` references into positional placeholders and returns
/// the matched values in occurrence order, ready to bind.
///
/// References inside single- or double-quoted regions are left untouched,
/// so a literal like `'reach me @home'` never binds. Matching tries the
/// exact key first and falls back to a case-insensitive scan. A reference
/// with no matching parameter is an error; unused parameters are ignored.
///
/// # Errors
/// Returns `InvalidArgument` when the text references a parameter that was
/// not supplied.
pub fn rewrite_named_params<'a>(
    dialect: Dialect,
    text: &str,
    params: &'a ParamMap,
) -> Result<(String, Vec<&'a FieldValue>)> {
    let mut out = String::with_capacity(text.len());
    let mut order: Vec<&'a FieldValue> = Vec::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
            }
            '@' if !in_single && !in_double => {
                let mut word = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // A bare '@' with no name is ordinary text
                if word.is_empty() {
                    out.push('@');
                    continue;
                }
                let value = lookup(params, &word).ok_or_else(|| {
                    GatewayError::invalid_argument(format!(
                        "query references parameter '@{word}' that was not supplied"
                    ))
                })?;
                order.push(value);
                out.push_str(&dialect.placeholder(order.len()));
            }
            _ => out.push(c),
        }
    }

    Ok((out, order))
}

fn lookup<'a>(params: &'a ParamMap, word: &str) -> Option<&'a FieldValue> {
    let key = format!("@{word}");
    if let Some(value) = params.get(&key) {
        return Some(value);
    }
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_embedded_quotes() {
        assert_eq!(Dialect::Postgres.quote_ident("users"), "\"users\"");
        assert_eq!(Dialect::Postgres.quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(Dialect::MySql.quote_ident("users"), "`users`");
        assert_eq!(Dialect::MySql.quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_table_ref_with_schema() {
        assert_eq!(
            Dialect::Postgres.table_ref("orders", Some("sales")),
            "\"sales\".\"orders\""
        );
        assert_eq!(Dialect::MySql.table_ref("orders", None), "`orders`");
    }

    #[test]
    fn test_select_all_shapes() {
        assert_eq!(
            select_all(Dialect::Postgres, "users", None, None),
            "SELECT * FROM \"users\""
        );
        assert_eq!(
            select_all(Dialect::Postgres, "users", Some("app"), Some(50)),
            "SELECT * FROM \"app\".\"users\" LIMIT 50"
        );
        assert_eq!(
            select_all(Dialect::MySql, "users", None, Some(5)),
            "SELECT * FROM `users` LIMIT 5"
        );
    }

    #[test]
    fn test_select_by_key_shapes() {
        assert_eq!(
            select_by_key(Dialect::Postgres, "users", None, "id"),
            "SELECT * FROM \"users\" WHERE \"id\" = $1"
        );
        assert_eq!(
            select_by_key(Dialect::MySql, "users", Some("app"), "id"),
            "SELECT * FROM `app`.`users` WHERE `id` = ?"
        );
    }

    #[test]
    fn test_insert_shapes() {
        assert_eq!(
            insert(Dialect::Postgres, "users", None, &["name", "age"]),
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2)"
        );
        assert_eq!(
            insert(Dialect::MySql, "users", None, &["name", "age"]),
            "INSERT INTO `users` (`name`, `age`) VALUES (?, ?)"
        );
    }

    #[test]
    fn test_update_binds_key_last() {
        assert_eq!(
            update(Dialect::Postgres, "users", None, &["name", "age"], "id"),
            "UPDATE \"users\" SET \"name\" = $1, \"age\" = $2 WHERE \"id\" = $3"
        );
        assert_eq!(
            update(Dialect::MySql, "users", Some("app"), &["name"], "id"),
            "UPDATE `app`.`users` SET `name` = ? WHERE `id` = ?"
        );
    }

    #[test]
    fn test_delete_shapes() {
        assert_eq!(
            delete(Dialect::Postgres, "users", None, "id"),
            "DELETE FROM \"users\" WHERE \"id\" = $1"
        );
    }

    #[test]
    fn test_select_secret_hash_shape() {
        assert_eq!(
            select_secret_hash(Dialect::Postgres, "users", None, "clave", "usuario"),
            "SELECT \"clave\" FROM \"users\" WHERE \"usuario\" = $1 LIMIT 1"
        );
    }

    #[test]
    fn test_call_procedure_shapes() {
        assert_eq!(
            call_procedure(Dialect::Postgres, "refresh_totals", 2),
            "SELECT * FROM \"refresh_totals\"($1, $2)"
        );
        assert_eq!(
            call_procedure(Dialect::MySql, "refresh_totals", 0),
            "CALL `refresh_totals`()"
        );
        // Dotted names are quoted part by part
        assert_eq!(
            call_procedure(Dialect::Postgres, "reports.monthly", 1),
            "SELECT * FROM \"reports\".\"monthly\"($1)"
        );
    }

    #[test]
    fn test_rewrite_replaces_each_occurrence() {
        let mut params = ParamMap::new();
        params.insert("@min".to_string(), FieldValue::Int(5));
        params.insert("@max".to_string(), FieldValue::Int(10));

        let (text, order) = rewrite_named_params(
            Dialect::Postgres,
            "SELECT * FROM t WHERE a > @min AND b < @max AND c > @min",
            &params,
        )
        .unwrap();

        assert_eq!(text, "SELECT * FROM t WHERE a > $1 AND b < $2 AND c > $3");
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], &FieldValue::Int(5));
        assert_eq!(order[2], &FieldValue::Int(5));
    }

    #[test]
    fn test_rewrite_mysql_placeholders() {
        let mut params = ParamMap::new();
        params.insert("@name".to_string(), FieldValue::Text("ana".to_string()));

        let (text, order) =
            rewrite_named_params(Dialect::MySql, "SELECT * FROM t WHERE n = @name", &params)
                .unwrap();

        assert_eq!(text, "SELECT * FROM t WHERE n = ?");
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn test_rewrite_skips_quoted_regions() {
        let mut params = ParamMap::new();
        params.insert("@home".to_string(), FieldValue::Int(1));

        let (text, order) = rewrite_named_params(
            Dialect::Postgres,
            "SELECT 'reach me @home', \"weird@col\" FROM t WHERE x = @home",
            &params,
        )
        .unwrap();

        assert_eq!(
            text,
            "SELECT 'reach me @home', \"weird@col\" FROM t WHERE x = $1"
        );
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn test_rewrite_missing_parameter_is_an_error() {
        let params = ParamMap::new();
        let err = rewrite_named_params(Dialect::Postgres, "SELECT @nope", &params).unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("@nope"));
    }

    #[test]
    fn test_rewrite_matches_case_insensitively() {
        let mut params = ParamMap::new();
        params.insert("@UserId".to_string(), FieldValue::Int(7));

        let (text, order) =
            rewrite_named_params(Dialect::Postgres, "SELECT * FROM t WHERE id = @userid", &params)
                .unwrap();

        assert_eq!(text, "SELECT * FROM t WHERE id = $1");
        assert_eq!(order[0], &FieldValue::Int(7));
    }

    #[test]
    fn test_rewrite_ignores_bare_at_and_unused_params() {
        let mut params = ParamMap::new();
        params.insert("@unused".to_string(), FieldValue::Int(1));

        let (text, order) =
            rewrite_named_params(Dialect::Postgres, "SELECT '@' , 1 @ 2", &params).unwrap();

        assert_eq!(text, "SELECT '@' , 1 @ 2");
        assert!(order.is_empty());
    }
}
