//! MySQL/MariaDB storage driver.
//!
//! Backed by a lazily created `sqlx` pool. MariaDB URLs are accepted by
//! rewriting the scheme, since the wire protocol is shared. Result cells
//! are decoded by column type name with a permissive fallback chain for
//! types outside the common set.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::mysql::{MySqlColumn, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};

use crate::Result;
use crate::error::GatewayError;
use crate::models::{FieldValue, InsertReceipt, JsonMap, ParamMap, ResultSet};
use crate::params;
use crate::security::SecretHasher;
use crate::stores::sql::{self, Dialect};
use crate::stores::{QueryStore, RowStore, StoreConfig};

const DIALECT: Dialect = Dialect::MySql;

type MySqlQuery<'q> = sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>;

/// MySQL/MariaDB-backed implementation of both store traits.
pub struct MySqlStore {
    pool: MySqlPool,
    hasher: Arc<SecretHasher>,
}

impl MySqlStore {
    /// Creates a store with a lazy connection pool.
    ///
    /// No statement timeout is applied here: MySQL and MariaDB disagree on
    /// the session variable for it, and both URL schemes land in this
    /// driver.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be parsed as a MySQL connection
    /// string. Connection failures surface on first use.
    pub async fn connect(
        url: &str,
        config: &StoreConfig,
        hasher: Arc<SecretHasher>,
    ) -> Result<Self> {
        let normalized_url = match url.strip_prefix("mariadb://") {
            Some(rest) => format!("mysql://{rest}"),
            None => url.to_string(),
        };
        let options = MySqlConnectOptions::from_str(&normalized_url).map_err(|e| {
            GatewayError::operational(
                format!(
                    "invalid MySQL connection string: {}",
                    crate::error::redact_database_url(url)
                ),
                e,
            )
        })?;

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .test_before_acquire(true)
            .connect_lazy_with(options);

        Ok(Self { pool, hasher })
    }
}

fn bind_value<'q>(query: MySqlQuery<'q>, value: &'q FieldValue) -> MySqlQuery<'q> {
    match value {
        FieldValue::Null => query.bind(Option::<String>::None),
        FieldValue::Bool(v) => query.bind(*v),
        FieldValue::Int(v) => query.bind(*v),
        FieldValue::BigInt(v) => query.bind(*v),
        FieldValue::Double(v) => query.bind(*v),
        FieldValue::Text(v) => query.bind(v.as_str()),
        FieldValue::DateTime(v) => query.bind(*v),
        // MySQL has no native UUID type; bind the canonical text form so it
        // matches CHAR(36) columns
        FieldValue::Uuid(v) => query.bind(v.to_string()),
        FieldValue::Raw(v) => query.bind(v.as_str()),
    }
}

fn bind_all<'q>(
    mut query: MySqlQuery<'q>,
    values: impl IntoIterator<Item = &'q FieldValue>,
) -> MySqlQuery<'q> {
    for value in values {
        query = bind_value(query, value);
    }
    query
}

/// Decodes one cell into a JSON value based on the column's type name.
fn column_value(row: &MySqlRow, column: &MySqlColumn) -> Value {
    let index = column.ordinal();
    match column.type_info().name() {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row
            .try_get::<Option<u64>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map_or(Value::Null, Value::Number),
        "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),
        // DECIMAL is rendered as a string so no precision is lost in JSON
        "DECIMAL" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| {
                serde_json::to_value(v).unwrap_or(Value::Null)
            }),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| {
                serde_json::to_value(v).unwrap_or(Value::Null)
            }),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| {
                serde_json::to_value(v).unwrap_or(Value::Null)
            }),
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            row.try_get::<Option<String>, _>(index)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::String)
        }
        "JSON" => row
            .try_get::<Option<Value>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(v))
            }),
        _ => fallback_value(row, index),
    }
}

/// Last-resort decode for types outside the mapped set (YEAR, BIT,
/// GEOMETRY and friends): try the widest representations in order.
fn fallback_value(row: &MySqlRow, index: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(index) {
        return Value::String(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(index) {
        return Value::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(index) {
        return Value::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(index) {
        return serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number);
    }
    if let Ok(Some(v)) = row.try_get::<Option<bool>, _>(index) {
        return Value::Bool(v);
    }
    Value::Null
}

fn row_to_json(row: &MySqlRow) -> JsonMap {
    let mut map = JsonMap::new();
    for column in row.columns() {
        map.insert(column.name().to_string(), column_value(row, column));
    }
    map
}

fn row_values(row: &MySqlRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|column| column_value(row, column))
        .collect()
}

fn column_names(row: &MySqlRow) -> Vec<String> {
    row.columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect()
}

#[async_trait]
impl RowStore for MySqlStore {
    async fn read_rows(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<JsonMap>> {
        let stmt = sql::select_all(DIALECT, table, schema, limit);
        tracing::debug!(table, "reading rows");
        let rows = sqlx::query(&stmt)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::operational(format!("failed to read rows from table '{table}'"), e)
            })?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn read_rows_by_key(
        &self,
        table: &str,
        schema: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<Vec<JsonMap>> {
        let stmt = sql::select_by_key(DIALECT, table, schema, key);
        let typed = params::infer_text(value);
        tracing::debug!(table, key, "reading rows by key");
        let rows = bind_value(sqlx::query(&stmt), &typed)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::operational(format!("failed to read rows from table '{table}'"), e)
            })?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn insert(
        &self,
        table: &str,
        schema: Option<&str>,
        data: &JsonMap,
        encrypt_fields: Option<&[String]>,
    ) -> Result<InsertReceipt> {
        let normalized = params::normalize_json_params(data, encrypt_fields, &self.hasher)?;
        if normalized.is_empty() {
            return Err(GatewayError::invalid_argument("no columns to insert"));
        }
        let columns: Vec<&str> = normalized
            .keys()
            .map(|k| k.trim_start_matches('@'))
            .collect();
        let stmt = sql::insert(DIALECT, table, schema, &columns);
        tracing::debug!(table, columns = columns.len(), "inserting row");
        let done = bind_all(sqlx::query(&stmt), normalized.values())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::operational(format!("failed to insert into table '{table}'"), e)
            })?;

        let last_insert_id = done.last_insert_id();
        Ok(InsertReceipt {
            rows_affected: done.rows_affected(),
            // Zero means the table has no auto-increment column
            generated_key: (last_insert_id != 0).then(|| Value::Number(last_insert_id.into())),
        })
    }

    async fn update(
        &self,
        table: &str,
        schema: Option<&str>,
        key: &str,
        value: &str,
        data: &JsonMap,
        encrypt_fields: Option<&[String]>,
    ) -> Result<u64> {
        let normalized = params::normalize_json_params(data, encrypt_fields, &self.hasher)?;
        if normalized.is_empty() {
            return Err(GatewayError::invalid_argument("no columns to update"));
        }
        let columns: Vec<&str> = normalized
            .keys()
            .map(|k| k.trim_start_matches('@'))
            .collect();
        let stmt = sql::update(DIALECT, table, schema, &columns, key);
        let typed_key = params::infer_text(value);
        tracing::debug!(table, key, columns = columns.len(), "updating rows");
        let done = bind_value(bind_all(sqlx::query(&stmt), normalized.values()), &typed_key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::operational(format!("failed to update table '{table}'"), e)
            })?;
        Ok(done.rows_affected())
    }

    async fn delete(
        &self,
        table: &str,
        schema: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<u64> {
        let stmt = sql::delete(DIALECT, table, schema, key);
        let typed = params::infer_text(value);
        tracing::debug!(table, key, "deleting rows");
        let done = bind_value(sqlx::query(&stmt), &typed)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::operational(format!("failed to delete from table '{table}'"), e)
            })?;
        Ok(done.rows_affected())
    }

    async fn read_secret_hash(
        &self,
        table: &str,
        schema: Option<&str>,
        user_field: &str,
        secret_field: &str,
        user_value: &str,
    ) -> Result<Option<String>> {
        let stmt = sql::select_secret_hash(DIALECT, table, schema, secret_field, user_field);
        tracing::debug!(table, user_field, "looking up stored secret");
        let row = sqlx::query(&stmt)
            .bind(user_value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::operational(
                    format!("failed to look up credentials in table '{table}'"),
                    e,
                )
            })?;
        match row {
            Some(row) => row.try_get::<Option<String>, _>(0).map_err(|e| {
                GatewayError::operational("failed to decode stored secret hash", e)
            }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueryStore for MySqlStore {
    async fn execute_query(
        &self,
        sql_text: &str,
        query_params: &ParamMap,
        max_rows: i64,
        schema: Option<&str>,
    ) -> Result<ResultSet> {
        let (rewritten, order) = sql::rewrite_named_params(DIALECT, sql_text, query_params)?;
        let cap = usize::try_from(max_rows).map_err(|_| {
            GatewayError::invalid_argument("max rows must be a positive integer")
        })?;
        if let Some(schema) = schema {
            // MySQL scopes objects by database, which the connection URL
            // already fixes
            tracing::debug!(schema, "schema hint ignored for MySQL queries");
        }

        tracing::debug!(max_rows, params = order.len(), "executing query");
        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut stream = bind_all(sqlx::query(&rewritten), order).fetch(&self.pool);
        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| GatewayError::operational("query execution failed", e))?
        {
            if columns.is_empty() {
                columns = column_names(&row);
            }
            rows.push(row_values(&row));
            if rows.len() >= cap {
                break;
            }
        }

        Ok(ResultSet { columns, rows })
    }

    async fn execute_procedure(&self, name: &str, proc_params: &ParamMap) -> Result<ResultSet> {
        let stmt = sql::call_procedure(DIALECT, name, proc_params.len());
        tracing::debug!(procedure = name, params = proc_params.len(), "executing procedure");
        let fetched = bind_all(sqlx::query(&stmt), proc_params.values())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::operational(format!("failed to execute procedure '{name}'"), e)
            })?;

        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for row in &fetched {
            if columns.is_empty() {
                columns = column_names(row);
            }
            rows.push(row_values(row));
        }
        Ok(ResultSet { columns, rows })
    }
}
