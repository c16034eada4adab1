//! PostgreSQL storage driver.
//!
//! Backed by a lazily created `sqlx` pool; the first operation opens the
//! actual connections. Result cells are decoded by column type name into
//! JSON values, with binary columns base64-encoded.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::postgres::{PgColumn, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Row, TypeInfo};

use crate::Result;
use crate::error::GatewayError;
use crate::models::{FieldValue, InsertReceipt, JsonMap, ParamMap, ResultSet};
use crate::params;
use crate::security::SecretHasher;
use crate::stores::sql::{self, Dialect};
use crate::stores::{QueryStore, RowStore, StoreConfig};

const DIALECT: Dialect = Dialect::Postgres;

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// PostgreSQL-backed implementation of both store traits.
pub struct PostgresStore {
    pool: PgPool,
    hasher: Arc<SecretHasher>,
}

impl PostgresStore {
    /// Creates a store with a lazy connection pool.
    ///
    /// Sets a per-session `statement_timeout` on each new connection so a
    /// runaway query cannot hold the pool hostage.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be parsed as a PostgreSQL
    /// connection string. Connection failures surface on first use.
    pub async fn connect(
        url: &str,
        config: &StoreConfig,
        hasher: Arc<SecretHasher>,
    ) -> Result<Self> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| {
                GatewayError::operational(
                    format!(
                        "invalid PostgreSQL connection string: {}",
                        crate::error::redact_database_url(url)
                    ),
                    e,
                )
            })?
            .application_name(concat!("tablegate/", env!("CARGO_PKG_VERSION")));

        let statement_timeout = config.query_timeout.as_millis();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    let timeout_stmt = format!("SET statement_timeout = {statement_timeout}");
                    conn.execute(timeout_stmt.as_str()).await?;
                    Ok(())
                })
            })
            .connect_lazy_with(options);

        Ok(Self { pool, hasher })
    }
}

fn bind_value<'q>(query: PgQuery<'q>, value: &'q FieldValue) -> PgQuery<'q> {
    match value {
        FieldValue::Null => query.bind(Option::<String>::None),
        FieldValue::Bool(v) => query.bind(*v),
        FieldValue::Int(v) => query.bind(*v),
        FieldValue::BigInt(v) => query.bind(*v),
        FieldValue::Double(v) => query.bind(*v),
        FieldValue::Text(v) => query.bind(v.as_str()),
        FieldValue::DateTime(v) => query.bind(*v),
        FieldValue::Uuid(v) => query.bind(*v),
        FieldValue::Raw(v) => query.bind(v.as_str()),
    }
}

fn bind_all<'q>(mut query: PgQuery<'q>, values: impl IntoIterator<Item = &'q FieldValue>) -> PgQuery<'q> {
    for value in values {
        query = bind_value(query, value);
    }
    query
}

/// Decodes one cell into a JSON value based on the column's type name.
///
/// Unknown types fall back to a string decode; cells that cannot be
/// decoded at all become JSON null rather than failing the whole row.
fn column_value(row: &PgRow, column: &PgColumn) -> Value {
    let index = column.ordinal();
    match column.type_info().name() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::Number(v.into())),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map_or(Value::Null, Value::Number),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),
        // NUMERIC is rendered as a string so no precision is lost in JSON
        "NUMERIC" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::String(v.to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| {
                serde_json::to_value(v).unwrap_or(Value::Null)
            }),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
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
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, |v| {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(v))
            }),
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::String),
    }
}

fn row_to_json(row: &PgRow) -> JsonMap {
    let mut map = JsonMap::new();
    for column in row.columns() {
        map.insert(column.name().to_string(), column_value(row, column));
    }
    map
}

fn row_values(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|column| column_value(row, column))
        .collect()
}

fn column_names(row: &PgRow) -> Vec<String> {
    row.columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect()
}

#[async_trait]
impl RowStore for PostgresStore {
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
        Ok(InsertReceipt {
            rows_affected: done.rows_affected(),
            // PostgreSQL reports no insert id without a RETURNING clause,
            // and the table's key column is not known here
            generated_key: None,
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
impl QueryStore for PostgresStore {
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

        // A transaction scopes the search_path override to this query
        let mut tx = self.pool.begin().await.map_err(|e| {
            GatewayError::operational("failed to open read transaction", e)
        })?;
        if let Some(schema) = schema {
            let set_path = format!(
                "SET LOCAL search_path TO {}, public",
                DIALECT.quote_ident(schema)
            );
            sqlx::query(&set_path).execute(&mut *tx).await.map_err(|e| {
                GatewayError::operational(format!("failed to apply schema '{schema}'"), e)
            })?;
        }

        tracing::debug!(max_rows, params = order.len(), "executing query");
        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        {
            let mut stream = bind_all(sqlx::query(&rewritten), order).fetch(&mut *tx);
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
        }
        tx.commit().await.map_err(|e| {
            GatewayError::operational("failed to close read transaction", e)
        })?;

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
