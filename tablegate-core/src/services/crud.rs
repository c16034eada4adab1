//! Table-level CRUD orchestration.
//!
//! Every operation runs the same gauntlet: trim and validate the request
//! fields, check the table against the access policy, then delegate to the
//! row store. The service never builds SQL and never sees hashes being
//! computed; those concerns live in the stores and the normalizer.

use std::sync::Arc;

use crate::Result;
use crate::error::GatewayError;
use crate::models::{CreateOutcome, CredentialCheck, JsonMap};
use crate::policy::TableAccessPolicy;
use crate::security::SecretHasher;
use crate::stores::RowStore;

/// Table-level CRUD and credential-check service.
pub struct CrudService {
    policy: Arc<dyn TableAccessPolicy>,
    store: Arc<dyn RowStore>,
    hasher: Arc<SecretHasher>,
}

impl CrudService {
    /// Creates a service over a policy and a row store.
    pub fn new(
        policy: Arc<dyn TableAccessPolicy>,
        store: Arc<dyn RowStore>,
        hasher: Arc<SecretHasher>,
    ) -> Self {
        Self {
            policy,
            store,
            hasher,
        }
    }

    /// Reads up to `limit` rows from a table. A non-positive limit means
    /// "no explicit limit".
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a blank table name, `Unauthorized`
    /// for a forbidden table, and operational errors from the store.
    pub async fn list(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<JsonMap>> {
        let table = require_table(table)?;
        self.authorize_read(table)?;
        tracing::debug!(table, operation = "list", "crud request");
        self.store
            .read_rows(table, normalize_schema(schema), normalize_limit(limit))
            .await
    }

    /// Reads rows where `key` equals `value`. An empty match is an empty
    /// `Vec`, not an error.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for blank request fields, `Unauthorized`
    /// for a forbidden table, and operational errors from the store.
    pub async fn get_by_key(
        &self,
        table: &str,
        schema: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<Vec<JsonMap>> {
        let table = require_table(table)?;
        let key = require_field(key, "key field name")?;
        let value = require_field(value, "key value")?;
        self.authorize_read(table)?;
        tracing::debug!(table, key, operation = "get", "crud request");
        self.store
            .read_rows_by_key(table, normalize_schema(schema), key, value)
            .await
    }

    /// Inserts one record. Fields named in `encrypt_fields` are hashed by
    /// the store before writing; the echoed record keeps the caller's
    /// original values.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a blank table name or an empty
    /// payload, `Unauthorized` for a forbidden table, and operational
    /// errors from the store.
    pub async fn create(
        &self,
        table: &str,
        schema: Option<&str>,
        data: &JsonMap,
        encrypt_fields: Option<&[String]>,
    ) -> Result<CreateOutcome> {
        let table = require_table(table)?;
        self.authorize_write(table)?;
        if data.is_empty() {
            return Err(GatewayError::invalid_argument(
                "create requires at least one field",
            ));
        }
        tracing::debug!(table, fields = data.len(), operation = "create", "crud request");
        let receipt = self
            .store
            .insert(table, normalize_schema(schema), data, encrypt_fields)
            .await?;
        Ok(CreateOutcome {
            created: receipt.rows_affected > 0,
            generated_key: receipt.generated_key,
            record: data.clone(),
        })
    }

    /// Updates rows where `key` equals `value`; returns the affected
    /// count. Zero is a valid answer when nothing matched.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for blank request fields or an empty
    /// payload, `Unauthorized` for a forbidden table, and operational
    /// errors from the store.
    pub async fn update(
        &self,
        table: &str,
        schema: Option<&str>,
        key: &str,
        value: &str,
        data: &JsonMap,
        encrypt_fields: Option<&[String]>,
    ) -> Result<u64> {
        let table = require_table(table)?;
        let key = require_field(key, "key field name")?;
        let value = require_field(value, "key value")?;
        self.authorize_write(table)?;
        if data.is_empty() {
            return Err(GatewayError::invalid_argument(
                "update requires at least one field",
            ));
        }
        tracing::debug!(table, key, operation = "update", "crud request");
        self.store
            .update(table, normalize_schema(schema), key, value, data, encrypt_fields)
            .await
    }

    /// Deletes rows where `key` equals `value`; returns the affected
    /// count.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for blank request fields, `Unauthorized`
    /// for a forbidden table, and operational errors from the store.
    pub async fn delete(
        &self,
        table: &str,
        schema: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<u64> {
        let table = require_table(table)?;
        let key = require_field(key, "key field name")?;
        let value = require_field(value, "key value")?;
        self.authorize_write(table)?;
        tracing::debug!(table, key, operation = "delete", "crud request");
        self.store
            .delete(table, normalize_schema(schema), key, value)
            .await
    }

    /// Checks a plaintext secret against the hash stored for a user.
    ///
    /// The three outcomes (no such user, wrong secret, valid) come back as
    /// a tagged [`CredentialCheck`], never as an `Err`; errors are
    /// reserved for invalid requests and store failures.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for blank request fields, `Unauthorized`
    /// for a forbidden table, and operational errors from the store or a
    /// malformed stored hash.
    pub async fn verify_credential(
        &self,
        table: &str,
        schema: Option<&str>,
        user_field: &str,
        secret_field: &str,
        user_value: &str,
        secret_value: &str,
    ) -> Result<CredentialCheck> {
        let table = require_table(table)?;
        let user_field = require_field(user_field, "user field name")?;
        let secret_field = require_field(secret_field, "secret field name")?;
        let user_value = require_field(user_value, "user value")?;
        // The blank check trims, but the secret itself is verified untrimmed:
        // surrounding whitespace in a real secret is significant
        if secret_value.trim().is_empty() {
            return Err(GatewayError::invalid_argument("secret value must not be empty"));
        }
        self.authorize_read(table)?;
        tracing::debug!(table, user_field, operation = "verify", "crud request");

        let stored = self
            .store
            .read_secret_hash(
                table,
                normalize_schema(schema),
                user_field,
                secret_field,
                user_value,
            )
            .await?;
        match stored {
            None => Ok(CredentialCheck::not_found()),
            Some(hash) => {
                if self.hasher.verify(secret_value, &hash)? {
                    Ok(CredentialCheck::valid())
                } else {
                    Ok(CredentialCheck::wrong_secret())
                }
            }
        }
    }

    fn authorize_read(&self, table: &str) -> Result<()> {
        if self.policy.is_allowed(table) {
            Ok(())
        } else {
            Err(GatewayError::unauthorized(format!(
                "table '{table}' cannot be queried"
            )))
        }
    }

    fn authorize_write(&self, table: &str) -> Result<()> {
        if self.policy.is_allowed(table) {
            Ok(())
        } else {
            Err(GatewayError::unauthorized(format!(
                "table '{table}' cannot be modified"
            )))
        }
    }
}

fn require_table(table: &str) -> Result<&str> {
    let table = table.trim();
    if table.is_empty() {
        return Err(GatewayError::invalid_argument("table name must not be empty"));
    }
    Ok(table)
}

fn require_field<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GatewayError::invalid_argument(format!(
            "{what} must not be empty"
        )));
    }
    Ok(value)
}

fn normalize_schema(schema: Option<&str>) -> Option<&str> {
    schema.map(str::trim).filter(|s| !s.is_empty())
}

fn normalize_limit(limit: Option<i64>) -> Option<i64> {
    limit.filter(|&n| n > 0)
}
