//! Parametrized-query orchestration.
//!
//! Raw SQL goes through the read-only/forbidden-table gate before any
//! driver sees it; stored-procedure calls skip the text gate (there is no
//! text to scan) but share the same parameter normalization, including
//! secret-field hashing.

use std::sync::Arc;

use crate::Result;
use crate::error::GatewayError;
use crate::models::{JsonMap, ParamMap, ResultSet};
use crate::params;
use crate::policy::TableAccessPolicy;
use crate::safety::{self, QueryViolation};
use crate::security::SecretHasher;
use crate::stores::QueryStore;

/// Read-only query and stored-procedure service.
pub struct QueryService {
    policy: Arc<dyn TableAccessPolicy>,
    store: Arc<dyn QueryStore>,
    hasher: Arc<SecretHasher>,
    default_max_rows: i64,
}

impl QueryService {
    /// Creates a service over a policy and a query store.
    ///
    /// `default_max_rows` caps result sets on the untyped path, where the
    /// caller supplies no explicit cap.
    pub fn new(
        policy: Arc<dyn TableAccessPolicy>,
        store: Arc<dyn QueryStore>,
        hasher: Arc<SecretHasher>,
        default_max_rows: i64,
    ) -> Self {
        Self {
            policy,
            store,
            hasher,
            default_max_rows,
        }
    }

    /// Checks query text against the read-only rule and the policy's
    /// forbidden-table list, reporting which rule tripped.
    ///
    /// # Errors
    /// Returns the first [`QueryViolation`] found.
    pub fn validate(&self, sql: &str) -> std::result::Result<(), QueryViolation> {
        safety::validate_query_text(sql, self.policy.forbidden_tables())
    }

    /// Executes validated SQL with typed parameters and an explicit row
    /// cap.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a non-positive cap or a parameter
    /// reference with no matching value, `Unauthorized` for any text
    /// violation, and operational errors from the store.
    pub async fn execute(
        &self,
        sql: &str,
        query_params: &ParamMap,
        max_rows: i64,
        schema: Option<&str>,
    ) -> Result<ResultSet> {
        if max_rows <= 0 {
            return Err(GatewayError::invalid_argument(
                "max rows must be a positive integer",
            ));
        }
        self.validate(sql)
            .map_err(|violation| GatewayError::unauthorized(violation.to_string()))?;
        tracing::debug!(max_rows, params = query_params.len(), "query request");
        self.store
            .execute_query(sql, query_params, max_rows, normalize_schema(schema))
            .await
    }

    /// Executes validated SQL with raw JSON parameters, inferring types
    /// and applying the service's default row cap.
    ///
    /// # Errors
    /// As [`QueryService::execute`], plus `InvalidArgument` for malformed
    /// parameter names.
    pub async fn execute_untyped(&self, sql: &str, query_params: &JsonMap) -> Result<ResultSet> {
        let typed = params::normalize_json_params(query_params, None, &self.hasher)?;
        self.execute(sql, &typed, self.default_max_rows, None).await
    }

    /// Executes a stored procedure with raw JSON parameters, hashing any
    /// fields named in `encrypt_fields` before the call.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a blank procedure name or malformed
    /// parameter names, and operational errors from the store.
    pub async fn execute_procedure(
        &self,
        name: &str,
        proc_params: Option<&JsonMap>,
        encrypt_fields: Option<&[String]>,
    ) -> Result<ResultSet> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::invalid_argument(
                "procedure name must not be empty",
            ));
        }
        let fields = params::normalize_encrypt_fields(encrypt_fields);
        let typed = match proc_params {
            Some(p) => params::normalize_json_params(p, fields.as_deref(), &self.hasher)?,
            None => ParamMap::new(),
        };
        tracing::debug!(procedure = name, params = typed.len(), "procedure request");
        self.store.execute_procedure(name, &typed).await
    }
}

fn normalize_schema(schema: Option<&str>) -> Option<&str> {
    schema.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::policy::StaticTablePolicy;
    use crate::security::looks_hashed;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeQueryStore {
        last_query: Mutex<Option<(String, ParamMap, i64, Option<String>)>>,
        last_procedure: Mutex<Option<(String, ParamMap)>>,
    }

    #[async_trait]
    impl QueryStore for FakeQueryStore {
        async fn execute_query(
            &self,
            sql: &str,
            params: &ParamMap,
            max_rows: i64,
            schema: Option<&str>,
        ) -> Result<ResultSet> {
            *self.last_query.lock().unwrap() = Some((
                sql.to_string(),
                params.clone(),
                max_rows,
                schema.map(str::to_string),
            ));
            Ok(ResultSet {
                columns: vec!["n".to_string()],
                rows: vec![vec![serde_json::json!(1)]],
            })
        }

        async fn execute_procedure(&self, name: &str, params: &ParamMap) -> Result<ResultSet> {
            *self.last_procedure.lock().unwrap() = Some((name.to_string(), params.clone()));
            Ok(ResultSet::empty())
        }
    }

    fn service_with(store: Arc<FakeQueryStore>, forbidden: &[&str]) -> QueryService {
        QueryService::new(
            Arc::new(StaticTablePolicy::new(forbidden.iter().copied())),
            store,
            Arc::new(SecretHasher::default()),
            10_000,
        )
    }

    #[tokio::test]
    async fn test_execute_passes_query_through() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store.clone(), &[]);

        let mut params = ParamMap::new();
        params.insert("@min".to_string(), FieldValue::Int(5));

        let result = service
            .execute("SELECT * FROM t WHERE a > @min", &params, 50, Some("app"))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);

        let (sql, sent, max_rows, schema) =
            store.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a > @min");
        assert_eq!(sent.get("@min"), Some(&FieldValue::Int(5)));
        assert_eq!(max_rows, 50);
        assert_eq!(schema.as_deref(), Some("app"));
    }

    #[tokio::test]
    async fn test_execute_rejects_non_positive_cap() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store, &[]);

        for cap in [0, -5] {
            let err = service
                .execute("SELECT 1", &ParamMap::new(), cap, None)
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 400);
            assert!(err.to_string().contains("positive"));
        }
    }

    #[tokio::test]
    async fn test_execute_rejects_writes_as_unauthorized() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store.clone(), &[]);

        let err = service
            .execute("DELETE FROM users", &ParamMap::new(), 10, None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert!(err.to_string().contains("SELECT"));

        // The store was never reached
        assert!(store.last_query.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_rejects_forbidden_table_references() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store, &["usuarios"]);

        let err = service
            .execute(
                "SELECT * FROM Usuarios WHERE id = 1",
                &ParamMap::new(),
                10,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert!(err.to_string().contains("usuarios"));
    }

    #[tokio::test]
    async fn test_execute_rejects_empty_text_as_unauthorized() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store, &[]);

        let err = service
            .execute("   ", &ParamMap::new(), 10, None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_validate_reports_violation_kind() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store, &["audit_log"]);

        assert!(service.validate("SELECT 1").is_ok());
        assert!(matches!(
            service.validate(""),
            Err(QueryViolation::EmptyText)
        ));
        assert!(matches!(
            service.validate("DROP TABLE t"),
            Err(QueryViolation::NotReadOnly)
        ));
        assert!(matches!(
            service.validate("SELECT * FROM audit_log"),
            Err(QueryViolation::ForbiddenTable(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_untyped_infers_and_applies_default_cap() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store.clone(), &[]);

        let mut raw = JsonMap::new();
        raw.insert("min".to_string(), serde_json::json!(5));
        raw.insert("@name".to_string(), serde_json::json!("ana"));

        service
            .execute_untyped("SELECT * FROM t WHERE a > @min AND n = @name", &raw)
            .await
            .unwrap();

        let (_, sent, max_rows, schema) = store.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(sent.get("@min"), Some(&FieldValue::Int(5)));
        assert_eq!(
            sent.get("@name"),
            Some(&FieldValue::Text("ana".to_string()))
        );
        assert_eq!(max_rows, 10_000);
        assert_eq!(schema, None);
    }

    #[tokio::test]
    async fn test_execute_procedure_normalizes_name_and_params() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store.clone(), &[]);

        let mut raw = JsonMap::new();
        raw.insert("year".to_string(), serde_json::json!("2024"));

        service
            .execute_procedure("  refresh_totals  ", Some(&raw), None)
            .await
            .unwrap();

        let (name, sent) = store.last_procedure.lock().unwrap().clone().unwrap();
        assert_eq!(name, "refresh_totals");
        assert_eq!(sent.get("@year"), Some(&FieldValue::Int(2024)));
    }

    #[tokio::test]
    async fn test_execute_procedure_rejects_blank_name() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store, &[]);

        let err = service.execute_procedure("   ", None, None).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("procedure name"));
    }

    #[tokio::test]
    async fn test_execute_procedure_without_params_sends_empty_map() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store.clone(), &[]);

        service.execute_procedure("nightly_rollup", None, None).await.unwrap();

        let (name, sent) = store.last_procedure.lock().unwrap().clone().unwrap();
        assert_eq!(name, "nightly_rollup");
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_execute_procedure_hashes_encrypt_fields() {
        let store = Arc::new(FakeQueryStore::default());
        let service = service_with(store.clone(), &[]);

        let mut raw = JsonMap::new();
        raw.insert("usuario".to_string(), serde_json::json!("ana"));
        raw.insert("clave".to_string(), serde_json::json!("s3cret"));

        let fields = vec!["clave".to_string()];
        service
            .execute_procedure("register_user", Some(&raw), Some(&fields))
            .await
            .unwrap();

        let (_, sent) = store.last_procedure.lock().unwrap().clone().unwrap();
        match sent.get("@clave") {
            Some(FieldValue::Text(stored)) => assert!(looks_hashed(stored)),
            other => panic!("expected hashed text, got {other:?}"),
        }
        assert_eq!(
            sent.get("@usuario"),
            Some(&FieldValue::Text("ana".to_string()))
        );
    }
}
