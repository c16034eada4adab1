//! Gateway configuration.
//!
//! One startup-time artifact from which the policy, the hasher, and the
//! services are assembled. Immutable after validation.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::GatewayError;
use crate::security::HashCost;

/// Default row cap for untyped query execution.
pub const DEFAULT_MAX_ROWS: i64 = 10_000;

/// Configuration for the gateway core.
///
/// # Example
/// ```rust
/// use tablegate_core::GatewayConfig;
///
/// let config = GatewayConfig::default()
///     .with_forbidden_tables(["usuarios", "audit_log"])
///     .with_default_max_rows(500);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Tables refused to generic CRUD/query operations
    pub forbidden_tables: Vec<String>,
    /// Row cap applied to untyped query execution
    pub default_max_rows: i64,
    /// Cost parameters for one-way secret hashing
    pub hash_cost: HashCost,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            forbidden_tables: Vec::new(),
            default_max_rows: DEFAULT_MAX_ROWS,
            hash_cost: HashCost::default(),
        }
    }
}

impl GatewayConfig {
    /// Validates configuration values.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the row cap is not positive or the hash
    /// cost fails its thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.default_max_rows <= 0 {
            return Err(GatewayError::invalid_argument(
                "default_max_rows must be greater than 0",
            ));
        }
        self.hash_cost.validate()?;
        Ok(())
    }

    /// Builder method to set the forbidden table list.
    pub fn with_forbidden_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forbidden_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set the untyped-query row cap.
    pub fn with_default_max_rows(mut self, max_rows: i64) -> Self {
        self.default_max_rows = max_rows;
        self
    }

    /// Builder method to set the hash cost.
    pub fn with_hash_cost(mut self, cost: HashCost) -> Self {
        self.hash_cost = cost;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_max_rows, 10_000);
        assert!(config.forbidden_tables.is_empty());
    }

    #[test]
    fn test_invalid_max_rows_rejected() {
        let config = GatewayConfig::default().with_default_max_rows(0);
        assert!(config.validate().is_err());

        let config = GatewayConfig::default().with_default_max_rows(-5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let cost = HashCost {
            memory_kib: 65_536,
            iterations: 4,
            parallelism: 2,
        };
        let config = GatewayConfig::default()
            .with_forbidden_tables(["a", "b"])
            .with_default_max_rows(100)
            .with_hash_cost(cost);

        assert_eq!(config.forbidden_tables, vec!["a", "b"]);
        assert_eq!(config.default_max_rows, 100);
        assert_eq!(config.hash_cost, cost);
    }

    #[test]
    fn test_weak_hash_cost_rejected() {
        let config = GatewayConfig::default().with_hash_cost(HashCost {
            memory_kib: 1024,
            iterations: 3,
            parallelism: 1,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = GatewayConfig::default().with_forbidden_tables(["secrets"]);
        let json = serde_json::to_string(&config).unwrap();
        let back: GatewayConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(back.forbidden_tables, vec!["secrets"]);
        assert_eq!(back.default_max_rows, config.default_max_rows);
    }
}
