//! Core services and utilities for tablegate.
//!
//! This crate provides the table-driven data gateway shared by the CLI and
//! any embedding application: generic CRUD over caller-named tables,
//! validated read-only queries, and stored-procedure execution, all
//! backend-agnostic behind a pair of storage traits.
//!
//! # Security Guarantees
//! - Values never reach SQL text; every value travels as a bind parameter
//! - Query text is gated to SELECT/WITH and scanned for forbidden tables
//! - Secret fields are Argon2id-hashed before storage and never logged
//! - Connection URLs are redacted in every log line and error message
//!
//! # Architecture
//! The core library follows these patterns:
//! - Trait-based storage abstraction with feature-gated drivers
//! - Factory pattern for driver instantiation from the connection URL
//! - A single inference pipeline for typing JSON parameters, shared by
//!   every path that accepts caller data

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod params;
pub mod policy;
pub mod safety;
pub mod security;
pub mod services;
pub mod stores;

// Re-export commonly used types
pub use config::{DEFAULT_MAX_ROWS, GatewayConfig};
pub use error::{GatewayError, Result};
pub use logging::init_logging;
pub use models::{
    Backend, CreateOutcome, CredentialCheck, CredentialOutcome, FieldValue, InsertReceipt,
    JsonMap, ParamMap, ResultSet,
};
pub use policy::{StaticTablePolicy, TableAccessPolicy};
pub use safety::{QueryViolation, validate_query_text};
pub use security::{HashCost, SecretHasher};
pub use services::{CrudService, QueryService};
pub use stores::{
    QueryStore, RowStore, StoreConfig, StoreHandles, connect, detect_backend,
};
