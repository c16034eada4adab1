//! Request orchestration services.
//!
//! Services sit between a caller-facing surface (the CLI, or an embedding
//! application) and the storage traits: they validate and authorize each
//! request, then delegate to the store. They hold no backend specifics,
//! so any [`crate::stores::RowStore`] / [`crate::stores::QueryStore`]
//! implementation plugs in, including the in-memory fakes used in tests.

mod crud;
mod query;

pub use crud::CrudService;
pub use query::QueryService;
