//! Row store: entity models, the generic query executor and SQL repositories.
//!
//! - `model`: value types for the five persisted entities.
//! - `query`: `query_results`, the single execution/iteration path every read
//!   goes through.
//! - `repo`: pool bootstrap and the SQL-only accessors built on top of it.
//!
//! External modules should import from `hubwatch::db`; the repository API and
//! the models are re-exported here.

pub mod model;
pub mod query;
pub mod repo;

pub use model::{Channel, Chat, Monitoring, Video};
pub use query::{query_results, SqlArg};
pub use repo::*;

use thiserror::Error;

/// Errors surfaced by the row store. Underlying driver errors pass through
/// unchanged so callers can match on them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
