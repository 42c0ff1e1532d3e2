//! Typed builders for document-store aggregation pipelines.
//!
//! Conditions written with comparison tokens are translated into query operators, pipelines
//! are assembled from [`query::Stage`] values (match, sort, pagination, projection and
//! correlated lookups) and executed against any [`store::CollectionHandle`]. Results are bound
//! lazily through a [`query::Materializer`] that always releases its cursor.

pub mod cli;
pub mod config;
pub mod errors;
pub mod logger;
pub mod memory;
pub mod query;
pub mod store;
pub mod utils;

pub use config::ConnectionConfig;
pub use errors::{DbError, StoreError};
pub use memory::{MemoryCollection, MemoryDatabase};
pub use query::{GroupCount, LookupSpec, Materializer, PageSize, Pagination, Select, SelectOutput, Stage};
pub use store::{CollectionHandle, ExecOptions, RowCursor, count, id_exists};

/// Configures logging from the `QUERYKIT_LOG_*` environment variables.
///
/// # Errors
/// Returns an error if the log directory cannot be created or log4rs is already initialized.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    logger::configure_from_env()?;
    Ok(())
}
