//! The boundary to the document store: what this crate needs from a collection handle.

use crate::errors::{DbError, StoreError};
use bson::{Bson, Document, doc};
use std::time::Duration;

/// Per-call execution options passed through to the store.
///
/// There is no implicit timeout: `timeout: None` means the call may run as long as the
/// store lets it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout) }
    }
}

/// A streaming result handle. `close` must be idempotent.
pub trait RowCursor: Send {
    /// Next row, `None` when exhausted. A closed cursor yields `Err(StoreError::CursorClosed)`.
    fn next_row(&mut self) -> Option<Result<Document, StoreError>>;

    fn close(&mut self) -> Result<(), StoreError>;

    fn is_closed(&self) -> bool;
}

/// A named collection able to run aggregation pipelines and count documents.
pub trait CollectionHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Runs `pipeline` (wire-form stages, in order) and returns a cursor over the results.
    fn aggregate(&self, pipeline: &[Document], opts: &ExecOptions) -> Result<Box<dyn RowCursor>, StoreError>;

    fn count_documents(&self, filter: &Document, opts: &ExecOptions) -> Result<u64, StoreError>;
}

/// Counts documents matching `filter`; `None` counts everything.
///
/// # Errors
/// Returns `DbError::Count` if the store rejects the call.
pub fn count(collection: &dyn CollectionHandle, filter: Option<&Document>, opts: &ExecOptions) -> Result<u64, DbError> {
    let empty = Document::new();
    collection.count_documents(filter.unwrap_or(&empty), opts).map_err(|source| DbError::Count {
        context: "count",
        collection: collection.name().to_string(),
        source,
    })
}

/// True iff a document with `_id == id` exists.
///
/// # Errors
/// Returns `DbError::Count` if the store rejects the call.
pub fn id_exists(collection: &dyn CollectionHandle, id: impl Into<Bson>, opts: &ExecOptions) -> Result<bool, DbError> {
    let filter = doc! { "_id": id.into() };
    collection
        .count_documents(&filter, opts)
        .map(|n| n != 0)
        .map_err(|source| DbError::Count { context: "id_exists", collection: collection.name().to_string(), source })
}
