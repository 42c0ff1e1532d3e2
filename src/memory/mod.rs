//! In-process document store implementing [`CollectionHandle`].
//!
//! Runs the same wire-form pipelines a server would, over collections held in memory. Used by
//! the integration tests and the CLI, and useful anywhere a real server is not at hand.

mod cursor;
pub mod eval;
mod exec;
mod update;

pub use cursor::MemoryCursor;
pub use exec::{Order, SortSpec, compare_docs};
pub use update::{UpdateReport, apply_update};

use crate::errors::StoreError;
use crate::store::{CollectionHandle, ExecOptions, RowCursor};
use crate::utils::num::{u128_to_u64_saturating, usize_to_u64};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use exec::{ExecContext, run_pipeline};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

struct Inner {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    closed: AtomicBool,
    open_cursors: Arc<AtomicUsize>,
}

/// Shared handle to an in-memory database; clones see the same data.
#[derive(Clone)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                open_cursors: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Handle to `name`. The collection is created on first insert.
    #[must_use]
    pub fn collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection { db: self.clone(), name: name.to_string() }
    }

    #[must_use]
    pub fn list_collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn drop_collection(&self, name: &str) -> bool {
        self.inner.collections.write().remove(name).is_some()
    }

    /// Marks the database unreachable: every later call fails with `StoreError::Unavailable`.
    pub fn close(&self) {
        log::info!("memory database closed");
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Cursors handed out and not yet closed.
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.inner.open_cursors.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Unavailable("database is closed".into()));
        }
        Ok(())
    }
}

/// One named collection inside a [`MemoryDatabase`].
#[derive(Clone)]
pub struct MemoryCollection {
    db: MemoryDatabase,
    name: String,
}

impl MemoryCollection {
    /// Inserts `doc`, assigning a fresh `ObjectId` when `_id` is missing. Returns the `_id`.
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` once the database is closed.
    pub fn insert_one(&self, doc: Document) -> Result<Bson, StoreError> {
        self.db.ensure_open()?;
        let (id, doc) = with_id(doc);
        self.db.inner.collections.write().entry(self.name.clone()).or_default().push(doc);
        Ok(id)
    }

    /// # Errors
    /// Returns `StoreError::Unavailable` once the database is closed.
    pub fn insert_many<I: IntoIterator<Item = Document>>(&self, docs: I) -> Result<Vec<Bson>, StoreError> {
        self.db.ensure_open()?;
        let mut ids = Vec::new();
        let mut guard = self.db.inner.collections.write();
        let rows = guard.entry(self.name.clone()).or_default();
        for doc in docs {
            let (id, doc) = with_id(doc);
            ids.push(id);
            rows.push(doc);
        }
        Ok(ids)
    }

    /// Applies `update` to every document matching `filter`.
    ///
    /// Either all matches are updated or, on error, none are.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidFilter` or `StoreError::InvalidUpdate` for malformed input.
    pub fn update_many(&self, filter: &Document, update: &Document) -> Result<UpdateReport, StoreError> {
        self.db.ensure_open()?;
        let started = Instant::now();
        let mut guard = self.db.inner.collections.write();
        let Some(rows) = guard.get_mut(&self.name) else {
            return Ok(UpdateReport::default());
        };
        let mut staged = rows.clone();
        let mut report = UpdateReport::default();
        for doc in &mut staged {
            if eval::matches(doc, filter, &Document::new())? {
                report.matched += 1;
                if apply_update(doc, update)? {
                    report.modified += 1;
                }
            }
        }
        *rows = staged;
        crate::dev6!(
            "{{\"bench\":\"memory\",\"op\":\"update_many\",\"collection\":\"{}\",\"duration_ms\":{},\"matched\":{},\"modified\":{}}}",
            self.name,
            u128_to_u64_saturating(started.elapsed().as_millis()),
            report.matched,
            report.modified
        );
        Ok(report)
    }

    /// Removes every document matching `filter`; returns how many were removed.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidFilter` for malformed filters.
    pub fn delete_many(&self, filter: &Document) -> Result<u64, StoreError> {
        self.db.ensure_open()?;
        let mut guard = self.db.inner.collections.write();
        let Some(rows) = guard.get_mut(&self.name) else {
            return Ok(0);
        };
        let mut kept = Vec::with_capacity(rows.len());
        for doc in rows.iter() {
            if !eval::matches(doc, filter, &Document::new())? {
                kept.push(doc.clone());
            }
        }
        let deleted = usize_to_u64(rows.len() - kept.len());
        *rows = kept;
        Ok(deleted)
    }

    fn deadline(opts: &ExecOptions) -> Option<(Instant, std::time::Duration)> {
        opts.timeout.map(|t| (Instant::now() + t, t))
    }
}

fn with_id(doc: Document) -> (Bson, Document) {
    if let Some(id) = doc.get("_id") {
        return (id.clone(), doc);
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut out = Document::new();
    out.insert("_id", id.clone());
    for (k, v) in doc {
        out.insert(k, v);
    }
    (id, out)
}

impl CollectionHandle for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn aggregate(&self, pipeline: &[Document], opts: &ExecOptions) -> Result<Box<dyn RowCursor>, StoreError> {
        self.db.ensure_open()?;
        let guard = self.db.inner.collections.read();
        let ctx = ExecContext { collections: &guard, deadline: Self::deadline(opts) };
        ctx.check_deadline()?;
        let docs = guard.get(&self.name).cloned().unwrap_or_default();
        let rows = run_pipeline(&ctx, docs, pipeline, &Document::new())?;
        log::debug!("aggregate on `{}`: {} stages, {} rows", self.name, pipeline.len(), rows.len());
        Ok(Box::new(MemoryCursor::new(rows, Arc::clone(&self.db.inner.open_cursors))))
    }

    fn count_documents(&self, filter: &Document, opts: &ExecOptions) -> Result<u64, StoreError> {
        self.db.ensure_open()?;
        let guard = self.db.inner.collections.read();
        let ctx = ExecContext { collections: &guard, deadline: Self::deadline(opts) };
        ctx.check_deadline()?;
        let mut n = 0u64;
        for doc in guard.get(&self.name).map_or(&[][..], Vec::as_slice) {
            if eval::matches(doc, filter, &Document::new())? {
                n += 1;
            }
        }
        Ok(n)
    }
}
