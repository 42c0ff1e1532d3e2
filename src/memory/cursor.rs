use crate::errors::StoreError;
use crate::store::RowCursor;
use bson::Document;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cursor over an already computed result set.
///
/// Registers itself in the database's open-cursor counter until closed. There is no `Drop`
/// impl: a cursor nobody closes stays counted, which is what leak tests look for.
pub struct MemoryCursor {
    rows: VecDeque<Document>,
    open: Arc<AtomicUsize>,
    closed: bool,
}

impl MemoryCursor {
    pub(crate) fn new(rows: Vec<Document>, open: Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { rows: rows.into(), open, closed: false }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowCursor for MemoryCursor {
    fn next_row(&mut self) -> Option<Result<Document, StoreError>> {
        if self.closed {
            return Some(Err(StoreError::CursorClosed));
        }
        self.rows.pop_front().map(Ok)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if !self.closed {
            self.closed = true;
            self.rows.clear();
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn close_is_idempotent_and_counted_once() {
        let open = Arc::new(AtomicUsize::new(0));
        let mut c = MemoryCursor::new(vec![doc! { "a": 1 }, doc! { "a": 2 }], Arc::clone(&open));
        assert_eq!(open.load(Ordering::SeqCst), 1);
        assert_eq!(c.next_row().unwrap().unwrap(), doc! { "a": 1 });
        assert_eq!(c.remaining(), 1);
        c.close().unwrap();
        c.close().unwrap();
        assert_eq!(open.load(Ordering::SeqCst), 0);
        assert!(matches!(c.next_row(), Some(Err(StoreError::CursorClosed))));
    }
}
