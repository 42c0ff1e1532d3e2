//! Update-document fragments, one operator family each.
//!
//! Every function is pure and returns a single-key document such as `{ "$set": { .. } }`.
//! Merging several fragments into one update document is left to the caller.

use bson::{Bson, Document, doc};

fn fragment(op: &str, body: impl Into<Bson>) -> Document {
    let mut out = Document::new();
    out.insert(op, body.into());
    out
}

/// `{ "$rename": { old: new, .. } }`
#[must_use]
pub fn rename(fields: Document) -> Document {
    fragment("$rename", fields)
}

#[must_use]
pub fn set(fields: Document) -> Document {
    fragment("$set", fields)
}

/// `{ "$unset": { field: "", .. } }`
#[must_use]
pub fn unset<I, S>(fields: I) -> Document
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let body: Document = fields.into_iter().map(|f| (f.into(), Bson::String(String::new()))).collect();
    fragment("$unset", body)
}

#[must_use]
pub fn inc(fields: Document) -> Document {
    fragment("$inc", fields)
}

#[must_use]
pub fn mul(fields: Document) -> Document {
    fragment("$mul", fields)
}

/// Sets each field only if the given value is less than the stored one.
#[must_use]
pub fn min(fields: Document) -> Document {
    fragment("$min", fields)
}

/// Sets each field only if the given value is greater than the stored one.
#[must_use]
pub fn max(fields: Document) -> Document {
    fragment("$max", fields)
}

#[must_use]
pub fn add_to_set(fields: Document) -> Document {
    fragment("$addToSet", fields)
}

/// Removes every array element matching the value or condition.
#[must_use]
pub fn pull(fields: Document) -> Document {
    fragment("$pull", fields)
}

#[must_use]
pub fn pull_all(fields: Document) -> Document {
    fragment("$pullAll", fields)
}

#[must_use]
pub fn pop_head(array: &str) -> Document {
    fragment("$pop", doc! { array: -1 })
}

#[must_use]
pub fn pop_tail(array: &str) -> Document {
    fragment("$pop", doc! { array: 1 })
}

/// Appends all `values` to `array` in one operation: `{ "$push": { array: { "$each": [..] } } }`.
#[must_use]
pub fn append<I, V>(array: &str, values: I) -> Document
where
    I: IntoIterator<Item = V>,
    V: Into<Bson>,
{
    let each: Vec<Bson> = values.into_iter().map(Into::into).collect();
    fragment("$push", doc! { array: { "$each": each } })
}
