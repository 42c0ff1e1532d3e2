//! Applies update documents (`{ "$set": {..}, "$inc": {..}, .. }`) to stored rows.

use super::eval::{as_f64_num, compare_bson, field_matches, get_path, remove_path, set_path, values_equal};
use crate::errors::StoreError;
use bson::{Bson, Document};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
}

type UpdateResult<T> = Result<T, StoreError>;

/// Applies every operator of `update` to `doc`. Returns whether `doc` changed.
///
/// # Errors
/// Returns `StoreError::InvalidUpdate` for unknown operators or operands of the wrong type.
pub fn apply_update(doc: &mut Document, update: &Document) -> UpdateResult<bool> {
    if update.is_empty() {
        return Err(StoreError::InvalidUpdate("update document is empty".into()));
    }
    let before = doc.clone();
    for (op, body) in update {
        let Bson::Document(fields) = body else {
            return Err(StoreError::InvalidUpdate(format!("{op} requires a document")));
        };
        for (path, arg) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, arg.clone()),
                "$unset" => {
                    remove_path(doc, path);
                }
                "$rename" => {
                    let Bson::String(to) = arg else {
                        return Err(StoreError::InvalidUpdate(format!("$rename target for {path} must be a string")));
                    };
                    if let Some(v) = remove_path(doc, path) {
                        set_path(doc, to, v);
                    }
                }
                "$inc" => {
                    let cur = get_path(doc, path).cloned().unwrap_or(Bson::Int32(0));
                    let next = arith(&cur, arg, path, i64::checked_add, |a, b| a + b)?;
                    set_path(doc, path, next);
                }
                "$mul" => {
                    let cur = get_path(doc, path).cloned().unwrap_or(Bson::Int32(0));
                    let next = arith(&cur, arg, path, i64::checked_mul, |a, b| a * b)?;
                    set_path(doc, path, next);
                }
                "$min" | "$max" => {
                    let want = if op == "$min" { Ordering::Less } else { Ordering::Greater };
                    let replace = get_path(doc, path).is_none_or(|cur| compare_bson(arg, cur) == want);
                    if replace {
                        set_path(doc, path, arg.clone());
                    }
                }
                "$push" => {
                    let mut items = array_at(doc, path)?;
                    items.extend(each_or_single(arg));
                    set_path(doc, path, Bson::Array(items));
                }
                "$addToSet" => {
                    let mut items = array_at(doc, path)?;
                    for v in each_or_single(arg) {
                        if !items.iter().any(|x| values_equal(x, &v)) {
                            items.push(v);
                        }
                    }
                    set_path(doc, path, Bson::Array(items));
                }
                "$pull" => {
                    if get_path(doc, path).is_some() {
                        let items = array_at(doc, path)?;
                        let mut kept = Vec::with_capacity(items.len());
                        for item in items {
                            if !field_matches(Some(&item), arg)? {
                                kept.push(item);
                            }
                        }
                        set_path(doc, path, Bson::Array(kept));
                    }
                }
                "$pullAll" => {
                    let Bson::Array(drop) = arg else {
                        return Err(StoreError::InvalidUpdate(format!("$pullAll for {path} requires an array")));
                    };
                    if get_path(doc, path).is_some() {
                        let mut items = array_at(doc, path)?;
                        items.retain(|x| !drop.iter().any(|d| values_equal(x, d)));
                        set_path(doc, path, Bson::Array(items));
                    }
                }
                "$pop" => {
                    if get_path(doc, path).is_some() {
                        let mut items = array_at(doc, path)?;
                        if as_f64_num(arg) < 0.0 {
                            if !items.is_empty() {
                                items.remove(0);
                            }
                        } else {
                            items.pop();
                        }
                        set_path(doc, path, Bson::Array(items));
                    }
                }
                other => return Err(StoreError::InvalidUpdate(format!("unsupported update operator {other}"))),
            }
        }
    }
    Ok(*doc != before)
}

fn array_at(doc: &Document, path: &str) -> UpdateResult<Vec<Bson>> {
    match get_path(doc, path) {
        None | Some(Bson::Null) => Ok(Vec::new()),
        Some(Bson::Array(items)) => Ok(items.clone()),
        Some(_) => Err(StoreError::InvalidUpdate(format!("{path} is not an array"))),
    }
}

fn each_or_single(arg: &Bson) -> Vec<Bson> {
    match arg {
        Bson::Document(d) if d.len() == 1 => match d.get("$each") {
            Some(Bson::Array(items)) => items.clone(),
            _ => vec![arg.clone()],
        },
        other => vec![other.clone()],
    }
}

// Integer operands stay integers (widening to Int64, then Double on overflow).
fn arith(
    cur: &Bson,
    by: &Bson,
    path: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> UpdateResult<Bson> {
    let as_int = |v: &Bson| match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        _ => None,
    };
    let numeric = |v: &Bson| matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_));
    if !numeric(cur) || !numeric(by) {
        return Err(StoreError::InvalidUpdate(format!("arithmetic on non-numeric value at {path}")));
    }
    if let (Some(a), Some(b)) = (as_int(cur), as_int(by))
        && let Some(r) = int_op(a, b)
    {
        let both_narrow = matches!((cur, by), (Bson::Int32(_), Bson::Int32(_)));
        return Ok(match i32::try_from(r) {
            Ok(n) if both_narrow => Bson::Int32(n),
            _ => Bson::Int64(r),
        });
    }
    Ok(Bson::Double(float_op(as_f64_num(cur), as_f64_num(by))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_inc_unset_report_changes() {
        let mut d = doc! { "a": 1, "b": { "c": 2 } };
        assert!(apply_update(&mut d, &doc! { "$set": { "b.c": 3 }, "$inc": { "a": 1 }, "$unset": { "x": "" } }).unwrap());
        assert_eq!(d, doc! { "a": 2, "b": { "c": 3 } });
        assert!(!apply_update(&mut d, &doc! { "$set": { "a": 2 } }).unwrap());
    }

    #[test]
    fn inc_widens_instead_of_overflowing() {
        let mut d = doc! { "n": i32::MAX };
        apply_update(&mut d, &doc! { "$inc": { "n": 1 } }).unwrap();
        assert_eq!(d.get("n"), Some(&Bson::Int64(i64::from(i32::MAX) + 1)));
        apply_update(&mut d, &doc! { "$mul": { "n": 0.5 } }).unwrap();
        assert!(matches!(d.get("n"), Some(Bson::Double(_))));
    }

    #[test]
    fn array_operators() {
        let mut d = doc! { "t": [1, 2, 3, 2] };
        apply_update(&mut d, &doc! { "$pull": { "t": 2 } }).unwrap();
        assert_eq!(d, doc! { "t": [1, 3] });
        apply_update(&mut d, &doc! { "$addToSet": { "t": { "$each": [3, 4] } } }).unwrap();
        assert_eq!(d, doc! { "t": [1, 3, 4] });
        apply_update(&mut d, &doc! { "$pop": { "t": -1 } }).unwrap();
        assert_eq!(d, doc! { "t": [3, 4] });
        apply_update(&mut d, &doc! { "$push": { "t": { "$each": [5, 6] } } }).unwrap();
        apply_update(&mut d, &doc! { "$pullAll": { "t": [3, 6] } }).unwrap();
        assert_eq!(d, doc! { "t": [4, 5] });
        apply_update(&mut d, &doc! { "$pull": { "t": { "$gt": 4 } } }).unwrap();
        assert_eq!(d, doc! { "t": [4] });
    }

    #[test]
    fn rename_min_max() {
        let mut d = doc! { "old": 5 };
        apply_update(&mut d, &doc! { "$rename": { "old": "new" }, "$min": { "new": 3 }, "$max": { "hi": 1 } }).unwrap();
        assert_eq!(d, doc! { "new": 3, "hi": 1 });
    }

    #[test]
    fn unknown_operator_and_bad_operand_fail() {
        let mut d = doc! { "s": "x" };
        assert!(matches!(apply_update(&mut d, &doc! { "$frob": { "s": 1 } }), Err(StoreError::InvalidUpdate(_))));
        assert!(matches!(apply_update(&mut d, &doc! { "$inc": { "s": 1 } }), Err(StoreError::InvalidUpdate(_))));
        assert!(matches!(apply_update(&mut d, &doc! { "$push": { "s": 1 } }), Err(StoreError::InvalidUpdate(_))));
    }
}
