//! Filter and expression evaluation over BSON documents.

use crate::errors::StoreError;
use bson::{Bson, Document};
use std::cmp::Ordering;

// Limits on path depth and $in operand size.
pub(crate) const MAX_PATH_DEPTH: usize = 32;
pub(crate) const MAX_IN_SET: usize = 1000;

type EvalResult<T> = Result<T, StoreError>;

/// Resolves a dotted path (`a.b.c`) through nested documents.
#[must_use]
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let mut parts = path.split('.');
    let mut cur = doc.get(parts.next()?)?;
    for (depth, part) in parts.enumerate() {
        if depth + 1 >= MAX_PATH_DEPTH {
            return None;
        }
        match cur {
            Bson::Document(d) => cur = d.get(part)?,
            _ => return None,
        }
    }
    Some(cur)
}

/// Sets a dotted path, creating (or replacing non-document) intermediate levels.
pub fn set_path(root: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            root.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(root.get(head), Some(Bson::Document(_))) {
                root.insert(head, Document::new());
            }
            if let Some(Bson::Document(child)) = root.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

/// Removes a dotted path; returns the removed value.
pub fn remove_path(root: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => root.remove(path),
        Some((head, rest)) => match root.get_mut(head) {
            Some(Bson::Document(child)) => remove_path(child, rest),
            _ => None,
        },
    }
}

/// Evaluates a query document (`$match` body) against `doc`.
///
/// `vars` holds `$$name` bindings visible to `$expr`.
///
/// # Errors
/// Returns `StoreError::InvalidFilter` for malformed or unknown operators.
pub fn matches(doc: &Document, filter: &Document, vars: &Document) -> EvalResult<bool> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$and" => logical_list(doc, cond, vars, key)?.iter().all(|b| *b),
            "$or" => logical_list(doc, cond, vars, key)?.iter().any(|b| *b),
            "$nor" => !logical_list(doc, cond, vars, key)?.iter().any(|b| *b),
            "$expr" => truthy(eval_expr(doc, cond, vars)?.as_ref()),
            k if k.starts_with('$') => {
                return Err(StoreError::InvalidFilter(format!("unknown top-level operator {k}")));
            }
            path => field_matches(get_path(doc, path), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical_list(doc: &Document, cond: &Bson, vars: &Document, op: &str) -> EvalResult<Vec<bool>> {
    let Bson::Array(items) = cond else {
        return Err(StoreError::InvalidFilter(format!("{op} requires an array")));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(sub) => matches(doc, sub, vars),
            _ => Err(StoreError::InvalidFilter(format!("{op} entries must be documents"))),
        })
        .collect()
}

fn is_operator_doc(cond: &Bson) -> Option<&Document> {
    match cond {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

/// Matches one field value against either an operator document or a literal.
///
/// # Errors
/// Returns `StoreError::InvalidFilter` for unknown or malformed operators.
pub fn field_matches(value: Option<&Bson>, cond: &Bson) -> EvalResult<bool> {
    let Some(ops) = is_operator_doc(cond) else {
        return Ok(eq_match(value, cond));
    };
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => eq_match(value, operand),
            "$ne" => !eq_match(value, operand),
            "$gt" => cmp_match(value, operand, |o| o == Ordering::Greater),
            "$gte" => cmp_match(value, operand, |o| o != Ordering::Less),
            "$lt" => cmp_match(value, operand, |o| o == Ordering::Less),
            "$lte" => cmp_match(value, operand, |o| o != Ordering::Greater),
            "$in" => in_set(value, operand, op)?,
            "$nin" => !in_set(value, operand, op)?,
            "$exists" => value.is_some() == truthy(Some(operand)),
            "$not" => match operand {
                Bson::Document(_) => !field_matches(value, operand)?,
                _ => return Err(StoreError::InvalidFilter("$not requires an operator document".into())),
            },
            "$regex" => regex_match(value, operand, ops.get("$options"))?,
            "$options" if ops.contains_key("$regex") => true,
            other => return Err(StoreError::InvalidFilter(format!("unknown operator {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

// Equality with query semantics: null matches missing, arrays match on any element.
fn eq_match(value: Option<&Bson>, operand: &Bson) -> bool {
    match value {
        None => matches!(operand, Bson::Null),
        Some(v) if values_equal(v, operand) => true,
        Some(Bson::Array(items)) => items.iter().any(|x| values_equal(x, operand)),
        Some(_) => false,
    }
}

// Range comparisons only succeed between values of the same canonical type.
fn cmp_match(value: Option<&Bson>, operand: &Bson, want: impl Fn(Ordering) -> bool) -> bool {
    let check = |v: &Bson| same_class(v, operand) && want(compare_bson(v, operand));
    match value {
        None => false,
        Some(Bson::Array(items)) if !matches!(operand, Bson::Array(_)) => items.iter().any(check),
        Some(v) => check(v),
    }
}

fn in_set(value: Option<&Bson>, operand: &Bson, op: &str) -> EvalResult<bool> {
    let Bson::Array(set) = operand else {
        return Err(StoreError::InvalidFilter(format!("{op} requires an array")));
    };
    Ok(set.iter().take(MAX_IN_SET).any(|x| eq_match(value, x)))
}

#[cfg(feature = "regex")]
fn regex_match(value: Option<&Bson>, pattern: &Bson, options: Option<&Bson>) -> EvalResult<bool> {
    let Bson::String(pattern) = pattern else {
        return Err(StoreError::InvalidFilter("$regex requires a string pattern".into()));
    };
    let case_insensitive = matches!(options, Some(Bson::String(o)) if o.contains('i'));
    let re = regex::RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| StoreError::InvalidFilter(format!("bad $regex: {e}")))?;
    Ok(match value {
        Some(Bson::String(s)) => re.is_match(s),
        Some(Bson::Array(items)) => items.iter().any(|x| matches!(x, Bson::String(s) if re.is_match(s))),
        _ => false,
    })
}

#[cfg(not(feature = "regex"))]
fn regex_match(_value: Option<&Bson>, _pattern: &Bson, _options: Option<&Bson>) -> EvalResult<bool> {
    Err(StoreError::FeatureNotImplemented("$regex requires the `regex` feature".into()))
}

/// Evaluates an aggregation expression. `None` stands for a missing value.
///
/// Supports `$field.path`, `$$var.path`, literal documents and arrays (evaluated element-wise),
/// and the operators `$eq $ne $gt $gte $lt $lte $and $or $not`.
///
/// # Errors
/// Returns `StoreError::InvalidFilter` for malformed operator arguments.
pub fn eval_expr(doc: &Document, expr: &Bson, vars: &Document) -> EvalResult<Option<Bson>> {
    match expr {
        Bson::String(s) if s.starts_with("$$") => {
            let (name, rest) = s[2..].split_once('.').map_or((&s[2..], None), |(n, r)| (n, Some(r)));
            let root = if name == "ROOT" || name == "CURRENT" {
                Some(Bson::Document(doc.clone()))
            } else {
                vars.get(name).cloned()
            };
            Ok(match (root, rest) {
                (Some(Bson::Document(d)), Some(path)) => get_path(&d, path).cloned(),
                (Some(_), Some(_)) | (None, _) => None,
                (v, None) => v,
            })
        }
        Bson::String(s) if s.starts_with('$') => Ok(get_path(doc, &s[1..]).cloned()),
        Bson::Array(items) => {
            let vals = items
                .iter()
                .map(|x| eval_expr(doc, x, vars).map(|v| v.unwrap_or(Bson::Null)))
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(Some(Bson::Array(vals)))
        }
        Bson::Document(d) => match is_operator_doc(expr) {
            Some(ops) if ops.len() == 1 => {
                let Some((op, args)) = ops.iter().next() else {
                    return Ok(None);
                };
                eval_operator(doc, op, args, vars).map(Some)
            }
            Some(_) => Err(StoreError::InvalidFilter("an expression object takes exactly one operator".into())),
            None => {
                let mut out = Document::new();
                for (k, v) in d {
                    if let Some(v) = eval_expr(doc, v, vars)? {
                        out.insert(k.clone(), v);
                    }
                }
                Ok(Some(Bson::Document(out)))
            }
        },
        literal => Ok(Some(literal.clone())),
    }
}

fn eval_operator(doc: &Document, op: &str, args: &Bson, vars: &Document) -> EvalResult<Bson> {
    let operands = match args {
        Bson::Array(items) => items.iter().map(|x| eval_expr(doc, x, vars)).collect::<EvalResult<Vec<_>>>()?,
        single => vec![eval_expr(doc, single, vars)?],
    };
    let pair = || -> EvalResult<Ordering> {
        match operands.as_slice() {
            [a, b] => Ok(compare_optional(a.as_ref(), b.as_ref())),
            _ => Err(StoreError::InvalidFilter(format!("{op} takes exactly two arguments"))),
        }
    };
    let out = match op {
        "$eq" => pair()? == Ordering::Equal,
        "$ne" => pair()? != Ordering::Equal,
        "$gt" => pair()? == Ordering::Greater,
        "$gte" => pair()? != Ordering::Less,
        "$lt" => pair()? == Ordering::Less,
        "$lte" => pair()? != Ordering::Greater,
        "$and" => operands.iter().all(|v| truthy(v.as_ref())),
        "$or" => operands.iter().any(|v| truthy(v.as_ref())),
        "$not" => match operands.as_slice() {
            [v] => !truthy(v.as_ref()),
            _ => return Err(StoreError::InvalidFilter("$not takes exactly one argument".into())),
        },
        other => return Err(StoreError::InvalidFilter(format!("unsupported expression operator {other}"))),
    };
    Ok(Bson::Boolean(out))
}

// Missing sorts before every present value, null included.
fn compare_optional(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => compare_bson(x, y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Aggregation truthiness: missing, null, false and numeric zero are false.
#[must_use]
pub fn truthy(v: Option<&Bson>) -> bool {
    match v {
        None | Some(Bson::Null | Bson::Undefined | Bson::Boolean(false)) => false,
        Some(Bson::Int32(i)) => *i != 0,
        Some(Bson::Int64(i)) => *i != 0,
        Some(Bson::Double(f)) => *f != 0.0,
        Some(_) => true,
    }
}

#[must_use]
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    same_class(a, b) && compare_bson(a, b) == Ordering::Equal
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn as_f64_num(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        Bson::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn same_class(a: &Bson, b: &Bson) -> bool {
    (is_num(a) && is_num(b)) || type_rank(a) == type_rank(b)
}

/// Total order over BSON values: numbers compare numerically across widths, then by type rank.
#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    use bson::Bson as T;
    if is_num(a) && is_num(b) {
        return as_f64_num(a).total_cmp(&as_f64_num(b));
    }
    match (a, b) {
        (T::String(x), T::String(y)) => x.cmp(y),
        (T::Boolean(x), T::Boolean(y)) => x.cmp(y),
        (T::ObjectId(x), T::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (T::DateTime(x), T::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (T::Array(x), T::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let o = compare_bson(l, r);
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        (T::Document(x), T::Document(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let o = lk.cmp(rk).then_with(|| compare_bson(lv, rv));
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

const fn type_rank(v: &Bson) -> u8 {
    use bson::Bson as T;
    match v {
        T::MinKey => 0,
        T::Undefined => 1,
        T::Null => 2,
        T::Int32(_) | T::Int64(_) | T::Double(_) | T::Decimal128(_) => 3,
        T::String(_) | T::Symbol(_) => 4,
        T::Document(_) => 5,
        T::Array(_) => 6,
        T::Binary(_) => 7,
        T::ObjectId(_) => 8,
        T::Boolean(_) => 9,
        T::DateTime(_) => 10,
        T::Timestamp(_) => 11,
        T::RegularExpression(_) => 12,
        T::DbPointer(_) => 13,
        T::JavaScriptCode(_) => 14,
        T::JavaScriptCodeWithScope(_) => 15,
        T::MaxKey => 255,
    }
}
