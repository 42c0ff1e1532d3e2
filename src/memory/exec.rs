//! Stage-by-stage execution of wire-form aggregation pipelines.

use super::eval::{as_f64_num, compare_bson, eval_expr, get_path, matches, remove_path, set_path, truthy, values_equal};
use crate::errors::StoreError;
use crate::utils::num::{i64_to_u64_saturating_nonnegative, u64_to_usize_saturating, u128_to_u64_saturating};
use bson::{Bson, Document};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub(crate) const MAX_SORT_FIELDS: usize = 32;

type ExecResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

/// Everything a pipeline may read while running: the collections snapshot and the deadline.
pub(crate) struct ExecContext<'a> {
    pub collections: &'a HashMap<String, Vec<Document>>,
    pub deadline: Option<(Instant, Duration)>,
}

impl ExecContext<'_> {
    pub fn check_deadline(&self) -> ExecResult<()> {
        match self.deadline {
            Some((at, budget)) if Instant::now() >= at => {
                Err(StoreError::Timeout { timeout_ms: u128_to_u64_saturating(budget.as_millis()) })
            }
            _ => Ok(()),
        }
    }
}

/// Runs `pipeline` over `docs`. `vars` are the `$$` bindings in scope (non-empty inside `$lookup`).
pub(crate) fn run_pipeline(
    ctx: &ExecContext<'_>,
    mut docs: Vec<Document>,
    pipeline: &[Document],
    vars: &Document,
) -> ExecResult<Vec<Document>> {
    for stage in pipeline {
        ctx.check_deadline()?;
        let mut entries = stage.iter();
        let (Some((name, body)), None) = (entries.next(), entries.next()) else {
            return Err(StoreError::InvalidStage("each stage must have exactly one key".into()));
        };
        docs = match name.as_str() {
            "$match" => exec_match(docs, body_doc(name, body)?, vars)?,
            "$sort" => exec_sort(docs, &parse_sort(body_doc(name, body)?)?),
            "$skip" => docs.into_iter().skip(parse_count(name, body, true)?).collect(),
            "$limit" => docs.into_iter().take(parse_count(name, body, false)?).collect(),
            "$project" => exec_project(docs, body_doc(name, body)?, vars)?,
            "$lookup" => exec_lookup(ctx, docs, body_doc(name, body)?, vars)?,
            "$unwind" => {
                let (path, preserve) = parse_unwind(body)?;
                exec_unwind(docs, &path, preserve)
            }
            "$group" => exec_group(docs, body_doc(name, body)?, vars)?,
            other => return Err(StoreError::InvalidStage(format!("unsupported stage {other}"))),
        };
    }
    Ok(docs)
}

fn body_doc<'a>(name: &str, body: &'a Bson) -> ExecResult<&'a Document> {
    match body {
        Bson::Document(d) => Ok(d),
        _ => Err(StoreError::InvalidStage(format!("{name} requires a document"))),
    }
}

fn parse_count(name: &str, body: &Bson, allow_zero: bool) -> ExecResult<usize> {
    let n = match body {
        Bson::Int32(i) => i64::from(*i),
        Bson::Int64(i) => *i,
        Bson::Double(f) if f.fract() == 0.0 && f.is_finite() => {
            #[allow(clippy::cast_possible_truncation)]
            let i = *f as i64;
            i
        }
        _ => return Err(StoreError::InvalidStage(format!("{name} requires an integer"))),
    };
    if n < 0 || (n == 0 && !allow_zero) {
        return Err(StoreError::InvalidStage(format!("{name} must be {}, got {n}", if allow_zero { "non-negative" } else { "positive" })));
    }
    Ok(u64_to_usize_saturating(i64_to_u64_saturating_nonnegative(n)))
}

fn exec_match(docs: Vec<Document>, filter: &Document, vars: &Document) -> ExecResult<Vec<Document>> {
    let mut out = Vec::with_capacity(docs.len());
    for d in docs {
        if matches(&d, filter, vars)? {
            out.push(d);
        }
    }
    Ok(out)
}

pub(crate) fn parse_sort(body: &Document) -> ExecResult<Vec<SortSpec>> {
    if body.is_empty() {
        return Err(StoreError::InvalidStage("$sort requires at least one key".into()));
    }
    if body.len() > MAX_SORT_FIELDS {
        log::warn!("sort spec too long: {}", body.len());
    }
    body.iter()
        .take(MAX_SORT_FIELDS)
        .map(|(field, dir)| {
            let order = match as_f64_num(dir) {
                d if d == 1.0 => Order::Asc,
                d if d == -1.0 => Order::Desc,
                _ => return Err(StoreError::InvalidStage(format!("$sort direction for {field} must be 1 or -1"))),
            };
            Ok(SortSpec { field: field.clone(), order })
        })
        .collect()
}

/// Compares two documents by a multi-key sort; missing values sort first.
#[must_use]
pub fn compare_docs(a: &Document, b: &Document, sort: &[SortSpec]) -> Ordering {
    for s in sort {
        let ord = match (get_path(a, &s.field), get_path(b, &s.field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if s.order == Order::Asc { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

fn exec_sort(mut docs: Vec<Document>, sort: &[SortSpec]) -> Vec<Document> {
    docs.sort_by(|a, b| compare_docs(a, b, sort));
    docs
}

enum Projection {
    Include,
    Exclude,
}

fn exec_project(docs: Vec<Document>, spec: &Document, vars: &Document) -> ExecResult<Vec<Document>> {
    if spec.is_empty() {
        return Err(StoreError::InvalidStage("$project requires at least one field".into()));
    }
    let is_flag = |v: &Bson| matches!(v, Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_));
    let mut mode = None;
    for (k, v) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let this = if is_flag(v) && !truthy(Some(v)) { Projection::Exclude } else { Projection::Include };
        match (&mode, &this) {
            (Some(Projection::Include), Projection::Exclude) | (Some(Projection::Exclude), Projection::Include) => {
                return Err(StoreError::InvalidStage(format!("$project cannot mix inclusion and exclusion (at {k})")));
            }
            _ => mode = Some(this),
        }
    }
    let keep_id = spec.get("_id").is_none_or(|v| !is_flag(v) || truthy(Some(v)));

    docs.into_iter()
        .map(|d| match mode {
            Some(Projection::Exclude) => {
                let mut out = d;
                for (k, _) in spec {
                    if k != "_id" {
                        remove_path(&mut out, k);
                    }
                }
                if !keep_id {
                    out.remove("_id");
                }
                Ok(out)
            }
            Some(Projection::Include) | None => {
                let mut out = Document::new();
                if keep_id && let Some(id) = d.get("_id") {
                    out.insert("_id", id.clone());
                }
                for (k, v) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
                    let value = if is_flag(v) { get_path(&d, k).cloned() } else { eval_expr(&d, v, vars)? };
                    if let Some(value) = value {
                        set_path(&mut out, k, value);
                    }
                }
                if let Some(computed) = spec.get("_id").filter(|v| !is_flag(v)) {
                    if let Some(value) = eval_expr(&d, computed, vars)? {
                        out.insert("_id", value);
                    }
                }
                Ok(out)
            }
        })
        .collect()
}

fn str_field<'a>(body: &'a Document, key: &str) -> ExecResult<Option<&'a str>> {
    match body.get(key) {
        None => Ok(None),
        Some(Bson::String(s)) => Ok(Some(s)),
        Some(_) => Err(StoreError::InvalidStage(format!("$lookup '{key}' must be a string"))),
    }
}

fn exec_lookup(
    ctx: &ExecContext<'_>,
    docs: Vec<Document>,
    body: &Document,
    outer_vars: &Document,
) -> ExecResult<Vec<Document>> {
    let from = str_field(body, "from")?.ok_or_else(|| StoreError::InvalidStage("$lookup requires 'from'".into()))?;
    let as_field = str_field(body, "as")?.ok_or_else(|| StoreError::InvalidStage("$lookup requires 'as'".into()))?;
    let local = str_field(body, "localField")?;
    let foreign = str_field(body, "foreignField")?;
    let bindings = match body.get("let") {
        None => Document::new(),
        Some(Bson::Document(d)) => d.clone(),
        Some(_) => return Err(StoreError::InvalidStage("$lookup 'let' must be a document".into())),
    };
    let sub: Vec<Document> = match body.get("pipeline") {
        None => Vec::new(),
        Some(Bson::Array(stages)) => stages
            .iter()
            .map(|s| match s {
                Bson::Document(d) => Ok(d.clone()),
                _ => Err(StoreError::InvalidStage("$lookup pipeline entries must be documents".into())),
            })
            .collect::<ExecResult<_>>()?,
        Some(_) => return Err(StoreError::InvalidStage("$lookup 'pipeline' must be an array".into())),
    };
    if local.is_some() != foreign.is_some() {
        return Err(StoreError::InvalidStage("$lookup needs both localField and foreignField".into()));
    }
    if local.is_none() && !body.contains_key("pipeline") {
        return Err(StoreError::InvalidStage("$lookup requires localField/foreignField or a pipeline".into()));
    }

    // A missing collection joins as empty.
    let foreign_docs: &[Document] = ctx.collections.get(from).map_or(&[], Vec::as_slice);

    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        ctx.check_deadline()?;
        let mut vars = outer_vars.clone();
        for (name, expr) in &bindings {
            if let Some(v) = eval_expr(&doc, expr, outer_vars)? {
                vars.insert(name.clone(), v);
            }
        }
        let candidates: Vec<Document> = match (local, foreign) {
            (Some(l), Some(f)) => {
                let key = get_path(&doc, l).cloned().unwrap_or(Bson::Null);
                foreign_docs.iter().filter(|fd| equality_join(get_path(fd, f), &key)).cloned().collect()
            }
            _ => foreign_docs.to_vec(),
        };
        let joined = run_pipeline(ctx, candidates, &sub, &vars)?;
        set_path(&mut doc, as_field, Bson::Array(joined.into_iter().map(Bson::Document).collect()));
        out.push(doc);
    }
    Ok(out)
}

fn equality_join(foreign: Option<&Bson>, key: &Bson) -> bool {
    let foreign = foreign.unwrap_or(&Bson::Null);
    let hit = |x: &Bson| values_equal(foreign, x) || matches!(foreign, Bson::Array(items) if items.iter().any(|i| values_equal(i, x)));
    match key {
        Bson::Array(keys) => keys.iter().any(hit),
        k => hit(k),
    }
}

fn parse_unwind(body: &Bson) -> ExecResult<(String, bool)> {
    let (path, preserve) = match body {
        Bson::String(p) => (p.as_str(), false),
        Bson::Document(d) => {
            let Some(Bson::String(p)) = d.get("path") else {
                return Err(StoreError::InvalidStage("$unwind requires 'path' string".into()));
            };
            (p.as_str(), truthy(d.get("preserveNullAndEmptyArrays")))
        }
        _ => return Err(StoreError::InvalidStage("$unwind must be a string or object".into())),
    };
    let path = path
        .strip_prefix('$')
        .ok_or_else(|| StoreError::InvalidStage("$unwind path must start with $".into()))?;
    Ok((path.to_string(), preserve))
}

/// One row per array element; empty, null and missing arrays drop the row unless `preserve`.
pub(crate) fn exec_unwind(docs: Vec<Document>, path: &str, preserve: bool) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let items = match get_path(&doc, path) {
            Some(Bson::Array(items)) => items.clone(),
            Some(Bson::Null) | None => Vec::new(),
            Some(_) => {
                out.push(doc);
                continue;
            }
        };
        if items.is_empty() {
            if preserve {
                out.push(doc);
            }
            continue;
        }
        for item in items {
            let mut row = doc.clone();
            set_path(&mut row, path, item);
            out.push(row);
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
enum Sum {
    Int(i64),
    Float(f64),
}

impl Sum {
    #[allow(clippy::cast_precision_loss)]
    fn add(self, v: &Bson) -> Self {
        match (self, v) {
            (Self::Int(a), Bson::Int32(b)) => a.checked_add(i64::from(*b)).map_or(Self::Float(a as f64 + f64::from(*b)), Self::Int),
            (Self::Int(a), Bson::Int64(b)) => a.checked_add(*b).map_or(Self::Float(a as f64 + *b as f64), Self::Int),
            (Self::Int(a), v) if is_number(v) => Self::Float(a as f64 + as_f64_num(v)),
            (Self::Float(a), v) if is_number(v) => Self::Float(a + as_f64_num(v)),
            (s, _) => s,
        }
    }

    fn into_bson(self) -> Bson {
        match self {
            Self::Int(i) => i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32),
            Self::Float(f) => Bson::Double(f),
        }
    }
}

fn is_number(v: &Bson) -> bool {
    matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

fn exec_group(docs: Vec<Document>, body: &Document, vars: &Document) -> ExecResult<Vec<Document>> {
    let key_expr = body.get("_id").ok_or_else(|| StoreError::InvalidStage("$group requires '_id'".into()))?;
    let mut accs: Vec<(&str, &Bson)> = Vec::new();
    for (name, spec) in body.iter().filter(|(k, _)| k.as_str() != "_id") {
        match spec {
            Bson::Document(d) if d.len() == 1 && d.contains_key("$sum") => {
                if let Some(expr) = d.get("$sum") {
                    accs.push((name.as_str(), expr));
                }
            }
            _ => return Err(StoreError::InvalidStage(format!("$group accumulator {name} must be {{$sum: ..}}"))),
        }
    }

    // Groups keep first-seen order.
    let mut groups: Vec<(Bson, Vec<Sum>)> = Vec::new();
    for doc in &docs {
        let key = eval_expr(doc, key_expr, vars)?.unwrap_or(Bson::Null);
        let idx = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
            Some(i) => i,
            None => {
                groups.push((key, vec![Sum::Int(0); accs.len()]));
                groups.len() - 1
            }
        };
        let (_, sums) = &mut groups[idx];
        for (slot, (_, expr)) in sums.iter_mut().zip(&accs) {
            if let Some(v) = eval_expr(doc, expr, vars)? {
                *slot = slot.add(&v);
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, sums)| {
            let mut row = Document::new();
            row.insert("_id", key);
            for ((name, _), sum) in accs.iter().zip(sums) {
                row.insert(*name, sum.into_bson());
            }
            row
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn run(collections: &HashMap<String, Vec<Document>>, docs: Vec<Document>, pipeline: Vec<Document>) -> ExecResult<Vec<Document>> {
        let ctx = ExecContext { collections, deadline: None };
        run_pipeline(&ctx, docs, &pipeline, &Document::new())
    }

    #[test]
    fn sort_skip_limit() {
        let docs = (1..=5).map(|i| doc! { "n": i }).collect();
        let out = run(&HashMap::new(), docs, vec![
            doc! { "$sort": { "n": -1 } },
            doc! { "$skip": 1_i64 },
            doc! { "$limit": 2_i64 },
        ])
        .unwrap();
        assert_eq!(out, vec![doc! { "n": 4 }, doc! { "n": 3 }]);
    }

    #[test]
    fn limit_zero_is_rejected() {
        let err = run(&HashMap::new(), vec![], vec![doc! { "$limit": 0 }]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidStage(_)));
    }

    #[test]
    fn projection_include_exclude_and_id() {
        let docs = vec![doc! { "_id": 1, "a": 1, "b": { "c": 2, "d": 3 } }];
        let inc = run(&HashMap::new(), docs.clone(), vec![doc! { "$project": { "b.c": 1 } }]).unwrap();
        assert_eq!(inc, vec![doc! { "_id": 1, "b": { "c": 2 } }]);
        let exc = run(&HashMap::new(), docs.clone(), vec![doc! { "$project": { "a": 0, "_id": 0 } }]).unwrap();
        assert_eq!(exc, vec![doc! { "b": { "c": 2, "d": 3 } }]);
        let renamed = run(&HashMap::new(), docs.clone(), vec![doc! { "$project": { "_id": 0, "x": "$b.d" } }]).unwrap();
        assert_eq!(renamed, vec![doc! { "x": 3 }]);
        assert!(run(&HashMap::new(), docs, vec![doc! { "$project": { "a": 1, "b": 0 } }]).is_err());
    }

    #[test]
    fn unwind_drops_empty_and_missing_unless_preserved() {
        let docs = vec![doc! { "k": 1, "t": ["x", "y"] }, doc! { "k": 2, "t": [] }, doc! { "k": 3 }, doc! { "k": 4, "t": "s" }];
        let out = exec_unwind(docs.clone(), "t", false);
        assert_eq!(out, vec![
            doc! { "k": 1, "t": "x" },
            doc! { "k": 1, "t": "y" },
            doc! { "k": 4, "t": "s" },
        ]);
        assert_eq!(exec_unwind(docs, "t", true).len(), 5);
    }

    #[test]
    fn correlated_lookup_binds_outer_values() {
        let mut cols = HashMap::new();
        cols.insert("authors".to_string(), vec![
            doc! { "_id": 1, "name": "ann", "rank": 2 },
            doc! { "_id": 2, "name": "bob", "rank": 1 },
        ]);
        let posts = vec![doc! { "title": "p", "author_id": 2 }];
        let out = run(&cols, posts, vec![doc! { "$lookup": {
            "from": "authors",
            "let": { "id": "$author_id" },
            "pipeline": [
                { "$match": { "$expr": { "$eq": ["$_id", "$$id"] } } },
                { "$project": { "_id": 0, "name": 1 } },
            ],
            "as": "author",
        } }])
        .unwrap();
        assert_eq!(out, vec![doc! { "title": "p", "author_id": 2, "author": [ { "name": "bob" } ] }]);
    }

    #[test]
    fn simple_lookup_form_joins_on_equality() {
        let mut cols = HashMap::new();
        cols.insert("tags".to_string(), vec![doc! { "post": 1, "t": "a" }, doc! { "post": 2, "t": "b" }]);
        let out = run(&cols, vec![doc! { "_id": 1 }], vec![doc! { "$lookup": {
            "from": "tags", "localField": "_id", "foreignField": "post", "as": "tags",
        } }])
        .unwrap();
        assert_eq!(out[0].get_array("tags").unwrap().len(), 1);
    }

    #[test]
    fn group_sums_constants_and_fields() {
        let docs = vec![
            doc! { "c": "x", "v": 2 },
            doc! { "c": "y", "v": 1 },
            doc! { "c": "x", "v": 3.5 },
        ];
        let out = run(&HashMap::new(), docs, vec![doc! { "$group": { "_id": "$c", "n": { "$sum": 1 }, "total": { "$sum": "$v" } } }]).unwrap();
        assert_eq!(out, vec![
            doc! { "_id": "x", "n": 2, "total": 5.5 },
            doc! { "_id": "y", "n": 1, "total": 1 },
        ]);
    }

    #[test]
    fn expired_deadline_times_out() {
        let cols = HashMap::new();
        let ctx = ExecContext { collections: &cols, deadline: Some((Instant::now(), Duration::ZERO)) };
        let err = run_pipeline(&ctx, vec![doc! {}], &[doc! { "$match": {} }], &Document::new()).unwrap_err();
        assert!(matches!(err, StoreError::Timeout { timeout_ms: 0 }));
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(matches!(
            run(&HashMap::new(), vec![], vec![doc! { "$facet": {} }]),
            Err(StoreError::InvalidStage(_))
        ));
    }
}
