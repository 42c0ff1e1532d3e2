use super::select::{Materializer, render};
use super::stage::{PipelineBuilder, Stage, to_documents};
use crate::errors::DbError;
use crate::logger::PIPELINE_TARGET;
use crate::store::{CollectionHandle, ExecOptions};
use crate::utils::num::{u128_to_u64_saturating, usize_to_u64};
use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Capacity hint for the result list; larger groupings simply grow it.
pub const EXPECTED_GROUPS: usize = 100;

/// One group: the field value and how many documents carry it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCount {
    #[serde(rename = "_id")]
    pub field: Bson,
    pub count: i64,
}

/// `$match` (filter or everything), `$group` on `$field` with a `$sum: 1` counter, `$sort` by count descending.
#[must_use]
pub fn group_count_pipeline(filter: Option<Document>, field: &str) -> Vec<Stage> {
    PipelineBuilder::with_capacity(3)
        .stage(Stage::Match(filter.unwrap_or_default()))
        .stage(Stage::Group { key: Bson::String(format!("${field}")), accumulators: doc! { "count": { "$sum": 1 } } })
        .stage(Stage::Sort(doc! { "count": -1 }))
        .build()
}

/// Counts documents per distinct value of `field`, most frequent first.
///
/// # Errors
/// Returns `DbError::Aggregate` if the store rejects the pipeline and `DbError::Materialize` if
/// the rows cannot be read back.
pub fn group_count(
    collection: &dyn CollectionHandle,
    filter: Option<Document>,
    field: &str,
    opts: &ExecOptions,
) -> Result<Vec<GroupCount>, DbError> {
    const CONTEXT: &str = "group_count";
    let wire = to_documents(&group_count_pipeline(filter, field));
    let name = collection.name().to_string();
    let started = Instant::now();
    log::info!(target: PIPELINE_TARGET, "{CONTEXT} {name} {}", render(&wire));

    let cursor = collection
        .aggregate(&wire, opts)
        .map_err(|source| DbError::Aggregate { context: CONTEXT, collection: name.clone(), source })?;
    let mut out = Vec::with_capacity(EXPECTED_GROUPS);
    Materializer::new(cursor, CONTEXT, name.clone()).bind(&mut out)?;

    crate::dev6!(
        "{{\"bench\":\"query\",\"op\":\"group_count\",\"collection\":\"{}\",\"field\":\"{}\",\"duration_ms\":{},\"groups\":{}}}",
        name,
        field,
        u128_to_u64_saturating(started.elapsed().as_millis()),
        usize_to_u64(out.len())
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_groups_then_sorts_descending() {
        let docs = to_documents(&group_count_pipeline(None, "city"));
        assert_eq!(
            docs,
            vec![
                doc! { "$match": {} },
                doc! { "$group": { "_id": "$city", "count": { "$sum": 1 } } },
                doc! { "$sort": { "count": -1 } },
            ]
        );
    }

    #[test]
    fn group_row_decodes_from_wire_names() {
        let row = doc! { "_id": "paris", "count": 3 };
        let g: GroupCount = bson::deserialize_from_document(row).unwrap();
        assert_eq!(g, GroupCount { field: Bson::String("paris".into()), count: 3 });
    }
}
