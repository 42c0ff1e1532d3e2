//! Joins expressed as correlated sub-pipelines.
//!
//! Each [`LookupSpec`] becomes one `$lookup` stage whose inner pipeline filters the foreign
//! collection on `foreign_field == $$id` (the outer row's `local_field`), then sorts, limits and
//! projects before the matches are attached under `as_field`. With `unwind` set, a `$unwind`
//! stage follows so a single match becomes an embedded sub-document and rows without a match
//! are dropped.

use super::stage::{PipelineBuilder, Stage};
use bson::{Document, doc};
use serde::{Deserialize, Serialize};

/// Name of the variable carrying the outer row's local field into the sub-pipeline.
pub const LOOKUP_BINDING: &str = "id";

/// Limit used when a spec leaves `limit` at zero.
pub const DEFAULT_LOOKUP_LIMIT: i64 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupSpec {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
    #[serde(default)]
    pub sort: Option<Document>,
    #[serde(default)]
    pub project: Option<Document>,
    #[serde(default)]
    pub unwind: bool,
    /// `0` means "the single best match".
    #[serde(default)]
    pub limit: i64,
}

impl LookupSpec {
    #[must_use]
    pub fn new(from: &str, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        Self {
            from: from.to_string(),
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub fn project(mut self, project: Document) -> Self {
        self.project = Some(project);
        self
    }

    #[must_use]
    pub const fn unwind(mut self, unwind: bool) -> Self {
        self.unwind = unwind;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub const fn effective_limit(&self) -> i64 {
        if self.limit <= 0 { DEFAULT_LOOKUP_LIMIT } else { self.limit }
    }

    /// The correlated sub-pipeline run against `from` for each outer row.
    #[must_use]
    pub fn sub_pipeline(&self) -> Vec<Stage> {
        let correlate = doc! {
            "$expr": { "$eq": [format!("${}", self.foreign_field), format!("$${LOOKUP_BINDING}")] }
        };
        PipelineBuilder::with_capacity(4)
            .stage(Stage::Match(correlate))
            .maybe(non_empty(self.sort.as_ref()).map(Stage::Sort))
            .stage(Stage::Limit(self.effective_limit()))
            .maybe(non_empty(self.project.as_ref()).map(Stage::Project))
            .build()
    }

    /// The `$lookup` stage and, when `unwind` is set, the `$unwind` right after it.
    #[must_use]
    pub fn expand(&self) -> Vec<Stage> {
        let mut bindings = Document::new();
        bindings.insert(LOOKUP_BINDING, format!("${}", self.local_field));
        let lookup = Stage::Lookup {
            from: self.from.clone(),
            bindings,
            pipeline: self.sub_pipeline(),
            as_field: self.as_field.clone(),
        };
        let unwind = self.unwind.then(|| Stage::Unwind { path: self.as_field.clone() });
        PipelineBuilder::with_capacity(2).stage(lookup).maybe(unwind).build()
    }
}

// An empty $sort or $project is rejected by the store, so those are left out.
fn non_empty(d: Option<&Document>) -> Option<Document> {
    d.filter(|d| !d.is_empty()).cloned()
}

/// Expands every spec in input order.
#[must_use]
pub fn expand_all(specs: &[LookupSpec]) -> Vec<Stage> {
    specs.iter().flat_map(LookupSpec::expand).collect()
}
