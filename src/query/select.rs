use super::lookup::{LookupSpec, expand_all};
use super::pagination::Pagination;
use super::stage::{PipelineBuilder, Stage, stage_names, to_documents};
use crate::errors::{DbError, StoreError};
use crate::logger::PIPELINE_TARGET;
use crate::store::{CollectionHandle, ExecOptions, RowCursor};
use crate::utils::num::{u128_to_u64_saturating, usize_to_u64};
use bson::Document;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Paged, sorted, projected and joined read over one collection.
#[derive(Debug, Clone)]
pub struct Select {
    page: Pagination,
    filter: Option<Document>,
    sort: Option<Document>,
    project: Option<Document>,
    lookups: Vec<LookupSpec>,
    opts: ExecOptions,
}

/// Result of a successful [`Select::run`]: the pending rows and the filter's total match count.
#[derive(Debug)]
pub struct SelectOutput {
    pub rows: Materializer,
    pub total: u64,
}

impl Select {
    #[must_use]
    pub const fn new(page: Pagination) -> Self {
        Self { page, filter: None, sort: None, project: None, lookups: Vec::new(), opts: ExecOptions { timeout: None } }
    }

    #[must_use]
    pub fn filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
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
    pub fn lookup(mut self, spec: LookupSpec) -> Self {
        self.lookups.push(spec);
        self
    }

    #[must_use]
    pub fn lookups<I: IntoIterator<Item = LookupSpec>>(mut self, specs: I) -> Self {
        self.lookups.extend(specs);
        self
    }

    #[must_use]
    pub const fn options(mut self, opts: ExecOptions) -> Self {
        self.opts = opts;
        self
    }

    /// The filter actually sent: the caller's, or `{}` to match everything.
    #[must_use]
    pub fn normalized_filter(&self) -> Document {
        self.filter.clone().unwrap_or_default()
    }

    /// Stages in execution order: match, sort, pagination, project, lookups.
    ///
    /// # Errors
    /// Returns `DbError::InvalidPagination` if the skip cannot be represented.
    pub fn pipeline(&self) -> Result<Vec<Stage>, DbError> {
        let stages = PipelineBuilder::with_capacity(5 + 2 * self.lookups.len())
            .stage(Stage::Match(self.normalized_filter()))
            .maybe(self.sort.clone().map(Stage::Sort))
            .stages(self.page.stages()?)
            .maybe(self.project.clone().map(Stage::Project))
            .stages(expand_all(&self.lookups))
            .build();
        Ok(stages)
    }

    /// Executes the pipeline and counts the filter's matches.
    ///
    /// # Errors
    /// - `DbError::InvalidPagination` before anything is sent,
    /// - `DbError::Aggregate` if the store rejects the pipeline,
    /// - `DbError::Count` if counting fails (the opened cursor is closed first).
    pub fn run(&self, collection: &dyn CollectionHandle) -> Result<SelectOutput, DbError> {
        const CONTEXT: &str = "select";
        let stages = self.pipeline()?;
        let wire = to_documents(&stages);
        let name = collection.name().to_string();
        let started = Instant::now();
        log::debug!("{CONTEXT}: running {:?} on `{name}`", stage_names(&stages));
        log::info!(target: PIPELINE_TARGET, "{CONTEXT} {name} {}", render(&wire));

        let cursor = collection
            .aggregate(&wire, &self.opts)
            .map_err(|source| DbError::Aggregate { context: CONTEXT, collection: name.clone(), source })?;
        let rows = Materializer::new(cursor, CONTEXT, name.clone());

        let filter = self.normalized_filter();
        // `rows` drops (and closes) on the error path.
        let total = collection
            .count_documents(&filter, &self.opts)
            .map_err(|source| DbError::Count { context: CONTEXT, collection: name.clone(), source })?;

        crate::dev6!(
            "{{\"bench\":\"query\",\"op\":\"select\",\"collection\":\"{}\",\"duration_ms\":{},\"stages\":{},\"total\":{}}}",
            name,
            u128_to_u64_saturating(started.elapsed().as_millis()),
            usize_to_u64(stages.len()),
            total
        );
        Ok(SelectOutput { rows, total })
    }
}

/// Positional form of [`Select`]: page, filter, sort, projection, lookups.
///
/// # Errors
/// See [`Select::run`].
pub fn select(
    collection: &dyn CollectionHandle,
    page: Pagination,
    filter: Option<Document>,
    sort: Option<Document>,
    project: Option<Document>,
    lookups: &[LookupSpec],
) -> Result<SelectOutput, DbError> {
    Select { page, filter, sort, project, lookups: lookups.to_vec(), opts: ExecOptions::default() }.run(collection)
}

pub(crate) fn render(wire: &[Document]) -> String {
    let values: Vec<serde_json::Value> =
        wire.iter().map(|d| bson::Bson::Document(d.clone()).into_relaxed_extjson()).collect();
    serde_json::Value::Array(values).to_string()
}

/// Deferred binding of a cursor's rows into a caller-owned container.
///
/// Owns the cursor. The cursor is closed exactly once: by [`Materializer::bind`] (success or
/// failure) or, if never bound, on drop.
pub struct Materializer {
    cursor: Box<dyn RowCursor>,
    context: &'static str,
    collection: String,
}

impl Materializer {
    pub(crate) fn new(cursor: Box<dyn RowCursor>, context: &'static str, collection: String) -> Self {
        Self { cursor, context, collection }
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Drains every row, decodes it as `T` and appends the rows to `out`.
    ///
    /// `out` is only extended if every row decodes. Returns the number of rows appended.
    ///
    /// # Errors
    /// Returns `DbError::Materialize` if reading, decoding or closing fails.
    pub fn bind<T: DeserializeOwned>(mut self, out: &mut Vec<T>) -> Result<usize, DbError> {
        let drained = self.drain::<T>();
        let closed = self.cursor.close();
        let rows = drained.map_err(|source| self.failure(source))?;
        closed.map_err(|source| self.failure(source))?;
        let n = rows.len();
        out.extend(rows);
        Ok(n)
    }

    /// Rows as raw documents.
    ///
    /// # Errors
    /// Returns `DbError::Materialize` if reading or closing fails.
    pub fn documents(self) -> Result<Vec<Document>, DbError> {
        let mut out = Vec::new();
        self.bind(&mut out)?;
        Ok(out)
    }

    fn drain<T: DeserializeOwned>(&mut self) -> Result<Vec<T>, StoreError> {
        let mut rows = Vec::new();
        while let Some(row) = self.cursor.next_row() {
            rows.push(bson::deserialize_from_document::<T>(row?)?);
        }
        Ok(rows)
    }

    fn failure(&self, source: StoreError) -> DbError {
        DbError::Materialize { context: self.context, collection: self.collection.clone(), source }
    }
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("context", &self.context)
            .field("collection", &self.collection)
            .field("closed", &self.cursor.is_closed())
            .finish()
    }
}

impl Drop for Materializer {
    fn drop(&mut self) {
        if !self.cursor.is_closed() {
            log::debug!("{}: closing unbound cursor on `{}`", self.context, self.collection);
            if let Err(e) = self.cursor.close() {
                log::warn!("{}: closing cursor on `{}` failed: {e}", self.context, self.collection);
            }
        }
    }
}

/// Serializable description of a select, as read from JSON by the CLI.
///
/// `page_size` and `page_number` keep the raw integer convention (`-1` = unlimited, page `0` =
/// no skip).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectSpec {
    #[serde(default = "unlimited_raw")]
    pub page_size: i64,
    #[serde(default)]
    pub page_number: i64,
    #[serde(default)]
    pub filter: Option<Document>,
    #[serde(default)]
    pub sort: Option<Document>,
    #[serde(default)]
    pub project: Option<Document>,
    #[serde(default)]
    pub lookups: Vec<LookupSpec>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

const fn unlimited_raw() -> i64 {
    super::pagination::UNLIMITED_SENTINEL
}

impl TryFrom<SelectSpec> for Select {
    type Error = DbError;
    fn try_from(spec: SelectSpec) -> Result<Self, Self::Error> {
        Ok(Self {
            page: Pagination::from_raw(spec.page_size, spec.page_number)?,
            filter: spec.filter,
            sort: spec.sort,
            project: spec.project,
            lookups: spec.lookups,
            opts: ExecOptions { timeout: spec.timeout_ms.map(std::time::Duration::from_millis) },
        })
    }
}

/// # Errors
/// Returns an error if the JSON cannot be parsed or describes invalid pagination.
pub fn parse_select_json(json: &str) -> Result<Select, DbError> {
    let spec: SelectSpec = serde_json::from_str(json)?;
    Select::try_from(spec)
}
