use crate::config::ConnectionConfig;
use crate::errors::DbError;
use crate::memory::MemoryDatabase;
use crate::query::select::render;
use crate::query::{group_count_pipeline, parse_select_json, stage};
use bson::{Bson, Document};
use std::io::Write;
use std::path::{Path, PathBuf};

pub enum Command {
    /// Print the wire pipeline a JSON select spec expands to.
    Pipeline { spec: String },
    /// Print the group-count pipeline for `field`.
    GroupPipeline { field: String, filter_json: Option<String> },
    /// Run a select spec over NDJSON files loaded into an in-memory database.
    Select { spec: String, collection: String, data: Vec<(String, PathBuf)> },
    /// Print the connection string resolved from config and environment.
    Uri { config: Option<PathBuf>, show_password: bool },
}

/// `spec` is either a path to a JSON file or the JSON itself.
fn read_spec(spec: &str) -> Result<String, DbError> {
    let path = Path::new(spec);
    if !spec.trim_start().starts_with('{') && path.exists() {
        return Ok(std::fs::read_to_string(path)?);
    }
    Ok(spec.to_string())
}

fn parse_document(json: &str) -> Result<Document, DbError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    match Bson::try_from(value) {
        Ok(Bson::Document(d)) => Ok(d),
        Ok(other) => Err(DbError::Config(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(DbError::Config(format!("invalid extended JSON: {e}"))),
    }
}

/// Parses a `name=path` data argument.
///
/// # Errors
/// Returns `DbError::Config` when the `=` is missing or either side is empty.
pub fn parse_data_arg(arg: &str) -> Result<(String, PathBuf), DbError> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name.to_string(), PathBuf::from(path))),
        _ => Err(DbError::Config(format!("expected collection=path, got `{arg}`"))),
    }
}

fn load_ndjson(db: &MemoryDatabase, name: &str, path: &Path) -> Result<usize, DbError> {
    let text = std::fs::read_to_string(path)?;
    let mut docs = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        docs.push(parse_document(line)?);
    }
    let n = docs.len();
    db.collection(name)
        .insert_many(docs)
        .map_err(|e| DbError::Config(format!("loading {}: {e}", path.display())))?;
    log::info!("loaded {n} documents into `{name}` from {}", path.display());
    Ok(n)
}

/// Executes `cmd`, writing its output to `out`.
///
/// # Errors
/// Returns the first parse, config, I/O or execution failure.
pub fn run(cmd: Command, out: &mut dyn Write) -> Result<(), DbError> {
    match cmd {
        Command::Pipeline { spec } => {
            let select = parse_select_json(&read_spec(&spec)?)?;
            writeln!(out, "{}", render(&stage::to_documents(&select.pipeline()?)))?;
        }
        Command::GroupPipeline { field, filter_json } => {
            let filter = filter_json.as_deref().map(parse_document).transpose()?;
            writeln!(out, "{}", render(&stage::to_documents(&group_count_pipeline(filter, &field))))?;
        }
        Command::Select { spec, collection, data } => {
            let select = parse_select_json(&read_spec(&spec)?)?;
            let db = MemoryDatabase::new();
            for (name, path) in &data {
                load_ndjson(&db, name, path)?;
            }
            let result = select.run(&db.collection(&collection))?;
            let total = result.total;
            let rows = result.rows.documents()?;
            writeln!(out, "{{\"total\":{total},\"rows\":{}}}", render(&rows))?;
        }
        Command::Uri { config, show_password } => {
            let cfg = ConnectionConfig::resolve(config.as_deref())?;
            let uri = if show_password { cfg.uri() } else { cfg.redacted_uri() };
            writeln!(out, "{uri}")?;
        }
    }
    Ok(())
}
