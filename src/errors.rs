use thiserror::Error;

/// Failures raised by a collection handle (the store side of the boundary).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("Collection not found: {0}")]
    NoSuchCollection(String),

    #[error("invalid stage: {0}")]
    InvalidStage(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("operation exceeded its time limit of {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("cursor already closed")]
    CursorClosed,

    #[error("BSON: {0}")]
    Bson(#[from] bson::error::Error),

    #[error("feature not implemented: {0}")]
    FeatureNotImplemented(String),
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("unsupported condition operator: {0:?}")]
    UnsupportedOperator(String),

    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("{context}: aggregate on `{collection}` failed: {source}")]
    Aggregate {
        context: &'static str,
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("{context}: count on `{collection}` failed: {source}")]
    Count {
        context: &'static str,
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("{context}: materializing rows from `{collection}` failed: {source}")]
    Materialize {
        context: &'static str,
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("BSON: {0}")]
    Bson(#[from] bson::error::Error),
}

impl DbError {
    /// The underlying store failure, if this error wraps one.
    #[must_use]
    pub const fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Aggregate { source, .. }
            | Self::Count { source, .. }
            | Self::Materialize { source, .. } => Some(source),
            _ => None,
        }
    }
}
