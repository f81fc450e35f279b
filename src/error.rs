use thiserror::Error;

/// Failure reported by the backing data store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown filter field `{field}` for {entity}")]
    UnknownFilter { entity: &'static str, field: String },
    #[error("filter `{field}` expects {expected}")]
    FilterMismatch {
        field: String,
        expected: &'static str,
    },
    #[error("page number must be >= 1, got {0}")]
    InvalidPage(i64),
    #[error("{0}")]
    Remote(#[from] StoreError),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::UnknownFilter { .. } | QueryError::FilterMismatch { .. } => {
                "invalid_filter"
            }
            QueryError::InvalidPage(_) => "invalid_page",
            QueryError::Remote(_) => "db_query_failed",
        }
    }

    /// Validation failures are rejected up front; only store failures leave
    /// the screen in a retryable error state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Remote(_))
    }
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("{entity} #{id} still has {count} {label}")]
    HasDependents {
        entity: &'static str,
        id: i64,
        label: &'static str,
        count: u64,
    },
    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{0}")]
    Remote(#[from] StoreError),
}

impl DeleteError {
    pub fn code(&self) -> &'static str {
        match self {
            DeleteError::HasDependents { .. } => "has_dependents",
            DeleteError::NotFound { .. } => "not_found",
            DeleteError::Remote(_) => "db_delete_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: the current page is empty")]
    EmptyPage,
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExportError {
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::EmptyPage => "empty_page",
            ExportError::Write { .. } => "export_write_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    InvalidValue {
        field: String,
        expected: &'static str,
    },
    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{0}")]
    Remote(#[from] StoreError),
}

impl RecordError {
    pub fn code(&self) -> &'static str {
        match self {
            RecordError::UnknownField(_)
            | RecordError::MissingField(_)
            | RecordError::InvalidValue { .. } => "bad_params",
            RecordError::NotFound { .. } => "not_found",
            RecordError::Remote(_) => "db_write_failed",
        }
    }
}
