// src/error.rs

use thiserror::Error;

use crate::schema::ValidationReport;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Every way a pipeline run can stop. None of these are retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch from {location} failed: {source}")]
    Fetch {
        location: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("expected column `{column}` is missing (found: {})", .available.join(", "))]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("columns {first:?} and {second:?} both normalize to `{normalized}`")]
    DuplicateColumn {
        first: String,
        second: String,
        normalized: String,
    },

    #[error("column `{column}` already exists")]
    ColumnExists { column: String },

    #[error("division by zero deriving `{column}` at row {row}")]
    DivisionByZero { column: String, row: usize },

    #[error("silver failed validation:\n{0}")]
    Validation(ValidationReport),

    #[error("aggregation: {0}")]
    Aggregation(String),

    #[error("query: {0}")]
    Query(String),

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    DuckDb(#[from] duckdb::Error),
}

impl PipelineError {
    pub(crate) fn fetch(
        location: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        PipelineError::Fetch {
            location: location.into(),
            source: source.into(),
        }
    }
}
