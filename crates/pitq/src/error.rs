//! Error types for the normalization pipeline.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PitError>;

/// Errors that can occur while normalizing fundamentals.
///
/// Missing data is deliberately absent from this taxonomy: a period with no
/// surviving observation propagates as a null value downstream, never as an
/// error, because partial coverage is the norm for real filing data.
#[derive(Debug, Error)]
pub enum PitError {
    /// YTD differencing would have to mix two filed snapshots for one fiscal
    /// year. This means deduplication failed to produce a self-consistent
    /// snapshot and the affected (entity, metric, fiscal_year) unit cannot
    /// be trusted. Other units continue processing.
    #[error("inconsistent snapshot for entity={entity} metric={metric} fiscal_year={fiscal_year}")]
    InconsistentSnapshot {
        /// Entity whose snapshot is inconsistent
        entity: String,
        /// Metric whose snapshot is inconsistent
        metric: String,
        /// Fiscal year of the inconsistent snapshot
        fiscal_year: i32,
    },

    /// A post-build invariant failed (duplicate primary keys, a filing that
    /// predates its period). Fatal for the whole build: these indicate a
    /// pipeline bug, not a data-coverage gap.
    #[error("validation failed:\n{0}")]
    Validation(String),

    /// Metric name not present in the registry.
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    /// A fiscal period label could not be parsed.
    #[error("invalid fiscal period label: {0}")]
    InvalidPeriod(String),

    /// Malformed input record.
    #[error("invalid input at line {line}: {source}")]
    InvalidRecord {
        /// 1-based line number in the input file
        line: usize,
        /// Underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// Polars DataFrame error
    #[error("dataframe error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
