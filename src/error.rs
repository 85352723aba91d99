//! Error types for ingestion, configuration and the pipeline run.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::fetch::SourceError;

/// A single raw record that could not be turned into an [`Observation`].
///
/// Never fatal: the record is dropped and reported back to the caller.
///
/// [`Observation`]: crate::observation::Observation
#[derive(Debug, Clone, PartialEq, Error)]
#[error("record {index} dropped: {reason}")]
pub struct MalformedRecordError {
    /// Position of the record in the ingested batch.
    pub index: usize,
    pub reason: String,
}

/// Raised only when the caller asks for strictly pre-sorted input.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("record {index} at {timestamp} does not follow {previous}")]
pub struct UnsortedInputError {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub previous: DateTime<Utc>,
}

/// Misconfiguration detected before any aggregation runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("rolling window for {variable} must be at least one hour, got {hours}")]
    InvalidWindow { variable: String, hours: i64 },

    #[error("malformed comparator '{0}', expected one of >, >=, <, <=")]
    InvalidComparator(String),

    #[error("unknown reducer '{0}', expected mean, max or min")]
    InvalidReducer(String),

    #[error("unknown statistic '{0}'")]
    InvalidStatistic(String),

    #[error("threshold '{label}' for {variable} is not a finite number")]
    InvalidThreshold { variable: String, label: String },

    #[error("min_coverage for {variable} must be in (0, 1], got {value}")]
    InvalidCoverage { variable: String, value: f64 },

    #[error("{0} is configured but not in the requested variable set")]
    NotRequested(String),

    #[error("at least one variable must be requested")]
    NoVariables,

    #[error("invalid coordinates ({latitude}, {longitude})")]
    InvalidLocation { latitude: f64, longitude: f64 },

    #[error("failed to read config: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Errors surfaced by a full pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    UnsortedInput(#[from] UnsortedInputError),

    /// Recoverable "no data" signal: the batch held no usable observation.
    #[error("no observations in batch ({dropped} malformed records dropped)")]
    EmptyBatch { dropped: usize },

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl PipelineError {
    /// `true` for the "no data" outcome, which callers should not treat as a failure.
    pub fn is_empty_batch(&self) -> bool {
        matches!(self, PipelineError::EmptyBatch { .. })
    }
}
