//! Error taxonomy for the harvesting pipeline.
//!
//! Each stage has its own error type so the orchestrator can decide what is
//! fatal for a page, a record, a partition, or the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// A single request failed after the retry budget was spent.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed after {attempts} attempts: {message}")]
    Exhausted {
        url: String,
        attempts: u32,
        message: String,
    },
    #[error("failed to build request: {0}")]
    Build(String),
    #[error("unreadable response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// One raw record could not be normalized.
#[derive(Debug, Error, PartialEq)]
pub enum NormalizationError {
    #[error("listing has no identifier")]
    MissingIdentifier,
    #[error("field '{field}' is malformed: {message}")]
    InvalidField { field: String, message: String },
}

/// The durable sink could not be written or read.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("no partition units found to consolidate")]
    NoUnits,
    #[error("invalid unit file pattern: {0}")]
    Pattern(String),
    #[error("header of {path} does not match the first unit")]
    SchemaMismatch { path: PathBuf },
}

/// A partition could not be persisted; siblings are unaffected.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("partition '{label}': {source}")]
    Sink {
        label: String,
        #[source]
        source: SinkError,
    },
}

impl PartitionError {
    pub fn label(&self) -> &str {
        match self {
            PartitionError::Sink { label, .. } => label,
        }
    }
}

/// A partition plan is not a disjoint, exhaustive cover of `[0, ∞)`.
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("plan has no partitions")]
    Empty,
    #[error("bounds must be strictly ascending and > 0 (got {0} after {1})")]
    UnsortedBounds(u64, u64),
    #[error("first partition must start at 0, starts at {0}")]
    DoesNotStartAtZero(u64),
    #[error("partitions '{left}' and '{right}' leave a gap or overlap")]
    NotContiguous { left: String, right: String },
    #[error("partition '{0}' is closed; the last partition must be open-ended")]
    MissingOpenBand(String),
    #[error("partition '{0}' is open-ended but not last")]
    OpenBandNotLast(String),
    #[error("partition '{0}' is empty")]
    EmptyBand(String),
    #[error("expected {expected} labels, got {actual}")]
    LabelCount { expected: usize, actual: usize },
    #[error("duplicate partition label '{0}'")]
    DuplicateLabel(String),
}
