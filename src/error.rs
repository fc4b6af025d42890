use crate::network::SegmentId;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the library. The fatal categories halt a run; trial
/// failures never surface here, they are collected per trial instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("data integrity error: {0}")]
    DataIntegrity(#[from] DataIntegrityError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("netcdf error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to parse {what} from {value:?}")]
    Parse { what: &'static str, value: String },

    #[error("missing column {column:?} in {path:?}")]
    MissingColumn { column: String, path: PathBuf },
}

/// Malformed network or gauge input. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataIntegrityError {
    #[error("segment {0} appears more than once")]
    DuplicateSegment(SegmentId),

    #[error("segment {segment} flows to {downstream} which is not in the network")]
    DanglingDownstream {
        segment: SegmentId,
        downstream: SegmentId,
    },

    #[error("cycle detected in drainage network at segment {segment}")]
    Cycle { segment: SegmentId },

    #[error("segment {segment} has invalid stream order {order}")]
    InvalidOrder { segment: SegmentId, order: u32 },

    #[error("segment {0} is not in the network")]
    UnknownSegment(SegmentId),

    #[error("segment {segment} hosts more than one gauge ({first}, {second})")]
    DuplicateGaugeOnSegment {
        segment: SegmentId,
        first: String,
        second: String,
    },

    #[error("gauge {gauge} is sited on more than one segment ({first}, {second})")]
    GaugeOnMultipleSegments {
        gauge: String,
        first: SegmentId,
        second: SegmentId,
    },
}

/// Invalid run settings, raised before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_propagation must be at least 1, got {0}")]
    InvalidMaxPropagation(usize),

    #[error("n_processes must be at least 1")]
    InvalidProcesses,

    #[error("no gauges available for assignment")]
    EmptyGaugePool,

    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path:?}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Why a single bootstrap trial produced no metrics record.
#[derive(Debug, Error, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrialFailure {
    #[error("segment could not be assigned from the remaining gauges")]
    Unassigned,

    #[error("correction failed: {0}")]
    Correction(String),

    #[error("correction returned no data")]
    NoCorrection,

    #[error("correction output lacks the {0} column")]
    MissingColumn(&'static str),

    #[error("no observations for gauge")]
    NoObservations,

    #[error("observation source failed: {0}")]
    Observations(String),

    #[error("no finite overlap between corrected and observed series")]
    EmptyOverlap,
}

impl TrialFailure {
    /// Short tag used when counting failures by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TrialFailure::Unassigned => "unassigned",
            TrialFailure::Correction(_) => "correction-error",
            TrialFailure::NoCorrection => "no-correction",
            TrialFailure::MissingColumn(_) => "missing-column",
            TrialFailure::NoObservations => "no-observations",
            TrialFailure::Observations(_) => "observation-error",
            TrialFailure::EmptyOverlap => "empty-overlap",
        }
    }
}
