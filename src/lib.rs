pub mod assign;
pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod correction;
pub mod error;
pub mod io;
pub mod metrics;
pub mod network;
pub mod pipeline;
pub mod propagation;
pub mod series;

pub use assign::{AssignmentRecord, AssignmentTable, GaugeId, Method};
pub use error::{ConfigError, DataIntegrityError, Error, Result, TrialFailure};
pub use network::{NetworkTopology, SegmentId, SegmentRecord};
