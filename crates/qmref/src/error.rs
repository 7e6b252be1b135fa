use std::{fmt::Display, path::PathBuf};

use jobq::queue::QueueError;
use traj::TrajError;

use crate::{
    aggregate::AggregateError,
    config::ConfigError,
    partition::InvalidPartitionRequest,
    results::{FormatError, Mismatch},
    surface::SurfaceError,
};

/// Everything that can stop a run. Variants raised while handling a single
/// batch carry its index
#[derive(Debug)]
pub enum Error {
    Config(ConfigError),

    Traj(TrajError),

    Partition(InvalidPartitionRequest),

    /// the geometry stored for a batch disagrees with the trajectory.
    /// snapshot indices in `mismatch` refer to the trajectory
    GeometryConsistency { batch: usize, mismatch: Mismatch },

    /// failure to read the geometry file in a batch directory
    Geometry { batch: usize, err: TrajError },

    /// a batch directory held neither results nor a geometry to run
    UnimplementedGeometryGeneration { batch: usize, dir: PathBuf },

    /// the job for a batch timed out or finished without usable results.
    /// rerunning resumes from the batches that did finish
    JobIncomplete { batch: usize, reason: String },

    Surface { batch: usize, err: SurfaceError },

    Queue { batch: usize, err: QueueError },

    /// failure to read or write a batch's input or output files
    Batch { batch: usize, err: FormatError },

    Aggregate(AggregateError),

    /// failure to write the final dataset
    Output(FormatError),
}

impl Error {
    /// the batch the error occurred in, if it is specific to one
    pub fn batch(&self) -> Option<usize> {
        match self {
            Error::GeometryConsistency { batch, .. }
            | Error::Geometry { batch, .. }
            | Error::UnimplementedGeometryGeneration { batch, .. }
            | Error::JobIncomplete { batch, .. }
            | Error::Surface { batch, .. }
            | Error::Queue { batch, .. }
            | Error::Batch { batch, .. } => Some(*batch),
            _ => None,
        }
    }

    /// whether rerunning without changing anything could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::JobIncomplete { .. } | Error::Queue { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "{e}"),
            Error::Traj(e) => write!(f, "{e}"),
            Error::Partition(e) => write!(f, "{e}"),
            Error::GeometryConsistency { batch, mismatch } => write!(
                f,
                "geometry of batch {batch} is inconsistent with the \
                 trajectory: {mismatch}"
            ),
            Error::Geometry { batch, err } => write!(f, "batch {batch}: {err}"),
            Error::UnimplementedGeometryGeneration { batch, dir } => write!(
                f,
                "batch {batch} has no geometry in {}, and generating \
                 geometries is not supported",
                dir.display()
            ),
            Error::JobIncomplete { batch, reason } => {
                write!(f, "job for batch {batch} did not complete: {reason}")
            }
            Error::Surface { batch, err } => {
                write!(f, "failed to sample surface for batch {batch}: {err}")
            }
            Error::Queue { batch, err } => write!(f, "batch {batch}: {err}"),
            Error::Batch { batch, err } => write!(f, "batch {batch}: {err}"),
            Error::Aggregate(e) => write!(f, "{e}"),
            Error::Output(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TrajError> for Error {
    fn from(value: TrajError) -> Self {
        Self::Traj(value)
    }
}

impl From<InvalidPartitionRequest> for Error {
    fn from(value: InvalidPartitionRequest) -> Self {
        Self::Partition(value)
    }
}

impl From<AggregateError> for Error {
    fn from(value: AggregateError) -> Self {
        Self::Aggregate(value)
    }
}
