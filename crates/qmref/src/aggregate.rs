//! Folding per-batch results into a single dataset in trajectory order

use std::{fmt::Display, ops::Range, path::Path};

use serde::{Deserialize, Serialize};
use traj::Trajectory;

use crate::results::{
    BatchResult, FormatError, Mismatch, VERSION, check_frames, read_json,
    write_json,
};

#[derive(Debug, PartialEq, Eq)]
pub enum AggregateError {
    /// batches must be merged in strictly increasing index order with no gaps
    OutOfOrder { expected: usize, found: usize },

    /// a batch whose element labels differ from those already merged
    Labels { batch: usize },

    /// a batch with ESP values merged into a dataset without them, or the
    /// reverse
    Esp { batch: usize },
}

impl Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateError::OutOfOrder { expected, found } => write!(
                f,
                "batch {found} merged out of order, expected batch {expected}"
            ),
            AggregateError::Labels { batch } => {
                write!(f, "element labels of batch {batch} do not match")
            }
            AggregateError::Esp { batch } => write!(
                f,
                "batch {batch} disagrees with earlier batches on ESP values"
            ),
        }
    }
}

impl std::error::Error for AggregateError {}

/// The concatenation of a contiguous run of [BatchResult]s. Each field stays
/// indexed in step with the trajectory snapshots it covers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregatedDataset {
    pub version: u32,

    /// the batch indices merged so far
    pub batches: Range<usize>,

    pub labels: Vec<String>,
    pub coords: Vec<Vec<[f64; 3]>>,
    pub energies: Vec<f64>,
    pub forces: Vec<Vec<[f64; 3]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esp: Option<Vec<Vec<[f64; 4]>>>,
}

impl From<BatchResult> for AggregatedDataset {
    fn from(b: BatchResult) -> Self {
        Self {
            version: VERSION,
            batches: b.batch..b.batch + 1,
            labels: b.labels,
            coords: b.coords,
            energies: b.energies,
            forces: b.forces,
            esp: b.esp,
        }
    }
}

impl AggregatedDataset {
    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    fn check_adjacent(
        &self,
        start: usize,
        labels: &[String],
        esp: bool,
    ) -> Result<(), AggregateError> {
        if start != self.batches.end {
            return Err(AggregateError::OutOfOrder {
                expected: self.batches.end,
                found: start,
            });
        }
        if labels != self.labels {
            return Err(AggregateError::Labels { batch: start });
        }
        if esp != self.esp.is_some() {
            return Err(AggregateError::Esp { batch: start });
        }
        Ok(())
    }

    /// append the fields of `other`, which must cover the batches immediately
    /// following those in `self`
    pub fn concat(mut self, other: Self) -> Result<Self, AggregateError> {
        self.check_adjacent(
            other.batches.start,
            &other.labels,
            other.esp.is_some(),
        )?;
        self.batches.end = other.batches.end;
        self.coords.extend(other.coords);
        self.energies.extend(other.energies);
        self.forces.extend(other.forces);
        if let (Some(a), Some(b)) = (self.esp.as_mut(), other.esp) {
            a.extend(b);
        }
        Ok(self)
    }

    /// check that the dataset covers every snapshot in `traj` and that its
    /// stored geometry matches. snapshot indices in the error are trajectory
    /// indices
    pub fn verify(&self, traj: &Trajectory, tol: f64) -> Result<(), Mismatch> {
        check_frames(&self.labels, &self.coords, traj.frames(), tol)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let ret: Self = read_json(path)?;
        if ret.version != VERSION {
            return Err(FormatError::Version {
                path: path.to_owned(),
                found: ret.version,
            });
        }
        Ok(ret)
    }

    /// write `self` to `path` as pretty-printed JSON. the output depends only
    /// on the contents, so equal datasets produce identical files
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), FormatError> {
        write_json(path.as_ref(), self)
    }
}

/// merge `next` onto the end of `acc`, or start a new dataset from `next` if
/// `acc` is `None`
pub fn merge(
    acc: Option<AggregatedDataset>,
    next: BatchResult,
) -> Result<AggregatedDataset, AggregateError> {
    match acc {
        None => Ok(next.into()),
        Some(acc) => {
            acc.check_adjacent(next.batch, &next.labels, next.esp.is_some())?;
            acc.concat(next.into())
        }
    }
}

/// fold `results` with [merge]. returns `None` if `results` is empty
pub fn aggregate(
    results: impl IntoIterator<Item = BatchResult>,
) -> Result<Option<AggregatedDataset>, AggregateError> {
    results
        .into_iter()
        .try_fold(None, |acc, next| merge(acc, next).map(Some))
}
