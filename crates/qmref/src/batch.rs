//! Per-batch identity and working-directory layout

use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use traj::{TrajError, Trajectory, write_xyz};

use crate::partition::{InvalidPartitionRequest, partition};

/// the batch geometry, as multi-frame XYZ
pub const GEOM_FILE: &str = "geom.xyz";

/// sampled ESP evaluation points, for ESP targets only
pub const SURFACE_FILE: &str = "surface.json";

/// the worker's output
pub const RESULTS_FILE: &str = "results.json";

/// the base name of the submit script, without the queue's extension
pub const SCRIPT_NAME: &str = "job";

/// A contiguous block of trajectory snapshots run as one job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    /// position of this batch among all of the batches for its target
    pub index: usize,

    /// the snapshots covered, as indices into the trajectory
    pub range: Range<usize>,

    /// the zero-padded index, which names the working directory
    pub name: String,

    pub dir: PathBuf,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn geom_file(&self) -> PathBuf {
        self.dir.join(GEOM_FILE)
    }

    pub fn surface_file(&self) -> PathBuf {
        self.dir.join(SURFACE_FILE)
    }

    pub fn results_file(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    /// write this batch's snapshots from `traj` to its geometry file if the
    /// directory holds neither a geometry nor results. returns whether anything
    /// was written
    pub fn stage(&self, traj: &Trajectory) -> Result<bool, TrajError> {
        if self.is_empty()
            || self.geom_file().exists()
            || self.results_file().exists()
        {
            return Ok(false);
        }
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| TrajError::Io(self.dir.clone(), e))?;
        write_xyz(
            self.geom_file(),
            traj.slice(self.range.clone()),
            self.range.start,
        )?;
        log::debug!(
            "staged {} snapshots in {}",
            self.len(),
            self.dir.display()
        );
        Ok(true)
    }
}

/// the number of digits needed to write every index below `batches`, so that
/// directory names sort in batch order
pub fn width(batches: usize) -> usize {
    batches.saturating_sub(1).to_string().len()
}

/// partition `total` snapshots into `batches` batches with working directories
/// under `root`
pub fn layout(
    root: impl AsRef<Path>,
    total: usize,
    batches: usize,
) -> Result<Vec<Batch>, InvalidPartitionRequest> {
    let w = width(batches);
    Ok(partition(total, batches)?
        .into_iter()
        .enumerate()
        .map(|(index, range)| {
            let name = format!("{index:0w$}");
            Batch {
                index,
                range,
                dir: root.as_ref().join(&name),
                name,
            }
        })
        .collect())
}
