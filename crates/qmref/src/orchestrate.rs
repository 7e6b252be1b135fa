//! Driving each batch from whatever is on disk to a validated result.
//!
//! A batch directory is resolved by the first rule that applies:
//!
//! 1. a results file exists: it is read, its geometry checked against the
//!    trajectory and, for ESP targets, its ESP points checked against the
//!    surface file, and the batch is [BatchState::Reused]
//! 2. a geometry file exists: the geometry is checked, surface points are
//!    written for ESP targets, and a job is submitted. once it finishes, its
//!    results are checked as in rule 1 and the batch is
//!    [BatchState::Completed]
//! 3. otherwise the batch needs a geometry that nothing can provide, which
//!    stops the run
//!
//! Every batch that can be resolved without a job is handled before anything
//! is submitted, so an inconsistent or missing batch fails the run before any
//! work is queued. Jobs are then all submitted up front and awaited in batch
//! order, which is also the order their results are merged in.

use std::fmt::Display;

use jobq::{
    queue::{JobHandle, JobSpec, JobStatus, Queue, QueueError, Timer},
    template, time,
};
use traj::{Atom, Trajectory};

use crate::{
    Error,
    aggregate::{AggregatedDataset, aggregate, merge},
    batch::{Batch, GEOM_FILE, RESULTS_FILE, SCRIPT_NAME, SURFACE_FILE},
    partition::InvalidPartitionRequest,
    results::{BatchResult, FormatError, Mismatch, SurfaceFile, check_frames},
    surface::{SurfaceGenerator, Undersampled, sample_frames},
};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    NeedsGeometry,
    NeedsSubmission,
    Submitted,
    Completed,
    Reused,
    Failed,
}

impl Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                BatchState::NeedsGeometry => "needs geometry",
                BatchState::NeedsSubmission => "needs submission",
                BatchState::Submitted => "submitted",
                BatchState::Completed => "completed",
                BatchState::Reused => "reused",
                BatchState::Failed => "failed",
            }
        )
    }
}

/// The per-target settings shared by every batch
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// the worker command template
    pub command: String,

    pub endpoint: Option<String>,

    /// whether to sample surfaces and require ESP values in the results
    pub esp: bool,

    pub seed: u64,
    pub scale_factors: Vec<f64>,

    /// the largest coordinate difference accepted between stored geometries
    /// and the trajectory
    pub tolerance: f64,
}

/// The outcome of a successful [Orchestrator::run]
#[derive(Debug)]
pub struct Report {
    pub dataset: AggregatedDataset,
    pub states: Vec<BatchState>,

    /// undersampled surfaces, paired with the trajectory index of their
    /// snapshot
    pub warnings: Vec<(usize, Undersampled)>,

    pub timer: Timer,
}

/// The outcome of a failed [Orchestrator::run]. `partial` holds the merged
/// results of the batches before the first one that failed, if any
#[derive(Debug)]
pub struct Failure {
    pub error: Error,
    pub states: Vec<BatchState>,
    pub partial: Option<AggregatedDataset>,
}

impl Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for Failure {}

/// a batch after submission: either already resolved or waiting on a job
enum Slot {
    Resolved(BatchResult),
    Running(JobHandle),
}

fn trajectory_labels(traj: &Trajectory) -> Vec<String> {
    traj.labels().into_iter().map(str::to_owned).collect()
}

/// renumber the snapshot in `m` from batch-relative to trajectory indices
fn shift(m: Mismatch, offset: usize) -> Mismatch {
    match m {
        Mismatch::Atom { snapshot, atom } => Mismatch::Atom {
            snapshot: snapshot + offset,
            atom,
        },
        m => m,
    }
}

pub struct Orchestrator<'a, Q, G: ?Sized> {
    queue: &'a Q,
    generator: &'a G,
    settings: &'a Settings,
}

impl<'a, Q, G> Orchestrator<'a, Q, G>
where
    Q: Queue,
    G: SurfaceGenerator + Sync + ?Sized,
{
    pub fn new(queue: &'a Q, generator: &'a G, settings: &'a Settings) -> Self {
        Self {
            queue,
            generator,
            settings,
        }
    }

    /// the state `batch` starts in, judging only by which files exist. empty
    /// batches need no work and count as reused
    pub fn inspect(&self, batch: &Batch) -> BatchState {
        if batch.is_empty() || batch.results_file().exists() {
            BatchState::Reused
        } else if batch.geom_file().exists() {
            BatchState::NeedsSubmission
        } else {
            BatchState::NeedsGeometry
        }
    }

    fn inconsistent(&self, batch: &Batch, m: Mismatch) -> Error {
        Error::GeometryConsistency {
            batch: batch.index,
            mismatch: shift(m, batch.range.start),
        }
    }

    /// check the geometry of `res` and, for ESP targets, that it has one ESP
    /// value per point in the batch's surface file. ESP values that were not
    /// requested are dropped
    fn validate(
        &self,
        batch: &Batch,
        mut res: BatchResult,
        traj: &Trajectory,
    ) -> Result<BatchResult, Error> {
        let tol = self.settings.tolerance;
        res.check_geometry(traj.slice(batch.range.clone()), tol)
            .map_err(|m| self.inconsistent(batch, m))?;
        let malformed = |msg: String| Error::Batch {
            batch: batch.index,
            err: FormatError::Shape {
                path: batch.results_file(),
                msg,
            },
        };
        match (self.settings.esp, res.esp.is_some()) {
            (true, false) => {
                return Err(malformed("missing ESP values".to_owned()));
            }
            (true, true) => {
                let surface = SurfaceFile::load(batch.surface_file())
                    .map_err(|err| Error::Batch {
                        batch: batch.index,
                        err,
                    })?;
                res.check_esp(&surface.points, tol).map_err(malformed)?;
            }
            (false, true) => {
                log::debug!("ignoring ESP values in batch {}", batch.name);
                res.esp = None;
            }
            (false, false) => {}
        }
        Ok(res)
    }

    /// read and validate the results already stored for `batch`
    pub fn resume(
        &self,
        batch: &Batch,
        traj: &Trajectory,
    ) -> Result<BatchResult, Error> {
        if batch.is_empty() {
            return Ok(BatchResult::empty(
                batch.index,
                trajectory_labels(traj),
                self.settings.esp,
            ));
        }
        let res = BatchResult::load(batch.results_file(), batch.index)
            .map_err(|err| Error::Batch {
                batch: batch.index,
                err,
            })?;
        self.validate(batch, res, traj)
    }

    /// check the geometry file in `batch` against `traj` and, for ESP targets,
    /// write the sampled surface points unless a surface file sampled with the
    /// same seed and scale factors exists.
    /// returns any sampling warnings
    pub fn prepare(
        &self,
        batch: &Batch,
        traj: &Trajectory,
    ) -> Result<Vec<(usize, Undersampled)>, Error> {
        let geom =
            Trajectory::load(batch.geom_file()).map_err(|err| Error::Geometry {
                batch: batch.index,
                err,
            })?;
        let coords: Vec<Vec<_>> = geom
            .iter()
            .map(|f| f.atoms.iter().map(Atom::to_array).collect())
            .collect();
        check_frames(
            &trajectory_labels(&geom),
            &coords,
            traj.slice(batch.range.clone()),
            self.settings.tolerance,
        )
        .map_err(|m| self.inconsistent(batch, m))?;

        if !self.settings.esp {
            return Ok(Vec::new());
        }
        let path = batch.surface_file();
        if path.exists() {
            match SurfaceFile::load(&path) {
                Ok(s)
                    if s.matches(
                        self.settings.seed,
                        &self.settings.scale_factors,
                        batch.len(),
                    ) =>
                {
                    log::debug!("reusing {}", path.display());
                    return Ok(Vec::new());
                }
                _ => log::warn!("replacing stale {}", path.display()),
            }
        }
        let sets = sample_frames(
            traj.slice(batch.range.clone()),
            batch.range.start,
            self.settings.seed,
            &self.settings.scale_factors,
            self.generator,
        )
        .map_err(|err| Error::Surface {
            batch: batch.index,
            err,
        })?;
        let mut points = Vec::with_capacity(sets.len());
        let mut warnings = Vec::new();
        for (i, set) in sets.into_iter().enumerate() {
            points.push(set.to_arrays());
            warnings.extend(
                set.warnings.into_iter().map(|w| (batch.range.start + i, w)),
            );
        }
        SurfaceFile::new(
            self.settings.seed,
            self.settings.scale_factors.clone(),
            points,
        )
        .write(&path)
        .map_err(|err| Error::Batch {
            batch: batch.index,
            err,
        })?;
        Ok(warnings)
    }

    /// write the submit script for `batch` and hand it to the queue
    pub fn submit(&self, batch: &Batch) -> Result<JobHandle, Error> {
        let queue_err = |err: QueueError| Error::Queue {
            batch: batch.index,
            err,
        };
        let dir = std::fs::canonicalize(&batch.dir).map_err(|e| Error::Batch {
            batch: batch.index,
            err: FormatError::Io(batch.dir.clone(), e),
        })?;
        let dir = dir.to_string_lossy();
        let cmd = template::expand(
            &self.settings.command,
            &[
                ("dir", dir.as_ref()),
                ("batch", batch.name.as_str()),
                ("geom", GEOM_FILE),
                ("surface", SURFACE_FILE),
                ("results", RESULTS_FILE),
                ("endpoint", self.settings.endpoint.as_deref().unwrap_or("")),
            ],
        )
        .map_err(|e| queue_err(e.into()))?;
        let spec = JobSpec {
            dir: batch.dir.clone(),
            name: SCRIPT_NAME.to_owned(),
            commands: vec![format!("cd \"{dir}\" && {cmd}")],
        };
        self.queue.submit_job(&spec).map_err(queue_err)
    }

    fn start(
        &self,
        batch: &Batch,
        traj: &Trajectory,
        timer: &mut Timer,
        warnings: &mut Vec<(usize, Undersampled)>,
    ) -> Result<JobHandle, Error> {
        let prepared;
        time!(e, {
            prepared = self.prepare(batch, traj);
        });
        timer.writing_input += e;
        warnings.extend(prepared?);

        let handle;
        time!(e, {
            handle = self.submit(batch);
        });
        timer.submitting += e;
        handle
    }

    /// wait for the job in `handle` to leave the queue and read its results
    fn finish(
        &self,
        batch: &Batch,
        handle: &JobHandle,
        traj: &Trajectory,
        timer: &mut Timer,
    ) -> Result<BatchResult, Error> {
        let incomplete = |reason: String| Error::JobIncomplete {
            batch: batch.index,
            reason,
        };
        let status;
        time!(e, {
            status = self.queue.await_completion(handle);
        });
        timer.waiting += e;
        let status = status.map_err(|err| Error::Queue {
            batch: batch.index,
            err,
        })?;
        if let JobStatus::TimedOut(d) = status {
            return Err(incomplete(format!(
                "timed out after {:.1} s",
                d.as_secs_f64()
            )));
        }

        let path = batch.results_file();
        if !path.exists() {
            return Err(incomplete(format!(
                "{} not found after the job finished",
                path.display()
            )));
        }
        let res;
        time!(e, {
            res = BatchResult::load(&path, batch.index);
        });
        timer.reading += e;
        let res = res.map_err(|e| incomplete(e.to_string()))?;
        self.validate(batch, res, traj)
    }

    /// resolve every batch in `batches`, which must be the full layout of
    /// `traj` in index order, and merge the results
    pub fn run(
        &self,
        batches: &[Batch],
        traj: &Trajectory,
    ) -> Result<Report, Failure> {
        let mut states: Vec<_> =
            batches.iter().map(|b| self.inspect(b)).collect();
        let mut timer = Timer::default();
        let mut warnings = Vec::new();

        let mut resolved = Vec::with_capacity(batches.len());
        for (i, batch) in batches.iter().enumerate() {
            let res = match states[i] {
                BatchState::Reused => {
                    let r;
                    time!(e, {
                        r = self.resume(batch, traj);
                    });
                    timer.reading += e;
                    r.map(Some)
                }
                BatchState::NeedsGeometry => {
                    Err(Error::UnimplementedGeometryGeneration {
                        batch: batch.index,
                        dir: batch.dir.clone(),
                    })
                }
                _ => Ok(None),
            };
            match res {
                Ok(r) => {
                    log::info!("batch {}: {}", batch.name, states[i]);
                    resolved.push(r);
                }
                Err(error) => {
                    states[i] = BatchState::Failed;
                    let partial =
                        aggregate(resolved.into_iter().map_while(|r| r))
                            .ok()
                            .flatten();
                    return Err(Failure {
                        error,
                        states,
                        partial,
                    });
                }
            }
        }

        let mut slots = Vec::with_capacity(batches.len());
        for (i, (batch, res)) in batches.iter().zip(resolved).enumerate() {
            if let Some(r) = res {
                slots.push(Slot::Resolved(r));
                continue;
            }
            match self.start(batch, traj, &mut timer, &mut warnings) {
                Ok(handle) => {
                    states[i] = BatchState::Submitted;
                    log::info!(
                        "batch {}: submitted as job {}",
                        batch.name,
                        handle.id
                    );
                    slots.push(Slot::Running(handle));
                }
                Err(error) => {
                    states[i] = BatchState::Failed;
                    let partial = aggregate(slots.into_iter().map_while(|s| {
                        match s {
                            Slot::Resolved(r) => Some(r),
                            Slot::Running(_) => None,
                        }
                    }))
                    .ok()
                    .flatten();
                    return Err(Failure {
                        error,
                        states,
                        partial,
                    });
                }
            }
        }

        let mut acc = None;
        for (i, (batch, slot)) in batches.iter().zip(slots).enumerate() {
            let next = match slot {
                Slot::Resolved(r) => r,
                Slot::Running(handle) => {
                    match self.finish(batch, &handle, traj, &mut timer) {
                        Ok(r) => {
                            states[i] = BatchState::Completed;
                            log::info!("batch {}: {}", batch.name, states[i]);
                            r
                        }
                        Err(error) => {
                            states[i] = BatchState::Failed;
                            return Err(Failure {
                                error,
                                states,
                                partial: acc,
                            });
                        }
                    }
                }
            };
            acc = match merge(acc, next) {
                Ok(a) => Some(a),
                Err(e) => {
                    return Err(Failure {
                        error: e.into(),
                        states,
                        partial: None,
                    });
                }
            };
        }
        log::info!("{timer}");

        match acc {
            Some(dataset) => Ok(Report {
                dataset,
                states,
                warnings,
                timer,
            }),
            // only reachable with no batches at all
            None => Err(Failure {
                error: Error::Partition(InvalidPartitionRequest {
                    total: traj.len(),
                    batches: 0,
                }),
                states,
                partial: None,
            }),
        }
    }
}
