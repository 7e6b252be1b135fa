//! Running the full pipeline for each configured target

use std::{fmt::Display, path::PathBuf};

use jobq::queue::{Queue, Timer};
use traj::Trajectory;

use crate::{
    Error,
    batch::{Batch, layout},
    config::{Config, Target},
    orchestrate::{BatchState, Orchestrator, Settings},
    results::{FormatError, Mismatch},
    surface::SurfaceGenerator,
};

/// the consolidated dataset, written to the target directory
pub const DATASET_FILE: &str = "dataset.json";

/// the batches preceding a failure, written when partial output is enabled
pub const PARTIAL_FILE: &str = "dataset.partial.json";

/// What a successful run of one target produced
#[derive(Debug)]
pub struct Summary {
    pub name: String,
    pub snapshots: usize,
    pub batches: usize,
    pub staged: usize,
    pub reused: usize,
    pub completed: usize,
    pub warnings: usize,
    pub seed: u64,
    pub dataset: PathBuf,
    pub timer: Timer,
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "target {}:", self.name)?;
        writeln!(
            f,
            "{} snapshots in {} batches: {} staged, {} reused, {} completed",
            self.snapshots,
            self.batches,
            self.staged,
            self.reused,
            self.completed
        )?;
        if self.warnings > 0 {
            writeln!(f, "{} undersampled surfaces", self.warnings)?;
        }
        writeln!(f, "seed = {}", self.seed)?;
        writeln!(f, "{}", self.timer)?;
        write!(f, "wrote {}", self.dataset.display())
    }
}

/// the batch holding the snapshot named in `m`, or the last batch if `m` is a
/// count mismatch
fn blame(batches: &[Batch], m: &Mismatch) -> usize {
    let last = batches.len().saturating_sub(1);
    match m {
        Mismatch::Atom { snapshot, .. } => batches
            .iter()
            .find(|b| b.range.contains(snapshot))
            .map_or(last, |b| b.index),
        Mismatch::Count { .. } => last,
    }
}

/// stage, orchestrate, and merge the batches of `target`, writing the dataset
/// to its directory. with `config.partial` set, the batches preceding a failed
/// one are written before the error is returned
pub fn run_target<Q, G>(
    config: &Config,
    target: &Target,
    seed: u64,
    queue: &Q,
    generator: &G,
) -> Result<Summary, Error>
where
    Q: Queue,
    G: SurfaceGenerator + Sync + ?Sized,
{
    let traj = Trajectory::load(&target.trajectory)?;
    log::info!(
        "loaded {} snapshots of {} atoms from {}",
        traj.len(),
        traj.natoms(),
        target.trajectory.display()
    );
    let batches = layout(&target.dir, traj.len(), target.batches)?;
    std::fs::create_dir_all(&target.dir).map_err(|e| {
        Error::Output(FormatError::Io(target.dir.clone(), e))
    })?;

    let mut staged = 0;
    if config.stage {
        for b in &batches {
            if b.stage(&traj).map_err(|err| Error::Geometry {
                batch: b.index,
                err,
            })? {
                staged += 1;
            }
        }
        log::info!("staged {staged} of {} batches", batches.len());
    }

    let settings = Settings {
        command: config.command.clone(),
        endpoint: config.endpoint.clone(),
        esp: target.esp,
        seed,
        scale_factors: config.scale_factors.clone(),
        tolerance: config.tolerance,
    };
    let report = match Orchestrator::new(queue, generator, &settings)
        .run(&batches, &traj)
    {
        Ok(r) => r,
        Err(failure) => {
            if let (true, Some(partial)) = (config.partial, &failure.partial) {
                let path = target.dir.join(PARTIAL_FILE);
                partial.write(&path).map_err(Error::Output)?;
                log::warn!(
                    "wrote {} snapshots from batches {:?} to {}",
                    partial.len(),
                    partial.batches,
                    path.display()
                );
            }
            return Err(failure.error);
        }
    };

    report
        .dataset
        .verify(&traj, config.tolerance)
        .map_err(|mismatch| Error::GeometryConsistency {
            batch: blame(&batches, &mismatch),
            mismatch,
        })?;
    let path = target.dir.join(DATASET_FILE);
    report.dataset.write(&path).map_err(Error::Output)?;

    let count = |s| report.states.iter().filter(|&&t| t == s).count();
    Ok(Summary {
        name: target.name.clone(),
        snapshots: traj.len(),
        batches: batches.len(),
        staged,
        reused: count(BatchState::Reused),
        completed: count(BatchState::Completed),
        warnings: report.warnings.len(),
        seed,
        dataset: path,
        timer: report.timer,
    })
}

/// run every target in `config` in order, stopping at the first error. the
/// sampling seed comes from `config.seed` or is drawn at random
pub fn run<Q, G>(
    config: &Config,
    queue: &Q,
    generator: &G,
) -> Result<Vec<Summary>, Error>
where
    Q: Queue,
    G: SurfaceGenerator + Sync + ?Sized,
{
    let seed = config.seed.unwrap_or_else(|| {
        let seed = rand::random();
        log::info!("no seed given, using {seed}");
        seed
    });
    config
        .targets
        .iter()
        .map(|t| {
            log::info!("starting target {}", t.name);
            run_target(config, t, seed, queue, generator)
        })
        .collect()
}
