//! Generation of reference quantum-chemistry data (energies, forces, and
//! optionally electrostatic potentials) for the snapshots of a molecular
//! trajectory.
//!
//! A trajectory is split into contiguous batches by [partition], each batch
//! gets a working directory ([batch]) and is driven to a validated result by
//! the [orchestrate::Orchestrator] on a [jobq] queue, and the per-batch results
//! are folded into one dataset in trajectory order by [aggregate]. Targets
//! with ESP sampling also get surface points from [surface].

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod driver;
pub mod error;
pub mod orchestrate;
pub mod partition;
pub mod results;
pub mod surface;

pub use error::Error;

/// print the message to stderr and exit with status 1
#[macro_export]
macro_rules! die {
    ($($t:tt)*) => {{
        eprintln!($($t)*);
        std::process::exit(1)
    }};
}
