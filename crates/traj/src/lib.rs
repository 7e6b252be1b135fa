//! Atoms, molecular snapshots, and multi-frame XYZ trajectories

use std::{fmt::Display, path::PathBuf};

pub use atom::*;
pub use trajectory::*;

pub mod atom;
pub mod trajectory;
pub mod vdw;

pub type Vec3 = nalgebra::Vector3<f64>;

#[derive(Debug)]
pub enum TrajError {
    /// failed to read or write the file at the given path
    Io(PathBuf, std::io::Error),

    /// an unparseable line, with its 1-based line number
    Parse { line: usize, msg: String },

    UnknownElement(String),

    /// a frame whose atom count or element labels differ from the first frame
    Inconsistent { frame: usize, msg: String },
}

impl Display for TrajError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrajError::Io(path, e) => {
                write!(f, "failed to access {} with `{e}`", path.display())
            }
            TrajError::Parse { line, msg } => {
                write!(f, "parse error on line {line}: {msg}")
            }
            TrajError::UnknownElement(s) => {
                write!(f, "failed to locate atomic symbol {s}")
            }
            TrajError::Inconsistent { frame, msg } => {
                write!(f, "frame {frame} is inconsistent with frame 0: {msg}")
            }
        }
    }
}

impl std::error::Error for TrajError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrajError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}
