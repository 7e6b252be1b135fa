//! On-disk formats exchanged with workers, and the per-batch result parsed from
//! them.
//!
//! Both files are JSON documents carrying a `version` field. A worker reads
//! `geom.xyz` (and `surface.json` for ESP targets) from its batch directory and
//! writes `results.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "labels": ["O", "H", "H"],
//!   "snapshots": [
//!     {
//!       "coords": [[0.0, 0.0, -0.066], ...],
//!       "energy": -76.02,
//!       "forces": [[0.0, 0.0, 0.01], ...],
//!       "esp": [[1.2, 0.4, 2.1, -0.003], ...]
//!     }
//!   ]
//! }
//! ```
//!
//! `coords` echoes the geometry the worker actually ran so it can be checked
//! against the trajectory. `esp` holds one `[x, y, z, value]` entry per sampled
//! point and is omitted for targets without ESP sampling.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use traj::Snapshot;

/// the current version of every file written here
pub const VERSION: u32 = 1;

#[derive(Debug)]
pub enum FormatError {
    Io(PathBuf, std::io::Error),
    Json(PathBuf, serde_json::Error),
    Version { path: PathBuf, found: u32 },

    /// the file parsed but its contents are inconsistent, such as a snapshot
    /// with the wrong number of forces
    Shape { path: PathBuf, msg: String },
}

impl Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::Io(p, e) => {
                write!(f, "failed to access {} with `{e}`", p.display())
            }
            FormatError::Json(p, e) => {
                write!(f, "failed to parse {} with `{e}`", p.display())
            }
            FormatError::Version { path, found } => write!(
                f,
                "{} has version {found}, expected {VERSION}",
                path.display()
            ),
            FormatError::Shape { path, msg } => {
                write!(f, "malformed {}: {msg}", path.display())
            }
        }
    }
}

impl std::error::Error for FormatError {}

pub(crate) fn read_json<T: DeserializeOwned>(
    path: &Path,
) -> Result<T, FormatError> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| FormatError::Io(path.to_owned(), e))?;
    serde_json::from_str(&s).map_err(|e| FormatError::Json(path.to_owned(), e))
}

pub(crate) fn write_json<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), FormatError> {
    let mut s = serde_json::to_string_pretty(value)
        .map_err(|e| FormatError::Json(path.to_owned(), e))?;
    s.push('\n');
    std::fs::write(path, s).map_err(|e| FormatError::Io(path.to_owned(), e))
}

fn check_version(path: &Path, found: u32) -> Result<(), FormatError> {
    if found != VERSION {
        return Err(FormatError::Version {
            path: path.to_owned(),
            found,
        });
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub coords: Vec<[f64; 3]>,
    pub energy: f64,
    pub forces: Vec<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esp: Option<Vec<[f64; 4]>>,
}

/// The contents of `results.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultsFile {
    pub version: u32,
    pub labels: Vec<String>,
    pub snapshots: Vec<SnapshotRecord>,
}

impl ResultsFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let ret: Self = read_json(path)?;
        check_version(path, ret.version)?;
        Ok(ret)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), FormatError> {
        write_json(path.as_ref(), self)
    }
}

/// The contents of `surface.json`: one list of points per snapshot, along with
/// the seed and scale factors they were sampled with
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceFile {
    pub version: u32,
    pub seed: u64,
    pub scale_factors: Vec<f64>,
    pub points: Vec<Vec<[f64; 3]>>,
}

impl SurfaceFile {
    pub fn new(
        seed: u64,
        scale_factors: Vec<f64>,
        points: Vec<Vec<[f64; 3]>>,
    ) -> Self {
        Self {
            version: VERSION,
            seed,
            scale_factors,
            points,
        }
    }

    /// whether these points are the ones `len` snapshots sampled with `seed`
    /// and `scale_factors` would give
    pub fn matches(
        &self,
        seed: u64,
        scale_factors: &[f64],
        len: usize,
    ) -> bool {
        self.seed == seed
            && self.scale_factors == scale_factors
            && self.points.len() == len
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let ret: Self = read_json(path)?;
        check_version(path, ret.version)?;
        Ok(ret)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), FormatError> {
        write_json(path.as_ref(), self)
    }
}

/// Where a batch result disagrees with the geometry it was supposed to use
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mismatch {
    Count { found: usize, expected: usize },

    /// indices of the first differing atom, with `snapshot` relative to the
    /// start of the batch
    Atom { snapshot: usize, atom: usize },
}

impl Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::Count { found, expected } => {
                write!(f, "found {found} snapshots, expected {expected}")
            }
            Mismatch::Atom { snapshot, atom } => {
                write!(f, "atom {atom} of snapshot {snapshot} differs")
            }
        }
    }
}

/// One batch's results, stored field-wise so the fields can be concatenated
/// across batches. Every field is indexed in step with the batch's snapshots
#[derive(Clone, Debug, PartialEq)]
pub struct BatchResult {
    pub batch: usize,
    pub labels: Vec<String>,
    pub coords: Vec<Vec<[f64; 3]>>,
    pub energies: Vec<f64>,
    pub forces: Vec<Vec<[f64; 3]>>,
    pub esp: Option<Vec<Vec<[f64; 4]>>>,
}

impl BatchResult {
    /// the result of a batch with no snapshots
    pub fn empty(batch: usize, labels: Vec<String>, esp: bool) -> Self {
        Self {
            batch,
            labels,
            coords: Vec::new(),
            energies: Vec::new(),
            forces: Vec::new(),
            esp: esp.then(Vec::new),
        }
    }

    /// read the results file at `path` as the result for batch `batch`
    pub fn load(
        path: impl AsRef<Path>,
        batch: usize,
    ) -> Result<Self, FormatError> {
        let path = path.as_ref();
        Self::from_file(ResultsFile::load(path)?, batch, path)
    }

    /// convert the record-wise `file`, checking that every snapshot has one
    /// coordinate and one force per label and that ESP values are present for
    /// all snapshots or for none. `path` is only used in errors
    pub fn from_file(
        file: ResultsFile,
        batch: usize,
        path: &Path,
    ) -> Result<Self, FormatError> {
        let shape = |msg: String| FormatError::Shape {
            path: path.to_owned(),
            msg,
        };
        let n = file.labels.len();
        let with_esp =
            file.snapshots.iter().filter(|s| s.esp.is_some()).count();
        if with_esp != 0 && with_esp != file.snapshots.len() {
            return Err(shape(format!(
                "{with_esp} of {} snapshots have ESP values",
                file.snapshots.len()
            )));
        }
        let mut ret = Self::empty(batch, file.labels, with_esp != 0);
        for (i, s) in file.snapshots.into_iter().enumerate() {
            if s.coords.len() != n || s.forces.len() != n {
                return Err(shape(format!(
                    "snapshot {i} has {} coordinates and {} forces for {n} \
                     atoms",
                    s.coords.len(),
                    s.forces.len()
                )));
            }
            ret.coords.push(s.coords);
            ret.energies.push(s.energy);
            ret.forces.push(s.forces);
            if let (Some(esp), Some(v)) = (ret.esp.as_mut(), s.esp) {
                esp.push(v);
            }
        }
        Ok(ret)
    }

    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    /// compare the stored geometry to `expected` atom by atom
    pub fn check_geometry(
        &self,
        expected: &[Snapshot],
        tol: f64,
    ) -> Result<(), Mismatch> {
        check_frames(&self.labels, &self.coords, expected, tol)
    }

    /// check that the ESP values, if any, were evaluated at exactly the
    /// sampled `points`, one value per point. the error describes the first
    /// disagreement
    pub fn check_esp(
        &self,
        points: &[Vec<[f64; 3]>],
        tol: f64,
    ) -> Result<(), String> {
        let Some(esp) = &self.esp else {
            return Ok(());
        };
        if esp.len() != points.len() {
            return Err(format!(
                "ESP values for {} snapshots, expected {}",
                esp.len(),
                points.len()
            ));
        }
        for (i, (vals, pts)) in esp.iter().zip(points).enumerate() {
            if vals.len() != pts.len() {
                return Err(format!(
                    "snapshot {i} has {} ESP values for {} surface points",
                    vals.len(),
                    pts.len()
                ));
            }
            let off = vals.iter().zip(pts).position(|(v, p)| {
                (0..3).any(|k| !((v[k] - p[k]).abs() <= tol))
            });
            if let Some(j) = off {
                return Err(format!(
                    "ESP point {j} of snapshot {i} is not on the sampled \
                     surface"
                ));
            }
        }
        Ok(())
    }
}

/// compare the geometry given by `labels` and per-snapshot `coords` to
/// `expected`
pub(crate) fn check_frames(
    labels: &[String],
    coords: &[Vec<[f64; 3]>],
    expected: &[Snapshot],
    tol: f64,
) -> Result<(), Mismatch> {
    if coords.len() != expected.len() {
        return Err(Mismatch::Count {
            found: coords.len(),
            expected: expected.len(),
        });
    }
    for (snapshot, (want, got)) in expected.iter().zip(coords).enumerate() {
        if let Some(atom) = want.first_mismatch(labels, got, tol) {
            return Err(Mismatch::Atom { snapshot, atom });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use traj::Atom;

    use super::*;

    fn record(x: f64, esp: bool) -> SnapshotRecord {
        SnapshotRecord {
            coords: vec![[x, 0.0, 0.0], [x, 0.0, 1.0]],
            energy: -x,
            forces: vec![[0.0; 3]; 2],
            esp: esp.then(|| vec![[0.0, 0.0, 3.0, 0.1]]),
        }
    }

    fn file(snapshots: Vec<SnapshotRecord>) -> ResultsFile {
        ResultsFile {
            version: VERSION,
            labels: vec!["C".to_owned(), "O".to_owned()],
            snapshots,
        }
    }

    #[test]
    fn load_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        file(vec![record(0.0, true), record(1.0, true)])
            .write(&path)
            .unwrap();
        let got = BatchResult::load(&path, 4).unwrap();
        assert_eq!(got.batch, 4);
        assert_eq!(got.energies, vec![-0.0, -1.0]);
        assert_eq!(got.coords[1][1], [1.0, 0.0, 1.0]);
        assert_eq!(got.esp.unwrap().len(), 2);
    }

    #[test]
    fn esp_omitted() {
        let s = serde_json::to_string(&record(0.0, false)).unwrap();
        assert!(!s.contains("esp"));
        let got = BatchResult::from_file(
            file(vec![record(0.0, false)]),
            0,
            Path::new("x"),
        )
        .unwrap();
        assert!(got.esp.is_none());
    }

    #[test]
    fn partial_esp() {
        let got = BatchResult::from_file(
            file(vec![record(0.0, true), record(1.0, false)]),
            0,
            Path::new("x"),
        );
        assert!(matches!(got, Err(FormatError::Shape { .. })));
    }

    #[test]
    fn wrong_force_count() {
        let mut r = record(0.0, false);
        r.forces.pop();
        let got = BatchResult::from_file(file(vec![r]), 0, Path::new("x"));
        assert!(matches!(got, Err(FormatError::Shape { .. })));
    }

    #[test]
    fn wrong_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let mut f = file(vec![]);
        f.version = 2;
        f.write(&path).unwrap();
        assert!(matches!(
            BatchResult::load(&path, 0),
            Err(FormatError::Version { found: 2, .. })
        ));
    }

    #[test]
    fn esp_check() {
        let got = BatchResult::from_file(
            file(vec![record(0.0, true), record(1.0, true)]),
            0,
            Path::new("x"),
        )
        .unwrap();
        let points = vec![vec![[0.0, 0.0, 3.0]]; 2];
        assert_eq!(got.check_esp(&points, 1e-6), Ok(()));
        assert!(got.check_esp(&points[..1], 1e-6).is_err());
        assert!(got.check_esp(&[vec![], vec![]], 1e-6).is_err());

        let moved = vec![vec![[0.0, 0.0, 3.0]], vec![[0.0, 1e-3, 3.0]]];
        let err = got.check_esp(&moved, 1e-6).unwrap_err();
        assert!(err.contains("point 0 of snapshot 1"), "{err}");
    }

    #[test]
    fn surface_matches() {
        let s = SurfaceFile::new(7, vec![1.4, 1.6], vec![vec![]; 3]);
        assert!(s.matches(7, &[1.4, 1.6], 3));
        assert!(!s.matches(8, &[1.4, 1.6], 3));
        assert!(!s.matches(7, &[1.4], 3));
        assert!(!s.matches(7, &[1.4, 1.6], 2));
    }

    #[test]
    fn geometry_check() {
        let got = BatchResult::from_file(
            file(vec![record(0.0, false), record(1.0, false)]),
            0,
            Path::new("x"),
        )
        .unwrap();
        let frame = |x| {
            Snapshot::new(vec![
                Atom::new(6, x, 0.0, 0.0),
                Atom::new(8, x, 0.0, 1.0),
            ])
        };
        assert_eq!(got.check_geometry(&[frame(0.0), frame(1.0)], 1e-6), Ok(()));
        assert_eq!(
            got.check_geometry(&[frame(0.0), frame(1.1)], 1e-6),
            Err(Mismatch::Atom {
                snapshot: 1,
                atom: 0
            })
        );
        assert_eq!(
            got.check_geometry(&[frame(0.0)], 1e-6),
            Err(Mismatch::Count {
                found: 2,
                expected: 1
            })
        );
    }
}
