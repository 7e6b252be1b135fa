use std::{fmt::Display, ops::Range, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Atom, TrajError, Vec3};

/// A single molecular configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub atoms: Vec<Atom>,
}

impl Snapshot {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self { atoms }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn coords(&self) -> Vec<Vec3> {
        self.atoms.iter().map(Atom::coord).collect()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.atoms.iter().map(Atom::label).collect()
    }

    /// return the index of the first atom in `self` whose element differs from
    /// the corresponding `label` or whose coordinates differ from `coords` by
    /// more than `tol` in any component. a length mismatch reports the length
    /// of the shorter side
    pub fn first_mismatch(
        &self,
        labels: &[impl AsRef<str>],
        coords: &[[f64; 3]],
        tol: f64,
    ) -> Option<usize> {
        let n = self.len();
        if labels.len() != n || coords.len() != n {
            return Some(n.min(labels.len()).min(coords.len()));
        }
        self.atoms.iter().zip(labels).zip(coords).position(
            |((atom, label), coord)| {
                atom.label() != label.as_ref()
                    || atom
                        .to_array()
                        .iter()
                        .zip(coord)
                        .any(|(a, b)| (a - b).abs() > tol)
            },
        )
    }

    /// write `self` as a single XYZ frame with `comment` on the second line
    pub fn write_frame(
        &self,
        f: &mut impl std::fmt::Write,
        comment: &str,
    ) -> std::fmt::Result {
        writeln!(f, "{}", self.len())?;
        writeln!(f, "{comment}")?;
        for atom in &self.atoms {
            writeln!(f, "{atom}")?;
        }
        Ok(())
    }
}

/// An ordered sequence of [Snapshot]s sharing the same atom count and element
/// ordering
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trajectory {
    frames: Vec<Snapshot>,
}

impl Trajectory {
    /// build a trajectory from `frames`, checking that every frame has the same
    /// elements in the same order as the first
    pub fn new(frames: Vec<Snapshot>) -> Result<Self, TrajError> {
        if let Some(first) = frames.first() {
            for (i, frame) in frames.iter().enumerate().skip(1) {
                if frame.len() != first.len() {
                    return Err(TrajError::Inconsistent {
                        frame: i,
                        msg: format!(
                            "{} atoms instead of {}",
                            frame.len(),
                            first.len()
                        ),
                    });
                }
                if let Some(j) = frame
                    .atoms
                    .iter()
                    .zip(&first.atoms)
                    .position(|(a, b)| a.atomic_number != b.atomic_number)
                {
                    return Err(TrajError::Inconsistent {
                        frame: i,
                        msg: format!(
                            "atom {j} is {} instead of {}",
                            frame.atoms[j].label(),
                            first.atoms[j].label()
                        ),
                    });
                }
            }
        }
        Ok(Self { frames })
    }

    /// load a multi-frame XYZ file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrajError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| TrajError::Io(path.to_owned(), e))?;
        s.parse()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// the number of atoms in each frame
    pub fn natoms(&self) -> usize {
        self.frames.first().map_or(0, Snapshot::len)
    }

    /// the element labels shared by every frame
    pub fn labels(&self) -> Vec<&str> {
        self.frames.first().map_or_else(Vec::new, Snapshot::labels)
    }

    pub fn frames(&self) -> &[Snapshot] {
        &self.frames
    }

    pub fn slice(&self, range: Range<usize>) -> &[Snapshot] {
        &self.frames[range]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Snapshot> {
        self.frames.iter()
    }
}

impl FromStr for Trajectory {
    type Err = TrajError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut frames = Vec::new();
        let mut lines = s.lines().enumerate().map(|(i, l)| (i + 1, l));
        while let Some((lineno, line)) = lines.next() {
            if line.trim().is_empty() {
                continue;
            }
            let natoms: usize =
                line.trim().parse().map_err(|_| TrajError::Parse {
                    line: lineno,
                    msg: format!("expected an atom count, found `{line}`"),
                })?;
            if lines.next().is_none() {
                return Err(TrajError::Parse {
                    line: lineno + 1,
                    msg: "missing comment line".to_owned(),
                });
            }
            let mut atoms = Vec::with_capacity(natoms);
            for _ in 0..natoms {
                let Some((lineno, line)) = lines.next() else {
                    return Err(TrajError::Parse {
                        line: lineno,
                        msg: format!(
                            "frame ended after {} of {natoms} atoms",
                            atoms.len()
                        ),
                    });
                };
                let atom = line
                    .parse::<Atom>()
                    .map_err(|msg| TrajError::Parse { line: lineno, msg })?;
                atoms.push(atom);
            }
            frames.push(Snapshot::new(atoms));
        }
        Self::new(frames)
    }
}

impl Display for Trajectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            frame.write_frame(f, &format!("frame {i}"))?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a Snapshot;

    type IntoIter = std::slice::Iter<'a, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// write `frames` to `path` as a multi-frame XYZ file. frame comments record
/// the index of each frame in the full trajectory, starting from `offset`
pub fn write_xyz(
    path: impl AsRef<Path>,
    frames: &[Snapshot],
    offset: usize,
) -> Result<(), TrajError> {
    let path = path.as_ref();
    let mut body = String::new();
    for (i, frame) in frames.iter().enumerate() {
        // writing to a String cannot fail
        let _ = frame.write_frame(&mut body, &format!("frame {}", offset + i));
    }
    std::fs::write(path, body).map_err(|e| TrajError::Io(path.to_owned(), e))
}
