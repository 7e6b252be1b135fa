//! Sampling of electrostatic-potential evaluation points from a set of offset
//! molecular surfaces

use std::fmt::Display;

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::prelude::*;
use traj::{Snapshot, Vec3, vdw};

/// multiples of the van der Waals radii defining the sampled surfaces
pub const DEFAULT_SCALE_FACTORS: [f64; 4] = [1.4, 1.6, 1.8, 2.0];

/// A source of candidate points on the surface formed by spheres of `radii`
/// centered on `coords`
pub trait SurfaceGenerator {
    fn compute_surface(&self, coords: &[Vec3], radii: &[f64]) -> Vec<Vec3>;
}

/// Shrake-Rupley style surface: `density` points spread over each atomic sphere
/// on a golden-angle spiral, keeping the ones not buried inside any other
/// sphere
#[derive(Clone, Copy, Debug)]
pub struct ShrakeRupley {
    pub density: usize,
}

impl Default for ShrakeRupley {
    fn default() -> Self {
        Self { density: 100 }
    }
}

impl ShrakeRupley {
    /// `n` roughly uniform unit vectors
    fn sphere(n: usize) -> Vec<Vec3> {
        let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
        (0..n)
            .map(|k| {
                let y = 1.0 - 2.0 * (k as f64 + 0.5) / n as f64;
                let r = (1.0 - y * y).sqrt();
                let phi = golden * k as f64;
                Vec3::new(r * phi.cos(), y, r * phi.sin())
            })
            .collect()
    }
}

impl SurfaceGenerator for ShrakeRupley {
    fn compute_surface(&self, coords: &[Vec3], radii: &[f64]) -> Vec<Vec3> {
        let unit = Self::sphere(self.density);
        let mut ret = Vec::new();
        for (i, (c, r)) in coords.iter().zip(radii).enumerate() {
            for u in &unit {
                let p = c + u * *r;
                let buried = coords.iter().zip(radii).enumerate().any(
                    |(j, (cj, rj))| j != i && (p - cj).norm() < rj - 1e-10,
                );
                if !buried {
                    ret.push(p);
                }
            }
        }
        ret
    }
}

/// Recorded when a surface yields fewer candidate points than there are atoms
#[derive(Clone, Debug, PartialEq)]
pub struct Undersampled {
    pub scale: f64,
    pub available: usize,
    pub wanted: usize,
}

impl Display for Undersampled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "too few surface points at scale factor {}: {} < {}",
            self.scale, self.available, self.wanted
        )
    }
}

/// The sampled points for one snapshot, in scale-factor order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurfaceSampleSet {
    pub points: Vec<Vec3>,
    pub warnings: Vec<Undersampled>,
}

impl SurfaceSampleSet {
    pub fn to_arrays(&self) -> Vec<[f64; 3]> {
        self.points.iter().map(|p| [p.x, p.y, p.z]).collect()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SurfaceError {
    /// an element with no reference van der Waals radius
    UnknownRadius(String),
}

impl Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceError::UnknownRadius(s) => {
                write!(f, "no van der Waals radius for element {s}")
            }
        }
    }
}

impl std::error::Error for SurfaceError {}

/// sample up to one point per atom from each of the surfaces obtained by
/// scaling the radii from `radius` by `scale_factors`. candidates from
/// `generator` are shuffled with `rng` before the first `snapshot.len()` are
/// taken. a surface with too few candidates contributes all of them and
/// records an [Undersampled] warning
pub fn sample<G, R>(
    snapshot: &Snapshot,
    radius: impl Fn(&str) -> Option<f64>,
    scale_factors: &[f64],
    generator: &G,
    rng: &mut R,
) -> Result<SurfaceSampleSet, SurfaceError>
where
    G: SurfaceGenerator + ?Sized,
    R: Rng + ?Sized,
{
    let natoms = snapshot.len();
    let base = snapshot
        .atoms
        .iter()
        .map(|a| {
            radius(a.label()).ok_or_else(|| {
                SurfaceError::UnknownRadius(a.label().to_owned())
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let coords = snapshot.coords();
    let mut ret = SurfaceSampleSet {
        points: Vec::with_capacity(natoms * scale_factors.len()),
        warnings: Vec::new(),
    };
    for &scale in scale_factors {
        let radii: Vec<_> = base.iter().map(|r| r * scale).collect();
        let mut candidates = generator.compute_surface(&coords, &radii);
        if candidates.len() < natoms {
            let w = Undersampled {
                scale,
                available: candidates.len(),
                wanted: natoms,
            };
            log::warn!("{w}");
            ret.warnings.push(w);
        }
        candidates.shuffle(rng);
        candidates.truncate(natoms);
        ret.points.extend(candidates);
    }
    Ok(ret)
}

/// the seed for the snapshot at `index` in the trajectory, so that each
/// snapshot's sample depends only on the run seed and its own position
fn frame_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

/// sample every snapshot in `frames` in parallel with the reference van der
/// Waals radii. `offset` is the trajectory index of `frames[0]`
pub fn sample_frames<G>(
    frames: &[Snapshot],
    offset: usize,
    seed: u64,
    scale_factors: &[f64],
    generator: &G,
) -> Result<Vec<SurfaceSampleSet>, SurfaceError>
where
    G: SurfaceGenerator + Sync + ?Sized,
{
    frames
        .par_iter()
        .enumerate()
        .map(|(i, frame)| {
            let mut rng = StdRng::seed_from_u64(frame_seed(seed, offset + i));
            sample(frame, vdw::radius, scale_factors, generator, &mut rng)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use traj::Atom;

    use super::*;

    /// returns `per_scale[k]` distinct points for the k-th call, cycling
    struct Synthetic {
        per_scale: Vec<usize>,
        calls: std::sync::Mutex<usize>,
    }

    impl Synthetic {
        fn new(per_scale: Vec<usize>) -> Self {
            Self {
                per_scale,
                calls: std::sync::Mutex::new(0),
            }
        }
    }

    impl SurfaceGenerator for Synthetic {
        fn compute_surface(&self, _: &[Vec3], radii: &[f64]) -> Vec<Vec3> {
            let mut calls = self.calls.lock().unwrap();
            let n = self.per_scale[*calls % self.per_scale.len()];
            *calls += 1;
            // tag each point with its radius so the scale can be recovered
            (0..n).map(|i| Vec3::new(i as f64, radii[0], 0.0)).collect()
        }
    }

    fn water() -> Snapshot {
        Snapshot::new(vec![
            Atom::new(8, 0.0, 0.0, -0.0657441568),
            Atom::new(1, 0.0, 0.7574590974, 0.5217905143),
            Atom::new(1, 0.0, -0.7574590974, 0.5217905143),
        ])
    }

    #[test]
    fn full_sample() {
        let g = Synthetic::new(vec![50]);
        let mut rng = StdRng::seed_from_u64(1);
        let got =
            sample(&water(), vdw::radius, &DEFAULT_SCALE_FACTORS, &g, &mut rng)
                .unwrap();
        assert_eq!(got.points.len(), 4 * 3);
        assert!(got.warnings.is_empty());
        // contributions stay in scale-factor order
        for (k, chunk) in got.points.chunks(3).enumerate() {
            let want = 1.52 * DEFAULT_SCALE_FACTORS[k];
            for p in chunk {
                approx::assert_abs_diff_eq!(p.y, want, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn undersampled() {
        let g = Synthetic::new(vec![50, 2, 50, 50]);
        let mut rng = StdRng::seed_from_u64(1);
        let got =
            sample(&water(), vdw::radius, &DEFAULT_SCALE_FACTORS, &g, &mut rng)
                .unwrap();
        assert_eq!(got.points.len(), 3 + 2 + 3 + 3);
        assert_eq!(
            got.warnings,
            vec![Undersampled {
                scale: 1.6,
                available: 2,
                wanted: 3
            }]
        );
    }

    #[test]
    fn reproducible() {
        let run = |seed| {
            let g = Synthetic::new(vec![40]);
            let mut rng = StdRng::seed_from_u64(seed);
            sample(&water(), vdw::radius, &[1.4], &g, &mut rng).unwrap()
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn unknown_radius() {
        let snap = Snapshot::new(vec![Atom::new(26, 0.0, 0.0, 0.0)]);
        let g = Synthetic::new(vec![10]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            sample(&snap, vdw::radius, &[1.4], &g, &mut rng),
            Err(SurfaceError::UnknownRadius("Fe".to_owned()))
        );
    }

    #[test]
    fn shrake_rupley_points_on_surface() {
        let snap = water();
        let coords = snap.coords();
        let radii: Vec<_> = snap
            .atoms
            .iter()
            .map(|a| 1.4 * a.vdw_radius().unwrap())
            .collect();
        let got = ShrakeRupley::default().compute_surface(&coords, &radii);
        assert!(!got.is_empty());
        assert!(got.len() < 3 * 100);
        for p in &got {
            // on at least one sphere and inside none
            let d: Vec<_> = coords
                .iter()
                .zip(&radii)
                .map(|(c, r)| (p - c).norm() - r)
                .collect();
            assert!(d.iter().any(|x| x.abs() < 1e-9));
            assert!(d.iter().all(|x| *x > -1e-9));
        }
    }

    #[test]
    fn sample_frames_is_thread_independent() {
        let frames = vec![water(); 5];
        let g = ShrakeRupley::default();
        let a =
            sample_frames(&frames, 10, 42, &DEFAULT_SCALE_FACTORS, &g).unwrap();
        let b = sample_frames(&frames[2..], 12, 42, &DEFAULT_SCALE_FACTORS, &g)
            .unwrap();
        assert_eq!(a.len(), 5);
        assert_eq!(&a[2..], &b[..]);
        assert!(a.iter().all(|s| s.points.len() == 12));
    }
}
