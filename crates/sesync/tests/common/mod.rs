//! Synthetic pose graphs shared by the integration tests.

#![allow(dead_code)]

use nalgebra::{DMatrix, DVector, Rotation3, Vector3};
use rand::{rngs::SmallRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use sesync::RelativePoseMeasurement;

/// Ground-truth poses and the measurements generated from them.
pub struct Dataset {
    pub measurements: Vec<RelativePoseMeasurement<f64>>,
    pub rotations: Vec<DMatrix<f64>>,
    pub translations: Vec<DVector<f64>>,
}

impl Dataset {
    /// Ground truth as `[t | R]` (`d x (n + d n)`).
    pub fn pose_matrix(&self) -> DMatrix<f64> {
        let n = self.rotations.len();
        let d = self.rotations[0].nrows();
        let mut x = DMatrix::zeros(d, n + d * n);
        for i in 0..n {
            x.column_mut(i).copy_from(&self.translations[i]);
            x.columns_mut(n + d * i, d).copy_from(&self.rotations[i]);
        }
        x
    }

    /// Ground-truth rotations `[R_1 .. R_n]` (`d x d n`).
    pub fn rotation_matrix(&self) -> DMatrix<f64> {
        let n = self.rotations.len();
        let d = self.rotations[0].nrows();
        let x = self.pose_matrix();
        x.columns(n, d * n).into_owned()
    }
}

fn planar_rotation(angle: f64) -> DMatrix<f64> {
    let (s, c) = angle.sin_cos();
    DMatrix::from_row_slice(2, 2, &[c, -s, s, c])
}

fn spatial_rotation(axis_angle: Vector3<f64>) -> DMatrix<f64> {
    let r = Rotation3::from_scaled_axis(axis_angle);
    DMatrix::from_iterator(3, 3, r.matrix().iter().copied())
}

fn rotation(d: usize, params: &[f64]) -> DMatrix<f64> {
    if d == 2 {
        planar_rotation(params[0])
    } else {
        spatial_rotation(Vector3::new(params[0], params[1], params[2]))
    }
}

/// Poses on a circle, measured along the cycle and every second chord.
///
/// Rotation noise is an isotropic perturbation of standard deviation
/// `rotation_noise` radians, translation noise has standard deviation
/// `translation_noise`.
pub fn cycle_dataset(
    d: usize,
    n: usize,
    rotation_noise: f64,
    translation_noise: f64,
    seed: u64,
) -> Dataset {
    let mut rng = SmallRng::seed_from_u64(seed);
    let rot_noise = Normal::new(0.0, rotation_noise.max(1e-300)).unwrap();
    let trans_noise = Normal::new(0.0, translation_noise.max(1e-300)).unwrap();
    let noisy = |rng: &mut SmallRng, dist: &Normal<f64>, sigma: f64| {
        if sigma > 0.0 {
            dist.sample(rng)
        } else {
            0.0
        }
    };

    let params = if d == 2 { 1 } else { 3 };
    let rotations: Vec<DMatrix<f64>> = (0..n)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
            let angles = [phase, 0.3 * phase.sin(), -0.2 * phase.cos()];
            rotation(d, &angles[..params])
        })
        .collect();
    let translations: Vec<DVector<f64>> = (0..n)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
            let coords = [3.0 * phase.cos(), 3.0 * phase.sin(), 0.5 * (2.0 * phase).sin()];
            DVector::from_column_slice(&coords[..d])
        })
        .collect();

    let mut edges: Vec<(usize, usize)> = (0..n).map(|i| (i, (i + 1) % n)).collect();
    if n >= 5 {
        edges.extend((0..n).step_by(2).map(|i| (i, (i + 2) % n)));
    }

    let measurements = edges
        .into_iter()
        .map(|(i, j)| {
            let angles: Vec<f64> = (0..params)
                .map(|_| noisy(&mut rng, &rot_noise, rotation_noise))
                .collect();
            let r = rotations[i].transpose() * &rotations[j] * rotation(d, &angles);
            let mut t = rotations[i].transpose() * (&translations[j] - &translations[i]);
            for k in 0..d {
                t[k] += noisy(&mut rng, &trans_noise, translation_noise);
            }
            RelativePoseMeasurement::new(i, j, r, t, 10.0, 5.0)
        })
        .collect();

    Dataset {
        measurements,
        rotations,
        translations,
    }
}

/// Noiseless planar cycle.
pub fn noiseless_cycle(n: usize) -> Dataset {
    cycle_dataset(2, n, 0.0, 0.0, 0)
}
