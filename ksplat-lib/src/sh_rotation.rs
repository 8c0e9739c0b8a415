//! Rotation of real spherical harmonics coefficients.
//!
//! Coefficients use the basis of the common 3D Gaussian splatting renderers:
//! real harmonics with the Condon-Shortley phase, bands ordered `m = -l..=l`.
//! The band 1 matrix is a permutation of the rotation matrix; bands 2 and 3
//! are built from it with the Ivanic-Ruedenberg recurrence, which expresses
//! each band as quadratic combinations of band 1 and the band below.

use glam::{Mat3, Mat4, Quat};

/// Per-band rotation matrices for SH degrees 1 to 3.
#[derive(Debug, Clone, PartialEq)]
pub struct ShRotation {
    band1: [[f32; 3]; 3],
    band2: [[f32; 5]; 5],
    band3: [[f32; 7]; 7],
}

impl ShRotation {
    pub fn identity() -> Self {
        Self::from_matrix(&Mat3::IDENTITY)
    }

    /// Uses only the rotational part of `transform`.
    pub fn from_transform(transform: &Mat4) -> Self {
        let (_, rotation, _) = transform.to_scale_rotation_translation();
        Self::from_quat(rotation)
    }

    pub fn from_quat(rotation: Quat) -> Self {
        Self::from_matrix(&Mat3::from_quat(rotation.normalize()))
    }

    pub fn from_matrix(rotation: &Mat3) -> Self {
        // SH band 1 is ordered (y, z, x).
        const PERM: [usize; 3] = [1, 2, 0];
        let element = |row: usize, col: usize| rotation.col(col)[row];

        let mut r1 = [0.0f32; 9];
        for i in 0..3 {
            for j in 0..3 {
                r1[i * 3 + j] = element(PERM[i], PERM[j]);
            }
        }
        let mut r2 = [0.0f32; 25];
        next_band(&r1, &r1, 2, &mut r2);
        let mut r3 = [0.0f32; 49];
        next_band(&r1, &r2, 3, &mut r3);

        Self {
            band1: with_phase(&r1),
            band2: with_phase(&r2),
            band3: with_phase(&r3),
        }
    }

    /// Rotates the interleaved (`[c.r, c.g, c.b]` per coefficient) coefficients
    /// of bands 1..=`degree` from `input` into `output`.
    pub fn rotate(&self, input: &[f32], output: &mut [f32], degree: u32) {
        if degree >= 1 {
            apply_band(&self.band1, &input[0..9], &mut output[0..9]);
        }
        if degree >= 2 {
            apply_band(&self.band2, &input[9..24], &mut output[9..24]);
        }
        if degree >= 3 {
            apply_band(&self.band3, &input[24..45], &mut output[24..45]);
        }
    }

    pub fn band1(&self) -> &[[f32; 3]; 3] {
        &self.band1
    }

    pub fn band2(&self) -> &[[f32; 5]; 5] {
        &self.band2
    }
}

/// Each output coefficient is a row of `band` dotted with the input
/// coefficients, per colour channel.
#[inline]
fn apply_band<const N: usize>(band: &[[f32; N]; N], input: &[f32], output: &mut [f32]) {
    for (i, row) in band.iter().enumerate() {
        for c in 0..3 {
            output[i * 3 + c] = row
                .iter()
                .enumerate()
                .map(|(j, w)| w * input[j * 3 + c])
                .sum();
        }
    }
}

/// Converts a phase-free row-major band matrix to the Condon-Shortley basis.
fn with_phase<const N: usize>(flat: &[f32]) -> [[f32; N]; N] {
    std::array::from_fn(|i| {
        std::array::from_fn(|j| {
            let v = flat[i * N + j];
            if (i + j) % 2 == 1 {
                -v
            } else {
                v
            }
        })
    })
}

#[inline]
fn kronecker(a: i32, b: i32) -> f32 {
    if a == b {
        1.0
    } else {
        0.0
    }
}

/// Band `l` from band 1 (`r1`) and band `l - 1` (`prev`), both phase-free and
/// row-major.
fn next_band(r1: &[f32], prev: &[f32], l: i32, out: &mut [f32]) {
    let pl = l - 1;
    let prev_width = (2 * pl + 1) as usize;
    let width = (2 * l + 1) as usize;

    let r = |i: i32, j: i32| r1[((i + 1) * 3 + (j + 1)) as usize];
    let m = |a: i32, b: i32| prev[(a + pl) as usize * prev_width + (b + pl) as usize];
    let p = |i: i32, a: i32, b: i32| {
        if b == l {
            r(i, 1) * m(a, pl) - r(i, -1) * m(a, -pl)
        } else if b == -l {
            r(i, 1) * m(a, -pl) + r(i, -1) * m(a, pl)
        } else {
            r(i, 0) * m(a, b)
        }
    };

    for mi in -l..=l {
        for ni in -l..=l {
            let d = kronecker(mi, 0);
            let denom = if ni.abs() == l {
                (2 * l * (2 * l - 1)) as f32
            } else {
                ((l + ni) * (l - ni)) as f32
            };
            let am = mi.abs();
            let u = (((l + mi) * (l - mi)) as f32 / denom).sqrt();
            let v = 0.5 * ((1.0 + d) * ((l + am - 1) * (l + am)) as f32 / denom).sqrt() * (1.0 - 2.0 * d);
            let w = -0.5 * (((l - am - 1) * (l - am)) as f32 / denom).sqrt() * (1.0 - d);

            let mut value = 0.0;
            if u != 0.0 {
                value += u * p(0, mi, ni);
            }
            if v != 0.0 {
                let vt = if mi == 0 {
                    p(1, 1, ni) + p(-1, -1, ni)
                } else if mi > 0 {
                    p(1, mi - 1, ni) * (1.0 + kronecker(mi, 1)).sqrt()
                        - p(-1, -mi + 1, ni) * (1.0 - kronecker(mi, 1))
                } else {
                    p(1, mi + 1, ni) * (1.0 - kronecker(mi, -1))
                        + p(-1, -mi - 1, ni) * (1.0 + kronecker(mi, -1)).sqrt()
                };
                value += v * vt;
            }
            if w != 0.0 {
                let wt = if mi > 0 {
                    p(1, mi + 1, ni) + p(-1, -mi - 1, ni)
                } else {
                    p(1, mi - 1, ni) - p(-1, -mi + 1, ni)
                };
                value += w * wt;
            }
            out[(mi + l) as usize * width + (ni + l) as usize] = value;
        }
    }
}
