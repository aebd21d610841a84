//! Obliquity measurement and cardinalization of voxel-to-world affines.

use crate::error::{Error, Result};
use crate::nifti::header::det3;
use crate::nifti::{matmul, Affine};

/// An affine is oblique when any axis deviates from cardinal by more than this (radians).
pub const OBLIQUITY_THRESHOLD: f64 = 1e-2;

/// Largest cosine between voxel axes still treated as orthogonal.
///
/// A qform stores rotation and zooms only, so any shear above this is removed
/// before the affine is written to both coded forms.
pub const SHEAR_TOLERANCE: f64 = 1e-6;

type Mat3 = [[f64; 3]; 3];

/// Result of inspecting one affine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineAnalysis {
    /// Angle (radians) between each world axis and its closest voxel axis.
    pub obliquity: [f64; 3],
    /// Deobliquing is enabled and the affine exceeds the threshold.
    pub needs_deoblique: bool,
    /// Affine to store: the deobliqued one when `needs_deoblique`, the
    /// orthogonalized one when the input is sheared, else the input.
    pub new_affine: Affine,
}

impl AffineAnalysis {
    /// Largest per-axis obliquity.
    pub fn max_obliquity(&self) -> f64 {
        max_of(&self.obliquity)
    }
}

fn max_of(values: &[f64; 3]) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

fn linear(affine: &Affine) -> Mat3 {
    std::array::from_fn(|i| std::array::from_fn(|j| affine[i][j]))
}

fn invert3(m: &Mat3, what: &str) -> Result<Mat3> {
    let det = det3(m);
    if !det.is_finite() || det.abs() <= 1e-12 {
        return Err(Error::MalformedInput(format!("{what} is singular (det = {det})")));
    }
    let c = |r0: usize, c0: usize, r1: usize, c1: usize| m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
    Ok([
        [c(1, 1, 2, 2) / det, -c(0, 1, 2, 2) / det, c(0, 1, 1, 2) / det],
        [-c(1, 0, 2, 2) / det, c(0, 0, 2, 2) / det, -c(0, 0, 1, 2) / det],
        [c(1, 0, 2, 1) / det, -c(0, 0, 2, 1) / det, c(0, 0, 1, 1) / det],
    ])
}

/// Fail unless the bottom row is exactly `[0, 0, 0, 1]`.
pub fn check_bottom_row(affine: &Affine) -> Result<()> {
    if affine[3] != [0.0, 0.0, 0.0, 1.0] {
        return Err(Error::MalformedInput(format!(
            "affine bottom row is {:?}, expected [0, 0, 0, 1]",
            affine[3]
        )));
    }
    Ok(())
}

/// Per-world-axis obliquity in radians.
///
/// Columns of the linear block are normalized by the voxel sizes (column
/// norms); for each world row the largest absolute direction cosine is kept
/// and its arccosine returned. Zero for an axis-aligned affine.
pub fn obliquity(affine: &Affine) -> Result<[f64; 3]> {
    let l = linear(affine);
    let zooms = column_norms(&l)?;
    Ok(std::array::from_fn(|i| {
        let best = (0..3)
            .map(|j| (l[i][j] / zooms[j]).abs())
            .fold(0.0, f64::max);
        best.min(1.0).acos()
    }))
}

/// Largest per-axis obliquity.
pub fn max_obliquity(affine: &Affine) -> Result<f64> {
    Ok(max_of(&obliquity(affine)?))
}

fn column_norms(l: &Mat3) -> Result<[f64; 3]> {
    let mut zooms = [0.0f64; 3];
    for (j, zoom) in zooms.iter_mut().enumerate() {
        *zoom = (0..3).map(|i| l[i][j] * l[i][j]).sum::<f64>().sqrt();
        if !zoom.is_finite() || *zoom == 0.0 {
            return Err(Error::MalformedInput(format!(
                "affine column {j} has zero or non-finite length"
            )));
        }
    }
    Ok(zooms)
}

/// Largest absolute cosine between any two voxel axes. Zero without shear.
pub fn shear(affine: &Affine) -> Result<f64> {
    let l = linear(affine);
    let zooms = column_norms(&l)?;
    let cos = |a: usize, b: usize| {
        (0..3).map(|i| l[i][a] * l[i][b]).sum::<f64>().abs() / (zooms[a] * zooms[b])
    };
    Ok(cos(0, 1).max(cos(0, 2)).max(cos(1, 2)))
}

/// Closest orthogonal matrix (polar factor) by Newton iteration `X = (X + X^-T) / 2`.
fn polar(m: &Mat3) -> Result<Mat3> {
    let mut x = *m;
    for _ in 0..64 {
        let inv = invert3(&x, "linear part of the affine")?;
        let next: Mat3 = std::array::from_fn(|i| std::array::from_fn(|j| 0.5 * (x[i][j] + inv[j][i])));
        let delta = (0..3)
            .flat_map(|i| (0..3).map(move |j| (i, j)))
            .map(|(i, j)| (next[i][j] - x[i][j]).abs())
            .fold(0.0, f64::max);
        x = next;
        if delta <= 1e-15 {
            break;
        }
    }
    Ok(x)
}

/// Remove shear from the linear block, keeping voxel sizes and translation.
///
/// The unit-column direction matrix is replaced by its polar factor, the
/// rotation (or reflection) a qform can represent.
pub fn orthogonalize(affine: &Affine) -> Result<Affine> {
    let l = linear(affine);
    let zooms = column_norms(&l)?;
    let directions: Mat3 = std::array::from_fn(|i| std::array::from_fn(|j| l[i][j] / zooms[j]));
    let q = polar(&directions)?;

    let mut out = *affine;
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = q[i][j] * zooms[j];
        }
    }
    Ok(out)
}

/// Replace an oblique affine with the closest cardinal one.
///
/// With `card = diag(voxel_sizes)` and `cardrot = L * card^-1`, the result is
/// `blockdiag(cardrot^-1, 1) * affine` with its linear block forced to `card`.
/// The voxel grid is unchanged; only its placement in world space moves.
pub fn deoblique(affine: &Affine, voxel_sizes: [f64; 3]) -> Result<Affine> {
    let mut card_inv = [[0.0f64; 3]; 3];
    for (j, &size) in voxel_sizes.iter().enumerate() {
        if !size.is_finite() || size == 0.0 {
            return Err(Error::MalformedInput(format!(
                "voxel size {j} is {size}, cannot build a cardinal affine"
            )));
        }
        card_inv[j][j] = 1.0 / size;
    }

    let l = linear(affine);
    let cardrot: Mat3 = std::array::from_fn(|i| {
        std::array::from_fn(|j| (0..3).map(|k| l[i][k] * card_inv[k][j]).sum())
    });
    let rot_inv = invert3(&cardrot, "rotation part of the affine")?;

    let mut lift = [[0.0f64; 4]; 4];
    for i in 0..3 {
        lift[i][..3].copy_from_slice(&rot_inv[i]);
    }
    lift[3][3] = 1.0;

    let mut out = matmul(&lift, affine);
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = if i == j { voxel_sizes[i] } else { 0.0 };
        }
    }
    Ok(out)
}

/// Measure obliquity and pick the affine to store.
///
/// Over the threshold and with deobliquing enabled, that is the deobliqued
/// affine. Otherwise a sheared input is orthogonalized and anything else is
/// kept as is.
pub fn analyze(
    affine: &Affine,
    voxel_sizes: [f64; 3],
    deoblique_enabled: bool,
) -> Result<AffineAnalysis> {
    check_bottom_row(affine)?;
    let obliquity = obliquity(affine)?;
    let needs_deoblique = deoblique_enabled && max_of(&obliquity) > OBLIQUITY_THRESHOLD;
    let new_affine = if needs_deoblique {
        deoblique(affine, voxel_sizes)?
    } else if shear(affine)? > SHEAR_TOLERANCE {
        orthogonalize(affine)?
    } else {
        *affine
    };
    Ok(AffineAnalysis {
        obliquity,
        needs_deoblique,
        new_affine,
    })
}
