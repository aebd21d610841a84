//! Axis orientation codes and voxel-grid reorientation.
//!
//! An orientation names, for each voxel axis, the world direction that axis
//! increases towards (`R`/`L`, `A`/`P`, `S`/`I`). The canonical orientation is
//! `RAS`: voxel axis i increases along positive world axis i.

use crate::error::{Error, Result};
use crate::nifti::{matmul, Affine, NiftiImage};
use std::fmt;
use std::str::FromStr;

/// Direction a single voxel axis points in world space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisCode {
    /// +x
    R,
    /// -x
    L,
    /// +y
    A,
    /// -y
    P,
    /// +z
    S,
    /// -z
    I,
}

impl AxisCode {
    const fn from_parts(world_axis: usize, negative: bool) -> Self {
        match (world_axis, negative) {
            (0, false) => Self::R,
            (0, true) => Self::L,
            (1, false) => Self::A,
            (1, true) => Self::P,
            (_, false) => Self::S,
            (_, true) => Self::I,
        }
    }

    /// World axis index (0 = x, 1 = y, 2 = z).
    pub const fn world_axis(self) -> usize {
        match self {
            Self::R | Self::L => 0,
            Self::A | Self::P => 1,
            Self::S | Self::I => 2,
        }
    }

    /// True when the axis runs towards negative world coordinates.
    pub const fn is_negative(self) -> bool {
        matches!(self, Self::L | Self::P | Self::I)
    }

    const fn as_char(self) -> char {
        match self {
            Self::R => 'R',
            Self::L => 'L',
            Self::A => 'A',
            Self::P => 'P',
            Self::S => 'S',
            Self::I => 'I',
        }
    }
}

/// Orientation of the three spatial voxel axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Orientation([AxisCode; 3]);

impl Orientation {
    /// Canonical orientation.
    pub const RAS: Self = Self([AxisCode::R, AxisCode::A, AxisCode::S]);

    /// Build from per-axis codes; each world axis must appear exactly once.
    pub fn new(axes: [AxisCode; 3]) -> Result<Self> {
        let mut seen = [false; 3];
        for code in axes {
            let w = code.world_axis();
            if seen[w] {
                return Err(Error::InvalidOrientation(format!(
                    "world axis {} appears twice in {}",
                    w,
                    axes.iter().map(|c| c.as_char()).collect::<String>()
                )));
            }
            seen[w] = true;
        }
        Ok(Self(axes))
    }

    /// Per-voxel-axis codes.
    pub fn axes(&self) -> [AxisCode; 3] {
        self.0
    }

    /// True for `RAS`.
    pub fn is_canonical(&self) -> bool {
        *self == Self::RAS
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in self.0 {
            write!(f, "{}", code.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for Orientation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let codes: Vec<AxisCode> = s
            .chars()
            .map(|ch| match ch.to_ascii_uppercase() {
                'R' => Ok(AxisCode::R),
                'L' => Ok(AxisCode::L),
                'A' => Ok(AxisCode::A),
                'P' => Ok(AxisCode::P),
                'S' => Ok(AxisCode::S),
                'I' => Ok(AxisCode::I),
                other => Err(Error::InvalidOrientation(format!(
                    "unknown axis code '{other}' in {s:?}"
                ))),
            })
            .collect::<Result<_>>()?;
        let axes: [AxisCode; 3] = codes.try_into().map_err(|_| {
            Error::InvalidOrientation(format!("expected three axis codes, got {s:?}"))
        })?;
        Self::new(axes)
    }
}

/// Closest axis-aligned orientation of an affine.
///
/// Columns of the linear block are normalized, then voxel axes are assigned
/// greedily to the world axis with the largest remaining direction cosine.
pub fn orientation_from_affine(affine: &Affine) -> Result<Orientation> {
    let mut cosines = [[0.0f64; 3]; 3];
    for j in 0..3 {
        let norm = (0..3)
            .map(|i| affine[i][j] * affine[i][j])
            .sum::<f64>()
            .sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return Err(Error::MalformedInput(format!(
                "affine column {j} has zero or non-finite length"
            )));
        }
        for i in 0..3 {
            cosines[i][j] = affine[i][j] / norm;
        }
    }

    let mut codes = [AxisCode::R; 3];
    let mut used_world = [false; 3];
    let mut used_voxel = [false; 3];
    for _ in 0..3 {
        let mut best: Option<(usize, usize, f64)> = None;
        for w in (0..3).filter(|&w| !used_world[w]) {
            for j in (0..3).filter(|&j| !used_voxel[j]) {
                let magnitude = cosines[w][j].abs();
                if best.map_or(true, |(_, _, m)| magnitude > m) {
                    best = Some((w, j, magnitude));
                }
            }
        }
        let Some((w, j, _)) = best else {
            break;
        };
        used_world[w] = true;
        used_voxel[j] = true;
        codes[j] = AxisCode::from_parts(w, cosines[w][j] < 0.0);
    }
    Orientation::new(codes)
}

/// Reorder and flip voxel axes so the image has `target` orientation.
///
/// Both coded forms present in the header are carried through the same
/// index transform. Axes beyond the third are left untouched. Returns a
/// clone when the image already has the target orientation.
pub fn reorient(image: &NiftiImage, target: Orientation) -> Result<NiftiImage> {
    let source = orientation_from_affine(&image.affine())?;
    if source == target {
        return Ok(image.clone());
    }
    if image.ndim() < 3 {
        return Err(Error::InvalidDimensions(format!(
            "cannot reorient a {}-dimensional image from {source} to {target}",
            image.ndim()
        )));
    }

    let shape = image.shape().to_vec();
    let mut order: Vec<usize> = (0..shape.len()).collect();
    let mut flips = Vec::new();
    let mut index_map = [[0.0f64; 4]; 4];
    index_map[3][3] = 1.0;

    for (t, code) in target.axes().into_iter().enumerate() {
        let j = source
            .axes()
            .iter()
            .position(|c| c.world_axis() == code.world_axis())
            .ok_or_else(|| Error::InvalidOrientation(format!("{source} -> {target}")))?;
        order[t] = j;
        if source.axes()[j].is_negative() != code.is_negative() {
            flips.push(j);
            index_map[j][t] = -1.0;
            index_map[j][3] = (shape[j] - 1) as f64;
        } else {
            index_map[j][t] = 1.0;
        }
    }

    let data = image.data().flipped_and_permuted(&flips, &order);
    let mut header = image.header().clone();
    let old_pixdim = header.pixdim;
    for (t, &j) in order.iter().take(3).enumerate() {
        header.pixdim[t + 1] = old_pixdim[j + 1];
    }

    let sform = header.sform();
    let qform = header.qform();
    if let Some(sform) = sform {
        let code = header.sform_code;
        header.set_sform(&matmul(&sform, &index_map), code);
    }
    if let Some(qform) = qform {
        let code = header.qform_code;
        header.set_qform(&matmul(&qform, &index_map), code);
    }
    if sform.is_none() && qform.is_none() {
        // only reachable for non-canonical targets: the pixdim fallback is RAS
        header.set_sform(&matmul(&image.affine(), &index_map), 2);
    }

    Ok(NiftiImage::from_parts(header, data).with_extension_block(image.extension_block().to_vec()))
}

/// Reorient to `RAS`, reporting whether the voxel grid changed.
pub fn reorient_to_canonical(image: &NiftiImage) -> Result<(NiftiImage, bool)> {
    let source = orientation_from_affine(&image.affine())?;
    if source.is_canonical() {
        return Ok((image.clone(), false));
    }
    tracing::debug!(from = %source, "reorienting to RAS");
    Ok((reorient(image, Orientation::RAS)?, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nifti::{ArrayData, IDENTITY};
    use ndarray::{ArrayD, IxDyn, ShapeBuilder};

    fn volume(shape: [usize; 3], affine: Affine) -> NiftiImage {
        let n = shape.iter().product::<usize>();
        let array = ArrayD::from_shape_vec(IxDyn(&shape).f(), (0..n as i16).collect()).unwrap();
        NiftiImage::from_array(array, affine)
    }

    fn world(affine: &Affine, ijk: [usize; 3]) -> [f64; 3] {
        std::array::from_fn(|r| {
            (0..3).map(|c| affine[r][c] * ijk[c] as f64).sum::<f64>() + affine[r][3]
        })
    }

    #[test]
    fn parse_and_display() {
        let o: Orientation = "lps".parse().unwrap();
        assert_eq!(o.to_string(), "LPS");
        assert!("RRS".parse::<Orientation>().is_err());
        assert!("RA".parse::<Orientation>().is_err());
        assert!("RAX".parse::<Orientation>().is_err());
    }

    #[test]
    fn orientation_of_common_affines() {
        assert_eq!(orientation_from_affine(&IDENTITY).unwrap(), Orientation::RAS);

        let lps = [
            [-1.0, 0.0, 0.0, 90.0],
            [0.0, -1.0, 0.0, 126.0],
            [0.0, 0.0, 1.0, -72.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        assert_eq!(orientation_from_affine(&lps).unwrap().to_string(), "LPS");

        // voxel axes stored as (y, z, x)
        let permuted = [
            [0.0, 0.0, 2.0, 0.0],
            [2.0, 0.0, 0.0, 0.0],
            [0.0, -2.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        assert_eq!(orientation_from_affine(&permuted).unwrap().to_string(), "AIR");
    }

    #[test]
    fn degenerate_column_is_malformed() {
        let mut affine = IDENTITY;
        affine[1][1] = 0.0;
        let err = orientation_from_affine(&affine).unwrap_err();
        assert_eq!(err.kind(), "malformed-input");
    }

    #[test]
    fn canonical_image_is_untouched() {
        let img = volume([2, 3, 4], IDENTITY);
        let (out, changed) = reorient_to_canonical(&img).unwrap();
        assert!(!changed);
        assert_eq!(out.data(), img.data());
    }

    #[test]
    fn reorient_preserves_world_positions() {
        let affine = [
            [0.0, 0.0, -2.0, 30.0],
            [1.5, 0.0, 0.0, -10.0],
            [0.0, -1.0, 0.0, 5.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let img = volume([3, 4, 5], affine);
        let (out, changed) = reorient_to_canonical(&img).unwrap();
        assert!(changed);
        assert_eq!(orientation_from_affine(&out.affine()).unwrap(), Orientation::RAS);
        assert_eq!(out.shape(), &[5, 3, 4]);
        assert_eq!(out.voxel_sizes(), [2.0, 1.5, 1.0]);

        let (ArrayData::I16(before), ArrayData::I16(after)) = (img.data(), out.data()) else {
            panic!("expected i16 data");
        };
        let new_affine = out.affine();
        for (idx, &value) in after.indexed_iter() {
            let ijk = [idx[0], idx[1], idx[2]];
            let pos = world(&new_affine, ijk);
            // locate the source voxel at the same world position
            let src = (0..3)
                .flat_map(|i| (0..4).flat_map(move |j| (0..5).map(move |k| [i, j, k])))
                .find(|&s| {
                    let p = world(&affine, s);
                    (0..3).all(|r| (p[r] - pos[r]).abs() < 1e-9)
                })
                .unwrap();
            assert_eq!(before[[src[0], src[1], src[2]]], value);
        }
    }

    #[test]
    fn reorient_updates_both_coded_forms() {
        let affine = [
            [-1.0, 0.0, 0.0, 10.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let mut img = volume([4, 2, 2], affine);
        img.header_mut().set_qform(&affine, 1);
        let out = reorient(&img, Orientation::RAS).unwrap();

        let expected = [
            [1.0, 0.0, 0.0, 7.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        assert_eq!(out.header().sform().unwrap(), expected);
        let qform = out.header().qform().unwrap();
        for i in 0..4 {
            for j in 0..4 {
                assert!((qform[i][j] - expected[i][j]).abs() < 1e-9);
            }
        }
        assert_eq!(out.header().sform_code, 1);
        assert_eq!(out.header().qform_code, 1);
    }

    #[test]
    fn reorient_keeps_time_axis() {
        let affine = [
            [-1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let array = ArrayD::from_shape_vec(IxDyn(&[2, 1, 1, 3]).f(), (0u8..6).collect()).unwrap();
        let img = NiftiImage::from_array(array, affine);
        let out = reorient(&img, Orientation::RAS).unwrap();
        assert_eq!(out.shape(), &[2, 1, 1, 3]);
        let ArrayData::U8(a) = out.data() else {
            panic!("expected u8 data");
        };
        assert_eq!(a[[0, 0, 0, 2]], 5);
        assert_eq!(a[[1, 0, 0, 2]], 4);
    }
}
