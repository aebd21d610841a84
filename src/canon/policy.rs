//! Storage dtype and value policy per modality.

use super::modality::Modality;
use crate::error::{Error, Result};
use crate::nifti::DataType;
use ndarray::ArrayD;
use rayon::prelude::*;

/// Target 99.9th-percentile intensity after normalization.
pub const NORMALIZED_PEAK: f64 = 1e4;

/// Percentile used as the normalization reference.
pub const NORMALIZATION_PERCENTILE: f64 = 99.9;

/// Affine value map applied as `(v + offset) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    /// Multiplier applied after the offset.
    pub scale: f64,
    /// Added before scaling.
    pub offset: f64,
}

impl Rescale {
    /// True when the map leaves every value unchanged.
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }

    /// Apply to one value.
    pub fn apply(&self, value: f64) -> f64 {
        (value + self.offset) * self.scale
    }
}

/// Storage decision for one volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DtypeDecision {
    /// Dtype the volume should be stored as.
    pub target_dtype: DataType,
    /// Value map to apply before casting, if any.
    pub rescale: Option<Rescale>,
}

/// Smallest and largest non-NaN values.
fn value_range(values: &ArrayD<f64>) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn fits_uint8(values: &ArrayD<f64>) -> bool {
    values.iter().all(|&v| (0.0..256.0).contains(&v))
}

/// Pick the target dtype and optional rescale.
///
/// Priority: masks are uint8; label maps whose values all lie in `[0, 256)`
/// are uint8 when dtype coercion is on; probabilistic maps are float32 scaled
/// to `[0, 1]` regardless of coercion; otherwise int16 when coercing, else the
/// current dtype.
pub fn decide(
    modality: &Modality,
    current: DataType,
    values: &ArrayD<f64>,
    force_dtype: bool,
) -> DtypeDecision {
    let keep = |target_dtype| DtypeDecision {
        target_dtype,
        rescale: None,
    };

    match modality {
        Modality::Mask => keep(DataType::UInt8),
        Modality::Dseg if force_dtype && fits_uint8(values) => keep(DataType::UInt8),
        Modality::Probseg => {
            let (lo, hi) = value_range(values).unwrap_or((0.0, 1.0));
            let span = hi - lo;
            let scale = if span > 0.0 && span.is_finite() {
                1.0 / span
            } else {
                tracing::warn!(min = lo, max = hi, "probseg has no value range, only shifting to 0");
                1.0
            };
            DtypeDecision {
                target_dtype: DataType::Float32,
                rescale: Some(Rescale { scale, offset: -lo }),
            }
        }
        _ if !force_dtype => keep(current),
        _ => keep(DataType::Int16),
    }
}

/// Percentile with linear interpolation between closest ranks, over finite values.
pub fn percentile(values: &ArrayD<f64>, q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.par_sort_unstable_by(f64::total_cmp);

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Intensity normalization factor, when requested and applicable.
///
/// Returns `NORMALIZED_PEAK / p99.9` for T1w, T2w and PD volumes when
/// `normalize` is set, `None` otherwise. The factor multiplies values after
/// any dtype rescale.
pub fn normalization(modality: &Modality, values: &ArrayD<f64>, normalize: bool) -> Result<Option<f64>> {
    if !normalize || !modality.is_intensity() {
        return Ok(None);
    }
    match percentile(values, NORMALIZATION_PERCENTILE) {
        Some(p) if p > 0.0 && p.is_finite() => Ok(Some(NORMALIZED_PEAK / p)),
        other => Err(Error::MalformedInput(format!(
            "cannot normalize {modality}: {NORMALIZATION_PERCENTILE}th percentile is {}",
            other.map_or_else(|| "undefined".to_string(), |p| p.to_string())
        ))),
    }
}
