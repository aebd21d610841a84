//! Decide whether a volume must be rewritten.

use super::policy::Rescale;
use crate::nifti::{Affine, DataType, NiftiHeader};

/// Coded-form code for "aligned to a standard template space".
pub const TEMPLATE_XFORM_CODE: i32 = 4;

/// Relative tolerance for affine comparison.
pub const RTOL: f64 = 1e-5;

/// Absolute tolerance for affine comparison.
pub const ATOL: f64 = 1e-8;

/// Everything the detector looks at.
#[derive(Debug, Clone, Copy)]
pub struct ChangeInputs<'a> {
    /// Header after canonical reorientation.
    pub header: &'a NiftiHeader,
    /// Dtype currently stored.
    pub current_dtype: DataType,
    /// Dtype the policy asked for.
    pub target_dtype: DataType,
    /// Rescale the policy asked for.
    pub rescale: Option<Rescale>,
    /// Normalization factor, when requested.
    pub normalize: Option<f64>,
    /// Deobliquing was triggered.
    pub deobliqued: bool,
    /// Canonical reorientation moved voxel axes.
    pub reoriented: bool,
    /// Affine the output must carry in both coded forms.
    pub new_affine: &'a Affine,
}

/// Elementwise `|a - b| <= ATOL + RTOL * |b|`.
pub fn allclose(a: &Affine, b: &Affine) -> bool {
    a.iter()
        .flatten()
        .zip(b.iter().flatten())
        .all(|(x, y)| (x - y).abs() <= ATOL + RTOL * y.abs())
}

fn coded_form_matches(form: Option<Affine>, code: i32, expected: &Affine) -> bool {
    code == TEMPLATE_XFORM_CODE && form.is_some_and(|f| allclose(&f, expected))
}

/// True when the volume differs from its canonical form.
pub fn is_changed(inputs: &ChangeInputs<'_>) -> bool {
    let header = inputs.header;
    inputs.current_dtype != inputs.target_dtype
        || inputs.rescale.is_some_and(|r| !r.is_identity())
        || inputs.normalize.is_some()
        || inputs.deobliqued
        || inputs.reoriented
        || !coded_form_matches(header.sform(), header.sform_code, inputs.new_affine)
        || !coded_form_matches(header.qform(), header.qform_code, inputs.new_affine)
}
