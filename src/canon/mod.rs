//! Template volume canonicalization.
//!
//! Pure decision functions (`modality`, `affine`, `policy`, `detect`) feed the
//! per-file [`Engine`]; [`walk::run`] applies it to a whole tree.

pub mod affine;
pub mod detect;
pub mod engine;
pub mod modality;
pub mod policy;
pub mod walk;

pub use affine::{
    analyze, deoblique, max_obliquity, obliquity, orthogonalize, shear, AffineAnalysis,
    OBLIQUITY_THRESHOLD, SHEAR_TOLERANCE,
};
pub use detect::{allclose, is_changed, ChangeInputs, TEMPLATE_XFORM_CODE};
pub use engine::{Engine, Outcome, TransformDecision};
pub use modality::{classify, stem_of, Modality};
pub use policy::{decide, normalization, percentile, DtypeDecision, Rescale};
pub use walk::{is_nifti, run, walk_files, FileFailure, RunReport};
