//! `NIfTI` file format support.
//!
//! Reading and writing of NIfTI-1 and NIfTI-2 volumes (`.nii`, `.nii.gz`),
//! including both coded spatial transforms (sform and qform).

pub(crate) mod header;
pub(crate) mod image;
pub mod io;

pub use header::{
    matmul, Affine, DataType, NiftiHeader, NiftiVersion, SpatialUnits, TemporalUnits, IDENTITY,
};
pub use image::{ArrayData, NiftiElement, NiftiImage};
pub use io::{encode, is_gzipped, load, load_header, save, write_to};
