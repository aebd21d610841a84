//! Spatial transforms on NIfTI images.

pub mod orientation;

pub use orientation::{
    orientation_from_affine, reorient, reorient_to_canonical, AxisCode, Orientation,
};
