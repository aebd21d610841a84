//! # niicanon
//!
//! Canonicalize NIfTI template volumes before they enter a shared archive.
//!
//! Every volume is reoriented to RAS+ voxel axes, stored in the dtype its
//! modality calls for, optionally deobliqued and intensity-normalized, and
//! stamped with identical sform and qform (code 4, "template aligned").
//! Volumes that already satisfy this are left alone, so a second pass over
//! canonical output changes nothing.
//!
//! ## Example
//!
//! ```ignore
//! use niicanon::{canon, CanonConfig};
//! use std::path::Path;
//!
//! let report = canon::run(Path::new("tpl-MNI152NLin2009cAsym"), None, &CanonConfig::default())?;
//! for path in &report.modified {
//!     println!("{}", path.display());
//! }
//! ```

#![warn(missing_docs)]

pub mod canon;
pub mod config;
pub mod error;
pub mod nifti;
pub mod transforms;

pub use canon::{Engine, Modality, Outcome, RunReport, TransformDecision};
pub use config::CanonConfig;
pub use error::{Error, Result};
pub use nifti::{load, save, NiftiImage};
