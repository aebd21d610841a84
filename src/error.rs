//! Error types for niicanon.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the codec, the canonicalization engine and the tree walker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The first bytes of the file are not a NIfTI-1 or NIfTI-2 header.
    #[error("invalid NIfTI magic bytes: {0:?}")]
    InvalidMagic([u8; 4]),

    /// The header declares a datatype code we cannot decode.
    #[error("unsupported data type code: {0}")]
    UnsupportedDataType(i16),

    /// Header dimensions, spacing or offsets are inconsistent.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// gzip payload could not be inflated.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// gzip payload could not be deflated.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Degenerate affine, singular voxel-size matrix or degenerate intensity range.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The destination exists and is not a file we may replace.
    #[error("destination conflict: {}", .0.display())]
    DestinationConflict(PathBuf),

    /// Orientation code is not a permutation of R/L, A/P and S/I.
    #[error("invalid orientation: {0}")]
    InvalidOrientation(String),

    /// Invalid engine or CLI configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Loading a volume failed.
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        /// Offending file.
        path: PathBuf,
        /// Codec error.
        #[source]
        source: Box<Error>,
    },

    /// Writing or copying a file failed.
    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        /// Destination file.
        path: PathBuf,
        /// Codec or filesystem error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn decode(path: impl Into<PathBuf>, source: Error) -> Self {
        Self::Decode {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn encode(path: impl Into<PathBuf>, source: Error) -> Self {
        Self::Encode {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Short machine-friendly label for the error class, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed-input",
            Self::Decode { .. } => "decode",
            Self::Encode { .. } => "encode",
            Self::DestinationConflict(_) => "destination-conflict",
            Self::Configuration(_) | Self::InvalidOrientation(_) => "configuration",
            Self::Io(_) => "io",
            Self::InvalidMagic(_)
            | Self::UnsupportedDataType(_)
            | Self::InvalidDimensions(_)
            | Self::Decompression(_)
            | Self::Compression(_) => "codec",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_wraps_source_message() {
        let err = Error::decode("a/b_T1w.nii", Error::UnsupportedDataType(9999));
        let msg = err.to_string();
        assert!(msg.contains("a/b_T1w.nii"));
        assert!(msg.contains("unsupported data type"));
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn malformed_input_kind() {
        assert_eq!(
            Error::MalformedInput("zero voxel size".into()).kind(),
            "malformed-input"
        );
    }
}
