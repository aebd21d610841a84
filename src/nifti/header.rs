//! `NIfTI` header parsing and representation.
//!
//! Reads NIfTI-1 (348-byte) and NIfTI-2 (540-byte) headers in either byte
//! order and writes them back little-endian. Besides the raw fields, the
//! header exposes the two coded forms (sform and qform) the canonicalization
//! engine reasons about.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Homogeneous 4x4 voxel-to-world transform, row major.
pub type Affine = [[f64; 4]; 4];

/// Identity transform.
pub const IDENTITY: Affine = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// NIfTI format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NiftiVersion {
    /// NIfTI-1 format (348-byte header, 16-bit dimensions)
    #[default]
    Nifti1,
    /// NIfTI-2 format (540-byte header, 64-bit dimensions)
    Nifti2,
}

impl NiftiVersion {
    /// Header size in bytes for this version.
    pub const fn header_size(self) -> usize {
        match self {
            Self::Nifti1 => 348,
            Self::Nifti2 => 540,
        }
    }
}

/// NIfTI-1 header field byte offsets.
mod offsets_v1 {
    pub const SIZEOF_HDR: usize = 0;
    pub const DIM: usize = 40;
    pub const INTENT_CODE: usize = 68;
    pub const DATATYPE: usize = 70;
    pub const BITPIX: usize = 72;
    pub const PIXDIM: usize = 76;
    pub const VOX_OFFSET: usize = 108;
    pub const SCL_SLOPE: usize = 112;
    pub const SCL_INTER: usize = 116;
    pub const XYZT_UNITS: usize = 123;
    pub const DESCRIP: usize = 148;
    pub const AUX_FILE: usize = 228;
    pub const QFORM_CODE: usize = 252;
    pub const SFORM_CODE: usize = 254;
    pub const QUATERN: usize = 256;
    pub const QOFFSET: usize = 268;
    pub const SROW_X: usize = 280;
    pub const SROW_Y: usize = 296;
    pub const SROW_Z: usize = 312;
    pub const MAGIC: usize = 344;
}

/// NIfTI-2 header field byte offsets (only the fields we read or write).
mod offsets_v2 {
    pub const SIZEOF_HDR: usize = 0;
    pub const MAGIC: usize = 4;
    pub const DATATYPE: usize = 12;
    pub const BITPIX: usize = 14;
    pub const DIM: usize = 16;
    pub const PIXDIM: usize = 104;
    pub const VOX_OFFSET: usize = 168;
    pub const SCL_SLOPE: usize = 176;
    pub const SCL_INTER: usize = 184;
    pub const DESCRIP: usize = 240;
    pub const AUX_FILE: usize = 320;
    pub const QFORM_CODE: usize = 344;
    pub const SFORM_CODE: usize = 348;
    pub const QUATERN: usize = 352;
    pub const QOFFSET: usize = 376;
    pub const SROW_X: usize = 400;
    pub const SROW_Y: usize = 432;
    pub const SROW_Z: usize = 464;
    pub const XYZT_UNITS: usize = 500;
    pub const INTENT_CODE: usize = 504;
}

/// `NIfTI` data type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum DataType {
    /// Unsigned 8-bit integer
    UInt8 = 2,
    /// Signed 16-bit integer
    Int16 = 4,
    /// Signed 32-bit integer
    Int32 = 8,
    /// 32-bit floating point
    Float32 = 16,
    /// 64-bit floating point
    Float64 = 64,
    /// Signed 8-bit integer
    Int8 = 256,
    /// Unsigned 16-bit integer
    UInt16 = 512,
    /// Unsigned 32-bit integer
    UInt32 = 768,
    /// Signed 64-bit integer
    Int64 = 1024,
    /// Unsigned 64-bit integer
    UInt64 = 1280,
}

impl DataType {
    /// Parse from `NIfTI` datatype code.
    pub fn from_code(code: i16) -> Result<Self> {
        match code {
            2 => Ok(Self::UInt8),
            4 => Ok(Self::Int16),
            8 => Ok(Self::Int32),
            16 => Ok(Self::Float32),
            64 => Ok(Self::Float64),
            256 => Ok(Self::Int8),
            512 => Ok(Self::UInt16),
            768 => Ok(Self::UInt32),
            1024 => Ok(Self::Int64),
            1280 => Ok(Self::UInt64),
            _ => Err(Error::UnsupportedDataType(code)),
        }
    }

    /// Size of each element in bytes.
    pub const fn byte_size(self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Rust type name, also used for display.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::UInt8 => "u8",
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::UInt16 => "u16",
            Self::Int32 => "i32",
            Self::UInt32 => "u32",
            Self::Int64 => "i64",
            Self::UInt64 => "u64",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Spatial units for voxel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatialUnits {
    #[default]
    /// Units are not specified.
    Unknown,
    /// Voxel dimensions expressed in meters.
    Meter,
    /// Voxel dimensions expressed in millimeters.
    Millimeter,
    /// Voxel dimensions expressed in micrometers.
    Micrometer,
}

impl SpatialUnits {
    fn from_code(code: u8) -> Self {
        match code & 0x07 {
            1 => Self::Meter,
            2 => Self::Millimeter,
            3 => Self::Micrometer,
            _ => Self::Unknown,
        }
    }

    fn to_code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Meter => 1,
            Self::Millimeter => 2,
            Self::Micrometer => 3,
        }
    }
}

/// Temporal units for time dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemporalUnits {
    #[default]
    /// Temporal spacing unspecified.
    Unknown,
    /// Temporal spacing in seconds.
    Second,
    /// Temporal spacing in milliseconds.
    Millisecond,
    /// Temporal spacing in microseconds.
    Microsecond,
}

impl TemporalUnits {
    fn from_code(code: u8) -> Self {
        match code & 0x38 {
            0x08 => Self::Second,
            0x10 => Self::Millisecond,
            0x18 => Self::Microsecond,
            _ => Self::Unknown,
        }
    }

    fn to_code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Second => 0x08,
            Self::Millisecond => 0x10,
            Self::Microsecond => 0x18,
        }
    }
}

/// Unified NIfTI header supporting both NIfTI-1 and NIfTI-2 formats.
///
/// Fields are widened to the NIfTI-2 types (i64 dims, f64 floats); NIfTI-1
/// output narrows them again on write.
#[derive(Debug, Clone)]
pub struct NiftiHeader {
    /// NIfTI format version.
    pub version: NiftiVersion,
    /// Number of dimensions (1-7).
    pub ndim: u8,
    /// Size along each dimension.
    pub dim: [i64; 7],
    /// Data type.
    pub datatype: DataType,
    /// qfac at index 0, voxel sizes at `pixdim[1..=ndim]`.
    pub pixdim: [f64; 8],
    /// Data offset in file.
    pub vox_offset: i64,
    /// Data scaling slope (0 disables scaling).
    pub scl_slope: f64,
    /// Data scaling intercept.
    pub scl_inter: f64,
    /// Spatial units.
    pub spatial_units: SpatialUnits,
    /// Temporal units.
    pub temporal_units: TemporalUnits,
    /// Intent code.
    pub intent_code: i32,
    /// Description string.
    pub descrip: String,
    /// Auxiliary filename.
    pub aux_file: String,
    /// qform transform code.
    pub qform_code: i32,
    /// sform transform code.
    pub sform_code: i32,
    /// Quaternion parameters (b, c, d) for the qform.
    pub quatern: [f64; 3],
    /// Translation of the qform.
    pub qoffset: [f64; 3],
    /// First row of the sform affine matrix.
    pub srow_x: [f64; 4],
    /// Second row of the sform affine matrix.
    pub srow_y: [f64; 4],
    /// Third row of the sform affine matrix.
    pub srow_z: [f64; 4],
    /// File endianness (true = little endian).
    pub(crate) little_endian: bool,
}

impl Default for NiftiHeader {
    fn default() -> Self {
        Self {
            version: NiftiVersion::Nifti1,
            ndim: 3,
            dim: [1, 1, 1, 1, 1, 1, 1],
            datatype: DataType::Float32,
            pixdim: [1.0; 8],
            vox_offset: 352,
            scl_slope: 1.0,
            scl_inter: 0.0,
            spatial_units: SpatialUnits::Millimeter,
            temporal_units: TemporalUnits::Unknown,
            intent_code: 0,
            descrip: String::new(),
            aux_file: String::new(),
            qform_code: 0,
            sform_code: 1,
            quatern: [0.0; 3],
            qoffset: [0.0; 3],
            srow_x: [1.0, 0.0, 0.0, 0.0],
            srow_y: [0.0, 1.0, 0.0, 0.0],
            srow_z: [0.0, 0.0, 1.0, 0.0],
            little_endian: true,
        }
    }
}

fn read_f32s<E: ByteOrder, const N: usize>(bytes: &[u8], at: usize) -> [f64; N] {
    std::array::from_fn(|i| E::read_f32(&bytes[at + i * 4..at + i * 4 + 4]) as f64)
}

fn read_f64s<E: ByteOrder, const N: usize>(bytes: &[u8], at: usize) -> [f64; N] {
    std::array::from_fn(|i| E::read_f64(&bytes[at + i * 8..at + i * 8 + 8]))
}

fn write_f32s(buf: &mut [u8], at: usize, values: &[f64]) {
    for (i, &v) in values.iter().enumerate() {
        LittleEndian::write_f32(&mut buf[at + i * 4..at + i * 4 + 4], v as f32);
    }
}

fn write_f64s(buf: &mut [u8], at: usize, values: &[f64]) {
    for (i, &v) in values.iter().enumerate() {
        LittleEndian::write_f64(&mut buf[at + i * 8..at + i * 8 + 8], v);
    }
}

fn read_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string()
}

fn write_text(buf: &mut [u8], at: usize, width: usize, text: &str) {
    let raw = text.as_bytes();
    let len = raw.len().min(width - 1);
    buf[at..at + len].copy_from_slice(&raw[..len]);
}

fn check_bitpix(datatype: DataType, bitpix: i16) -> Result<()> {
    let expected = (datatype.byte_size() * 8) as i16;
    if bitpix != expected {
        return Err(Error::InvalidDimensions(format!(
            "bitpix {} does not match datatype {} (expected {})",
            bitpix,
            datatype.type_name(),
            expected
        )));
    }
    Ok(())
}

impl NiftiHeader {
    /// Size of NIfTI-1 header in bytes.
    pub const SIZE: usize = 348;

    /// Size of NIfTI-2 header in bytes.
    pub const SIZE_V2: usize = 540;

    /// Returns the header size for this header's version.
    pub fn header_size(&self) -> usize {
        self.version.header_size()
    }

    /// Read header from bytes with automatic version and endianness detection.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "header too short to detect version",
            )));
        }

        let sizeof_le = LittleEndian::read_i32(&bytes[0..4]);
        let sizeof_be = BigEndian::read_i32(&bytes[0..4]);
        let (version, little_endian) = match (sizeof_le, sizeof_be) {
            (348, _) => (NiftiVersion::Nifti1, true),
            (_, 348) => (NiftiVersion::Nifti1, false),
            (540, _) => (NiftiVersion::Nifti2, true),
            (_, 540) => (NiftiVersion::Nifti2, false),
            _ => {
                return Err(Error::InvalidMagic([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ]))
            }
        };

        if bytes.len() < version.header_size() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "header too short: got {} bytes, need {} for {:?}",
                    bytes.len(),
                    version.header_size(),
                    version
                ),
            )));
        }

        let header = match (version, little_endian) {
            (NiftiVersion::Nifti1, true) => Self::parse_v1::<LittleEndian>(bytes, true)?,
            (NiftiVersion::Nifti1, false) => Self::parse_v1::<BigEndian>(bytes, false)?,
            (NiftiVersion::Nifti2, true) => Self::parse_v2::<LittleEndian>(bytes, true)?,
            (NiftiVersion::Nifti2, false) => Self::parse_v2::<BigEndian>(bytes, false)?,
        };
        header.validate()?;
        Ok(header)
    }

    #[allow(clippy::wildcard_imports)]
    fn parse_v1<E: ByteOrder>(bytes: &[u8], little_endian: bool) -> Result<Self> {
        use offsets_v1::*;

        let magic = &bytes[MAGIC..MAGIC + 4];
        if magic != b"n+1\0" && magic != b"ni1\0" {
            return Err(Error::InvalidMagic([
                magic[0], magic[1], magic[2], magic[3],
            ]));
        }

        let ndim_raw = E::read_i16(&bytes[DIM..DIM + 2]);
        if !(1..=7).contains(&ndim_raw) {
            return Err(Error::InvalidDimensions(format!(
                "ndim must be 1..=7, got {}",
                ndim_raw
            )));
        }

        let mut dim = [0i64; 7];
        for (i, d) in dim.iter_mut().enumerate() {
            let at = DIM + 2 + i * 2;
            let raw = E::read_i16(&bytes[at..at + 2]);
            if raw < 0 {
                return Err(Error::InvalidDimensions(format!(
                    "dimension {} has negative value: {}",
                    i, raw
                )));
            }
            *d = raw as i64;
        }

        let datatype = DataType::from_code(E::read_i16(&bytes[DATATYPE..DATATYPE + 2]))?;
        check_bitpix(datatype, E::read_i16(&bytes[BITPIX..BITPIX + 2]))?;

        let vox_offset = E::read_f32(&bytes[VOX_OFFSET..VOX_OFFSET + 4]);
        if !vox_offset.is_finite() || vox_offset.fract() != 0.0 {
            return Err(Error::InvalidDimensions(format!(
                "vox_offset must be a finite integer, got {}",
                vox_offset
            )));
        }

        let xyzt_units = bytes[XYZT_UNITS];
        Ok(Self {
            version: NiftiVersion::Nifti1,
            ndim: ndim_raw as u8,
            dim,
            datatype,
            pixdim: read_f32s::<E, 8>(bytes, PIXDIM),
            vox_offset: vox_offset as i64,
            scl_slope: E::read_f32(&bytes[SCL_SLOPE..SCL_SLOPE + 4]) as f64,
            scl_inter: E::read_f32(&bytes[SCL_INTER..SCL_INTER + 4]) as f64,
            spatial_units: SpatialUnits::from_code(xyzt_units),
            temporal_units: TemporalUnits::from_code(xyzt_units),
            intent_code: E::read_i16(&bytes[INTENT_CODE..INTENT_CODE + 2]) as i32,
            descrip: read_text(&bytes[DESCRIP..AUX_FILE]),
            aux_file: read_text(&bytes[AUX_FILE..QFORM_CODE]),
            qform_code: E::read_i16(&bytes[QFORM_CODE..QFORM_CODE + 2]) as i32,
            sform_code: E::read_i16(&bytes[SFORM_CODE..SFORM_CODE + 2]) as i32,
            quatern: read_f32s::<E, 3>(bytes, QUATERN),
            qoffset: read_f32s::<E, 3>(bytes, QOFFSET),
            srow_x: read_f32s::<E, 4>(bytes, SROW_X),
            srow_y: read_f32s::<E, 4>(bytes, SROW_Y),
            srow_z: read_f32s::<E, 4>(bytes, SROW_Z),
            little_endian,
        })
    }

    #[allow(clippy::wildcard_imports)]
    fn parse_v2<E: ByteOrder>(bytes: &[u8], little_endian: bool) -> Result<Self> {
        use offsets_v2::*;

        let magic = &bytes[MAGIC..MAGIC + 8];
        if magic != b"n+2\0\r\n\x1a\n" && magic != b"ni2\0\r\n\x1a\n" {
            return Err(Error::InvalidMagic([
                magic[0], magic[1], magic[2], magic[3],
            ]));
        }

        let ndim_raw = E::read_i64(&bytes[DIM..DIM + 8]);
        if !(1..=7).contains(&ndim_raw) {
            return Err(Error::InvalidDimensions(format!(
                "ndim must be 1..=7, got {}",
                ndim_raw
            )));
        }

        let mut dim = [0i64; 7];
        for (i, d) in dim.iter_mut().enumerate() {
            let at = DIM + 8 + i * 8;
            *d = E::read_i64(&bytes[at..at + 8]);
            if *d < 0 {
                return Err(Error::InvalidDimensions(format!(
                    "dimension {} has negative value: {}",
                    i, *d
                )));
            }
        }

        let datatype = DataType::from_code(E::read_i16(&bytes[DATATYPE..DATATYPE + 2]))?;
        check_bitpix(datatype, E::read_i16(&bytes[BITPIX..BITPIX + 2]))?;

        let xyzt_units = E::read_i32(&bytes[XYZT_UNITS..XYZT_UNITS + 4]) as u8;
        Ok(Self {
            version: NiftiVersion::Nifti2,
            ndim: ndim_raw as u8,
            dim,
            datatype,
            pixdim: read_f64s::<E, 8>(bytes, PIXDIM),
            vox_offset: E::read_i64(&bytes[VOX_OFFSET..VOX_OFFSET + 8]),
            scl_slope: E::read_f64(&bytes[SCL_SLOPE..SCL_SLOPE + 8]),
            scl_inter: E::read_f64(&bytes[SCL_INTER..SCL_INTER + 8]),
            spatial_units: SpatialUnits::from_code(xyzt_units),
            temporal_units: TemporalUnits::from_code(xyzt_units),
            intent_code: E::read_i32(&bytes[INTENT_CODE..INTENT_CODE + 4]),
            descrip: read_text(&bytes[DESCRIP..DESCRIP + 80]),
            aux_file: read_text(&bytes[AUX_FILE..AUX_FILE + 24]),
            qform_code: E::read_i32(&bytes[QFORM_CODE..QFORM_CODE + 4]),
            sform_code: E::read_i32(&bytes[SFORM_CODE..SFORM_CODE + 4]),
            quatern: read_f64s::<E, 3>(bytes, QUATERN),
            qoffset: read_f64s::<E, 3>(bytes, QOFFSET),
            srow_x: read_f64s::<E, 4>(bytes, SROW_X),
            srow_y: read_f64s::<E, 4>(bytes, SROW_Y),
            srow_z: read_f64s::<E, 4>(bytes, SROW_Z),
            little_endian,
        })
    }

    /// Serialize the header (little-endian) in its own version's layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self.version {
            NiftiVersion::Nifti1 => self.to_bytes_v1(),
            NiftiVersion::Nifti2 => self.to_bytes_v2(),
        }
    }

    #[allow(clippy::wildcard_imports)]
    fn to_bytes_v1(&self) -> Vec<u8> {
        use offsets_v1::*;

        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_i32(&mut buf[SIZEOF_HDR..SIZEOF_HDR + 4], 348);

        LittleEndian::write_i16(&mut buf[DIM..DIM + 2], self.ndim as i16);
        for (i, &d) in self.dim.iter().enumerate() {
            let at = DIM + 2 + i * 2;
            LittleEndian::write_i16(&mut buf[at..at + 2], d.min(i16::MAX as i64) as i16);
        }

        LittleEndian::write_i16(&mut buf[INTENT_CODE..INTENT_CODE + 2], self.intent_code as i16);
        LittleEndian::write_i16(&mut buf[DATATYPE..DATATYPE + 2], self.datatype as i16);
        LittleEndian::write_i16(
            &mut buf[BITPIX..BITPIX + 2],
            (self.datatype.byte_size() * 8) as i16,
        );
        write_f32s(&mut buf, PIXDIM, &self.pixdim);
        LittleEndian::write_f32(&mut buf[VOX_OFFSET..VOX_OFFSET + 4], self.vox_offset as f32);
        LittleEndian::write_f32(&mut buf[SCL_SLOPE..SCL_SLOPE + 4], self.scl_slope as f32);
        LittleEndian::write_f32(&mut buf[SCL_INTER..SCL_INTER + 4], self.scl_inter as f32);
        buf[XYZT_UNITS] = self.spatial_units.to_code() | self.temporal_units.to_code();

        write_text(&mut buf, DESCRIP, 80, &self.descrip);
        write_text(&mut buf, AUX_FILE, 24, &self.aux_file);

        LittleEndian::write_i16(&mut buf[QFORM_CODE..QFORM_CODE + 2], self.qform_code as i16);
        LittleEndian::write_i16(&mut buf[SFORM_CODE..SFORM_CODE + 2], self.sform_code as i16);
        write_f32s(&mut buf, QUATERN, &self.quatern);
        write_f32s(&mut buf, QOFFSET, &self.qoffset);
        write_f32s(&mut buf, SROW_X, &self.srow_x);
        write_f32s(&mut buf, SROW_Y, &self.srow_y);
        write_f32s(&mut buf, SROW_Z, &self.srow_z);

        buf[MAGIC..MAGIC + 4].copy_from_slice(b"n+1\0");
        buf
    }

    #[allow(clippy::wildcard_imports)]
    fn to_bytes_v2(&self) -> Vec<u8> {
        use offsets_v2::*;

        let mut buf = vec![0u8; Self::SIZE_V2];
        LittleEndian::write_i32(&mut buf[SIZEOF_HDR..SIZEOF_HDR + 4], 540);
        buf[MAGIC..MAGIC + 8].copy_from_slice(b"n+2\0\r\n\x1a\n");

        LittleEndian::write_i16(&mut buf[DATATYPE..DATATYPE + 2], self.datatype as i16);
        LittleEndian::write_i16(
            &mut buf[BITPIX..BITPIX + 2],
            (self.datatype.byte_size() * 8) as i16,
        );
        LittleEndian::write_i64(&mut buf[DIM..DIM + 8], self.ndim as i64);
        for (i, &d) in self.dim.iter().enumerate() {
            let at = DIM + 8 + i * 8;
            LittleEndian::write_i64(&mut buf[at..at + 8], d);
        }

        write_f64s(&mut buf, PIXDIM, &self.pixdim);
        LittleEndian::write_i64(&mut buf[VOX_OFFSET..VOX_OFFSET + 8], self.vox_offset);
        LittleEndian::write_f64(&mut buf[SCL_SLOPE..SCL_SLOPE + 8], self.scl_slope);
        LittleEndian::write_f64(&mut buf[SCL_INTER..SCL_INTER + 8], self.scl_inter);

        write_text(&mut buf, DESCRIP, 80, &self.descrip);
        write_text(&mut buf, AUX_FILE, 24, &self.aux_file);

        LittleEndian::write_i32(&mut buf[QFORM_CODE..QFORM_CODE + 4], self.qform_code);
        LittleEndian::write_i32(&mut buf[SFORM_CODE..SFORM_CODE + 4], self.sform_code);
        write_f64s(&mut buf, QUATERN, &self.quatern);
        write_f64s(&mut buf, QOFFSET, &self.qoffset);
        write_f64s(&mut buf, SROW_X, &self.srow_x);
        write_f64s(&mut buf, SROW_Y, &self.srow_y);
        write_f64s(&mut buf, SROW_Z, &self.srow_z);

        let xyzt = (self.spatial_units.to_code() | self.temporal_units.to_code()) as i32;
        LittleEndian::write_i32(&mut buf[XYZT_UNITS..XYZT_UNITS + 4], xyzt);
        LittleEndian::write_i32(&mut buf[INTENT_CODE..INTENT_CODE + 4], self.intent_code);

        buf
    }

    /// Best available voxel-to-world transform: sform, then qform, then pixdim scaling.
    pub fn affine(&self) -> Affine {
        if let Some(sform) = self.sform() {
            sform
        } else if let Some(qform) = self.qform() {
            qform
        } else {
            [
                [self.pixdim[1], 0.0, 0.0, 0.0],
                [0.0, self.pixdim[2], 0.0, 0.0],
                [0.0, 0.0, self.pixdim[3], 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ]
        }
    }

    /// The sform matrix, or `None` when `sform_code` is 0.
    pub fn sform(&self) -> Option<Affine> {
        (self.sform_code > 0)
            .then(|| [self.srow_x, self.srow_y, self.srow_z, [0.0, 0.0, 0.0, 1.0]])
    }

    /// The qform matrix rebuilt from the quaternion, or `None` when `qform_code` is 0.
    pub fn qform(&self) -> Option<Affine> {
        (self.qform_code > 0).then(|| self.quaternion_to_affine())
    }

    /// Store `affine` as the sform with the given code.
    pub fn set_sform(&mut self, affine: &Affine, code: i32) {
        self.srow_x = affine[0];
        self.srow_y = affine[1];
        self.srow_z = affine[2];
        self.sform_code = code;
    }

    /// Store `affine` as the qform with the given code.
    ///
    /// The linear block is decomposed into voxel sizes, a handedness flag
    /// (`pixdim[0]`) and a rotation quaternion. Shears cannot be represented
    /// by a qform and are dropped. Voxel sizes in `pixdim[1..=3]` are updated
    /// to the column norms of `affine`.
    #[allow(clippy::many_single_char_names)]
    pub fn set_qform(&mut self, affine: &Affine, code: i32) {
        let mut zooms = [0.0f64; 3];
        let mut r = [[0.0f64; 3]; 3];
        for j in 0..3 {
            let norm = (0..3).map(|i| affine[i][j] * affine[i][j]).sum::<f64>().sqrt();
            zooms[j] = if norm > 0.0 { norm } else { 1.0 };
            for i in 0..3 {
                r[i][j] = affine[i][j] / zooms[j];
            }
        }

        let qfac = if det3(&r) < 0.0 {
            for row in r.iter_mut() {
                row[2] = -row[2];
            }
            -1.0
        } else {
            1.0
        };

        let trace = r[0][0] + r[1][1] + r[2][2] + 1.0;
        let (b, c, d) = if trace > 0.5 {
            let a = 0.5 * trace.sqrt();
            (
                0.25 * (r[2][1] - r[1][2]) / a,
                0.25 * (r[0][2] - r[2][0]) / a,
                0.25 * (r[1][0] - r[0][1]) / a,
            )
        } else {
            let xd = 1.0 + r[0][0] - (r[1][1] + r[2][2]);
            let yd = 1.0 + r[1][1] - (r[0][0] + r[2][2]);
            let zd = 1.0 + r[2][2] - (r[0][0] + r[1][1]);
            let (a, b, c, d) = if xd > 1.0 {
                let b = 0.5 * xd.sqrt();
                (
                    0.25 * (r[2][1] - r[1][2]) / b,
                    b,
                    0.25 * (r[0][1] + r[1][0]) / b,
                    0.25 * (r[0][2] + r[2][0]) / b,
                )
            } else if yd > 1.0 {
                let c = 0.5 * yd.sqrt();
                (
                    0.25 * (r[0][2] - r[2][0]) / c,
                    0.25 * (r[0][1] + r[1][0]) / c,
                    c,
                    0.25 * (r[1][2] + r[2][1]) / c,
                )
            } else {
                let d = 0.5 * zd.sqrt();
                (
                    0.25 * (r[1][0] - r[0][1]) / d,
                    0.25 * (r[0][2] + r[2][0]) / d,
                    0.25 * (r[1][2] + r[2][1]) / d,
                    d,
                )
            };
            // keep the scalar part non-negative so it can be dropped
            if a < 0.0 {
                (-b, -c, -d)
            } else {
                (b, c, d)
            }
        };

        self.quatern = [b, c, d];
        self.qoffset = [affine[0][3], affine[1][3], affine[2][3]];
        self.pixdim[0] = qfac;
        self.pixdim[1..4].copy_from_slice(&zooms);
        self.qform_code = code;
    }

    #[allow(clippy::many_single_char_names)]
    fn quaternion_to_affine(&self) -> Affine {
        let [b, c, d] = self.quatern;
        let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();

        let qfac = if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let [i, j, k] = [
            self.pixdim[1].abs(),
            self.pixdim[2].abs(),
            self.pixdim[3].abs() * qfac,
        ];

        [
            [
                (a * a + b * b - c * c - d * d) * i,
                2.0 * (b * c - a * d) * j,
                2.0 * (b * d + a * c) * k,
                self.qoffset[0],
            ],
            [
                2.0 * (b * c + a * d) * i,
                (a * a - b * b + c * c - d * d) * j,
                2.0 * (c * d - a * b) * k,
                self.qoffset[1],
            ],
            [
                2.0 * (b * d - a * c) * i,
                2.0 * (c * d + a * b) * j,
                (a * a - b * b - c * c + d * d) * k,
                self.qoffset[2],
            ],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Set the scaling applied to stored values on read.
    pub fn set_slope_inter(&mut self, slope: f64, inter: f64) {
        self.scl_slope = slope;
        self.scl_inter = inter;
    }

    /// True when stored values must be transformed by slope/intercept on read.
    pub fn scaling_required(&self) -> bool {
        let slope = self.scl_slope;
        (slope != 0.0 && slope != 1.0 && slope.is_finite())
            || (self.scl_inter != 0.0 && self.scl_inter.is_finite() && slope != 0.0)
    }

    /// Image shape (first `ndim` entries of `dim`).
    pub fn shape(&self) -> Vec<usize> {
        self.dim[..self.ndim as usize]
            .iter()
            .map(|&d| d as usize)
            .collect()
    }

    /// Spatial voxel sizes (`pixdim[1..=3]`), padded with 1.0 for images below 3D.
    pub fn voxel_sizes(&self) -> [f64; 3] {
        std::array::from_fn(|i| {
            if i < self.ndim as usize {
                self.pixdim[i + 1]
            } else {
                1.0
            }
        })
    }

    /// Returns true if file is little endian.
    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    /// Returns true if any dimension exceeds the NIfTI-1 limit of 32767.
    pub fn requires_nifti2(&self) -> bool {
        self.dim.iter().any(|&d| d > i16::MAX as i64)
    }

    /// Validate header fields for basic NIfTI invariants.
    pub fn validate(&self) -> Result<()> {
        if self.ndim == 0 || self.ndim > 7 {
            return Err(Error::InvalidDimensions(format!(
                "ndim must be 1..=7, got {}",
                self.ndim
            )));
        }

        for i in 0..self.ndim as usize {
            if self.dim[i] == 0 {
                return Err(Error::InvalidDimensions(format!("dimension {} is zero", i)));
            }
            let spacing = self.pixdim[i + 1];
            if !spacing.is_finite() || spacing <= 0.0 {
                return Err(Error::InvalidDimensions(format!(
                    "pixdim[{}] must be finite and > 0, got {}",
                    i + 1,
                    spacing
                )));
            }
        }

        if self.vox_offset < self.version.header_size() as i64 {
            return Err(Error::InvalidDimensions(format!(
                "vox_offset {} before header end ({})",
                self.vox_offset,
                self.version.header_size()
            )));
        }

        let mut voxels: usize = 1;
        for i in 0..self.ndim as usize {
            voxels = voxels
                .checked_mul(self.dim[i] as usize)
                .ok_or_else(|| Error::InvalidDimensions("dimension product overflow".into()))?;
        }
        voxels
            .checked_mul(self.datatype.byte_size())
            .ok_or_else(|| Error::InvalidDimensions("data size overflow".into()))?;

        Ok(())
    }
}

/// Determinant of a 3x3 matrix.
pub(crate) fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Product of two 4x4 affines.
pub fn matmul(a: &Affine, b: &Affine) -> Affine {
    std::array::from_fn(|i| std::array::from_fn(|j| (0..4).map(|k| a[i][k] * b[k][j]).sum()))
}
