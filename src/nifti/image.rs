//! In-memory NIfTI image: header plus voxel data in its storage dtype.

use super::header::{Affine, DataType, NiftiHeader};
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use ndarray::{ArrayD, Axis, IxDyn, ShapeBuilder};

/// Voxel array tagged with its storage type.
///
/// Arrays use NIfTI index order (`[x, y, z, t, ...]`); memory layout is not
/// significant, serialization always walks the data in file (Fortran) order.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// uint8 voxels
    U8(ArrayD<u8>),
    /// int8 voxels
    I8(ArrayD<i8>),
    /// int16 voxels
    I16(ArrayD<i16>),
    /// uint16 voxels
    U16(ArrayD<u16>),
    /// int32 voxels
    I32(ArrayD<i32>),
    /// uint32 voxels
    U32(ArrayD<u32>),
    /// int64 voxels
    I64(ArrayD<i64>),
    /// uint64 voxels
    U64(ArrayD<u64>),
    /// float32 voxels
    F32(ArrayD<f32>),
    /// float64 voxels
    F64(ArrayD<f64>),
}

/// Apply an expression to the inner array of every variant, rebuilding the same variant.
macro_rules! map_variants {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            ArrayData::U8($arr) => ArrayData::U8($body),
            ArrayData::I8($arr) => ArrayData::I8($body),
            ArrayData::I16($arr) => ArrayData::I16($body),
            ArrayData::U16($arr) => ArrayData::U16($body),
            ArrayData::I32($arr) => ArrayData::I32($body),
            ArrayData::U32($arr) => ArrayData::U32($body),
            ArrayData::I64($arr) => ArrayData::I64($body),
            ArrayData::U64($arr) => ArrayData::U64($body),
            ArrayData::F32($arr) => ArrayData::F32($body),
            ArrayData::F64($arr) => ArrayData::F64($body),
        }
    };
}

/// Evaluate an expression against the inner array of whichever variant is present.
macro_rules! with_variant {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            ArrayData::U8($arr) => $body,
            ArrayData::I8($arr) => $body,
            ArrayData::I16($arr) => $body,
            ArrayData::U16($arr) => $body,
            ArrayData::I32($arr) => $body,
            ArrayData::U32($arr) => $body,
            ArrayData::I64($arr) => $body,
            ArrayData::U64($arr) => $body,
            ArrayData::F32($arr) => $body,
            ArrayData::F64($arr) => $body,
        }
    };
}

/// Element types that can be stored in a NIfTI volume.
pub trait NiftiElement: Copy + Send + Sync + 'static {
    /// Header datatype code for this element.
    const DATA_TYPE: DataType;

    /// Wrap an array of this element type.
    fn into_array_data(array: ArrayD<Self>) -> ArrayData;
}

macro_rules! impl_element {
    ($t:ty, $dtype:ident, $variant:ident) => {
        impl NiftiElement for $t {
            const DATA_TYPE: DataType = DataType::$dtype;

            fn into_array_data(array: ArrayD<Self>) -> ArrayData {
                ArrayData::$variant(array)
            }
        }
    };
}

impl_element!(u8, UInt8, U8);
impl_element!(i8, Int8, I8);
impl_element!(i16, Int16, I16);
impl_element!(u16, UInt16, U16);
impl_element!(i32, Int32, I32);
impl_element!(u32, UInt32, U32);
impl_element!(i64, Int64, I64);
impl_element!(u64, UInt64, U64);
impl_element!(f32, Float32, F32);
impl_element!(f64, Float64, F64);

fn f_order<T>(shape: &[usize], values: Vec<T>) -> Result<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(shape).f(), values)
        .map_err(|e| Error::InvalidDimensions(format!("data does not match shape {shape:?}: {e}")))
}

/// Elements in file order (first axis fastest).
fn file_order<T: Copy>(array: &ArrayD<T>) -> Vec<T> {
    array.t().iter().copied().collect()
}

impl ArrayData {
    /// Storage dtype of the array.
    pub fn dtype(&self) -> DataType {
        match self {
            Self::U8(_) => DataType::UInt8,
            Self::I8(_) => DataType::Int8,
            Self::I16(_) => DataType::Int16,
            Self::U16(_) => DataType::UInt16,
            Self::I32(_) => DataType::Int32,
            Self::U32(_) => DataType::UInt32,
            Self::I64(_) => DataType::Int64,
            Self::U64(_) => DataType::UInt64,
            Self::F32(_) => DataType::Float32,
            Self::F64(_) => DataType::Float64,
        }
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        with_variant!(self, a => a.shape())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_variant!(self, a => a.len())
    }

    /// True when the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored values widened to f64, without header scaling.
    pub fn to_f64(&self) -> ArrayD<f64> {
        with_variant!(self, a => a.mapv(|v| v as f64))
    }

    /// Cast f64 values into `dtype` storage.
    ///
    /// Integer targets are rounded to nearest and saturated at the type
    /// bounds; NaN becomes 0.
    pub fn from_f64(values: &ArrayD<f64>, dtype: DataType) -> Self {
        match dtype {
            DataType::UInt8 => Self::U8(values.mapv(|v| v.round() as u8)),
            DataType::Int8 => Self::I8(values.mapv(|v| v.round() as i8)),
            DataType::Int16 => Self::I16(values.mapv(|v| v.round() as i16)),
            DataType::UInt16 => Self::U16(values.mapv(|v| v.round() as u16)),
            DataType::Int32 => Self::I32(values.mapv(|v| v.round() as i32)),
            DataType::UInt32 => Self::U32(values.mapv(|v| v.round() as u32)),
            DataType::Int64 => Self::I64(values.mapv(|v| v.round() as i64)),
            DataType::UInt64 => Self::U64(values.mapv(|v| v.round() as u64)),
            DataType::Float32 => Self::F32(values.mapv(|v| v as f32)),
            DataType::Float64 => Self::F64(values.clone()),
        }
    }

    /// Reverse the listed axes, then reorder axes so that new axis `i` is old axis `order[i]`.
    pub(crate) fn flipped_and_permuted(&self, flips: &[usize], order: &[usize]) -> Self {
        map_variants!(self, a => {
            let mut arr = a.clone();
            for &axis in flips {
                arr.invert_axis(Axis(axis));
            }
            arr.permuted_axes(IxDyn(order))
        })
    }

    /// Decode raw voxel bytes stored in file order.
    pub(crate) fn decode(
        bytes: &[u8],
        dtype: DataType,
        shape: &[usize],
        little_endian: bool,
    ) -> Result<Self> {
        let count: usize = shape.iter().product();
        let needed = count * dtype.byte_size();
        if bytes.len() < needed {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "file truncated: voxel data has {} bytes, need {}",
                    bytes.len(),
                    needed
                ),
            )));
        }
        let bytes = &bytes[..needed];

        if little_endian {
            Self::decode_with::<LittleEndian>(bytes, dtype, shape, count)
        } else {
            Self::decode_with::<byteorder::BigEndian>(bytes, dtype, shape, count)
        }
    }

    fn decode_with<E: ByteOrder>(
        bytes: &[u8],
        dtype: DataType,
        shape: &[usize],
        count: usize,
    ) -> Result<Self> {
        macro_rules! read_into {
            ($t:ty, $read:ident, $variant:ident) => {{
                let mut values = vec![<$t>::default(); count];
                E::$read(bytes, &mut values);
                Self::$variant(f_order(shape, values)?)
            }};
        }

        Ok(match dtype {
            DataType::UInt8 => Self::U8(f_order(shape, bytes.to_vec())?),
            DataType::Int8 => Self::I8(f_order(shape, bytes.iter().map(|&b| b as i8).collect())?),
            DataType::Int16 => read_into!(i16, read_i16_into, I16),
            DataType::UInt16 => read_into!(u16, read_u16_into, U16),
            DataType::Int32 => read_into!(i32, read_i32_into, I32),
            DataType::UInt32 => read_into!(u32, read_u32_into, U32),
            DataType::Int64 => read_into!(i64, read_i64_into, I64),
            DataType::UInt64 => read_into!(u64, read_u64_into, U64),
            DataType::Float32 => read_into!(f32, read_f32_into, F32),
            DataType::Float64 => read_into!(f64, read_f64_into, F64),
        })
    }

    /// Serialize voxels little-endian in file order.
    pub(crate) fn to_le_bytes(&self) -> Vec<u8> {
        macro_rules! write_from {
            ($a:expr, $write:ident, $size:expr) => {{
                let values = file_order($a);
                let mut out = vec![0u8; values.len() * $size];
                LittleEndian::$write(&values, &mut out);
                out
            }};
        }

        match self {
            Self::U8(a) => file_order(a),
            Self::I8(a) => file_order(a).into_iter().map(|v| v as u8).collect(),
            Self::I16(a) => write_from!(a, write_i16_into, 2),
            Self::U16(a) => write_from!(a, write_u16_into, 2),
            Self::I32(a) => write_from!(a, write_i32_into, 4),
            Self::U32(a) => write_from!(a, write_u32_into, 4),
            Self::I64(a) => write_from!(a, write_i64_into, 8),
            Self::U64(a) => write_from!(a, write_u64_into, 8),
            Self::F32(a) => write_from!(a, write_f32_into, 4),
            Self::F64(a) => write_from!(a, write_f64_into, 8),
        }
    }
}

/// A NIfTI volume: header, voxel data and any raw extension block.
#[derive(Debug, Clone)]
pub struct NiftiImage {
    header: NiftiHeader,
    data: ArrayData,
    /// Bytes between the end of the header and `vox_offset` (extension flag + extensions).
    extension_block: Vec<u8>,
}

impl NiftiImage {
    /// Assemble an image, syncing the header's dims and datatype with `data`.
    pub fn from_parts(mut header: NiftiHeader, data: ArrayData) -> Self {
        let shape = data.shape();
        header.ndim = shape.len() as u8;
        header.dim = [1; 7];
        for (slot, &extent) in header.dim.iter_mut().zip(shape) {
            *slot = extent as i64;
        }
        header.datatype = data.dtype();
        Self {
            header,
            data,
            extension_block: Vec::new(),
        }
    }

    /// Build an image from an array and a voxel-to-world affine (stored as sform, code 1).
    pub fn from_array<T: NiftiElement>(array: ArrayD<T>, affine: Affine) -> Self {
        let mut header = NiftiHeader::default();
        header.set_sform(&affine, 1);
        for j in 0..3 {
            let norm = (0..3)
                .map(|i| affine[i][j] * affine[i][j])
                .sum::<f64>()
                .sqrt();
            header.pixdim[j + 1] = if norm > 0.0 { norm } else { 1.0 };
        }
        Self::from_parts(header, T::into_array_data(array))
    }

    pub(crate) fn with_extension_block(mut self, block: Vec<u8>) -> Self {
        self.extension_block = block;
        self
    }

    pub(crate) fn extension_block(&self) -> &[u8] {
        &self.extension_block
    }

    /// Header metadata.
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// Mutable header metadata.
    pub fn header_mut(&mut self) -> &mut NiftiHeader {
        &mut self.header
    }

    /// Voxel data in its storage dtype.
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Image shape.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.data.shape().len()
    }

    /// Storage dtype.
    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    /// Best available voxel-to-world transform.
    pub fn affine(&self) -> Affine {
        self.header.affine()
    }

    /// Spatial voxel sizes from the header.
    pub fn voxel_sizes(&self) -> [f64; 3] {
        self.header.voxel_sizes()
    }

    /// Voxel values as f64 with the header's slope/intercept applied.
    pub fn to_f64(&self) -> ArrayD<f64> {
        let mut values = self.data.to_f64();
        if self.header.scaling_required() {
            let (slope, inter) = (self.header.scl_slope, self.header.scl_inter);
            values.mapv_inplace(|v| v * slope + inter);
        }
        values
    }

    /// Copy of the image stored as `dtype`, values scaled and header scaling reset.
    pub fn with_dtype(&self, dtype: DataType) -> Self {
        let data = ArrayData::from_f64(&self.to_f64(), dtype);
        let mut header = self.header.clone();
        header.set_slope_inter(1.0, 0.0);
        Self::from_parts(header, data).with_extension_block(self.extension_block.clone())
    }

    /// Voxel bytes as written to disk (little-endian, file order).
    pub fn data_to_bytes(&self) -> Vec<u8> {
        self.data.to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nifti::header::IDENTITY;

    #[test]
    fn decode_uses_file_order() {
        // x varies fastest on disk
        let bytes: Vec<u8> = (0..6).collect();
        let data = ArrayData::decode(&bytes, DataType::UInt8, &[3, 2], true).unwrap();
        let ArrayData::U8(a) = &data else {
            panic!("expected u8 data");
        };
        assert_eq!(a[[0, 0]], 0);
        assert_eq!(a[[1, 0]], 1);
        assert_eq!(a[[0, 1]], 3);
        assert_eq!(data.to_le_bytes(), bytes);
    }

    #[test]
    fn decode_big_endian_i16() {
        let bytes = [0x01, 0x00, 0xFF, 0xFE];
        let data = ArrayData::decode(&bytes, DataType::Int16, &[2, 1, 1], false).unwrap();
        assert_eq!(data.to_f64().iter().copied().collect::<Vec<_>>(), vec![256.0, -2.0]);
        assert_eq!(data.to_le_bytes(), vec![0x00, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let err = ArrayData::decode(&[0u8; 3], DataType::Float32, &[1, 1, 1], true).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn from_f64_rounds_and_saturates() {
        let values = ArrayD::from_shape_vec(IxDyn(&[4]), vec![-3.0, 1.6, 300.0, f64::NAN]).unwrap();
        let ArrayData::U8(a) = ArrayData::from_f64(&values, DataType::UInt8) else {
            panic!("expected u8 data");
        };
        assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![0, 2, 255, 0]);
    }

    #[test]
    fn from_parts_syncs_header() {
        let array = ArrayD::<i16>::zeros(IxDyn(&[4, 5, 6]));
        let img = NiftiImage::from_array(array, IDENTITY);
        assert_eq!(img.header().shape(), vec![4, 5, 6]);
        assert_eq!(img.header().datatype, DataType::Int16);
        assert_eq!(img.dtype(), DataType::Int16);
    }

    #[test]
    fn to_f64_applies_scaling() {
        let array = ArrayD::from_shape_vec(IxDyn(&[2, 1, 1]), vec![1u8, 2]).unwrap();
        let mut img = NiftiImage::from_array(array, IDENTITY);
        img.header_mut().set_slope_inter(0.5, 10.0);
        let values = img.to_f64();
        assert_eq!(values.iter().copied().collect::<Vec<_>>(), vec![10.5, 11.0]);

        let converted = img.with_dtype(DataType::Float32);
        assert_eq!(converted.header().scl_slope, 1.0);
        assert_eq!(converted.to_f64(), values);
    }

    #[test]
    fn flip_and_permute_moves_values() {
        let array = ArrayD::from_shape_vec(IxDyn(&[2, 3, 1]).f(), (0u8..6).collect()).unwrap();
        let data = ArrayData::U8(array);
        let moved = data.flipped_and_permuted(&[0], &[1, 0, 2]);
        assert_eq!(moved.shape(), &[3, 2, 1]);
        let ArrayData::U8(a) = moved else {
            panic!("expected u8 data");
        };
        // old (x=0, y=1) -> flipped x=1 -> new (1, 1)
        assert_eq!(a[[1, 1, 0]], 2);
        assert_eq!(a[[0, 0, 0]], 1);
    }
}
