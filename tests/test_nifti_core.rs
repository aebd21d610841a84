//! Codec tests: error conditions, dtype handling and coded-form round trips.

use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use niicanon::nifti::{self, DataType, NiftiHeader, NiftiImage, IDENTITY};
use tempfile::NamedTempFile;

fn create_test_image(data: Vec<f32>, shape: Vec<usize>) -> NiftiImage {
    let array = ArrayD::from_shape_vec(IxDyn(&shape).f(), data).unwrap();
    NiftiImage::from_array(array, IDENTITY)
}

fn values(img: &NiftiImage) -> Vec<f64> {
    img.to_f64().t().iter().copied().collect()
}

#[test]
fn test_load_invalid_magic_bytes() {
    let img = create_test_image(vec![1.0f32, 2.0, 3.0, 4.0], vec![2, 2, 1]);
    let file = NamedTempFile::new().unwrap();
    nifti::save(&img, file.path()).unwrap();

    let mut file_data = std::fs::read(file.path()).unwrap();
    file_data[0..4].copy_from_slice(b"BAD!");
    std::fs::write(file.path(), file_data).unwrap();

    let err = nifti::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("invalid NIfTI magic"));
}

#[test]
fn test_load_unsupported_data_type() {
    let img = create_test_image(vec![1.0f32, 2.0, 3.0, 4.0], vec![2, 2, 1]);
    let file = NamedTempFile::new().unwrap();
    nifti::save(&img, file.path()).unwrap();

    let mut file_data = std::fs::read(file.path()).unwrap();
    file_data[70..72].copy_from_slice(&9999i16.to_le_bytes());
    std::fs::write(file.path(), file_data).unwrap();

    let err = nifti::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("unsupported data type"));
}

#[test]
fn test_load_roundtrip_preserves_metadata() {
    let original = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let mut img = create_test_image(original.clone(), vec![2, 2, 2]);
    img.header_mut().descrip = "MNI152NLin2009cAsym".into();

    let file = NamedTempFile::new().unwrap();
    nifti::save(&img, file.path()).unwrap();
    let reloaded = nifti::load(file.path()).unwrap();

    assert_eq!(values(&reloaded), original.iter().map(|&v| f64::from(v)).collect::<Vec<_>>());
    assert_eq!(img.shape(), reloaded.shape());
    assert_eq!(img.dtype(), reloaded.dtype());
    assert_eq!(img.voxel_sizes(), reloaded.voxel_sizes());
    assert_eq!(reloaded.header().descrip, "MNI152NLin2009cAsym");
}

#[test]
fn test_dtype_conversions_round_and_saturate() {
    let img = create_test_image(vec![-1.4, 2.5, 70000.0, 4.49], vec![2, 2, 1]);

    let as_u16 = img.with_dtype(DataType::UInt16);
    assert_eq!(as_u16.dtype(), DataType::UInt16);
    assert_eq!(values(&as_u16), vec![0.0, 3.0, 65535.0, 4.0]);

    let as_i16 = img.with_dtype(DataType::Int16);
    assert_eq!(values(&as_i16), vec![-1.0, 3.0, 32767.0, 4.0]);
}

#[test]
fn test_scaled_volume_reads_physical_values() {
    let array = ArrayD::from_shape_vec(IxDyn(&[2, 1, 1]).f(), vec![10i16, 20]).unwrap();
    let mut img = NiftiImage::from_array(array, IDENTITY);
    img.header_mut().set_slope_inter(0.5, -1.0);

    let file = NamedTempFile::new().unwrap();
    nifti::save(&img, file.path()).unwrap();
    let loaded = nifti::load(file.path()).unwrap();
    assert_eq!(values(&loaded), vec![4.0, 9.0]);
}

#[test]
fn test_minimal_volume() {
    let img = create_test_image(vec![1.0f32], vec![1, 1, 1]);
    let file = NamedTempFile::new().unwrap();
    nifti::save(&img, file.path()).unwrap();
    let loaded = nifti::load(file.path()).unwrap();

    assert_eq!(loaded.shape(), [1, 1, 1]);
    assert_eq!(loaded.to_f64().len(), 1);
}

#[test]
fn test_corrupted_file_handling() {
    let img = create_test_image(vec![1.0f32, 2.0, 3.0, 4.0], vec![2, 2, 1]);
    let file = NamedTempFile::new().unwrap();
    nifti::save(&img, file.path()).unwrap();

    let original = std::fs::read(file.path()).unwrap();
    std::fs::write(file.path(), &original[..original.len() / 2]).unwrap();

    let err = nifti::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("too short") || err.to_string().contains("truncated"));
}

#[test]
fn test_different_data_types_roundtrip() {
    let data = vec![1.0f32, 2.0, 3.0, 4.0];

    for dtype in [
        DataType::UInt8,
        DataType::Int8,
        DataType::Int16,
        DataType::UInt16,
        DataType::Int32,
        DataType::Float32,
        DataType::Float64,
    ] {
        let img = create_test_image(data.clone(), vec![2, 2, 1]).with_dtype(dtype);
        let file = NamedTempFile::new().unwrap();
        nifti::save(&img, file.path()).unwrap();

        let loaded = nifti::load(file.path()).unwrap();
        assert_eq!(loaded.dtype(), dtype);
        assert_eq!(loaded.shape(), [2, 2, 1]);
        assert_eq!(values(&loaded), vec![1.0, 2.0, 3.0, 4.0]);
    }
}

#[test]
fn test_coded_forms_survive_roundtrip() {
    let affine = [
        [0.0, -1.0, 0.0, 96.0],
        [1.0, 0.0, 0.0, -132.0],
        [0.0, 0.0, 1.0, -78.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    let mut img = create_test_image(vec![0.0; 8], vec![2, 2, 2]);
    img.header_mut().set_sform(&affine, 4);
    img.header_mut().set_qform(&affine, 4);

    let file = NamedTempFile::new().unwrap();
    nifti::save(&img, file.path()).unwrap();

    let header: NiftiHeader = nifti::load_header(file.path()).unwrap();
    assert_eq!(header.sform_code, 4);
    assert_eq!(header.qform_code, 4);
    assert_eq!(header.sform().unwrap(), affine);
    let qform = header.qform().unwrap();
    for i in 0..4 {
        for j in 0..4 {
            assert!((qform[i][j] - affine[i][j]).abs() < 1e-6);
        }
    }
}

#[test]
fn test_gzip_and_plain_decode_identically() {
    let dir = tempfile::tempdir().unwrap();
    let img = create_test_image((0..60).map(|v| v as f32).collect(), vec![3, 4, 5]);
    nifti::save(&img, dir.path().join("a.nii")).unwrap();
    nifti::save(&img, dir.path().join("a.nii.gz")).unwrap();

    let plain = nifti::load(dir.path().join("a.nii")).unwrap();
    let gz = nifti::load(dir.path().join("a.nii.gz")).unwrap();
    assert_eq!(plain.data(), gz.data());
    assert_eq!(plain.affine(), gz.affine());
}
