//! Criterion benchmarks for the canonicalization hot paths.
//!
//! Run with: cargo bench --bench canonicalize
//!
//! - load() for .nii and .nii.gz
//! - reorient_to_canonical() on an LPS volume
//! - Engine::inspect() end to end
//! - encode() and save() for plain and compressed output

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use niicanon::nifti::{self, Affine, NiftiImage};
use niicanon::transforms::reorient_to_canonical;
use niicanon::{CanonConfig, Engine};

const SHAPES: [[usize; 3]; 3] = [[64, 64, 64], [128, 128, 64], [193, 229, 193]];

const LPS: Affine = [
    [-1.0, 0.0, 0.0, 96.0],
    [0.0, -1.0, 0.0, 132.0],
    [0.0, 0.0, 1.0, -78.0],
    [0.0, 0.0, 0.0, 1.0],
];

fn create_test_image(shape: &[usize]) -> NiftiImage {
    let numel: usize = shape.iter().product();
    let data: Vec<f32> = (0..numel).map(|i| (i % 256) as f32 * 1.5).collect();
    let array = ArrayD::from_shape_vec(IxDyn(shape).f(), data).unwrap();
    NiftiImage::from_array(array, LPS)
}

fn label(shape: &[usize; 3]) -> String {
    let mb = shape.iter().product::<usize>() * 4 / (1024 * 1024);
    format!("{}x{}x{} ({} MB)", shape[0], shape[1], shape[2], mb)
}

fn bytes(shape: &[usize; 3]) -> Throughput {
    Throughput::Bytes((shape.iter().product::<usize>() * 4) as u64)
}

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");
    let dir = tempfile::tempdir().unwrap();

    for shape in &SHAPES {
        let img = create_test_image(shape);
        let plain = dir.path().join(format!("{}_T1w.nii", shape[0]));
        let gz = dir.path().join(format!("{}_T1w.nii.gz", shape[0]));
        nifti::save(&img, &plain).unwrap();
        nifti::save(&img, &gz).unwrap();

        group.throughput(bytes(shape));
        group.bench_with_input(BenchmarkId::new("mmap", label(shape)), &plain, |b, p| {
            b.iter(|| black_box(nifti::load(black_box(p)).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("gzip", label(shape)), &gz, |b, p| {
            b.iter(|| black_box(nifti::load(black_box(p)).unwrap()))
        });
    }

    group.finish();
}

fn bench_reorient(c: &mut Criterion) {
    let mut group = c.benchmark_group("reorient_to_canonical");

    for shape in &SHAPES {
        let img = create_test_image(shape);
        group.throughput(bytes(shape));
        group.bench_with_input(BenchmarkId::new("lps", label(shape)), &img, |b, img| {
            b.iter(|| black_box(reorient_to_canonical(black_box(img)).unwrap()))
        });
    }

    group.finish();
}

fn bench_inspect(c: &mut Criterion) {
    let mut group = c.benchmark_group("inspect");
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(CanonConfig::default().normalize(true));

    for shape in &SHAPES[..2] {
        let path = dir.path().join(format!("tpl-Bench_res-{}_T1w.nii", shape[0]));
        nifti::save(&create_test_image(shape), &path).unwrap();

        group.throughput(bytes(shape));
        group.bench_with_input(BenchmarkId::new("t1w", label(shape)), &path, |b, p| {
            b.iter(|| black_box(engine.inspect(black_box(p)).unwrap()))
        });
    }

    group.finish();
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    let dir = tempfile::tempdir().unwrap();

    for shape in &SHAPES[..2] {
        let img = create_test_image(shape);
        group.throughput(bytes(shape));

        group.bench_with_input(BenchmarkId::new("encode", label(shape)), &img, |b, img| {
            b.iter(|| black_box(nifti::encode(black_box(img)).unwrap()))
        });

        let gz = dir.path().join("out.nii.gz");
        group.bench_with_input(BenchmarkId::new("save_gzip", label(shape)), &img, |b, img| {
            b.iter(|| nifti::save(black_box(img), &gz).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_load, bench_reorient, bench_inspect, bench_write);
criterion_main!(benches);
