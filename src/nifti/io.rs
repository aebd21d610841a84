//! NIfTI file I/O.
//!
//! - Memory-mapped reading for uncompressed files
//! - Single-pass libdeflate decompression for .nii.gz, with a streaming fallback
//! - Parallel gzip compression (gzp) for large volumes

use super::header::{NiftiHeader, NiftiVersion};
use super::image::{ArrayData, NiftiImage};
use crate::error::{Error, Result};
use flate2::bufread::MultiGzDecoder;
use gzp::deflate::Gzip;
use gzp::par::compress::ParCompressBuilder;
use gzp::ZWriter;
use libdeflater::{CompressionLvl, Compressor, DecompressionError, Decompressor};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

thread_local! {
    static DECOMPRESSOR: std::cell::RefCell<Decompressor> = std::cell::RefCell::new(Decompressor::new());
}

const GZIP_BUFFER_SIZE: usize = 256 * 1024;

/// Payloads at least this large are compressed with gzp's parallel writer.
const PARALLEL_THRESHOLD: usize = 1024 * 1024;

/// True when the path names a gzip-compressed volume.
pub fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn read_file_with_readahead(path: &Path) -> Result<Vec<u8>> {
    use std::os::unix::io::AsRawFd;

    let file = File::open(path)?;
    let len = file.metadata()?.len() as usize;

    // SAFETY: fd is valid for the lifetime of `file`; the call is only a hint.
    unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            0,
            len as libc::off_t,
            libc::POSIX_FADV_SEQUENTIAL,
        );
    }

    let mut buffer = Vec::with_capacity(len);
    let mut reader = BufReader::with_capacity(GZIP_BUFFER_SIZE, file);
    reader.read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[cfg(not(target_os = "linux"))]
fn read_file_with_readahead(path: &Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

fn estimate_gzip_uncompressed_size(compressed: &[u8]) -> usize {
    // ISIZE per RFC 1952, only exact for single-member payloads under 4GB
    if compressed.len() >= 4 {
        let trailer = &compressed[compressed.len() - 4..];
        u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize
    } else {
        compressed.len() * 4
    }
}

fn decompress_gzip_streaming(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(BufReader::with_capacity(GZIP_BUFFER_SIZE, compressed));
    let mut output = Vec::with_capacity(estimate_gzip_uncompressed_size(compressed));
    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::Decompression(format!("gzip stream decode failed: {e}")))?;
    Ok(output)
}

/// Inflate with libdeflate sized from the gzip trailer; fall back to streaming
/// when the trailer underestimates (multi-member or >4GB payloads).
fn decompress_gzip(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut output = vec![0u8; estimate_gzip_uncompressed_size(compressed).max(NiftiHeader::SIZE)];
    let result = DECOMPRESSOR.with(|d| d.borrow_mut().gzip_decompress(compressed, &mut output));

    match result {
        Ok(written) => {
            output.truncate(written);
            Ok(output)
        }
        Err(DecompressionError::InsufficientSpace) => {
            drop(output);
            decompress_gzip_streaming(compressed)
        }
        Err(e) => Err(Error::Decompression(e.to_string())),
    }
}

/// Bytes between the header and the voxel data, or empty when the extension flag is clear.
fn extension_block(bytes: &[u8], header: &NiftiHeader) -> Vec<u8> {
    let start = header.header_size();
    let end = (header.vox_offset as usize).min(bytes.len());
    if end >= start + 4 && bytes[start] != 0 {
        bytes[start..end].to_vec()
    } else {
        Vec::new()
    }
}

fn decode_image(bytes: &[u8]) -> Result<NiftiImage> {
    let header = NiftiHeader::from_bytes(bytes)?;
    let offset = header.vox_offset as usize;
    if bytes.len() < offset {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("file truncated: {} bytes, vox_offset {offset}", bytes.len()),
        )));
    }
    let data = ArrayData::decode(
        &bytes[offset..],
        header.datatype,
        &header.shape(),
        header.is_little_endian(),
    )?;
    let block = extension_block(bytes, &header);
    Ok(NiftiImage::from_parts(header, data).with_extension_block(block))
}

/// Load a NIfTI image from file.
///
/// Supports both `.nii` and `.nii.gz`; compression is chosen by extension.
///
/// # Example
/// ```ignore
/// let img = niicanon::nifti::load("tpl-MNI152_res-01_T1w.nii.gz")?;
/// println!("{:?} {}", img.shape(), img.dtype());
/// ```
#[must_use = "this function returns a loaded image that should be used"]
pub fn load<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
    let path = path.as_ref();
    if is_gzipped(path) {
        load_gzipped(path)
    } else {
        load_uncompressed(path)
    }
}

#[allow(unsafe_code)]
fn load_uncompressed(path: &Path) -> Result<NiftiImage> {
    let file = File::open(path)?;
    // SAFETY: read-only mapping of a file we just opened; external modification
    // can only produce inconsistent voxel values, which are copied out immediately.
    let mmap = unsafe { Mmap::map(&file)? };
    decode_image(&mmap)
}

fn load_gzipped(path: &Path) -> Result<NiftiImage> {
    let compressed = read_file_with_readahead(path)?;
    let bytes = decompress_gzip(&compressed)?;
    decode_image(&bytes)
}

/// Load only the header from a NIfTI file.
#[allow(unsafe_code)]
pub fn load_header<P: AsRef<Path>>(path: P) -> Result<NiftiHeader> {
    let path = path.as_ref();
    let file = File::open(path)?;

    if is_gzipped(path) {
        let mut decoder = MultiGzDecoder::new(BufReader::new(file));
        let mut header_buf = Vec::with_capacity(NiftiHeader::SIZE_V2);
        decoder
            .by_ref()
            .take(NiftiHeader::SIZE_V2 as u64)
            .read_to_end(&mut header_buf)
            .map_err(|e| Error::Decompression(format!("gzip header decode failed: {e}")))?;
        NiftiHeader::from_bytes(&header_buf)
    } else {
        // SAFETY: read-only mapping, only the header bytes are inspected
        let mmap = unsafe { Mmap::map(&file)? };
        NiftiHeader::from_bytes(&mmap)
    }
}

/// Serialize an image to uncompressed NIfTI bytes.
///
/// The header is written little-endian with `vox_offset` recomputed from the
/// carried extension block; voxels follow in file order.
pub fn encode(image: &NiftiImage) -> Result<Vec<u8>> {
    let mut header = image.header().clone();
    header.validate()?;
    if header.requires_nifti2() {
        header.version = NiftiVersion::Nifti2;
    }

    let mut block = image.extension_block().to_vec();
    if block.is_empty() {
        block.resize(4, 0);
    }
    let header_size = header.header_size();
    let unpadded = header_size + block.len();
    block.resize(unpadded.next_multiple_of(16) - header_size, 0);
    header.vox_offset = (header_size + block.len()) as i64;

    let data = image.data_to_bytes();
    let mut out = Vec::with_capacity(header.vox_offset as usize + data.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&block);
    out.extend_from_slice(&data);
    Ok(out)
}

/// Write an image to `writer`, gzip-compressed when `compressed` is set.
pub fn write_to<W: Write + Send + 'static>(
    image: &NiftiImage,
    mut writer: W,
    compressed: bool,
) -> Result<()> {
    let bytes = encode(image)?;

    if !compressed {
        writer.write_all(&bytes)?;
        writer.flush()?;
        return Ok(());
    }

    if bytes.len() >= PARALLEL_THRESHOLD {
        let mut parz = ParCompressBuilder::<Gzip>::new().from_writer(writer);
        parz.write_all(&bytes)
            .map_err(|e| Error::Compression(format!("parallel compression failed: {e}")))?;
        parz.finish()
            .map_err(|e| Error::Compression(format!("parallel compression finish failed: {e}")))?;
    } else {
        let mut compressor = Compressor::new(CompressionLvl::default());
        let mut out = vec![0u8; compressor.gzip_compress_bound(bytes.len())];
        let written = compressor
            .gzip_compress(&bytes, &mut out)
            .map_err(|e| Error::Compression(format!("{e:?}")))?;
        out.truncate(written);
        writer.write_all(&out)?;
        writer.flush()?;
    }
    Ok(())
}

/// Save a NIfTI image; `.nii.gz` paths are gzip-compressed.
///
/// # Example
/// ```ignore
/// niicanon::nifti::save(&img, "output.nii.gz")?;
/// ```
pub fn save<P: AsRef<Path>>(image: &NiftiImage, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    write_to(
        image,
        BufWriter::with_capacity(1024 * 1024, file),
        is_gzipped(path),
    )
}
