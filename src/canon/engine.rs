//! Per-volume canonicalization.

use super::affine;
use super::detect::{self, ChangeInputs, TEMPLATE_XFORM_CODE};
use super::modality::{classify, stem_of, Modality};
use super::policy::{self, Rescale};
use crate::config::CanonConfig;
use crate::error::{Error, Result};
use crate::nifti::{self, Affine, ArrayData, DataType, NiftiImage, SpatialUnits};
use crate::transforms::reorient_to_canonical;
use ndarray::ArrayD;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::Path;
use tracing::{debug, info};

/// Everything decided about one volume, without touching the filesystem.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformDecision {
    /// Modality from the file name.
    pub modality: Modality,
    /// Dtype currently stored.
    pub current_dtype: DataType,
    /// Dtype the volume will be stored as.
    pub target_dtype: DataType,
    /// Value map applied before casting.
    pub rescale: Option<Rescale>,
    /// Intensity normalization factor.
    pub normalize: Option<f64>,
    /// Affine written to both coded forms.
    pub new_affine: Affine,
    /// Per-axis obliquity of the (reoriented) input affine, radians.
    pub obliquity: [f64; 3],
    /// Deobliquing was triggered.
    pub needs_deoblique: bool,
    /// Canonical reorientation moved voxel axes.
    pub canonical_reorient: bool,
    /// The volume must be rewritten.
    pub changed: bool,
}

impl TransformDecision {
    /// Largest per-axis obliquity.
    pub fn max_obliquity(&self) -> f64 {
        self.obliquity.iter().copied().fold(0.0, f64::max)
    }
}

impl fmt::Display for TransformDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "modality:   {}", self.modality)?;
        writeln!(f, "dtype:      {} -> {}", self.current_dtype, self.target_dtype)?;
        match self.rescale {
            Some(r) => writeln!(f, "rescale:    (v + {}) * {}", r.offset, r.scale)?,
            None => writeln!(f, "rescale:    none")?,
        }
        match self.normalize {
            Some(factor) => writeln!(f, "normalize:  x{factor}")?,
            None => writeln!(f, "normalize:  none")?,
        }
        writeln!(
            f,
            "obliquity:  {:.6} rad{}",
            self.max_obliquity(),
            if self.needs_deoblique { " (deobliqued)" } else { "" }
        )?;
        writeln!(f, "reoriented: {}", self.canonical_reorient)?;
        writeln!(f, "affine:")?;
        for row in &self.new_affine {
            writeln!(f, "  [{:>12.6} {:>12.6} {:>12.6} {:>12.6}]", row[0], row[1], row[2], row[3])?;
        }
        write!(f, "changed:    {}", self.changed)
    }
}

/// What the engine did with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing written.
    Unchanged,
    /// Source bytes copied to the destination.
    Copied,
    /// Volume re-encoded in canonical form.
    Rewritten,
}

impl Outcome {
    /// True when the destination received new content.
    pub fn modified(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

struct Plan {
    image: NiftiImage,
    values: ArrayD<f64>,
    decision: TransformDecision,
}

/// Canonicalizes single files according to a [`CanonConfig`].
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: CanonConfig,
}

impl Engine {
    /// Create an engine with the given flags.
    pub fn new(config: CanonConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &CanonConfig {
        &self.config
    }

    /// Decide what would happen to a volume without writing anything.
    pub fn inspect(&self, path: &Path) -> Result<TransformDecision> {
        Ok(self.plan(path)?.decision)
    }

    fn plan(&self, path: &Path) -> Result<Plan> {
        let loaded = nifti::load(path).map_err(|e| Error::decode(path, e))?;
        let (image, canonical_reorient) = reorient_to_canonical(&loaded).map_err(|e| match e {
            Error::MalformedInput(_) => e,
            other => Error::decode(path, other),
        })?;
        drop(loaded);

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let modality = classify(stem_of(file_name));

        let analysis = affine::analyze(&image.affine(), image.voxel_sizes(), self.config.deoblique)?;
        let values = image.to_f64();
        let dtype = policy::decide(&modality, image.dtype(), &values, self.config.force_dtype);
        let normalize = policy::normalization(&modality, &values, self.config.normalize)?;

        let changed = detect::is_changed(&ChangeInputs {
            header: image.header(),
            current_dtype: image.dtype(),
            target_dtype: dtype.target_dtype,
            rescale: dtype.rescale,
            normalize,
            deobliqued: analysis.needs_deoblique,
            reoriented: canonical_reorient,
            new_affine: &analysis.new_affine,
        });

        let decision = TransformDecision {
            modality,
            current_dtype: image.dtype(),
            target_dtype: dtype.target_dtype,
            rescale: dtype.rescale,
            normalize,
            new_affine: analysis.new_affine,
            obliquity: analysis.obliquity,
            needs_deoblique: analysis.needs_deoblique,
            canonical_reorient,
            changed,
        };
        Ok(Plan {
            image,
            values,
            decision,
        })
    }

    /// Canonicalize one volume from `src` into `dst` (which may equal `src`).
    pub fn process(&self, src: &Path, dst: &Path) -> Result<Outcome> {
        let plan = self.plan(src)?;
        let decision = &plan.decision;
        debug!(
            path = %src.display(),
            modality = %decision.modality,
            dtype = %decision.current_dtype,
            target = %decision.target_dtype,
            obliquity = decision.max_obliquity(),
            changed = decision.changed,
            "inspected volume"
        );

        if !decision.changed {
            return self.copy_verbatim(src, dst);
        }

        check_destination(dst)?;
        let image = canonical_image(plan);
        let compressed = nifti::is_gzipped(dst);
        write_atomically(dst, src, |file| {
            nifti::write_to(&image, BufWriter::with_capacity(1024 * 1024, file), compressed)
        })
        .map_err(|e| Error::encode(dst, e))?;

        info!(path = %dst.display(), dtype = %image.dtype(), "rewrote volume");
        Ok(Outcome::Rewritten)
    }

    /// Copy a file byte-for-byte unless the destination is the source or already identical.
    pub fn copy_verbatim(&self, src: &Path, dst: &Path) -> Result<Outcome> {
        if same_location(src, dst) {
            return Ok(Outcome::Unchanged);
        }
        check_destination(dst)?;
        if same_contents(src, dst).map_err(|e| Error::encode(dst, e))? {
            debug!(path = %dst.display(), "destination already up to date");
            return Ok(Outcome::Unchanged);
        }

        write_atomically(dst, src, |file| {
            let mut reader = File::open(src)?;
            let mut writer = BufWriter::new(file);
            io::copy(&mut reader, &mut writer)?;
            io::Write::flush(&mut writer)?;
            Ok(())
        })
        .map_err(|e| Error::encode(dst, e))?;

        debug!(src = %src.display(), dst = %dst.display(), "copied file");
        Ok(Outcome::Copied)
    }
}

/// Apply the decision: rescale, normalize, cast, stamp both coded forms.
fn canonical_image(plan: Plan) -> NiftiImage {
    let Plan {
        image,
        mut values,
        decision,
    } = plan;

    if let Some(rescale) = decision.rescale.filter(|r| !r.is_identity()) {
        values.mapv_inplace(|v| rescale.apply(v));
    }
    if let Some(factor) = decision.normalize {
        values.mapv_inplace(|v| v * factor);
    }
    let data = ArrayData::from_f64(&values, decision.target_dtype);

    let mut header = image.header().clone();
    header.set_sform(&decision.new_affine, TEMPLATE_XFORM_CODE);
    header.set_qform(&decision.new_affine, TEMPLATE_XFORM_CODE);
    header.set_slope_inter(1.0, 0.0);
    header.spatial_units = SpatialUnits::Millimeter;

    NiftiImage::from_parts(header, data).with_extension_block(image.extension_block().to_vec())
}

fn same_location(src: &Path, dst: &Path) -> bool {
    src == dst
        || matches!(
            (fs::canonicalize(src), fs::canonicalize(dst)),
            (Ok(a), Ok(b)) if a == b
        )
}

/// The destination may be absent or a regular file; anything else is a conflict.
fn check_destination(dst: &Path) -> Result<()> {
    match fs::symlink_metadata(dst) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(Error::DestinationConflict(dst.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::encode(dst, e.into())),
    }
}

fn same_contents(a: &Path, b: &Path) -> Result<bool> {
    let (meta_a, meta_b) = match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => (ma, mb),
        (_, Err(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        (Err(e), _) | (_, Err(e)) => return Err(e.into()),
    };
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let mut buf_a = vec![0u8; 64 * 1024];
    let mut buf_b = vec![0u8; 64 * 1024];
    loop {
        let n = ra.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        rb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// Write through a hidden temporary file in the destination directory, then rename over `dst`.
///
/// The result takes the permissions of `like`; the temporary file itself is owner-only.
fn write_atomically<F>(dst: &Path, like: &Path, fill: F) -> Result<()>
where
    F: FnOnce(File) -> Result<()>,
{
    let parent = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let tmp = tempfile::Builder::new()
        .prefix(".niicanon-")
        .tempfile_in(parent)?;
    fill(tmp.as_file().try_clone()?)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), fs::metadata(like)?.permissions())?;
    tmp.persist(dst).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
