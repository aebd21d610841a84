//! Recursive tree walk routing volumes through the engine and everything else to verbatim copy.

use super::engine::{Engine, Outcome};
use crate::config::CanonConfig;
use crate::error::{Error, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

/// Volume file suffixes, matched case-sensitively.
pub const VOLUME_SUFFIXES: [&str; 2] = [".nii", ".nii.gz"];

/// One file that could not be processed.
#[derive(Debug)]
pub struct FileFailure {
    /// Path relative to the input root.
    pub path: PathBuf,
    /// What went wrong.
    pub error: Error,
}

/// Result of canonicalizing a tree.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Files rewritten or newly copied, relative to the input root, in walk order.
    pub modified: Vec<PathBuf>,
    /// Files that failed, in walk order.
    pub failures: Vec<FileFailure>,
}

impl RunReport {
    /// True when every file was processed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// True for `.nii` and `.nii.gz` file names.
pub fn is_nifti(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| VOLUME_SUFFIXES.iter().any(|s| name.ends_with(s)))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().is_some_and(|n| n.starts_with('.'))
}

/// Every file under `root`, sorted by name at each level, skipping dot-prefixed
/// entries at every depth. Unreadable entries are returned as failures.
pub fn walk_files(root: &Path) -> Result<(Vec<PathBuf>, Vec<FileFailure>)> {
    walk_files_excluding(root, None)
}

fn walk_files_excluding(
    root: &Path,
    exclude: Option<&Path>,
) -> Result<(Vec<PathBuf>, Vec<FileFailure>)> {
    if !root.is_dir() {
        return Err(Error::Configuration(format!(
            "input root {} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let mut failures = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && exclude.map_or(true, |ex| e.path() != ex));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => {
                let path = err.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                let error = match err.into_io_error() {
                    Some(io) => Error::Io(io),
                    None => Error::Configuration("filesystem loop while walking".into()),
                };
                failures.push(FileFailure {
                    path: relative(root, &path),
                    error,
                });
            }
        }
    }
    Ok((files, failures))
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// A mirrored destination must not escape `out` through a symlinked directory.
fn check_within(out: &Path, dst: &Path) -> Result<()> {
    let Ok(out_real) = out.canonicalize() else {
        // nothing under a missing root can point elsewhere yet
        return Ok(());
    };
    let existing = dst.ancestors().skip(1).find(|p| p.exists());
    match existing.map(Path::canonicalize) {
        Some(Ok(real)) if !real.starts_with(&out_real) => {
            Err(Error::DestinationConflict(dst.to_path_buf()))
        }
        Some(Err(e)) => Err(Error::encode(dst, e.into())),
        _ => Ok(()),
    }
}

/// Canonicalize every file under `root`.
///
/// Volumes go through [`Engine::process`]; other files are copied verbatim.
/// With `out = None` files are rewritten in place; otherwise the tree is
/// mirrored under `out`. Files run in parallel on a pool of
/// `config.effective_jobs()` threads; per-file errors are collected and never
/// abort the run.
pub fn run(root: &Path, out: Option<&Path>, config: &CanonConfig) -> Result<RunReport> {
    config.validate()?;

    // an output tree nested in the input tree must not be walked
    let exclude = out.filter(|o| o.starts_with(root) && *o != root);
    let (files, walk_failures) = walk_files_excluding(root, exclude)?;
    info!(root = %root.display(), files = files.len(), "walked input tree");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.effective_jobs())
        .build()
        .map_err(|e| Error::Configuration(format!("failed to configure thread pool: {e}")))?;

    let engine = Engine::new(config.clone());
    let results: Vec<(PathBuf, Result<Outcome>)> = pool.install(|| {
        files
            .par_iter()
            .map(|src| {
                let rel = relative(root, src);
                let dst = out.map_or_else(|| src.clone(), |o| o.join(&rel));
                let result = match out.map_or(Ok(()), |o| check_within(o, &dst)) {
                    Err(e) => Err(e),
                    Ok(()) if is_nifti(src) => engine.process(src, &dst),
                    Ok(()) => engine.copy_verbatim(src, &dst),
                };
                (rel, result)
            })
            .collect()
    });

    let mut report = RunReport {
        modified: Vec::new(),
        failures: walk_failures,
    };
    for (rel, result) in results {
        match result {
            Ok(outcome) if outcome.modified() => report.modified.push(rel),
            Ok(_) => {}
            Err(error) => {
                warn!(path = %rel.display(), kind = error.kind(), "{error}");
                report.failures.push(FileFailure { path: rel, error });
            }
        }
    }
    info!(
        modified = report.modified.len(),
        failed = report.failures.len(),
        "run finished"
    );
    Ok(report)
}
