//! Engine configuration.

use crate::error::{Error, Result};

/// Upper bound on worker threads accepted from configuration.
pub const MAX_JOBS: usize = 1024;

/// Flags controlling how volumes are canonicalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonConfig {
    /// Scale T1w/T2w/PD intensities so the 99.9th percentile maps to 10000.
    pub normalize: bool,
    /// Coerce storage dtype (int16 by default, uint8 for masks and small-range dseg).
    pub force_dtype: bool,
    /// Replace oblique affines with a cardinal one.
    pub deoblique: bool,
    /// Worker threads for tree runs (0 = available parallelism).
    pub jobs: usize,
}

impl Default for CanonConfig {
    fn default() -> Self {
        Self {
            normalize: false,
            force_dtype: true,
            deoblique: true,
            jobs: 0,
        }
    }
}

impl CanonConfig {
    /// Create a config with default flags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable intensity normalization.
    pub fn normalize(mut self, enabled: bool) -> Self {
        self.normalize = enabled;
        self
    }

    /// Enable or disable dtype coercion.
    pub fn force_dtype(mut self, enabled: bool) -> Self {
        self.force_dtype = enabled;
        self
    }

    /// Enable or disable deobliquing.
    pub fn deoblique(mut self, enabled: bool) -> Self {
        self.deoblique = enabled;
        self
    }

    /// Set the worker count (0 = available parallelism).
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Worker count with the automatic default resolved.
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        }
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.jobs > MAX_JOBS {
            return Err(Error::Configuration(format!(
                "jobs must be at most {MAX_JOBS}, got {}",
                self.jobs
            )));
        }
        Ok(())
    }
}
