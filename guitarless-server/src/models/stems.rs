//! Separation output as seen by the mixer

use std::path::{Path, PathBuf};

/// The four stem files produced for one source
///
/// Paths are where the separation engine is expected to have written the
/// stems; a path may not exist if the engine exited early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemSet {
    /// Per-source directory holding the stems
    pub directory: PathBuf,
    /// Instrument of interest
    pub instrument: PathBuf,
    /// The three stems recombined into the remainder mix
    pub others: [PathBuf; 3],
}

impl StemSet {
    /// Every stem path, instrument first
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.instrument.as_path()).chain(self.others.iter().map(PathBuf::as_path))
    }

    /// Stems that are not on disk
    pub fn missing(&self) -> Vec<&Path> {
        self.paths().filter(|p| !p.exists()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}
