//! Stem separation
//!
//! Runs the `demucs` separation engine as `python -m demucs` and locates the
//! stems it writes under `<output_root>/<model>/<source stem>/`.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use super::fetcher::output_lines_rev;
use crate::error::PipelineError;
use crate::models::StemSet;

/// Lowercased stderr fragments of the engine's known, harmless exit failure
///
/// The engine writes its stems, then fails while loading an optional codec
/// library and exits non-zero.
pub const BENIGN_FAILURE_MARKERS: &[&str] = &["torchcodec"];

/// Separation engine contract
pub trait StemSeparator: Send + Sync {
    /// Split `audio_path` into stems
    ///
    /// Blocking. The returned set may have missing files only when the engine
    /// exited with the benign codec failure.
    fn separate(&self, audio_path: &Path) -> Result<StemSet, PipelineError>;
}

/// How stem files are named inside the per-source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemLayout {
    /// Stem holding the instrument of interest (guitar lands in `other`)
    pub instrument: String,
    /// Stems recombined into the remainder
    pub others: [String; 3],
    /// File extension the engine writes
    pub extension: String,
}

impl Default for StemLayout {
    fn default() -> Self {
        Self {
            instrument: "other".to_string(),
            others: ["drums".to_string(), "bass".to_string(), "vocals".to_string()],
            extension: "mp3".to_string(),
        }
    }
}

impl StemLayout {
    /// Expected stem paths inside `directory`
    pub fn resolve(&self, directory: &Path) -> StemSet {
        let file = |name: &str| directory.join(format!("{}.{}", name, self.extension));
        StemSet {
            directory: directory.to_path_buf(),
            instrument: file(&self.instrument),
            others: [
                file(&self.others[0]),
                file(&self.others[1]),
                file(&self.others[2]),
            ],
        }
    }
}

/// Classified engine exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineExit {
    Clean,
    /// Non-zero exit carrying the known codec-library failure
    BenignCodecFailure,
    /// Anything else, with a short description
    Failed(String),
}

/// Classify an engine run from its exit status and stderr
pub fn classify_exit(success: bool, code: Option<i32>, stderr: &str) -> EngineExit {
    if success {
        return EngineExit::Clean;
    }

    let lowered = stderr.to_lowercase();
    if BENIGN_FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return EngineExit::BenignCodecFailure;
    }

    EngineExit::Failed(match output_lines_rev(stderr).next() {
        Some(line) => format!("engine exited with code {:?}: {}", code, line),
        None => format!("engine exited with code {:?}", code),
    })
}

/// `demucs` backed separator
#[derive(Debug, Clone)]
pub struct DemucsSeparator {
    python_binary: String,
    model: String,
    output_root: PathBuf,
    layout: StemLayout,
}

impl DemucsSeparator {
    pub fn new(
        python_binary: impl Into<String>,
        model: impl Into<String>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            python_binary: python_binary.into(),
            model: model.into(),
            output_root: output_root.into(),
            layout: StemLayout::default(),
        }
    }

    /// Directory the engine writes stems for `audio_path` into
    pub fn stem_directory(&self, audio_path: &Path) -> Result<PathBuf, PipelineError> {
        let stem = audio_path.file_stem().ok_or_else(|| {
            PipelineError::Separation(format!("Not a file path: {}", audio_path.display()))
        })?;
        Ok(self.output_root.join(&self.model).join(stem))
    }

    pub fn command_args(&self, audio_path: &Path) -> Vec<String> {
        vec![
            "-m".to_string(),
            "demucs".to_string(),
            "--name".to_string(),
            self.model.clone(),
            "--mp3".to_string(),
            "-o".to_string(),
            self.output_root.to_string_lossy().into_owned(),
            audio_path.to_string_lossy().into_owned(),
        ]
    }
}

impl StemSeparator for DemucsSeparator {
    fn separate(&self, audio_path: &Path) -> Result<StemSet, PipelineError> {
        if !audio_path.is_file() {
            return Err(PipelineError::Separation(format!(
                "Input not found: {}",
                audio_path.display()
            )));
        }

        let directory = self.stem_directory(audio_path)?;
        clear_stem_directory(&directory)?;

        let args = self.command_args(audio_path);
        debug!(python = %self.python_binary, ?args, "Running separation engine");

        let output = Command::new(&self.python_binary)
            .args(&args)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::Separation(format!(
                        "Python interpreter not found: {}",
                        self.python_binary
                    ))
                } else {
                    PipelineError::Separation(format!(
                        "Failed to execute {}: {}",
                        self.python_binary, e
                    ))
                }
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stems = self.layout.resolve(&directory);

        match classify_exit(output.status.success(), output.status.code(), &stderr) {
            EngineExit::Clean => {
                let missing = stems.missing();
                if !missing.is_empty() {
                    let names: Vec<String> =
                        missing.iter().map(|p| p.display().to_string()).collect();
                    return Err(PipelineError::Separation(format!(
                        "Expected stems missing: {}",
                        names.join(", ")
                    )));
                }
                info!(directory = %directory.display(), "Separation complete");
                Ok(stems)
            }
            EngineExit::BenignCodecFailure => {
                warn!(
                    code = ?output.status.code(),
                    "Separation engine reported codec library failure, using written stems"
                );
                if !directory.is_dir() {
                    return Err(PipelineError::Separation(format!(
                        "Stem folder not found: {}",
                        directory.display()
                    )));
                }
                Ok(stems)
            }
            EngineExit::Failed(detail) => Err(PipelineError::Separation(detail)),
        }
    }
}

/// Remove stems an earlier run left for a source of the same name
fn clear_stem_directory(directory: &Path) -> Result<(), PipelineError> {
    match std::fs::remove_dir_all(directory) {
        Ok(()) => {
            debug!(directory = %directory.display(), "Removed leftover stems");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::Separation(format!(
            "Could not clear stem folder {}: {}",
            directory.display(),
            e
        ))),
    }
}
