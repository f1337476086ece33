//! Fake download and separation engines
//!
//! Stand-ins for yt-dlp and demucs that write real WAV files, so the
//! orchestrator, mixer, and HTTP layer run end to end without external tools.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use guitarless_common::Broadcaster;
use guitarless_server::config::{PipelinePaths, ServerConfig};
use guitarless_server::services::{
    MediaFetcher, MediaMetadata, OrchestratorSettings, PipelineOrchestrator, StemLayout,
    StemSeparator,
};
use guitarless_server::{AppState, PipelineError};

use super::audio_generator::{generate_test_wav, AudioConfig};

/// Length of every generated stem and downloaded source
pub const TEST_AUDIO_SECONDS: f64 = 1.5;

/// Fake download engine
pub struct FakeFetcher {
    pub duration_seconds: Option<f64>,
    pub title: Option<String>,
    /// Fail the metadata query with this message
    pub failure: Option<String>,
    pub metadata_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn song(title: &str, duration_seconds: f64) -> Self {
        Self {
            duration_seconds: Some(duration_seconds),
            title: Some(title.to_string()),
            failure: None,
            metadata_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::song("unused", 0.0)
        }
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

impl MediaFetcher for FakeFetcher {
    fn fetch_metadata(&self, _url: &str) -> Result<MediaMetadata, PipelineError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(PipelineError::Fetch(message.clone()));
        }
        Ok(MediaMetadata {
            duration_seconds: self.duration_seconds,
            title: self.title.clone(),
        })
    }

    fn fetch_media(&self, _url: &str, destination_dir: &Path) -> Result<PathBuf, PipelineError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let name = self.title.clone().unwrap_or_else(|| "download".to_string());
        let path = destination_dir.join(format!("{}.wav", name));
        generate_test_wav(&path, &AudioConfig::tone(330.0, TEST_AUDIO_SECONDS))
            .map_err(|e| PipelineError::Fetch(e.to_string()))
    }
}

/// What the fake separation engine does
#[derive(Debug, Clone)]
pub enum SeparatorMode {
    /// Writes all four stems and exits cleanly
    Complete,
    /// Fails outright with this detail
    Fail(String),
    /// Exits with the benign codec failure after writing only these stems
    BenignWrites(Vec<&'static str>),
}

/// Fake separation engine writing WAV stems in the demucs layout
pub struct FakeSeparator {
    pub mode: SeparatorMode,
    pub output_root: PathBuf,
    pub layout: StemLayout,
    pub delay: Duration,
    active: AtomicUsize,
    pub peak_concurrency: AtomicUsize,
}

impl FakeSeparator {
    pub fn new(mode: SeparatorMode, output_root: PathBuf) -> Self {
        Self {
            mode,
            output_root,
            layout: StemLayout {
                extension: "wav".to_string(),
                ..StemLayout::default()
            },
            delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            peak_concurrency: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn stem_directory(&self, audio_path: &Path) -> PathBuf {
        let stem = audio_path.file_stem().unwrap_or_default();
        self.output_root.join("htdemucs").join(stem)
    }

    fn write_stem(&self, directory: &Path, name: &str) -> Result<(), PipelineError> {
        let frequency = match name {
            "other" => 196.0,
            "drums" => 80.0,
            "bass" => 55.0,
            _ => 523.0,
        };
        let path = directory.join(format!("{}.{}", name, self.layout.extension));
        let config = AudioConfig {
            amplitude: 0.2,
            ..AudioConfig::tone(frequency, TEST_AUDIO_SECONDS)
        };
        generate_test_wav(&path, &config)
            .map(|_| ())
            .map_err(|e| PipelineError::Separation(e.to_string()))
    }

    fn run(&self, audio_path: &Path) -> Result<guitarless_server::models::StemSet, PipelineError> {
        let directory = self.stem_directory(audio_path);
        match &self.mode {
            SeparatorMode::Complete => {
                std::fs::create_dir_all(&directory)?;
                for name in ["other", "drums", "bass", "vocals"] {
                    self.write_stem(&directory, name)?;
                }
                Ok(self.layout.resolve(&directory))
            }
            SeparatorMode::Fail(detail) => Err(PipelineError::Separation(detail.clone())),
            SeparatorMode::BenignWrites(names) => {
                std::fs::create_dir_all(&directory)?;
                for name in names {
                    self.write_stem(&directory, name)?;
                }
                Ok(self.layout.resolve(&directory))
            }
        }
    }
}

impl StemSeparator for FakeSeparator {
    fn separate(&self, audio_path: &Path) -> Result<guitarless_server::models::StemSet, PipelineError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(now_active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = self.run(audio_path);

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Orchestrator wired to fakes inside a temporary root folder
pub struct TestHarness {
    pub root: TempDir,
    pub paths: PipelinePaths,
    pub broadcaster: Broadcaster,
    pub fetcher: Arc<FakeFetcher>,
    pub separator: Arc<FakeSeparator>,
    pub orchestrator: Arc<PipelineOrchestrator>,
}

impl TestHarness {
    pub fn new(fetcher: FakeFetcher, mode: SeparatorMode) -> Self {
        Self::build(fetcher, |separated| FakeSeparator::new(mode, separated))
    }

    pub fn build(
        fetcher: FakeFetcher,
        separator: impl FnOnce(PathBuf) -> FakeSeparator,
    ) -> Self {
        let root = tempfile::tempdir().unwrap();
        let paths = PipelinePaths::new(root.path());
        paths.ensure_all().unwrap();

        let broadcaster = Broadcaster::new();
        let fetcher = Arc::new(fetcher);
        let separator = Arc::new(separator(paths.separated.clone()));

        let settings = OrchestratorSettings::new(paths.clone(), Duration::from_secs(600));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            fetcher.clone(),
            separator.clone(),
            broadcaster.clone(),
            settings,
        ));

        Self {
            root,
            paths,
            broadcaster,
            fetcher,
            separator,
            orchestrator,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.orchestrator.clone(), ServerConfig::default())
    }

    /// Files currently in a directory, by name
    pub fn list(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
