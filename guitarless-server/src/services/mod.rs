//! Service modules for the separation pipeline
//!
//! - `fetcher`: remote media download engine (yt-dlp)
//! - `separator`: stem separation engine (demucs)
//! - `orchestrator`: runs a job through fetch → separate → mix → publish

pub mod fetcher;
pub mod orchestrator;
pub mod separator;

pub use fetcher::{MediaFetcher, MediaMetadata, YtDlpFetcher};
pub use orchestrator::{
    JobOutcome, OrchestratorSettings, PipelineOrchestrator, ISOLATED_FILE_NAME, MSG_DONE,
    MSG_DOWNLOADING, MSG_ISOLATING, REMAINDER_FILE_NAME,
};
pub use separator::{classify_exit, DemucsSeparator, EngineExit, StemLayout, StemSeparator};
