//! Remote media fetching
//!
//! Wraps the `yt-dlp` command-line tool. Both calls block for as long as the
//! tool runs; the orchestrator runs them on the blocking pool.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

use crate::error::PipelineError;

/// What the download engine reports about a source before downloading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    /// Source length, when the site reports one
    pub duration_seconds: Option<f64>,
    /// Suggested title, used as the job name
    pub title: Option<String>,
}

/// Download engine contract
pub trait MediaFetcher: Send + Sync {
    /// Query the source without downloading the media
    fn fetch_metadata(&self, url: &str) -> Result<MediaMetadata, PipelineError>;

    /// Download the best available audio into `destination_dir`
    ///
    /// The file is named after the source title. Returns its path.
    fn fetch_media(&self, url: &str, destination_dir: &Path) -> Result<PathBuf, PipelineError>;
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    title: Option<String>,
}

/// `yt-dlp` backed fetcher
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    binary: String,
    user_agent: Option<String>,
}

impl YtDlpFetcher {
    pub fn new(binary: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            user_agent,
        }
    }

    /// Arguments for the metadata query
    pub fn metadata_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--skip-download".to_string(),
            "--no-playlist".to_string(),
        ];
        self.push_common_args(&mut args);
        args.push(url.to_string());
        args
    }

    /// Arguments for the download
    ///
    /// yt-dlp writes to a `.part` file and renames it when complete, so an
    /// interrupted download never clobbers an existing file.
    pub fn download_args(&self, url: &str, destination_dir: &Path) -> Vec<String> {
        let template = destination_dir.join("%(title)s.%(ext)s");
        let mut args = vec![
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
        ];
        self.push_common_args(&mut args);
        args.push(url.to_string());
        args
    }

    fn push_common_args(&self, args: &mut Vec<String>) {
        if let Some(agent) = &self.user_agent {
            args.push("--user-agent".to_string());
            args.push(agent.clone());
        }
    }

    fn run(&self, args: &[String]) -> Result<Output, PipelineError> {
        debug!(binary = %self.binary, ?args, "Running download engine");

        let output = Command::new(&self.binary).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::Fetch(format!("Download engine not found: {}", self.binary))
            } else {
                PipelineError::Fetch(format!("Failed to execute {}: {}", self.binary, e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Fetch(failure_detail(&stderr, output.status.code())));
        }
        Ok(output)
    }
}

impl MediaFetcher for YtDlpFetcher {
    fn fetch_metadata(&self, url: &str) -> Result<MediaMetadata, PipelineError> {
        validate_url(url)?;
        let output = self.run(&self.metadata_args(url))?;
        let metadata = parse_metadata(&output.stdout)?;

        info!(
            url,
            duration_seconds = ?metadata.duration_seconds,
            title = ?metadata.title,
            "Fetched source metadata"
        );
        Ok(metadata)
    }

    fn fetch_media(&self, url: &str, destination_dir: &Path) -> Result<PathBuf, PipelineError> {
        validate_url(url)?;
        std::fs::create_dir_all(destination_dir)?;

        let output = self.run(&self.download_args(url, destination_dir))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = parse_downloaded_path(&stdout).ok_or_else(|| {
            PipelineError::Fetch("Download engine did not report a file path".to_string())
        })?;

        if !path.is_file() {
            return Err(PipelineError::Fetch(format!(
                "Downloaded file not found: {}",
                path.display()
            )));
        }

        info!(url, path = %path.display(), "Downloaded source audio");
        Ok(path)
    }
}

/// Reject anything that is not an http(s) URL before spawning the tool
pub fn validate_url(url: &str) -> Result<(), PipelineError> {
    let trimmed = url.trim();
    let has_scheme = trimmed.starts_with("http://") || trimmed.starts_with("https://");
    let has_host = trimmed
        .split_once("://")
        .map(|(_, rest)| !rest.is_empty() && !rest.starts_with('/'))
        .unwrap_or(false);

    if has_scheme && has_host && !trimmed.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(PipelineError::Fetch(format!("Invalid URL: {}", url)))
    }
}

/// Parse the JSON document printed by `--dump-single-json`
pub fn parse_metadata(stdout: &[u8]) -> Result<MediaMetadata, PipelineError> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)
        .map_err(|e| PipelineError::Fetch(format!("Unreadable metadata: {}", e)))?;

    Ok(MediaMetadata {
        duration_seconds: info.duration.filter(|d| d.is_finite() && *d >= 0.0),
        title: info.title.filter(|t| !t.trim().is_empty()),
    })
}

/// Last non-empty stdout line is the final file path
pub fn parse_downloaded_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(PathBuf::from)
}

/// Prefer the tool's own `ERROR:` line over the whole stderr dump
/// Trimmed, non-empty lines of tool output, last first
///
/// Carriage returns count as line breaks, so a redrawn progress bar yields
/// only its final state.
pub(crate) fn output_lines_rev(text: &str) -> impl Iterator<Item = &str> {
    text.rsplit(|c: char| c == '\n' || c == '\r')
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

fn failure_detail(stderr: &str, code: Option<i32>) -> String {
    let error_line = output_lines_rev(stderr).find(|line| line.starts_with("ERROR"));

    match error_line {
        Some(line) => line.to_string(),
        None => match output_lines_rev(stderr).next() {
            Some(line) => format!("exit code {:?}: {}", code, line),
            None => format!("exit code {:?}", code),
        },
    }
}
