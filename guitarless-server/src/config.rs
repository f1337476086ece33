//! Configuration for guitarless-server
//!
//! Bootstrap settings come from the TOML file (`server.toml`), overridden by
//! command-line flags and `GUITARLESS_*` environment variables in `main.rs`.
//! Every field has a built-in default, so the service starts without a file.

use guitarless_common::config::{ensure_directory, LoggingConfig};
use guitarless_common::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TOML file name searched in the platform config directories
pub const CONFIG_FILE_NAME: &str = "server.toml";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "GUITARLESS_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// HTTP server port
    pub port: u16,

    /// Root folder for working and output directories
    ///
    /// If not specified, falls back to environment → OS default
    pub root_folder: Option<PathBuf>,

    /// Prefix for artifact URLs in responses (e.g. `https://example.org`)
    ///
    /// Unset means URLs are returned relative to this server (`/output/...`).
    pub public_base_url: Option<String>,

    /// Longest accepted source duration
    pub max_duration_seconds: u64,

    /// Largest accepted upload body
    pub max_upload_bytes: usize,

    /// Origins allowed by CORS; empty disables the CORS layer
    pub cors_allowed_origins: Vec<String>,

    /// External tool settings
    pub tools: ToolsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            root_folder: None,
            public_base_url: None,
            max_duration_seconds: 600,
            max_upload_bytes: 200 * 1024 * 1024,
            cors_allowed_origins: Vec::new(),
            tools: ToolsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_seconds)
    }
}

/// External tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Download engine executable
    pub yt_dlp_binary: String,

    /// Python interpreter with the `demucs` module installed
    pub python_binary: String,

    /// Separation model name (also the output subdirectory)
    pub separation_model: String,

    /// User agent forwarded to the download engine
    pub user_agent: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_binary: "yt-dlp".to_string(),
            python_binary: "python3".to_string(),
            separation_model: "htdemucs".to_string(),
            user_agent: None,
        }
    }
}

/// Working directories derived from the root folder
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub root: PathBuf,
    /// Fetched source audio
    pub downloads: PathBuf,
    /// Uploaded source audio
    pub uploads: PathBuf,
    /// Separation engine output root
    pub separated: PathBuf,
    /// Published artifacts, served under `/output`
    pub output: PathBuf,
}

impl PipelinePaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            downloads: root.join("downloads"),
            uploads: root.join("uploads"),
            separated: root.join("separated"),
            output: root.join("output"),
            root,
        }
    }

    /// Create every directory; safe to call repeatedly
    pub fn ensure_all(&self) -> Result<()> {
        for dir in [
            &self.root,
            &self.downloads,
            &self.uploads,
            &self.separated,
            &self.output,
        ] {
            ensure_directory(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.max_duration(), Duration::from_secs(600));
        assert_eq!(config.tools.separation_model, "htdemucs");
        assert!(config.cors_allowed_origins.is_empty());
        assert!(config.public_base_url.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 9100
            cors_allowed_origins = ["https://guitarless.example"]

            [tools]
            python_binary = "/opt/venv/bin/python"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.cors_allowed_origins.len(), 1);
        assert_eq!(config.tools.python_binary, "/opt/venv/bin/python");
        assert_eq!(config.tools.yt_dlp_binary, "yt-dlp");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_pipeline_paths_layout() {
        let paths = PipelinePaths::new("/srv/guitarless");
        assert_eq!(paths.downloads, PathBuf::from("/srv/guitarless/downloads"));
        assert_eq!(paths.uploads, PathBuf::from("/srv/guitarless/uploads"));
        assert_eq!(paths.separated, PathBuf::from("/srv/guitarless/separated"));
        assert_eq!(paths.output, PathBuf::from("/srv/guitarless/output"));
    }

    #[test]
    fn test_ensure_all_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PipelinePaths::new(dir.path().join("root"));
        paths.ensure_all().unwrap();
        assert!(paths.downloads.is_dir());
        assert!(paths.output.is_dir());
    }
}
