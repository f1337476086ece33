//! Unit tests for configuration loading and graceful degradation
//!
//! Covers:
//! - Root folder priority order (CLI → ENV → TOML → default)
//! - Missing TOML files fall back to defaults
//! - Explicit TOML paths must exist and parse
//! - Directory creation is idempotent
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.

use guitarless_common::config::{
    default_root_folder, ensure_directory, load_toml_config, LoggingConfig, RootFolderResolver,
};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

const TEST_ENV_VAR: &str = "GUITARLESS_TEST_ROOT_FOLDER";

#[derive(Debug, Default, Deserialize)]
struct SampleConfig {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_resolver_cli_argument_wins() {
    env::set_var(TEST_ENV_VAR, "/tmp/guitarless-env");

    let resolver = RootFolderResolver::new(TEST_ENV_VAR);
    let root = resolver.resolve(
        Some(Path::new("/tmp/guitarless-cli")),
        Some(Path::new("/tmp/guitarless-toml")),
    );
    assert_eq!(root, PathBuf::from("/tmp/guitarless-cli"));

    env::remove_var(TEST_ENV_VAR);
}

#[test]
#[serial]
fn test_resolver_env_var_over_toml() {
    env::set_var(TEST_ENV_VAR, "/tmp/guitarless-env");

    let resolver = RootFolderResolver::new(TEST_ENV_VAR);
    let root = resolver.resolve(None, Some(Path::new("/tmp/guitarless-toml")));
    assert_eq!(root, PathBuf::from("/tmp/guitarless-env"));

    env::remove_var(TEST_ENV_VAR);
}

#[test]
#[serial]
fn test_resolver_toml_then_default() {
    env::remove_var(TEST_ENV_VAR);

    let resolver = RootFolderResolver::new(TEST_ENV_VAR);
    assert_eq!(
        resolver.resolve(None, Some(Path::new("/tmp/guitarless-toml"))),
        PathBuf::from("/tmp/guitarless-toml")
    );
    assert_eq!(resolver.resolve(None, None), default_root_folder());
}

#[test]
fn test_default_root_folder_not_empty() {
    let root = default_root_folder();
    assert!(!root.as_os_str().is_empty());
    assert!(root.to_string_lossy().contains("guitarless"));
}

#[test]
fn test_missing_default_config_uses_defaults() {
    let config: SampleConfig =
        load_toml_config(None, "definitely-not-a-real-config-file.toml").unwrap();
    assert_eq!(config.port, None);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_explicit_missing_config_is_error() {
    let result: guitarless_common::Result<SampleConfig> =
        load_toml_config(Some(Path::new("/nonexistent/guitarless.toml")), "server.toml");
    assert!(result.is_err());
}

#[test]
fn test_explicit_config_is_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.toml");
    std::fs::write(&path, "port = 9000\n\n[logging]\nlevel = \"debug\"\n").unwrap();

    let config: SampleConfig = load_toml_config(Some(&path), "server.toml").unwrap();
    assert_eq!(config.port, Some(9000));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_invalid_toml_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.toml");
    std::fs::write(&path, "port = [not valid").unwrap();

    let result: guitarless_common::Result<SampleConfig> = load_toml_config(Some(&path), "server.toml");
    assert!(result.is_err());
}

#[test]
fn test_ensure_directory_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");

    ensure_directory(&nested).unwrap();
    ensure_directory(&nested).unwrap();
    assert!(nested.is_dir());
}

#[test]
fn test_ensure_directory_rejects_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"x").unwrap();

    assert!(ensure_directory(&file).is_err());
}
