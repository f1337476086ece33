//! Build script for guitarless-server
//!
//! Stamps the binary with the revision it was built from, when, and how.
//! `/health` and the startup banner report these values.

use std::path::Path;
use std::process::Command;

/// Fallback for values that cannot be determined (no git, tarball build)
const UNKNOWN: &str = "unknown";

/// Trimmed stdout of a successful command
fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    // Abbreviated commit, suffixed `-dirty` when the tree has local edits
    let revision = command_stdout("git", &["describe", "--always", "--dirty", "--abbrev=8"])
        .unwrap_or_else(|| UNKNOWN.to_string());

    let built_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| UNKNOWN.to_string());

    println!("cargo:rustc-env=GIT_HASH={}", revision);
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", built_at);
    println!("cargo:rustc-env=BUILD_PROFILE={}", profile);

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    for git_file in ["../.git/HEAD", "../.git/index"] {
        if Path::new(git_file).exists() {
            println!("cargo:rerun-if-changed={}", git_file);
        }
    }
}
