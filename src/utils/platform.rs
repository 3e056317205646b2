//! Platform detection: channel tags, base directories, executable names.
//!
//! The CDN names its per-platform distribution channels `{os}-{arch}` using
//! Go-style tags (`darwin`, `windows`, `linux` / `amd64`, `arm64`, `386`),
//! so the Rust target tags are mapped before building URLs.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Checks if the current platform is Windows (compile-time).
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// CDN os tag for a Rust `std::env::consts::OS` value.
fn os_tag(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

/// CDN arch tag for a Rust `std::env::consts::ARCH` value.
fn arch_tag(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// The channel tag for the machine this binary runs on, e.g. `linux-amd64`.
#[must_use]
pub fn default_channel() -> String {
    channel_for(std::env::consts::OS, std::env::consts::ARCH)
}

/// The channel tag for an arbitrary (os, arch) pair.
#[must_use]
pub fn channel_for(os: &str, arch: &str) -> String {
    format!("{}-{}", os_tag(os), arch_tag(arch))
}

/// The fallback channel for platforms that can emulate another
/// architecture: macOS and Windows on arm64 fall back to `{os}-amd64`.
/// Returns `None` when no fallback applies.
#[must_use]
pub fn fallback_channel(channel: &str) -> Option<String> {
    let (os, arch) = channel.split_once('-')?;
    if arch == "arm64" && (os == "darwin" || os == "windows") {
        return Some(format!("{os}-amd64"));
    }
    None
}

/// Gets the home directory path for the current user.
pub fn get_home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// The per-user base directory the installer owns for `app_name`.
///
/// - Linux: `~/.{app}`
/// - Windows: `%LOCALAPPDATA%\{app}`
/// - macOS: `~/Library/Application Support/{app}-setup`
pub fn base_dir(app_name: &str) -> Result<PathBuf> {
    if cfg!(target_os = "windows") {
        let local = dirs::data_local_dir().context("could not determine %LOCALAPPDATA%")?;
        Ok(local.join(app_name))
    } else if cfg!(target_os = "macos") {
        let home = get_home_dir()?;
        Ok(home
            .join("Library")
            .join("Application Support")
            .join(format!("{app_name}-setup")))
    } else {
        let home = get_home_dir()?;
        Ok(home.join(format!(".{app_name}")))
    }
}

/// The file name of the application executable inside a build directory.
#[must_use]
pub fn app_executable_name(app_name: &str) -> String {
    if is_windows() {
        format!("{app_name}.exe")
    } else {
        app_name.to_string()
    }
}

/// The file name under which the installer keeps a copy of itself in the
/// base directory.
#[must_use]
pub fn setup_binary_name(app_name: &str) -> String {
    if is_windows() {
        format!("{app_name}-setup.exe")
    } else {
        format!("{app_name}-setup")
    }
}
