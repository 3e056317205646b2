//! The installer/upgrader: orchestrates the release client, heal engine,
//! patcher, event bus, and multiverse into the three verbs.
//!
//! - [`Installer::install`] - first install, or self-heal of the current
//!   version in place
//! - [`Installer::upgrade`] - plan the cheaper of patch chain vs archive,
//!   execute it into staging, and queue the result as ready
//! - [`Installer::relaunch`] - wait for the running application to exit,
//!   then promote the pending ready version
//!
//! Planning happens on the async runtime (small JSON fetches, fanned out
//! concurrently); byte-stream execution runs on blocking worker threads.
//! Cancellation is cooperative through a shared token, observed at every
//! I/O boundary.

mod archive;
mod install;
mod relaunch;
mod upgrade;

pub use upgrade::UpgradeResult;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::broth::{BrothParams, ReleaseClient};
use crate::multiverse::{BuildFolder, Multiverse};

/// What the installer is about to install; handed to the platform layer
/// for display before bytes start moving.
#[derive(Debug, Clone)]
pub struct InstallSource {
    /// The version that will be fetched.
    pub version: String,
}

/// Hook invoked with the resolved [`InstallSource`].
pub type SourceHandler = Box<dyn Fn(&InstallSource) + Send + Sync>;

/// Configuration of an [`Installer`].
pub struct InstallerSettings {
    /// Logical application identity (CDN paths, executable names).
    pub app_name: String,
    /// Disable the `arm64 -> amd64` channel fallback.
    pub no_fallback: bool,
    /// Optional hook observing the resolved install source.
    pub on_source: Option<SourceHandler>,
}

impl InstallerSettings {
    /// Plain settings for `app_name`.
    #[must_use]
    pub fn new(app_name: &str) -> Self {
        Self { app_name: app_name.to_string(), no_fallback: false, on_source: None }
    }
}

/// The verb orchestrator.
pub struct Installer {
    settings: InstallerSettings,
    cancel: CancellationToken,
}

impl Installer {
    /// Creates an installer with a fresh cancellation token.
    #[must_use]
    pub fn new(settings: InstallerSettings) -> Self {
        Self { settings, cancel: CancellationToken::new() }
    }

    /// A clone of the cancellation token; cancelling it stops any running
    /// verb at its next I/O boundary.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn client(&self) -> Result<ReleaseClient> {
        ReleaseClient::resolve(BrothParams::for_app(
            &self.settings.app_name,
            self.settings.no_fallback,
        ))
        .await
    }

    /// Installs (or heals) the latest version. See [`install`].
    pub async fn install(&self, mv: &mut Multiverse) -> Result<()> {
        install::run(self, mv).await
    }

    /// Checks for and stages an update. See [`upgrade`].
    pub async fn upgrade(&self, mv: &mut Multiverse) -> Result<UpgradeResult> {
        upgrade::run(self, mv).await
    }

    /// Waits for `pid` to exit, then promotes any pending ready version.
    /// Returns the build to relaunch, if any is installed.
    pub async fn relaunch(&self, mv: &mut Multiverse, pid: u32) -> Result<Option<BuildFolder>> {
        relaunch::run(self, mv, pid).await
    }
}

/// Enables the event bus for the lifetime of the guard.
struct EventScope;

impl EventScope {
    fn enable() -> Self {
        crate::events::enable();
        Self
    }
}

impl Drop for EventScope {
    fn drop(&mut self) {
        crate::events::disable();
    }
}
