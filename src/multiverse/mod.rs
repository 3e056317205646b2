//! The multiverse: the on-disk state machine of installed versions.
//!
//! A base directory owned by the installer holds one directory per
//! installed version (`app-{version}`), a scratch `staging/` area, and a
//! `state.json` naming the *current* version (what the user runs) and an
//! optional *ready* version (staged, waiting for the next relaunch).
//!
//! Every mutation moves `(current, ready)` through a small set of
//! operations with atomic-rename semantics: a build becomes ready by being
//! renamed from staging into its `app-{version}` slot
//! ([`Multiverse::queue_ready`]), and becomes current by
//! [`Multiverse::make_ready_current`], which validates it, renames the old
//! current aside as `.old`, moves the ready directory into place, and only
//! then persists the new state. A failure at any point restores the aside
//! copy, so the worst outcome of a crashed promotion is the state before
//! it.

pub mod state;

pub use state::MultiverseState;

use anyhow::{bail, Context, Result};
use fs4::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::{
    APP_DIR_PREFIX, LOCK_FILE_NAME, PROMOTE_RETRY_COUNT, PROMOTE_RETRY_DELAY, STAGING_DIR_NAME,
    STATE_FILE_NAME,
};
use crate::core::SetupError;
use crate::utils::fs::{
    ensure_dir, remove_dir_all_quiet, remove_file_if_exists, rename_with_retry,
};
use crate::utils::platform;

/// A directory holding one installed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFolder {
    /// The version filling the directory.
    pub version: String,
    /// Absolute path of the directory.
    pub path: PathBuf,
}

/// Validation hook run on a build before it is trusted.
pub type Validator = Arc<dyn Fn(&BuildFolder) -> Result<()> + Send + Sync>;

/// Configuration of a multiverse.
#[derive(Clone)]
pub struct MultiverseParams {
    /// Application identity; names the executable and managed files.
    pub app_name: String,
    /// The per-user directory the installer owns.
    pub base_dir: PathBuf,
    /// External applications directory (macOS). When set, the *current*
    /// build lives there as `{AppName}.app` instead of under the base dir.
    pub apps_dir: Option<PathBuf>,
    /// Validation callback for promotions; default checks the executable.
    pub validator: Option<Validator>,
}

impl MultiverseParams {
    /// Standard parameters for `app_name` in `base_dir`.
    #[must_use]
    pub fn new(app_name: &str, base_dir: PathBuf) -> Self {
        Self { app_name: app_name.to_string(), base_dir, apps_dir: None, validator: None }
    }
}

/// Handle on a base directory's state machine.
pub struct Multiverse {
    params: MultiverseParams,
    state: MultiverseState,
    lock: Option<std::fs::File>,
}

impl Multiverse {
    /// Opens (creating if needed) the multiverse at `params.base_dir`.
    pub fn open(params: MultiverseParams) -> Result<Self> {
        if params.app_name.is_empty() {
            bail!("app name cannot be empty");
        }
        ensure_dir(&params.base_dir)?;
        let state = MultiverseState::load(&params.base_dir.join(STATE_FILE_NAME))?;
        debug!(
            "multiverse @ {}: current={:?} ready={:?}",
            params.base_dir.display(),
            state.current,
            state.ready
        );
        Ok(Self { params, state, lock: None })
    }

    /// Takes the single-writer advisory lock. Mutating verbs call this
    /// first; a second installer process gets a clean error instead of a
    /// corrupted base directory.
    pub fn lock(&mut self) -> Result<()> {
        if self.lock.is_some() {
            return Ok(());
        }
        let path = self.params.base_dir.join(LOCK_FILE_NAME);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "another installer is already working on {}",
                self.params.base_dir.display()
            )
        })?;
        self.lock = Some(file);
        Ok(())
    }

    /// The base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.params.base_dir
    }

    /// The persisted state.
    #[must_use]
    pub fn state(&self) -> &MultiverseState {
        &self.state
    }

    /// `{base}/app-{version}`.
    #[must_use]
    pub fn app_dir(&self, version: &str) -> PathBuf {
        self.params.base_dir.join(format!("{APP_DIR_PREFIX}{version}"))
    }

    /// Where the current build lives: the external applications directory
    /// when one is configured, the versioned slot otherwise.
    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        match &self.params.apps_dir {
            Some(apps_dir) => apps_dir.join(format!("{}.app", self.params.app_name)),
            None => self.app_dir(&self.state.current),
        }
    }

    /// The current build, or `None` when nothing is installed (or the
    /// state file names a directory that is gone from disk).
    #[must_use]
    pub fn current_build(&self) -> Option<BuildFolder> {
        if self.state.current.is_empty() {
            return None;
        }
        let path = self.current_path();
        if !path.is_dir() {
            warn!(
                "state names current version {} but {} is missing",
                self.state.current,
                path.display()
            );
            return None;
        }
        Some(BuildFolder { version: self.state.current.clone(), path })
    }

    /// Recreates `staging/` empty and returns its path. Callers pair this
    /// with [`clean_staging_folder`](Self::clean_staging_folder) on every
    /// exit path.
    pub fn make_staging_folder(&self) -> Result<PathBuf> {
        let staging = self.params.base_dir.join(STAGING_DIR_NAME);
        remove_dir_all_quiet(&staging);
        ensure_dir(&staging)?;
        Ok(staging)
    }

    /// Removes `staging/`, swallowing errors.
    pub fn clean_staging_folder(&self) {
        remove_dir_all_quiet(&self.params.base_dir.join(STAGING_DIR_NAME));
    }

    /// True iff a ready version is pending promotion.
    #[must_use]
    pub fn has_ready_pending(&self) -> bool {
        !self.state.ready.is_empty()
    }

    /// True iff the pending ready version is exactly `version`.
    #[must_use]
    pub fn ready_pending_is(&self, version: &str) -> bool {
        !version.is_empty() && self.state.ready == version
    }

    /// Moves a prepared build into its `app-{version}` slot and records it
    /// as ready. The build's path must be absolute (it normally sits in
    /// staging). State is only persisted after the move succeeded.
    pub fn queue_ready(&mut self, build: BuildFolder) -> Result<()> {
        if !build.path.is_absolute() {
            bail!("queued build path must be absolute: {}", build.path.display());
        }
        if build.version.is_empty() {
            bail!("queued build must carry a version");
        }

        let target = self.app_dir(&build.version);
        if target != build.path && target.exists() {
            std::fs::remove_dir_all(&target)
                .with_context(|| format!("failed to clear {}", target.display()))?;
        }
        if target != build.path {
            std::fs::rename(&build.path, &target).with_context(|| {
                format!("failed to move {} -> {}", build.path.display(), target.display())
            })?;
        }

        self.state.ready = build.version.clone();
        self.persist()?;
        info!("queued ready: {}", build.version);
        Ok(())
    }

    /// Promotes the pending ready version to current.
    ///
    /// Sequence: validate the ready build, rename the old current aside as
    /// `.old` (with retries on Windows sharing violations), move the ready
    /// directory into the current slot, drop the aside, persist
    /// `current = ready, ready = ""`. Any failure after the aside rename
    /// restores the aside before surfacing.
    pub fn make_ready_current(&mut self) -> Result<()> {
        if !self.has_ready_pending() {
            bail!("no ready version pending");
        }
        let ready_version = self.state.ready.clone();
        let ready_dir = self.app_dir(&ready_version);
        if !ready_dir.is_dir() {
            return Err(SetupError::StateCorruption {
                detail: format!(
                    "ready version {ready_version} has no directory at {}",
                    ready_dir.display()
                ),
            }
            .into());
        }

        let build = BuildFolder { version: ready_version.clone(), path: ready_dir.clone() };
        self.validate_build(&build)
            .with_context(|| format!("ready build {ready_version} failed validation"))?;

        // Rename the old current aside. If the state file names a current
        // that is gone from disk, recover silently and promote anyway.
        let old_current = self.current_path();
        let aside = if !self.state.current.is_empty()
            && old_current != ready_dir
            && old_current.is_dir()
        {
            let aside = append_extension(&old_current, "old");
            remove_dir_all_quiet(&aside);
            rename_with_retry(&old_current, &aside, PROMOTE_RETRY_COUNT, PROMOTE_RETRY_DELAY)
                .context("failed to move previous version aside")?;
            Some((old_current, aside))
        } else {
            None
        };

        let result = self.move_ready_into_place(&ready_version, &ready_dir);
        if let Err(err) = result {
            if let Some((original, aside)) = &aside {
                warn!("promotion failed, restoring previous version");
                if let Err(restore_err) =
                    rename_with_retry(aside, original, PROMOTE_RETRY_COUNT, PROMOTE_RETRY_DELAY)
                {
                    warn!("could not restore previous version: {restore_err:#}");
                }
            }
            return Err(SetupError::StateCorruption { detail: format!("{err:#}") }.into());
        }

        if let Some((_, aside)) = aside {
            remove_dir_all_quiet(&aside);
        }

        self.state.current = ready_version.clone();
        self.state.ready = String::new();
        self.persist()?;
        info!("promoted {ready_version} to current");
        Ok(())
    }

    fn move_ready_into_place(&self, ready_version: &str, ready_dir: &Path) -> Result<()> {
        let target = match &self.params.apps_dir {
            Some(apps_dir) => apps_dir.join(format!("{}.app", self.params.app_name)),
            None => self.app_dir(ready_version),
        };
        if target == *ready_dir {
            // The ready slot already is the current slot.
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }
        rename_with_retry(ready_dir, &target, PROMOTE_RETRY_COUNT, PROMOTE_RETRY_DELAY)
            .context("failed to move ready version into place")
    }

    /// Runs the validation callback against the current build.
    pub fn validate_current(&self) -> Result<()> {
        let build = self
            .current_build()
            .context("no current build to validate")?;
        self.validate_build(&build)
    }

    fn validate_build(&self, build: &BuildFolder) -> Result<()> {
        match &self.params.validator {
            Some(validator) => validator(build),
            None => {
                let exe = build.path.join(platform::app_executable_name(&self.params.app_name));
                if !exe.is_file() {
                    bail!("build {} is missing its executable {}", build.version, exe.display());
                }
                Ok(())
            }
        }
    }

    fn persist(&self) -> Result<()> {
        self.state.save(&self.params.base_dir.join(STATE_FILE_NAME))
    }

    /// Removes everything the installer manages from the base directory:
    /// the state and lock files, the installer's own copy, icon and
    /// launcher, every `app-*` directory, and staging. Anything else (user
    /// data) is preserved.
    ///
    /// Managed-file removal is best-effort: the setup binary copy may be
    /// the very executable running this verb and the lock file is held
    /// open, neither of which can be deleted on Windows, and a stuck file
    /// must not abort the rest of the cleanup.
    pub fn uninstall(&mut self) -> Result<()> {
        let base = &self.params.base_dir;
        let app = &self.params.app_name;

        self.clean_staging_folder();
        trash_setup_binary(base, app);

        for managed in [
            STATE_FILE_NAME.to_string(),
            LOCK_FILE_NAME.to_string(),
            format!("{app}.png"),
            format!("{app}.desktop"),
            app.clone(),
        ] {
            let path = base.join(managed);
            if let Err(err) = remove_file_if_exists(&path) {
                warn!("could not remove {}: {err:#}", path.display());
            }
        }

        let entries = std::fs::read_dir(base)
            .with_context(|| format!("failed to read {}", base.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() && name.starts_with(APP_DIR_PREFIX) {
                info!("removing {}", entry.path().display());
                std::fs::remove_dir_all(entry.path())
                    .with_context(|| format!("failed to remove {}", entry.path().display()))?;
            }
        }

        self.state = MultiverseState::default();
        Ok(())
    }
}

/// Moves the setup binary copy out of the base directory. It cannot be
/// deleted in place: it may be the executable running this uninstall, and
/// Windows refuses to delete a running binary. Renaming it into a
/// throwaway directory under the system temp dir works everywhere; if the
/// rename fails (for instance across filesystems), deletion is attempted
/// and any remaining failure is logged, never fatal.
fn trash_setup_binary(base: &Path, app: &str) {
    let binary = base.join(platform::setup_binary_name(app));
    if !binary.exists() {
        return;
    }

    let trash = std::env::temp_dir().join(format!("{app}-setup-trash-{}", std::process::id()));
    if ensure_dir(&trash).is_ok() {
        let parked = trash.join(platform::setup_binary_name(app));
        if std::fs::rename(&binary, &parked).is_ok() {
            debug!("moved {} to {}", binary.display(), parked.display());
            return;
        }
    }

    if let Err(err) = remove_file_if_exists(&binary) {
        warn!("could not remove setup binary {}: {err:#}", binary.display());
    }
}

/// `app-1.0.0` -> `app-1.0.0.old`, preserving any existing extension.
fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}
