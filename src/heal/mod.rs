//! Validation and in-place healing of a build directory against its
//! signature.
//!
//! Validation walks the signature in container order and checks, for each
//! file: presence, size, and every block hash. Wounds are either reported
//! (validate-only mode) or handed to the archive healer, which rewrites
//! wounded files from the build's reference zip archive and re-checks them.
//! The archive is read through `Read + Seek`, so a remote heal over HTTP
//! Range requests fetches only the entries that are actually damaged.
//!
//! Progress is a single monotone fraction: `(bytes validated + bytes
//! healed) / (signature total + wounded total)`. Validation accounts whole
//! files at a time and healing accounts bytes as they are rewritten; the
//! denominator only grows in the same step as an equal numerator growth,
//! so the fraction never moves backward and reaches 1.0 when the last
//! wound closes.

pub mod source;

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::SetupError;
use crate::signature::{hash_block, hash_blocks, FileEntry, Signature};
use crate::utils::fs::{ensure_dir, safe_join, set_executable};
use crate::utils::progress::ProgressSink;
use source::ReadSeek;

/// Where healing bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealSource {
    /// A zip archive of the target build, local path or http(s) URL.
    Archive(String),
}

impl HealSource {
    /// Parses a heal path of the form `archive,{location}`.
    pub fn parse(heal_path: &str) -> Result<Self> {
        match heal_path.split_once(',') {
            Some(("archive", location)) if !location.is_empty() => {
                Ok(Self::Archive(location.to_string()))
            }
            _ => bail!("unsupported heal path: {heal_path}"),
        }
    }
}

/// Settings for one validation run.
pub struct ValidatorSettings {
    /// Stop at the first divergence instead of enumerating all wounds.
    /// Only meaningful without a heal source.
    pub fail_fast: bool,
    /// When set, wounds are healed instead of reported.
    pub heal: Option<HealSource>,
    /// Cooperative cancellation, checked at I/O boundaries.
    pub cancel: CancellationToken,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self { fail_fast: false, heal: None, cancel: CancellationToken::new() }
    }
}

/// Outcome of a validation (and heal) run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HealStats {
    /// Number of files that diverged from the signature.
    pub wounded_files: usize,
    /// Bytes rewritten from the heal source.
    pub bytes_healed: u64,
}

#[derive(Debug)]
struct Wound {
    file_index: usize,
    detail: String,
}

struct ProgressState<'a> {
    validated: u64,
    healed: u64,
    wounded: u64,
    total: u64,
    sink: &'a mut dyn ProgressSink,
}

impl ProgressState<'_> {
    fn push(&mut self) {
        let denominator = (self.total + self.wounded).max(1) as f64;
        self.sink.on_progress((self.validated + self.healed) as f64 / denominator);
    }
}

/// Validates `dir` against `sig`, healing wounds when a heal source is
/// configured.
///
/// Returns the run's [`HealStats`] on success. Validate-only failures are
/// [`SetupError::ValidationFailed`]; a wound the heal source cannot close is
/// [`SetupError::HealFailed`].
pub fn validate(
    dir: &Path,
    sig: &Signature,
    settings: &ValidatorSettings,
    sink: &mut dyn ProgressSink,
) -> Result<HealStats> {
    let mut progress = ProgressState {
        validated: 0,
        healed: 0,
        wounded: 0,
        total: sig.total_size(),
        sink,
    };

    let mut wounds = Vec::new();
    for (file_index, entry) in sig.files.iter().enumerate() {
        if settings.cancel.is_cancelled() {
            return Err(SetupError::Cancelled.into());
        }

        let wound = check_file(dir, sig, entry, &settings.cancel)?;
        // Progress accounting is atomic per file: `validated` always grows
        // by the full entry size, and on a wound `wounded` grows by the
        // same amount in the same step, so the fraction cannot regress no
        // matter which block diverged.
        progress.validated += entry.size;
        if let Some(detail) = wound {
            if settings.fail_fast && settings.heal.is_none() {
                return Err(SetupError::ValidationFailed {
                    path: dir.display().to_string(),
                    detail,
                }
                .into());
            }
            progress.wounded += entry.size;
            wounds.push(Wound { file_index, detail });
        }
        progress.push();
    }

    if wounds.is_empty() {
        debug!("{} matches its signature", dir.display());
        return Ok(HealStats::default());
    }

    let Some(heal) = &settings.heal else {
        return Err(SetupError::ValidationFailed {
            path: dir.display().to_string(),
            detail: summarize_wounds(&wounds),
        }
        .into());
    };

    info!(
        "{}: {} of {} files need healing",
        dir.display(),
        wounds.len(),
        sig.files.len()
    );
    let bytes_healed = heal_wounds(dir, sig, &wounds, heal, &settings.cancel, &mut progress)?;

    Ok(HealStats { wounded_files: wounds.len(), bytes_healed })
}

/// Checks one file; returns a wound description, or `None` when it
/// matches. Hashing stops at the first divergent block; progress
/// bookkeeping belongs to the caller.
fn check_file(
    dir: &Path,
    sig: &Signature,
    entry: &FileEntry,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    let path = safe_join(dir, &entry.path)?;

    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Some(format!("{}: missing", entry.path)));
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat {}", path.display()));
        }
    };

    if metadata.len() != entry.size {
        return Ok(Some(format!(
            "{}: size is {}, expected {}",
            entry.path,
            metadata.len(),
            entry.size
        )));
    }

    let mut file = std::fs::File::open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut buf = vec![0u8; sig.block_size as usize];
    for (block_index, expected) in entry.blocks.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(SetupError::Cancelled.into());
        }

        let want = block_len(entry.size, sig.block_size, block_index);
        file.read_exact(&mut buf[..want])
            .with_context(|| format!("failed to read {}", path.display()))?;

        if hash_block(&buf[..want]) != *expected {
            return Ok(Some(format!("{}: block {} differs", entry.path, block_index)));
        }
    }

    Ok(None)
}

fn heal_wounds(
    dir: &Path,
    sig: &Signature,
    wounds: &[Wound],
    heal: &HealSource,
    cancel: &CancellationToken,
    progress: &mut ProgressState<'_>,
) -> Result<u64> {
    let HealSource::Archive(location) = heal;
    let reader = open_archive_source(location)?;
    let mut archive = zip::ZipArchive::new(reader)
        .with_context(|| format!("failed to open reference archive: {location}"))?;

    let mut bytes_healed = 0u64;
    for wound in wounds {
        if cancel.is_cancelled() {
            return Err(SetupError::Cancelled.into());
        }

        let entry = &sig.files[wound.file_index];
        debug!("healing {} ({})", entry.path, wound.detail);

        let mut zipped = match archive.by_name(&entry.path) {
            Ok(zipped) => zipped,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(SetupError::HealFailed {
                    path: dir.display().to_string(),
                    detail: format!("archive has no entry for {}", entry.path),
                }
                .into());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read archive entry {}", entry.path));
            }
        };

        let target = safe_join(dir, &entry.path)?;
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }

        let mut out = std::fs::File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            if cancel.is_cancelled() {
                return Err(SetupError::Cancelled.into());
            }
            let n = zipped
                .read(&mut buf)
                .with_context(|| format!("failed reading archive entry {}", entry.path))?;
            if n == 0 {
                break;
            }
            std::io::Write::write_all(&mut out, &buf[..n])
                .with_context(|| format!("failed to write {}", target.display()))?;
            bytes_healed += n as u64;
            progress.healed += n as u64;
            progress.push();
        }
        drop(out);
        set_executable(&target, entry.mode)?;

        verify_healed(&target, sig, entry, dir)?;
    }

    info!("healed {bytes_healed} bytes into {}", dir.display());
    Ok(bytes_healed)
}

/// A healed file must now match its signature entry exactly.
fn verify_healed(target: &Path, sig: &Signature, entry: &FileEntry, dir: &Path) -> Result<()> {
    let failed = |detail: String| SetupError::HealFailed { path: dir.display().to_string(), detail };

    let metadata = std::fs::metadata(target)
        .with_context(|| format!("failed to stat healed file {}", target.display()))?;
    if metadata.len() != entry.size {
        return Err(failed(format!(
            "{}: healed to {} bytes, expected {}",
            entry.path,
            metadata.len(),
            entry.size
        ))
        .into());
    }

    let file = std::fs::File::open(target)
        .with_context(|| format!("failed to open healed file {}", target.display()))?;
    let blocks = hash_blocks(file, sig.block_size)?;
    if blocks != entry.blocks {
        warn!("heal produced divergent content for {}", entry.path);
        return Err(failed(format!("{}: content differs after heal", entry.path)).into());
    }
    Ok(())
}

fn open_archive_source(location: &str) -> Result<Box<dyn ReadSeek>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let client = crate::broth::download::blocking_client()?;
        let source = source::HttpSource::open(client, location.to_string())?;
        Ok(Box::new(source))
    } else {
        let file = std::fs::File::open(location)
            .with_context(|| format!("failed to open local archive {location}"))?;
        Ok(Box::new(file))
    }
}

fn summarize_wounds(wounds: &[Wound]) -> String {
    let mut details: Vec<&str> = wounds.iter().take(5).map(|w| w.detail.as_str()).collect();
    if wounds.len() > details.len() {
        details.push("...");
    }
    format!("{} wound(s): {}", wounds.len(), details.join("; "))
}

fn block_len(size: u64, block_size: u64, block_index: usize) -> usize {
    let start = block_index as u64 * block_size;
    (size - start).min(block_size) as usize
}
