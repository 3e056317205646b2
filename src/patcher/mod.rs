//! Binary patches between build versions: applying and computing.
//!
//! A patch turns a directory matching its *source* container into a
//! directory matching its *target* container. The stream is consumed
//! sequentially ([`apply`]); output goes through a [`Bowl`], the source
//! directory is only ever read. The companion [`diff`] computes such a
//! patch from two directories by reusing source blocks wherever their
//! hashes match, which is what makes a patch chain cheaper to ship than a
//! fresh archive.

pub mod bowl;
pub mod diff;
pub mod wire;

pub use bowl::{Bowl, FreshBowl};
pub use diff::diff;
pub use wire::{Container, ContainerFile, Op, PatchHeader};

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::SetupError;
use crate::utils::fs::safe_join;
use crate::utils::progress::ProgressSink;

/// Reader wrapper counting consumed patch bytes, for progress.
struct Counting<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> Read for Counting<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

/// Applies one patch stream.
///
/// - `patch` is consumed sequentially and `total_size` (the advertised
///   patch size) scales the progress fraction;
/// - `source_dir` must match the patch's source container and is read-only;
/// - output is poured through `bowl`, committed on success.
///
/// On failure the bowl is left uncommitted; the caller discards the staging
/// subtree.
pub fn apply(
    patch: impl Read,
    total_size: u64,
    source_dir: &Path,
    bowl: &mut dyn Bowl,
    sink: &mut dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<PatchHeader> {
    let mut patch = Counting { inner: patch, consumed: 0 };
    let total = total_size.max(1);

    wire::read_magic(&mut patch)?;
    let header = wire::read_header(&mut patch)?;
    debug!(
        "patch: {} source files -> {} target files",
        header.source.files.len(),
        header.target.files.len()
    );

    let mut source_files = SourceFiles::new(source_dir, &header.source);

    for entry in &header.target.files {
        let mut out = bowl.place_file(entry)?;
        let mut written: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(SetupError::Cancelled.into());
            }

            match wire::read_op(&mut patch)? {
                Op::End => break,
                Op::Data { length } => {
                    let copied = std::io::copy(&mut (&mut patch).take(length), &mut out)
                        .with_context(|| format!("failed to write data op for {}", entry.path))?;
                    if copied != length {
                        bail!("patch stream truncated inside data op for {}", entry.path);
                    }
                    written += length;
                }
                Op::Copy { file_index, offset, length } => {
                    let reader = source_files.range(file_index, offset, length)?;
                    let copied = std::io::copy(&mut reader.take(length), &mut out)
                        .with_context(|| format!("failed to copy range for {}", entry.path))?;
                    if copied != length {
                        bail!(
                            "source file {} shorter than copy op needs (file index {file_index})",
                            source_files.path_of(file_index)?.display()
                        );
                    }
                    written += length;
                }
            }
            sink.on_progress(patch.consumed as f64 / total as f64);
        }

        if written != entry.size {
            bail!(
                "target file {} assembled to {written} bytes, container says {}",
                entry.path,
                entry.size
            );
        }
    }

    bowl.commit()?;
    sink.on_progress(1.0);
    Ok(header)
}

/// Lazily-opened, size-checked handles on the source container's files.
struct SourceFiles<'a> {
    dir: &'a Path,
    container: &'a Container,
    open: Vec<Option<std::fs::File>>,
}

impl<'a> SourceFiles<'a> {
    fn new(dir: &'a Path, container: &'a Container) -> Self {
        let mut open = Vec::new();
        open.resize_with(container.files.len(), || None);
        Self { dir, container, open }
    }

    fn path_of(&self, file_index: u32) -> Result<PathBuf> {
        let entry = self
            .container
            .files
            .get(file_index as usize)
            .with_context(|| format!("copy op references file index {file_index} out of range"))?;
        safe_join(self.dir, &entry.path)
    }

    fn range(&mut self, file_index: u32, offset: u64, length: u64) -> Result<&mut std::fs::File> {
        use std::io::{Seek, SeekFrom};

        let entry = self
            .container
            .files
            .get(file_index as usize)
            .with_context(|| format!("copy op references file index {file_index} out of range"))?;
        if offset.checked_add(length).map_or(true, |end| end > entry.size) {
            bail!(
                "copy op range {offset}+{length} exceeds source file {} ({} bytes)",
                entry.path,
                entry.size
            );
        }

        let slot = &mut self.open[file_index as usize];
        if slot.is_none() {
            let path = safe_join(self.dir, &entry.path)?;
            let file = std::fs::File::open(&path)
                .with_context(|| format!("failed to open source file {}", path.display()))?;
            let actual = file.metadata()?.len();
            if actual != entry.size {
                bail!(
                    "source file {} is {actual} bytes, container says {}",
                    path.display(),
                    entry.size
                );
            }
            *slot = Some(file);
        }

        let file = slot.as_mut().expect("slot just filled");
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("failed to seek source file {}", entry.path))?;
        Ok(file)
    }
}
