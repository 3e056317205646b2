//! Content-addressed signatures of build directories.
//!
//! A signature is an ordered manifest of the logical files in a build: path,
//! size, permission bits, and a strong SHA-256 hash per fixed-size block.
//! It is enough to decide whether a directory on disk *is* a given build,
//! file by file and block by block, and to drive the heal engine when it is
//! not. Signatures are produced by the build pipeline and served by the CDN;
//! this crate parses and re-serializes them (the install verb keeps a local
//! copy next to the build) and computes them locally only to feed the patch
//! writer and to verify healed content.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::utils::fs::safe_join;

/// One logical file in a signature, in container order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative, forward-slash path inside the build directory.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Unix permission bits; honored only on platforms that have them.
    pub mode: u32,
    /// Lowercase hex SHA-256 of each `block_size` slice, last one short.
    pub blocks: Vec<String>,
}

/// A content-addressed manifest of a build directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Block granularity the hashes were computed at.
    pub block_size: u64,
    /// Files in container order.
    pub files: Vec<FileEntry>,
}

impl Signature {
    /// Parses a signature stream.
    ///
    /// Rejects manifests that could write outside their directory or whose
    /// block list disagrees with the declared size.
    pub fn parse(reader: impl Read) -> Result<Self> {
        let sig: Signature =
            serde_json::from_reader(reader).context("failed to parse signature stream")?;
        sig.check()?;
        Ok(sig)
    }

    /// Serializes the signature for the local `signature.pws` copy.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to serialize signature")
    }

    /// Total number of content bytes the signature covers.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    fn check(&self) -> Result<()> {
        if self.block_size == 0 {
            bail!("signature has zero block size");
        }
        for entry in &self.files {
            // Paths come off the wire; never trust them.
            safe_join(Path::new("."), &entry.path)
                .with_context(|| format!("signature entry '{}'", entry.path))?;

            let expected = expected_block_count(entry.size, self.block_size);
            if entry.blocks.len() as u64 != expected {
                bail!(
                    "signature entry '{}' declares {} bytes but carries {} blocks (expected {})",
                    entry.path,
                    entry.size,
                    entry.blocks.len(),
                    expected
                );
            }
        }
        Ok(())
    }

    /// Computes the signature of a directory on disk.
    ///
    /// Files are walked in sorted relative-path order so two computations of
    /// the same tree are identical. Used by the patch writer (source block
    /// index) and by tests; production installs consume served signatures.
    pub fn compute(dir: &Path, block_size: u64) -> Result<Self> {
        if block_size == 0 {
            bail!("block size must be positive");
        }

        let mut paths = Vec::new();
        collect_files(dir, dir, &mut paths)?;
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for rel in paths {
            let abs = safe_join(dir, &rel)?;
            let metadata = std::fs::metadata(&abs)
                .with_context(|| format!("failed to stat {}", abs.display()))?;
            let file = std::fs::File::open(&abs)
                .with_context(|| format!("failed to open {}", abs.display()))?;
            let blocks = hash_blocks(file, block_size)
                .with_context(|| format!("failed to hash {}", abs.display()))?;

            files.push(FileEntry {
                path: rel,
                size: metadata.len(),
                mode: file_mode(&metadata),
                blocks,
            });
        }

        Ok(Self { block_size, files })
    }
}

/// Number of blocks a file of `size` bytes splits into (empty file: none).
#[must_use]
pub fn expected_block_count(size: u64, block_size: u64) -> u64 {
    size.div_ceil(block_size)
}

/// Hashes a stream into per-block lowercase hex SHA-256 digests.
pub fn hash_blocks(mut reader: impl Read, block_size: u64) -> Result<Vec<String>> {
    let mut blocks = Vec::new();
    let mut buf = vec![0u8; block_size as usize];

    loop {
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..]).context("read failed")?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        blocks.push(hash_block(&buf[..filled]));
        if filled < buf.len() {
            break;
        }
    }

    Ok(blocks)
}

/// Lowercase hex SHA-256 of one block.
#[must_use]
pub fn hash_block(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.mode() & 0o777
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        0o644
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .expect("walked path is under root")
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(rel);
        }
        // Symlinks are not part of the build container model.
    }
    Ok(())
}

#[cfg(test)]
mod tests;
