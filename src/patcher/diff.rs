//! Computing a patch between two build directories.
//!
//! The writer hashes the source directory at block granularity, then walks
//! the target directory block by block: a block whose hash exists in the
//! source becomes a copy op, anything else becomes inline data. Adjacent
//! ops of the same kind are coalesced, so an unchanged file collapses to a
//! single copy op and a new file to a single data op.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

use super::wire::{self, Container, ContainerFile, Op, PatchHeader};
use crate::signature::{hash_block, Signature};
use crate::utils::fs::safe_join;

/// Computes a patch stream turning `source_dir` into `target_dir`.
pub fn diff(
    source_dir: &Path,
    target_dir: &Path,
    block_size: u64,
    out: &mut dyn Write,
) -> Result<()> {
    let source_sig = Signature::compute(source_dir, block_size)
        .context("failed to hash source directory")?;
    let target_sig = Signature::compute(target_dir, block_size)
        .context("failed to hash target directory")?;

    // First occurrence of each source block hash wins.
    let mut index: HashMap<&str, (u32, u64, u64)> = HashMap::new();
    for (file_index, entry) in source_sig.files.iter().enumerate() {
        for (block_index, hash) in entry.blocks.iter().enumerate() {
            let offset = block_index as u64 * block_size;
            let length = (entry.size - offset).min(block_size);
            index
                .entry(hash.as_str())
                .or_insert((file_index as u32, offset, length));
        }
    }

    let header = PatchHeader {
        block_size,
        source: container_of(&source_sig),
        target: container_of(&target_sig),
    };
    wire::write_magic(out)?;
    wire::write_header(out, &header)?;

    for entry in &target_sig.files {
        let path = safe_join(target_dir, &entry.path)?;
        let mut file = std::fs::File::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut pending_data: Vec<u8> = Vec::new();
        let mut pending_copy: Option<(u32, u64, u64)> = None;
        let mut buf = vec![0u8; block_size as usize];
        let mut remaining = entry.size;

        while remaining > 0 {
            let want = remaining.min(block_size) as usize;
            file.read_exact(&mut buf[..want])
                .with_context(|| format!("failed to read {}", path.display()))?;
            remaining -= want as u64;
            let block = &buf[..want];

            match index.get(hash_block(block).as_str()) {
                // Only whole-block matches are reusable; a short tail
                // block matches only another short tail of the same size.
                Some(&(file_index, offset, length)) if length == want as u64 => {
                    flush_data(out, &mut pending_data)?;
                    pending_copy = match pending_copy {
                        Some((pf, po, pl))
                            if pf == file_index && po + pl == offset =>
                        {
                            Some((pf, po, pl + length))
                        }
                        Some(previous) => {
                            write_copy(out, previous)?;
                            Some((file_index, offset, length))
                        }
                        None => Some((file_index, offset, length)),
                    };
                }
                _ => {
                    if let Some(previous) = pending_copy.take() {
                        write_copy(out, previous)?;
                    }
                    pending_data.extend_from_slice(block);
                }
            }
        }

        if let Some(previous) = pending_copy.take() {
            write_copy(out, previous)?;
        }
        flush_data(out, &mut pending_data)?;
        wire::write_op(out, &Op::End)?;
    }

    debug!(
        "computed patch: {} -> {} files",
        header.source.files.len(),
        header.target.files.len()
    );
    Ok(())
}

fn container_of(sig: &Signature) -> Container {
    Container {
        files: sig
            .files
            .iter()
            .map(|f| ContainerFile { path: f.path.clone(), size: f.size, mode: f.mode })
            .collect(),
    }
}

fn flush_data(out: &mut dyn Write, pending: &mut Vec<u8>) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    wire::write_op(out, &Op::Data { length: pending.len() as u64 })?;
    out.write_all(pending).context("failed to write data op payload")?;
    pending.clear();
    Ok(())
}

fn write_copy(out: &mut dyn Write, (file_index, offset, length): (u32, u64, u64)) -> Result<()> {
    wire::write_op(out, &Op::Copy { file_index, offset, length })
}
