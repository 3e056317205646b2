//! Zip extraction for the archive upgrade plan.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::SetupError;
use crate::utils::fs::{ensure_dir, safe_join, set_executable};
use crate::utils::progress::ProgressSink;

/// Extracts a downloaded build archive into `dest_dir`, reporting progress
/// by uncompressed bytes.
pub fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
    sink: &mut dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<()> {
    let file = std::fs::File::open(archive_path)
        .with_context(|| format!("failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("failed to read archive {}", archive_path.display()))?;

    let total: u64 = (0..archive.len())
        .map(|i| archive.by_index(i).map(|e| e.size()).unwrap_or(0))
        .sum();
    let total = total.max(1);

    ensure_dir(dest_dir)?;
    let mut done: u64 = 0;
    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(SetupError::Cancelled.into());
        }

        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if name.ends_with('/') {
            ensure_dir(&safe_join(dest_dir, name.trim_end_matches('/'))?)?;
            continue;
        }

        let target = safe_join(dest_dir, &name)
            .with_context(|| format!("archive entry '{name}'"))?;
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
            let n = entry
                .read(&mut buf)
                .with_context(|| format!("failed reading archive entry {name}"))?;
            if n == 0 {
                break;
            }
            std::io::Write::write_all(&mut out, &buf[..n])
                .with_context(|| format!("failed to write {}", target.display()))?;
            done += n as u64;
            sink.on_progress(done as f64 / total as f64);
        }
        drop(out);

        if let Some(mode) = entry.unix_mode() {
            set_executable(&target, mode & 0o777)?;
        }
    }

    debug!("extracted {done} bytes into {}", dest_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::progress::NullSink;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_zip(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            for (name, content, mode) in entries {
                let options = zip::write::FileOptions::default().unix_permissions(*mode);
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_extracts_tree_with_modes() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("build.zip");
        std::fs::write(
            &archive,
            make_zip(&[
                ("itch", b"#!/bin/sh\n", 0o755),
                ("data/readme.txt", b"hello", 0o644),
            ]),
        )
        .unwrap();

        let dest = temp.path().join("out");
        extract_zip(&archive, &dest, &mut NullSink, &CancellationToken::new()).unwrap();

        assert_eq!(std::fs::read(dest.join("itch")).unwrap(), b"#!/bin/sh\n");
        assert_eq!(std::fs::read(dest.join("data/readme.txt")).unwrap(), b"hello");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("itch")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_rejects_traversal_entries() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.zip");
        std::fs::write(&archive, make_zip(&[("../escape", b"x", 0o644)])).unwrap();

        let dest = temp.path().join("out");
        let err =
            extract_zip(&archive, &dest, &mut NullSink, &CancellationToken::new()).unwrap_err();
        assert!(err.to_string().contains("escape"), "{err:#}");
    }
}
