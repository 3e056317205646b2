//! The bowl: where the patcher pours its output.
//!
//! The patcher never touches the output directory directly. It asks its
//! bowl for a sink per logical file, writes the file's bytes, and calls
//! [`Bowl::commit`] once the whole container has been poured. A
//! [`FreshBowl`] writes straight into an (empty) output directory and its
//! commit just finalizes permissions; other placements (in-place with
//! backup, overlay) can implement the same trait without the patcher
//! changing.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;

use super::wire::ContainerFile;
use crate::utils::fs::{ensure_dir, safe_join, set_executable};

/// An insertable output sink for the patcher.
pub trait Bowl: Send {
    /// Opens a sink for one logical file. The patcher writes exactly
    /// `entry.size` bytes and drops the sink before asking for the next.
    fn place_file(&mut self, entry: &ContainerFile) -> Result<Box<dyn Write + Send>>;

    /// Finalizes the poured output atomically with respect to readers of
    /// the output directory.
    fn commit(&mut self) -> Result<()>;
}

/// A bowl that writes each file directly under a fresh output directory.
pub struct FreshBowl {
    output_dir: PathBuf,
    placed: Vec<(PathBuf, u32)>,
    committed: bool,
}

impl FreshBowl {
    /// Creates a bowl over `output_dir`, creating it empty.
    pub fn new(output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() && std::fs::read_dir(&output_dir)?.next().is_some() {
            bail!("fresh bowl output is not empty: {}", output_dir.display());
        }
        ensure_dir(&output_dir)?;
        Ok(Self { output_dir, placed: Vec::new(), committed: false })
    }
}

impl Bowl for FreshBowl {
    fn place_file(&mut self, entry: &ContainerFile) -> Result<Box<dyn Write + Send>> {
        let path = safe_join(&self.output_dir, &entry.path)?;
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        self.placed.push((path, entry.mode));
        Ok(Box::new(file))
    }

    fn commit(&mut self) -> Result<()> {
        if self.committed {
            bail!("bowl already committed");
        }
        for (path, mode) in &self.placed {
            set_executable(path, *mode)?;
        }
        self.committed = true;
        Ok(())
    }
}
