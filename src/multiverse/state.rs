//! Persistence of the `(current, ready)` state document.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::SetupError;
use crate::utils::fs::atomic_write;

/// The whole of `state.json`: which version the user runs, and which one
/// is staged for the next relaunch. Empty strings mean "none".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiverseState {
    /// Version the user is meant to run.
    #[serde(default)]
    pub current: String,
    /// Prepared but not yet promoted version.
    #[serde(default)]
    pub ready: String,
}

impl MultiverseState {
    /// Reads the state file; a missing file is the empty state.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", path.display()));
            }
        };

        serde_json::from_slice(&raw).map_err(|err| {
            SetupError::StateCorruption {
                detail: format!("{} does not parse: {err}", path.display()),
            }
            .into()
        })
    }

    /// Persists the state with write-temp-then-rename, so concurrent
    /// readers see either the previous or the next document.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self).context("failed to serialize state")?;
        atomic_write(path, &json)
    }
}
