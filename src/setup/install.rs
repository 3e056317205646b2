//! The install verb.
//!
//! Install is a heal from nothing: fetch the latest version's signature,
//! then let the heal engine materialize every file from the build archive.
//! When the latest version is already current, the same machinery heals it
//! in place (a self-repair); otherwise the build is assembled in staging
//! and promoted through the multiverse. Either way, a half-written
//! directory is never left in an `app-{version}` slot.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use super::{InstallSource, Installer};
use crate::constants::LOCAL_SIGNATURE_NAME;
use crate::heal::{self, HealSource, ValidatorSettings};
use crate::multiverse::{BuildFolder, Multiverse};
use crate::signature::Signature;
use crate::utils::fs::{atomic_write, ensure_dir};
use crate::utils::progress::EventProgress;

pub(super) async fn run(installer: &Installer, mv: &mut Multiverse) -> Result<()> {
    mv.lock()?;
    let client = installer.client().await?;
    let version = client.latest_version().await?;
    info!("will install version {version}");

    if let Some(on_source) = &installer.settings.on_source {
        on_source(&InstallSource { version: version.clone() });
    }

    let current = mv.current_build();
    let heal_in_place = current.as_ref().is_some_and(|build| build.version == version);

    let target_dir: PathBuf;
    let staged: bool;
    if heal_in_place {
        let build = current.expect("checked above");
        info!("healing {} in place at {}", version, build.path.display());
        target_dir = build.path;
        staged = false;
    } else {
        let staging = mv.make_staging_folder()?;
        target_dir = staging.join(format!("app-{version}"));
        staged = true;
    }

    let result = heal_build(installer, &client, &version, target_dir.clone()).await;

    let result = result.and_then(|()| {
        if staged {
            mv.queue_ready(BuildFolder { version: version.clone(), path: target_dir.clone() })?;
            mv.make_ready_current()?;
        } else {
            mv.validate_current()?;
        }
        Ok(())
    });

    // Staging is cleaned on every exit path, success or failure.
    if staged {
        mv.clean_staging_folder();
    }
    result.with_context(|| format!("failed to install version {version}"))
}

/// Fetches and parses the signature, heals `target_dir` against the build
/// archive, and drops a local signature copy next to the build.
async fn heal_build(
    installer: &Installer,
    client: &crate::broth::ReleaseClient,
    version: &str,
    target_dir: PathBuf,
) -> Result<()> {
    let signature_url = client.signature_url(version);
    let archive_url = client.archive_url(version);
    let cancel = installer.cancel.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let http = crate::broth::download::blocking_client()?;
        let sig_bytes = crate::broth::download::fetch_bytes(&http, &signature_url)?;
        let sig = Signature::parse(sig_bytes.as_slice())
            .context("failed to parse remote signature")?;

        ensure_dir(&target_dir)?;
        let settings = ValidatorSettings {
            fail_fast: false,
            heal: Some(HealSource::Archive(archive_url)),
            cancel,
        };
        let mut sink = EventProgress::new(sig.total_size());
        heal::validate(&target_dir, &sig, &settings, &mut sink)?;
        sink.finish();

        atomic_write(&target_dir.join(LOCAL_SIGNATURE_NAME), &sig_bytes)
            .context("failed to write local signature copy")?;
        Ok(())
    })
    .await
    .context("install worker panicked")?
}
