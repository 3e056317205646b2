//! The upgrade verb: plan, execute, fall back.
//!
//! Planning fans out over the CDN: the latest version, the patch chain
//! from the installed version (demoted to "no plan" on any miss), and the
//! archive cost for the latest build. The cheaper plan wins; ties and
//! absent patch plans go to the archive. A chosen patch plan that fails
//! mid-flight falls back to the archive exactly once. Everything lands in
//! staging and is queued as ready; promotion happens at the next relaunch.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use super::{EventScope, Installer};
use crate::broth::{BuildFileSubType, BuildFileType, ReleaseClient};
use crate::core::error::is_cancelled;
use crate::core::SetupError;
use crate::events::{self, Event};
use crate::heal::{self, ValidatorSettings};
use crate::multiverse::{BuildFolder, Multiverse};
use crate::patcher::{self, FreshBowl};
use crate::signature::Signature;
use crate::utils::progress::{EventProgress, NullSink, ScaledSink};

/// Outcome of the upgrade verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeResult {
    /// True when a new version was staged (or already was staged);
    /// false when the installed version is the latest.
    pub did_upgrade: bool,
}

#[derive(Debug, Clone)]
struct PlanStep {
    version: String,
    sub_type: BuildFileSubType,
    size: u64,
}

#[derive(Debug, Clone)]
struct PatchPlan {
    steps: Vec<PlanStep>,
    total_size: u64,
}

#[derive(Debug, Clone, Copy)]
struct ArchivePlan {
    total_size: u64,
}

pub(super) async fn run(installer: &Installer, mv: &mut Multiverse) -> Result<UpgradeResult> {
    mv.lock()?;
    let _events = EventScope::enable();

    let outcome = run_inner(installer, mv).await;
    if let Err(err) = &outcome {
        if !is_cancelled(err) {
            events::emit(&Event::UpdateFailed { message: format!("{err:#}") });
        }
    }
    outcome
}

async fn run_inner(installer: &Installer, mv: &mut Multiverse) -> Result<UpgradeResult> {
    let client = installer.client().await?;

    let (latest, current) = tokio::try_join!(client.latest_version(), async {
        anyhow::Ok(mv.current_build())
    })?;
    let current = current
        .with_context(|| format!("nothing is installed in {}", mv.base_dir().display()))?;

    info!("installed {}", current.version);
    info!("latest    {latest}");

    if current.version == latest {
        info!("we're up-to-date");
        events::emit(&Event::NoUpdateAvailable {});
        return Ok(UpgradeResult { did_upgrade: false });
    }

    if mv.has_ready_pending() && mv.ready_pending_is(&latest) {
        info!("{latest} is already staged and ready");
        events::emit(&Event::UpdateReady { version: latest });
        return Ok(UpgradeResult { did_upgrade: true });
    }

    let (patch_plan, archive_plan) = tokio::join!(
        probe_patch_plan(&client, &current.version, &latest),
        probe_archive_plan(&client, &latest),
    );
    let archive_plan = archive_plan?;

    match &patch_plan {
        Some(plan) => info!(
            "patching cost: {} bytes (in {} patches)",
            plan.total_size,
            plan.steps.len()
        ),
        None => info!("no patch-based upgrade path found"),
    }
    info!("archive  cost: {} bytes", archive_plan.total_size);

    // Archive wins ties.
    let use_patch = patch_plan
        .as_ref()
        .is_some_and(|plan| plan.total_size < archive_plan.total_size);

    if use_patch {
        let plan = patch_plan.expect("checked above");
        match execute_patch_plan(installer, mv, &client, &current, &plan, &latest).await {
            Ok(()) => return Ok(UpgradeResult { did_upgrade: true }),
            Err(err) if is_cancelled(&err) => return Err(err),
            Err(err) => {
                warn!("patching went wrong, falling back to archive: {err:#}");
            }
        }
    }

    execute_archive_plan(installer, mv, &client, &latest, archive_plan).await?;
    Ok(UpgradeResult { did_upgrade: true })
}

/// Costs the patch chain. Any miss (no path, a step without a default
/// variant, a chain that does not end at the latest version) demotes the
/// plan to `None` rather than failing the upgrade.
async fn probe_patch_plan(client: &ReleaseClient, from: &str, to: &str) -> Option<PatchPlan> {
    let path = match client.upgrade_path(from, to).await {
        Ok(path) => path,
        Err(err) => {
            warn!("while looking for upgrade path: {err:#}");
            warn!("giving up patch plan");
            return None;
        }
    };

    if path.patches.is_empty() {
        warn!("empty upgrade path, giving up patch plan");
        return None;
    }

    let chain: Vec<&str> = std::iter::once(from)
        .chain(path.patches.iter().map(|p| p.version.as_str()))
        .collect();
    info!("upgrade path: {}", chain.join(" -> "));

    if path.patches.last().map(|p| p.version.as_str()) != Some(to) {
        warn!("upgrade path does not end at {to}, giving up patch plan");
        return None;
    }

    let mut steps = Vec::with_capacity(path.patches.len());
    let mut total_size = 0u64;
    for patch in &path.patches {
        let Some(best) = patch.best_file() else {
            warn!("missing patch for version {}, giving up patch plan", patch.version);
            return None;
        };
        total_size += best.size;
        steps.push(PlanStep {
            version: patch.version.clone(),
            sub_type: best.sub_type,
            size: best.size,
        });
    }

    Some(PatchPlan { steps, total_size })
}

/// Costs the archive plan. Unlike the patch probe, a miss here is fatal:
/// with no archive there is nothing left to fall back to.
async fn probe_archive_plan(client: &ReleaseClient, version: &str) -> Result<ArchivePlan> {
    let info = client
        .build_info(version)
        .await
        .context("while looking for archive plan")?;
    let file = info
        .find_file(BuildFileType::Archive, BuildFileSubType::Default)
        .with_context(|| format!("default archive not found for version {version}"))?;
    Ok(ArchivePlan { total_size: file.size })
}

/// Applies the patch chain through staging and queues the result.
async fn execute_patch_plan(
    installer: &Installer,
    mv: &mut Multiverse,
    client: &ReleaseClient,
    current: &BuildFolder,
    plan: &PatchPlan,
    latest: &str,
) -> Result<()> {
    // A patch only makes sense on a pristine source; a corrupt install
    // would propagate its corruption into every produced version.
    prevalidate_current(installer, client, current).await?;

    let staging = mv.make_staging_folder()?;

    let steps: Vec<(String, PlanStep)> = plan
        .steps
        .iter()
        .map(|step| (client.patch_url(&step.version, step.sub_type), step.clone()))
        .collect();
    let total_size = plan.total_size;
    let input_dir = current.path.clone();
    let staging_dir = staging.clone();
    let cancel = installer.cancel.clone();

    let worker = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let http = crate::broth::download::blocking_client()?;
        let mut sink = EventProgress::new(total_size);
        let total = total_size.max(1) as f64;

        let mut input_dir = input_dir;
        let mut done: u64 = 0;
        let mut output_dir = None;
        for (url, step) in steps {
            events::emit(&Event::InstallingUpdate { version: step.version.clone() });
            info!(
                "upgrading to {} using {} patch ({} bytes)",
                step.version, step.sub_type, step.size
            );

            let stream = crate::broth::download::open_stream(&http, &url)?;
            let dest = staging_dir.join(format!("app-{}", step.version));
            let mut bowl = FreshBowl::new(dest.clone())?;
            let mut scaled =
                ScaledSink::new(&mut sink, done as f64 / total, step.size as f64 / total);

            patcher::apply(stream, step.size, &input_dir, &mut bowl, &mut scaled, &cancel)
                .map_err(|err| patch_step_error(err, &step.version))?;

            done += step.size;
            input_dir = dest.clone();
            output_dir = Some(dest);
        }
        sink.finish();
        Ok(output_dir.expect("plan has at least one step"))
    })
    .await
    .context("patch worker panicked")?;

    let queued = worker.and_then(|final_dir| {
        mv.queue_ready(BuildFolder { version: latest.to_string(), path: final_dir })
    });
    mv.clean_staging_folder();
    queued?;

    events::emit(&Event::UpdateReady { version: latest.to_string() });
    Ok(())
}

/// Validates the current install against its own signature, fail-fast.
/// A divergence here demotes the patch plan (the caller falls back).
async fn prevalidate_current(
    installer: &Installer,
    client: &ReleaseClient,
    current: &BuildFolder,
) -> Result<()> {
    let url = client.signature_url(&current.version);
    let dir = current.path.clone();
    let cancel = installer.cancel.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let http = crate::broth::download::blocking_client()?;
        let bytes = crate::broth::download::fetch_bytes(&http, &url)?;
        let sig = Signature::parse(bytes.as_slice())
            .context("failed to parse current version's signature")?;
        let settings = ValidatorSettings { fail_fast: true, heal: None, cancel };
        heal::validate(&dir, &sig, &settings, &mut NullSink)?;
        Ok(())
    })
    .await
    .context("validation worker panicked")?
}

/// Downloads and extracts the full archive into staging, then queues it.
async fn execute_archive_plan(
    installer: &Installer,
    mv: &mut Multiverse,
    client: &ReleaseClient,
    latest: &str,
    plan: ArchivePlan,
) -> Result<()> {
    events::emit(&Event::InstallingUpdate { version: latest.to_string() });

    let staging = mv.make_staging_folder()?;
    let url = client.archive_url(latest);
    let staging_dir = staging.clone();
    let version = latest.to_string();
    let cancel = installer.cancel.clone();

    let worker = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let http = crate::broth::download::blocking_client()?;
        let archive_path = staging_dir.join("archive.zip");
        let mut sink = EventProgress::new(plan.total_size);

        {
            // The download dominates; extraction is local disk work.
            let mut scaled = ScaledSink::new(&mut sink, 0.0, 0.8);
            crate::broth::download::download_to_file(
                &http,
                &url,
                &archive_path,
                plan.total_size,
                &mut scaled,
                &cancel,
            )?;
        }

        let dest = staging_dir.join(format!("app-{version}"));
        {
            let mut scaled = ScaledSink::new(&mut sink, 0.8, 0.2);
            super::archive::extract_zip(&archive_path, &dest, &mut scaled, &cancel)?;
        }
        sink.finish();
        Ok(dest)
    })
    .await
    .context("archive worker panicked")?;

    let queued = worker.and_then(|dest| {
        mv.queue_ready(BuildFolder { version: latest.to_string(), path: dest })
    });
    mv.clean_staging_folder();
    queued?;

    events::emit(&Event::UpdateReady { version: latest.to_string() });
    Ok(())
}

/// Wraps a patch-step failure for the fallback policy, letting
/// cancellation through untouched.
fn patch_step_error(err: anyhow::Error, version: &str) -> anyhow::Error {
    if is_cancelled(&err) {
        return err;
    }
    SetupError::PatchApplicationFailed {
        version: version.to_string(),
        detail: format!("{err:#}"),
    }
    .into()
}
