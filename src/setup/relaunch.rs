//! The relaunch verb: wait for the old process, promote, hand back the
//! build to launch.

use anyhow::Result;
use std::time::Instant;
use sysinfo::{Pid, System};
use tracing::{info, warn};

use super::{EventScope, Installer};
use crate::constants::{PID_POLL_INTERVAL, PID_WAIT_TIMEOUT};
use crate::core::SetupError;
use crate::events::{self, Event};
use crate::multiverse::{BuildFolder, Multiverse};

pub(super) async fn run(
    installer: &Installer,
    mv: &mut Multiverse,
    pid: u32,
) -> Result<Option<BuildFolder>> {
    mv.lock()?;
    let _events = EventScope::enable();

    wait_for_exit(installer, pid).await?;

    if mv.has_ready_pending() {
        mv.make_ready_current()?;
    }
    Ok(mv.current_build())
}

/// Polls once per second until `pid` is gone. The first observation of a
/// still-live process emits `ready-to-relaunch` exactly once, telling the
/// caller the installer is waiting on it. After the timeout the wait is
/// abandoned and promotion proceeds; a wedged old process should not hold
/// the upgrade hostage forever.
async fn wait_for_exit(installer: &Installer, pid: u32) -> Result<()> {
    info!("waiting for PID {pid} to exit");
    let deadline = Instant::now() + PID_WAIT_TIMEOUT;
    let mut system = System::new();
    let mut sent_ready = false;

    loop {
        if installer.cancel.is_cancelled() {
            return Err(SetupError::Cancelled.into());
        }

        if !system.refresh_process(Pid::from_u32(pid)) {
            info!("process {pid} exited");
            return Ok(());
        }

        if !sent_ready {
            events::emit(&Event::ReadyToRelaunch {});
            sent_ready = true;
        }

        if Instant::now() >= deadline {
            warn!("process {pid} still alive after {PID_WAIT_TIMEOUT:?}, proceeding anyway");
            return Ok(());
        }

        tokio::time::sleep(PID_POLL_INTERVAL).await;
    }
}
