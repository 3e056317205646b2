//! JSON-lines lifecycle events.
//!
//! The installer reports progress to the outer process as one JSON object
//! per line on standard error, each shaped `{"type": T, "payload": P}`.
//! Emission is gated at process scope: the upgrade and relaunch verbs enable
//! it on entry and disable it on return, and anything emitted while disabled
//! is dropped. A process-wide mutex serializes writers so lines never
//! interleave, no matter which thread emits.
//!
//! ```text
//! {"type":"installing-update","payload":{"version":"2.0.0"}}
//! {"type":"progress","payload":{"progress":0.42,"bps":1048576.0,"eta":12.0}}
//! {"type":"update-ready","payload":{"version":"2.0.0"}}
//! ```

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Mutex;
use tracing::warn;

/// A tagged lifecycle event.
///
/// Serialized with the exact wire tags the outer application matches on;
/// the enum variant names map to kebab-case type strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    /// Informational log line routed through the machine channel.
    Log {
        /// Severity label (`info`, `warn`, ...).
        level: String,
        /// Log text.
        message: String,
    },
    /// Periodic progress during a download, heal, or patch.
    Progress {
        /// Completion fraction in `[0, 1]`, monotone per operation.
        progress: f64,
        /// Observed throughput in bytes per second.
        bps: f64,
        /// Estimated seconds remaining.
        eta: f64,
    },
    /// Emitted just before the first byte of a new version is applied.
    InstallingUpdate {
        /// Version being installed.
        version: String,
    },
    /// A new version is staged, validated, and waiting for relaunch.
    UpdateReady {
        /// The staged version.
        version: String,
    },
    /// Upgrade ran and the installed version is already the latest.
    NoUpdateAvailable {},
    /// Upgrade failed at some stage.
    UpdateFailed {
        /// Human-readable failure description.
        message: String,
    },
    /// The relaunch shim saw the old process still alive and is waiting.
    ReadyToRelaunch {},
}

struct Bus {
    enabled: bool,
    sink: Box<dyn Write + Send>,
}

static BUS: Lazy<Mutex<Bus>> = Lazy::new(|| {
    Mutex::new(Bus {
        enabled: false,
        sink: Box::new(std::io::stderr()),
    })
});

/// Enable event emission for the rest of the process (until [`disable`]).
pub fn enable() {
    BUS.lock().expect("event bus poisoned").enabled = true;
}

/// Disable event emission; subsequent [`emit`] calls are dropped.
pub fn disable() {
    BUS.lock().expect("event bus poisoned").enabled = false;
}

/// Emit one event as a JSON line, if emission is enabled.
///
/// Serialization problems are logged and swallowed; the event stream is
/// advisory and must never fail an installation.
pub fn emit(event: &Event) {
    let mut bus = BUS.lock().expect("event bus poisoned");
    if !bus.enabled {
        return;
    }

    let line = match serde_json::to_string(event) {
        Ok(line) => line,
        Err(err) => {
            warn!("could not serialize event: {err}");
            return;
        }
    };

    let _ = writeln!(bus.sink, "{line}");
    let _ = bus.sink.flush();
}

/// Swap the bus sink, returning the previous one. Test hook.
#[cfg(test)]
pub(crate) fn set_sink(sink: Box<dyn Write + Send>) -> Box<dyn Write + Send> {
    let mut bus = BUS.lock().expect("event bus poisoned");
    std::mem::replace(&mut bus.sink, sink)
}
