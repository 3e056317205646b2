//! itch-setup - a self-updating installer for desktop applications
//!
//! This crate installs, repairs, and upgrades a desktop application from a
//! versioned content-distribution endpoint ("broth"). It owns a per-user
//! install directory, keeps multiple versions side by side, and promotes a
//! freshly-prepared version to "current" atomically so a failed upgrade can
//! never destroy a working install.
//!
//! # Architecture Overview
//!
//! The installer is layered, leaves first:
//!
//! - [`broth`] - CDN client: channel resolution (with `arm64 -> amd64`
//!   fallback), `LATEST`, build descriptors, upgrade paths, and byte streams
//!   for signatures, patches, and archives
//! - [`signature`] - content-addressed manifests of a build directory
//! - [`heal`] - validates a directory against a signature and repairs it in
//!   place from a reference archive
//! - [`patcher`] - applies (and computes) binary patches between versions
//! - [`events`] - JSON-lines lifecycle events consumed by outer processes
//! - [`multiverse`] - the on-disk state machine: current/ready versions,
//!   staging, atomic promotion
//! - [`setup`] - the orchestrator: install, upgrade, and relaunch verbs
//!
//! # Key Properties
//!
//! - **Atomic promotion**: the previous version is renamed aside before the
//!   new one moves into place, and restored if anything fails
//! - **Cost planning**: upgrades pick the cheaper of a patch chain and a
//!   full archive download, falling back from patches to the archive once
//! - **Self-healing**: a corrupted install is repaired block by block
//!   against its signature, fetching only damaged entries from the archive
//! - **Machine-readable progress**: every lifecycle step is emitted as a
//!   tagged JSON line for the outer application to observe
//!
//! # Command-Line Usage
//!
//! ```bash
//! # First install (default verb)
//! itch-setup --appname itch
//!
//! # Check for and stage an update
//! itch-setup --appname itch --upgrade
//!
//! # Swap in a staged update once PID 1234 exits, then relaunch
//! itch-setup --appname itch --relaunch --relaunch-pid 1234
//!
//! # Remove managed files, preserving user data
//! itch-setup --appname itch --uninstall
//! ```

pub mod broth;
pub mod cli;
pub mod constants;
pub mod core;
pub mod events;
pub mod heal;
pub mod multiverse;
pub mod patcher;
pub mod setup;
pub mod signature;
pub mod utils;
