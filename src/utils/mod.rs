//! Cross-platform utilities: file system helpers, platform detection,
//! retry backoff, progress tracking, and the process-wide hold-open shim.

pub mod backoff;
pub mod fs;
pub mod platform;
pub mod progress;
pub mod shim;
