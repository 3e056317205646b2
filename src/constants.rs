//! Global constants used throughout the itch-setup codebase.
//!
//! Timeout durations, retry parameters, and well-known file names that are
//! shared across modules. Defining them centrally keeps magic numbers
//! discoverable.

use std::time::Duration;

/// Default base URL of the broth content-distribution endpoint.
pub const DEFAULT_BROTH_BASE_URL: &str = "https://broth.itch.ovh";

/// Environment variable overriding the broth base URL.
pub const BROTH_URL_ENV: &str = "ITCH_BROTH_URL";

/// Environment variable overriding the version reported by `LATEST`.
pub const VERSION_OVERRIDE_ENV: &str = "ITCHSETUP_VERSION";

/// Name of the multiverse state file under the base directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Name of the lock file guarding mutating verbs on a base directory.
pub const LOCK_FILE_NAME: &str = ".setup-lock";

/// Name of the staging scratch directory under the base directory.
pub const STAGING_DIR_NAME: &str = "staging";

/// Prefix of per-version build directories (`app-{version}`).
pub const APP_DIR_PREFIX: &str = "app-";

/// Name of the local signature copy written into a build directory.
pub const LOCAL_SIGNATURE_NAME: &str = "signature.pws";

/// Total timeout for a single HTTP download request (5 minutes).
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for small planning requests (LATEST, info, upgrade-paths).
pub const HTTP_PLAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of retries for a failed HTTP read.
pub const HTTP_RETRIES: u32 = 3;

/// Starting delay for HTTP retry backoff (1 second), doubling per attempt.
pub const HTTP_BACKOFF_START: Duration = Duration::from_secs(1);

/// Cap on the HTTP retry backoff delay.
pub const HTTP_BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Chunk size for ranged reads against a remote archive (256 KiB).
pub const HTTP_CHUNK_SIZE: u64 = 256 * 1024;

/// Minimum interval between two emitted `progress` events.
pub const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a process to exit.
pub const PID_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Give up waiting for a process to exit after this long.
pub const PID_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Number of rename retries during promotion on Windows.
pub const PROMOTE_RETRY_COUNT: u32 = 5;

/// Delay between promotion rename retries on Windows.
pub const PROMOTE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default block size for signature hashing and patch computation (256 KiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 256 * 1024;
