//! Error taxonomy for itch-setup operations.
//!
//! Most functions return `anyhow::Result` with contextual messages. The
//! variants below exist for the failures the installer makes *decisions*
//! about:
//!
//! | Kind | Policy |
//! |------|--------|
//! | [`SetupError::Network`] | no in-stage retry; a whole failed plan may fall back once |
//! | [`SetupError::ChannelNotFound`] | fatal |
//! | [`SetupError::ValidationFailed`] | demotes the patch plan during the pre-patch check |
//! | [`SetupError::HealFailed`] | fatal (remote heal already tried) |
//! | [`SetupError::PatchApplicationFailed`] | triggers archive fallback during upgrade |
//! | [`SetupError::StateCorruption`] | promotion is rolled back; operation aborts |
//! | [`SetupError::Cancelled`] | staging cleaned; no `update-failed` emitted |
//!
//! Use [`is_cancelled`] and [`SetupError::find_in`] to recover the typed
//! kind from an `anyhow::Error` chain at policy decision points.

use thiserror::Error;

/// The strongly-typed error kinds the installer bases policy on.
#[derive(Debug, Error)]
pub enum SetupError {
    /// A CDN fetch failed: transport error, non-200 status, or a body that
    /// would not parse.
    #[error("network error for {url}: {reason}")]
    Network {
        /// The URL the request was issued against.
        url: String,
        /// Human-readable cause (status code, transport failure, parse error).
        reason: String,
    },

    /// Neither the native channel nor its fallback exists on the CDN.
    #[error("no channel found for {app_name} (tried {tried})")]
    ChannelNotFound {
        /// Application whose channels were probed.
        app_name: String,
        /// Comma-separated list of channel tags that were tried.
        tried: String,
    },

    /// A directory does not match its signature.
    #[error("validation failed for {path}: {detail}")]
    ValidationFailed {
        /// The directory that was validated.
        path: String,
        /// First divergence (fail-fast) or a wound summary.
        detail: String,
    },

    /// Healing from the reference archive did not produce matching content.
    #[error("heal failed for {path}: {detail}")]
    HealFailed {
        /// The directory that was being healed.
        path: String,
        /// What still diverges after the heal.
        detail: String,
    },

    /// A patch stream could not be applied to its source directory.
    #[error("patch application failed upgrading to {version}: {detail}")]
    PatchApplicationFailed {
        /// Version the failed patch step was producing.
        version: String,
        /// Underlying failure description.
        detail: String,
    },

    /// The multiverse state machine found disk contents disagreeing with
    /// `state.json`, or a promotion rename could not be completed.
    #[error("multiverse state corruption: {detail}")]
    StateCorruption {
        /// What disagreed.
        detail: String,
    },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,
}

impl SetupError {
    /// Walks an `anyhow` error chain looking for a `SetupError`.
    ///
    /// Context added with `.with_context(..)` wraps the typed error; this
    /// digs it back out so callers can branch on the kind.
    pub fn find_in(err: &anyhow::Error) -> Option<&SetupError> {
        err.chain().find_map(|cause| cause.downcast_ref::<SetupError>())
    }
}

/// True if the error chain bottoms out in [`SetupError::Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(SetupError::find_in(err), Some(SetupError::Cancelled))
}
