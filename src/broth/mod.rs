//! Client for the broth content-distribution endpoint.
//!
//! broth lays builds out as `/{app}/{channel}/...` where the channel is an
//! `{os}-{arch}` tag. The client answers the installer's planning questions
//! (latest version, build contents, upgrade paths) over small JSON/text
//! endpoints and hands out URLs for the byte streams (signature, archive,
//! patch) that the workers fetch with the blocking HTTP client.
//!
//! Channel resolution happens once, before anything else: a `HEAD` on the
//! channel's `LATEST`. A 404 on an arm64 macOS or Windows channel falls
//! back to the `amd64` channel exactly once (those hosts can emulate), and
//! any other miss is [`SetupError::ChannelNotFound`].
//!
//! Every request carries a `downloadSessionId` query parameter fixed for
//! the lifetime of the process, so the CDN can correlate one installer run
//! server-side.
//!
//! This layer does not retry; retry policy belongs to the byte-stream
//! helpers in [`download`] and to the installer's plan fallback.

pub mod download;
mod types;

pub use types::{BuildFile, BuildFileSubType, BuildFileType, BuildInfo, PatchDescriptor, PatchFile, UpgradePath};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::constants::{
    BROTH_URL_ENV, DEFAULT_BROTH_BASE_URL, HTTP_PLAN_TIMEOUT, VERSION_OVERRIDE_ENV,
};
use crate::core::SetupError;
use crate::utils::platform;

/// One download session id per installer process.
static SESSION_ID: Lazy<String> = Lazy::new(|| uuid::Uuid::new_v4().to_string());

/// The base URL to use: `ITCH_BROTH_URL` override or the production default.
#[must_use]
pub fn base_url() -> String {
    match std::env::var(BROTH_URL_ENV) {
        Ok(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
        _ => DEFAULT_BROTH_BASE_URL.to_string(),
    }
}

/// Appends the process-wide `downloadSessionId` to a URL.
#[must_use]
pub fn with_session_id(url: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}downloadSessionId={}", *SESSION_ID)
}

/// Connection parameters for [`ReleaseClient::resolve`].
#[derive(Debug, Clone)]
pub struct BrothParams {
    /// Logical application identity used in CDN paths.
    pub app_name: String,
    /// Base URL, normally [`base_url`].
    pub base_url: String,
    /// Channel tag to try first, normally [`platform::default_channel`].
    pub channel: String,
    /// Disable the `arm64 -> amd64` fallback.
    pub no_fallback: bool,
}

impl BrothParams {
    /// Parameters for this machine and `app_name`.
    #[must_use]
    pub fn for_app(app_name: &str, no_fallback: bool) -> Self {
        Self {
            app_name: app_name.to_string(),
            base_url: base_url(),
            channel: platform::default_channel(),
            no_fallback,
        }
    }
}

/// A resolved client for one `{app}/{channel}` package.
#[derive(Debug)]
pub struct ReleaseClient {
    http: reqwest::Client,
    base_url: String,
    app_name: String,
    channel: String,
}

impl ReleaseClient {
    /// Resolves the channel (with at most one fallback) and returns a
    /// client bound to it.
    pub async fn resolve(params: BrothParams) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_PLAN_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        let mut tried = Vec::new();
        let mut channel = params.channel.clone();

        loop {
            let url = format!(
                "{}/{}/{}/LATEST",
                params.base_url, params.app_name, channel
            );
            debug!("probing channel: HEAD {url}");
            let status = http
                .head(with_session_id(&url))
                .send()
                .await
                .map_err(|err| SetupError::Network { url: url.clone(), reason: err.to_string() })?
                .status();

            if status.is_success() {
                info!("resolved channel {channel}");
                return Ok(Self {
                    http,
                    base_url: params.base_url,
                    app_name: params.app_name,
                    channel,
                });
            }

            if status.as_u16() != 404 {
                return Err(SetupError::Network {
                    url,
                    reason: format!("HTTP {status}"),
                }
                .into());
            }

            tried.push(channel.clone());
            match platform::fallback_channel(&channel) {
                Some(fallback) if !params.no_fallback && !tried.contains(&fallback) => {
                    warn!("channel {channel} not found, falling back to {fallback}");
                    channel = fallback;
                }
                _ => {
                    return Err(SetupError::ChannelNotFound {
                        app_name: params.app_name,
                        tried: tried.join(", "),
                    }
                    .into());
                }
            }
        }
    }

    /// The resolved channel tag.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// `{base}/{app}/{channel}`.
    #[must_use]
    pub fn package_url(&self) -> String {
        format!("{}/{}/{}", self.base_url, self.app_name, self.channel)
    }

    fn url(&self, subpath: &str) -> String {
        with_session_id(&format!(
            "{}/{}",
            self.package_url(),
            subpath.trim_matches('/')
        ))
    }

    async fn get_string(&self, subpath: &str) -> Result<String> {
        let url = self.url(subpath);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| SetupError::Network { url: url.clone(), reason: err.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SetupError::Network { url, reason: format!("HTTP {status}") }.into());
        }

        let body = response
            .text()
            .await
            .map_err(|err| SetupError::Network { url, reason: err.to_string() })?;
        Ok(body.trim().to_string())
    }

    async fn get_json<T: DeserializeOwned>(&self, subpath: &str) -> Result<T> {
        let url = self.url(subpath);
        let body = self.get_string(subpath).await?;
        serde_json::from_str(&body)
            .map_err(|err| SetupError::Network { url, reason: format!("bad JSON: {err}") }.into())
    }

    /// The latest approved version on this channel.
    ///
    /// `ITCHSETUP_VERSION` in the environment overrides the CDN, for
    /// testing and pinning.
    pub async fn latest_version(&self) -> Result<String> {
        if let Ok(pinned) = std::env::var(VERSION_OVERRIDE_ENV) {
            let pinned = pinned.trim().to_string();
            if !pinned.is_empty() {
                info!("version overridden by environment: {pinned}");
                return Ok(pinned);
            }
        }
        self.get_string("LATEST").await
    }

    /// The build descriptor for `version`.
    pub async fn build_info(&self, version: &str) -> Result<BuildInfo> {
        self.get_json(&format!("{version}/info")).await
    }

    /// The patch chain bridging `from_version` to `to_version`.
    pub async fn upgrade_path(&self, from_version: &str, to_version: &str) -> Result<UpgradePath> {
        self.get_json(&format!("upgrade-paths/{from_version}/{to_version}"))
            .await
    }

    /// URL of the signature stream for `version`.
    #[must_use]
    pub fn signature_url(&self, version: &str) -> String {
        self.url(&format!("{version}/signature/default"))
    }

    /// URL of the zip archive for `version`.
    #[must_use]
    pub fn archive_url(&self, version: &str) -> String {
        self.url(&format!("{version}/archive/default"))
    }

    /// URL of a patch stream for `version` in the given sub-type.
    #[must_use]
    pub fn patch_url(&self, version: &str, sub_type: BuildFileSubType) -> String {
        self.url(&format!("{version}/patch/{sub_type}"))
    }
}
