//! Blocking byte-stream helpers for signature, patch, and archive fetches.
//!
//! The big transfers run on worker threads (`spawn_blocking`), so they use
//! reqwest's blocking client. A failed read is retried as a whole request
//! with exponential backoff, on transport errors and 5xx only; a 4xx is a
//! real answer and surfaces immediately as a network error.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::{HTTP_RETRIES, HTTP_TIMEOUT};
use crate::core::SetupError;
use crate::utils::backoff;
use crate::utils::progress::ProgressSink;

/// Builds the blocking client used by download workers.
pub fn blocking_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build blocking HTTP client")
}

/// An open response body with its declared length.
pub struct ByteStream {
    /// Value of `Content-Length`, if the server sent one.
    pub content_length: Option<u64>,
    response: reqwest::blocking::Response,
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.response.read(buf)
    }
}

/// Opens a streaming GET, retrying the request itself on transient failure.
pub fn open_stream(client: &reqwest::blocking::Client, url: &str) -> Result<ByteStream> {
    let response = get_with_retry(client, url)?;
    Ok(ByteStream { content_length: response.content_length(), response })
}

/// Fetches a whole body into memory, with retries.
pub fn fetch_bytes(client: &reqwest::blocking::Client, url: &str) -> Result<Vec<u8>> {
    let mut stream = open_stream(client, url)?;
    let mut bytes = Vec::new();
    stream
        .read_to_end(&mut bytes)
        .map_err(|err| SetupError::Network { url: url.to_string(), reason: err.to_string() })?;
    Ok(bytes)
}

/// Streams a URL into a file, reporting progress against `expected_size`.
///
/// Checks the cancellation token between chunks; a cancelled download
/// surfaces as [`SetupError::Cancelled`] and leaves a partial file for the
/// caller's staging cleanup to collect.
pub fn download_to_file(
    client: &reqwest::blocking::Client,
    url: &str,
    dest: &Path,
    expected_size: u64,
    sink: &mut dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<u64> {
    use std::io::Write;

    let mut stream = open_stream(client, url)?;
    let total = stream.content_length.unwrap_or(expected_size).max(1);

    let mut file = std::fs::File::create(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut done: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(SetupError::Cancelled.into());
        }
        let n = stream
            .read(&mut buf)
            .map_err(|err| SetupError::Network { url: url.to_string(), reason: err.to_string() })?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .with_context(|| format!("failed to write {}", dest.display()))?;
        done += n as u64;
        sink.on_progress(done as f64 / total as f64);
    }
    file.sync_all().context("failed to sync downloaded file")?;

    debug!("downloaded {done} bytes from {url}");
    Ok(done)
}

fn get_with_retry(
    client: &reqwest::blocking::Client,
    url: &str,
) -> Result<reqwest::blocking::Response> {
    let mut attempt = 0;
    loop {
        match client.get(url).send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                if status.is_server_error() && attempt < HTTP_RETRIES {
                    let delay = backoff::delay_for_attempt(attempt);
                    warn!("HTTP {status} for {url}, retrying in {delay:?}");
                    std::thread::sleep(delay);
                    attempt += 1;
                    continue;
                }
                return Err(SetupError::Network {
                    url: url.to_string(),
                    reason: format!("HTTP {status}"),
                }
                .into());
            }
            Err(err) if attempt < HTTP_RETRIES => {
                let delay = backoff::delay_for_attempt(attempt);
                warn!("request to {url} failed ({err}), retrying in {delay:?}");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                return Err(SetupError::Network {
                    url: url.to_string(),
                    reason: err.to_string(),
                }
                .into());
            }
        }
    }
}
