//! Random-access byte sources for the archive healer.
//!
//! The healer reads a zip archive through `Read + Seek`. Local archives use
//! a plain [`std::fs::File`]; remote archives go through [`HttpSource`],
//! which maps seeks and reads onto HTTP Range requests with a single cached
//! chunk, so healing a lightly-damaged install fetches kilobytes, not the
//! whole archive.

use anyhow::{Context, Result};
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, trace, warn};

use crate::constants::{HTTP_CHUNK_SIZE, HTTP_RETRIES};
use crate::core::SetupError;
use crate::utils::backoff;

/// `Read + Seek + Send`, the shape the zip reader wants.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

struct Chunk {
    start: u64,
    data: Vec<u8>,
}

/// A remote file exposed as `Read + Seek` via HTTP Range requests.
pub struct HttpSource {
    client: reqwest::blocking::Client,
    url: String,
    len: u64,
    pos: u64,
    chunk: Option<Chunk>,
    pub(crate) chunk_size: u64,
    /// Total bytes actually transferred, for logging and tests.
    pub bytes_fetched: u64,
}

impl HttpSource {
    /// Opens the source: a HEAD request establishes the total length.
    pub fn open(client: reqwest::blocking::Client, url: String) -> Result<Self> {
        let response = client
            .head(&url)
            .send()
            .map_err(|err| SetupError::Network { url: url.clone(), reason: err.to_string() })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SetupError::Network {
                url,
                reason: format!("HTTP {status}"),
            }
            .into());
        }
        let len = response
            .content_length()
            .or_else(|| {
                response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)?
                    .to_str()
                    .ok()?
                    .parse()
                    .ok()
            })
            .context("remote archive did not report a length")?;

        debug!("opened remote archive ({len} bytes): {url}");
        Ok(Self {
            client,
            url,
            len,
            pos: 0,
            chunk: None,
            chunk_size: HTTP_CHUNK_SIZE,
            bytes_fetched: 0,
        })
    }

    fn fetch_chunk(&mut self, start: u64) -> std::io::Result<()> {
        let end = (start + self.chunk_size).min(self.len) - 1;
        trace!("fetching range {start}-{end} of {}", self.url);

        let mut attempt = 0;
        let data = loop {
            let result = self
                .client
                .get(&self.url)
                .header(reqwest::header::RANGE, format!("bytes={start}-{end}"))
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.bytes());
            match result {
                Ok(bytes) => break bytes,
                Err(err) if attempt < HTTP_RETRIES => {
                    let delay = backoff::delay_for_attempt(attempt);
                    warn!("range request failed ({err}), retrying in {delay:?}");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(std::io::Error::other(format!(
                        "range request for {} failed: {err}",
                        self.url
                    )));
                }
            }
        };

        self.bytes_fetched += data.len() as u64;
        let want = (end - start + 1) as usize;
        let data = if data.len() > want {
            // Server ignored the Range header and sent the whole body.
            data.slice(start as usize..(end + 1) as usize).to_vec()
        } else {
            data.to_vec()
        };
        if data.len() != want {
            return Err(std::io::Error::other(format!(
                "short range response for {}: got {}, wanted {want}",
                self.url,
                data.len()
            )));
        }

        self.chunk = Some(Chunk { start, data });
        Ok(())
    }
}

impl Read for HttpSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }

        let chunk_start = self.pos - self.pos % self.chunk_size;
        let have = matches!(&self.chunk, Some(c) if c.start == chunk_start);
        if !have {
            self.fetch_chunk(chunk_start)?;
        }
        let chunk = self.chunk.as_ref().expect("chunk just fetched");

        let offset = (self.pos - chunk.start) as usize;
        let available = chunk.data.len().saturating_sub(offset);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&chunk.data[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for HttpSource {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.len as i64 + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
