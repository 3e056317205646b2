//! Binary framing of the patch stream.
//!
//! A patch is consumed strictly sequentially:
//!
//! ```text
//! magic "itchpat1"
//! u32 LE length | JSON PatchHeader { block_size, source, target }
//! per target file, in container order:
//!     ops until tag 0:
//!         tag 1 (data): u64 LE length, raw bytes
//!         tag 2 (copy): u32 LE source file index, u64 LE offset, u64 LE length
//! ```
//!
//! The header names the *source* container the patch applies on top of and
//! the *target* container it produces. Data ops carry fresh bytes; copy ops
//! reference byte ranges of source files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Leading magic of every patch stream.
pub const PATCH_MAGIC: &[u8; 8] = b"itchpat1";

/// Cap on the JSON header frame; a bigger one is a corrupt stream.
const MAX_HEADER_LEN: u32 = 16 * 1024 * 1024;

const OP_END: u8 = 0;
const OP_DATA: u8 = 1;
const OP_COPY: u8 = 2;

/// One logical file of a container: no hashes, just identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFile {
    /// Relative, forward-slash path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Unix permission bits.
    pub mode: u32,
}

/// An ordered list of files, the shape of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Files in container order.
    pub files: Vec<ContainerFile>,
}

impl Container {
    /// Total content bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// The JSON header at the front of a patch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchHeader {
    /// Block granularity the patch was computed at.
    pub block_size: u64,
    /// Container the patch applies on top of.
    pub source: Container,
    /// Container the patch produces.
    pub target: Container,
}

/// One instruction for materializing a slice of a target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// `length` fresh bytes follow inline in the stream.
    Data {
        /// Byte count to read off the stream.
        length: u64,
    },
    /// Copy `length` bytes from a source file at `offset`.
    Copy {
        /// Index into the source container.
        file_index: u32,
        /// Byte offset in that file.
        offset: u64,
        /// Byte count to copy.
        length: u64,
    },
    /// The current target file is complete.
    End,
}

pub fn write_magic(out: &mut dyn Write) -> Result<()> {
    out.write_all(PATCH_MAGIC).context("failed to write patch magic")
}

pub fn read_magic(input: &mut dyn Read) -> Result<()> {
    let mut magic = [0u8; 8];
    input.read_exact(&mut magic).context("failed to read patch magic")?;
    if &magic != PATCH_MAGIC {
        bail!("not a patch stream (bad magic)");
    }
    Ok(())
}

pub fn write_header(out: &mut dyn Write, header: &PatchHeader) -> Result<()> {
    let json = serde_json::to_vec(header).context("failed to serialize patch header")?;
    let len = u32::try_from(json.len()).context("patch header too large")?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&json)?;
    Ok(())
}

pub fn read_header(input: &mut dyn Read) -> Result<PatchHeader> {
    let len = read_u32(input).context("failed to read patch header length")?;
    if len > MAX_HEADER_LEN {
        bail!("patch header length {len} exceeds limit");
    }
    let mut json = vec![0u8; len as usize];
    input.read_exact(&mut json).context("failed to read patch header")?;
    serde_json::from_slice(&json).context("failed to parse patch header")
}

pub fn write_op(out: &mut dyn Write, op: &Op) -> Result<()> {
    match op {
        Op::Data { length } => {
            out.write_all(&[OP_DATA])?;
            out.write_all(&length.to_le_bytes())?;
        }
        Op::Copy { file_index, offset, length } => {
            out.write_all(&[OP_COPY])?;
            out.write_all(&file_index.to_le_bytes())?;
            out.write_all(&offset.to_le_bytes())?;
            out.write_all(&length.to_le_bytes())?;
        }
        Op::End => {
            out.write_all(&[OP_END])?;
        }
    }
    Ok(())
}

pub fn read_op(input: &mut dyn Read) -> Result<Op> {
    let mut tag = [0u8; 1];
    input.read_exact(&mut tag).context("failed to read op tag")?;
    match tag[0] {
        OP_END => Ok(Op::End),
        OP_DATA => Ok(Op::Data { length: read_u64(input)? }),
        OP_COPY => Ok(Op::Copy {
            file_index: read_u32(input)?,
            offset: read_u64(input)?,
            length: read_u64(input)?,
        }),
        other => bail!("unknown patch op tag: {other}"),
    }
}

fn read_u32(input: &mut dyn Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).context("truncated patch stream")?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(input: &mut dyn Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf).context("truncated patch stream")?;
    Ok(u64::from_le_bytes(buf))
}
