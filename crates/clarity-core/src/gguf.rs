//! GGUF header probe.
//!
//! Reads the fixed-size preamble of a model file so an unreadable path and a
//! file that is not a model at all are told apart before any weights are
//! mapped into memory.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::RuntimeError;

pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Versions llama.cpp has shipped. Version 1 files are still recognized here
/// and left for the runtime to accept or reject.
pub const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 1..=3;

/// magic + version + tensor count + metadata kv count
const HEADER_LEN: usize = 4 + 4 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

/// What the bridge knows about the model it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub path: String,
    pub file_size: u64,
    pub header: GgufHeader,
    /// Context window the runtime allocated, in tokens.
    pub n_ctx: u32,
}

/// Open `path` and parse its GGUF header.
pub fn probe(path: &Path) -> Result<(GgufHeader, u64), RuntimeError> {
    let open_err = |source: io::Error| RuntimeError::Open {
        path: path.display().to_string(),
        source,
    };

    if path.is_dir() {
        return Err(open_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path is a directory",
        )));
    }

    let mut file = File::open(path).map_err(open_err)?;
    let file_size = file.metadata().map_err(open_err)?.len();

    let mut buf = [0u8; HEADER_LEN];
    match file.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(RuntimeError::Format(format!(
                "{}: file is {file_size} bytes, shorter than a GGUF header",
                path.display()
            )));
        }
        Err(e) => return Err(open_err(e)),
    }

    parse_header(&buf)
        .map(|header| (header, file_size))
        .map_err(|reason| RuntimeError::Format(format!("{}: {reason}", path.display())))
}

fn parse_header(buf: &[u8; HEADER_LEN]) -> Result<GgufHeader, String> {
    if &buf[0..4] != GGUF_MAGIC {
        return Err(format!("bad magic {:02x?}", &buf[0..4]));
    }

    let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(format!("unsupported GGUF version {version}"));
    }

    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[8..16]);
    let tensor_count = u64::from_le_bytes(word);
    word.copy_from_slice(&buf[16..24]);
    let metadata_kv_count = u64::from_le_bytes(word);

    Ok(GgufHeader {
        version,
        tensor_count,
        metadata_kv_count,
    })
}

/// Bytes of a minimal GGUF header, for test fixtures.
#[cfg(any(test, feature = "test-utils"))]
pub fn header_bytes(version: u32, tensor_count: u64, metadata_kv_count: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(GGUF_MAGIC);
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&tensor_count.to_le_bytes());
    out.extend_from_slice(&metadata_kv_count.to_le_bytes());
    out
}
