//! RCWT file header — fixed 11-byte prefix.
//!
//! # Layout
//!
//! | offset | size | field          | endianness | constraint                      |
//! |--------|------|----------------|------------|---------------------------------|
//! | 0      | 2    | magic          | big        | `0xCCCC`                        |
//! | 2      | 1    | format tag     | —          | `0xED`                          |
//! | 3      | 1    | writer id      | —          | `0xCC` (ccextractor) or `0xFF`  |
//! | 4      | 1    | writer sub id  | —          | `0x00`                          |
//! | 5      | 1    | writer version | —          | `0x60` when writer id is `0xFF` |
//! | 6      | 2    | format version | big        | `0x0001` (version 0.001)        |
//! | 8      | 3    | reserved       | —          | not validated                   |
//!
//! The header is validated once when a stream is opened and is not needed
//! afterwards; nothing past byte 11 is ever consumed by [`RcwtHeader::read`].

use byteorder::{BigEndian, ByteOrder};
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;
use tracing::error;

pub const RCWT_HEADER_SIZE:      usize = 11;
pub const RCWT_MAGIC:            u16   = 0xCCCC;
pub const RCWT_FORMAT_TAG:       u8    = 0xED;
pub const RCWT_FORMAT_VERSION:   u16   = 0x0001;

pub const WRITER_ID_CCEXTRACTOR: u8 = 0xCC;
pub const WRITER_ID_NATIVE:      u8 = 0xFF;
pub const WRITER_SUB_ID:         u8 = 0x00;
/// The only writer version accepted for files produced by the native writer.
pub const NATIVE_WRITER_VERSION: u8 = 0x60;

/// Highest score a prober can return.
pub const PROBE_SCORE_MAX:  u8 = 100;
/// Score for a buffer carrying the 3-byte RCWT signature.  Only three bytes
/// are matched, so other probers may claim the same input.
pub const PROBE_SCORE_RCWT: u8 = 50;

/// Extensions RCWT captures are conventionally saved with.
pub const FILE_EXTENSIONS: &[&str] = &["bin"];

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Input is not an RCWT file (header needs 11 bytes, got {available})")]
    TooShort { available: usize },
    #[error("Input is not an RCWT file (signature {found:02X?})")]
    BadSignature { found: [u8; 3] },
    #[error("Input writing application {writer_id:02X}{sub_id:02X} is not supported, \
             only 0xCC00 (ccextractor) or 0xFF00 are compatible")]
    UnsupportedWriter { writer_id: u8, sub_id: u8 },
    #[error("Input RCWT version {0:#06x} is not compatible (only version 0.001 is known)")]
    UnsupportedVersion(u16),
    #[error("Input was written by an unsupported writer version {0:#04x}, consider upgrading")]
    UnsupportedWriterVersion(u8),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HeaderError {
    /// True when the input is not RCWT at all (as opposed to an RCWT
    /// variant this reader does not understand).  Callers probing several
    /// formats should move on to the next parser in this case.
    pub fn is_format_mismatch(&self) -> bool {
        matches!(self, HeaderError::TooShort { .. } | HeaderError::BadSignature { .. })
    }
}

/// Application that produced the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Writer {
    CcExtractor,
    Native,
}

impl Writer {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            WRITER_ID_CCEXTRACTOR => Some(Writer::CcExtractor),
            WRITER_ID_NATIVE      => Some(Writer::Native),
            _                     => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Writer::CcExtractor => WRITER_ID_CCEXTRACTOR,
            Writer::Native      => WRITER_ID_NATIVE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Writer::CcExtractor => "ccextractor",
            Writer::Native      => "native",
        }
    }
}

/// Parsed view of a validated header.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RcwtHeader {
    pub writer:         Writer,
    pub writer_version: u8,
    pub format_version: u16,
    pub reserved:       [u8; 3],
}

impl RcwtHeader {
    /// Read exactly [`RCWT_HEADER_SIZE`] bytes (or fewer at end of stream)
    /// and validate them.
    pub fn read<R: Read>(reader: R) -> Result<Self, HeaderError> {
        let mut buf = Vec::with_capacity(RCWT_HEADER_SIZE);
        reader.take(RCWT_HEADER_SIZE as u64).read_to_end(&mut buf)?;
        validate(&buf).map_err(|e| {
            error!(error = %e, "rejecting RCWT header");
            e
        })
    }
}

/// Validate a header prefix.
///
/// Checks run in a fixed order and the first failure is returned:
/// length, signature, writer, format version, then the native writer's
/// version byte.
pub fn validate(bytes: &[u8]) -> Result<RcwtHeader, HeaderError> {
    if bytes.len() < RCWT_HEADER_SIZE {
        return Err(HeaderError::TooShort { available: bytes.len() });
    }
    let header = &bytes[..RCWT_HEADER_SIZE];

    if BigEndian::read_u16(&header[0..2]) != RCWT_MAGIC || header[2] != RCWT_FORMAT_TAG {
        return Err(HeaderError::BadSignature { found: [header[0], header[1], header[2]] });
    }

    let writer = match (Writer::from_id(header[3]), header[4]) {
        (Some(w), WRITER_SUB_ID) => w,
        _ => {
            return Err(HeaderError::UnsupportedWriter {
                writer_id: header[3],
                sub_id:    header[4],
            })
        }
    };

    let format_version = BigEndian::read_u16(&header[6..8]);
    if format_version != RCWT_FORMAT_VERSION {
        return Err(HeaderError::UnsupportedVersion(format_version));
    }

    let writer_version = header[5];
    if writer == Writer::Native && writer_version != NATIVE_WRITER_VERSION {
        return Err(HeaderError::UnsupportedWriterVersion(writer_version));
    }

    Ok(RcwtHeader {
        writer,
        writer_version,
        format_version,
        reserved: [header[8], header[9], header[10]],
    })
}

/// Score how likely `buf` is the start of an RCWT stream.
///
/// Only the 3-byte signature is inspected, and the buffer must extend past
/// the header so that a bare header is not mistaken for a capture.
pub fn probe(buf: &[u8]) -> u8 {
    if buf.len() > RCWT_HEADER_SIZE
        && BigEndian::read_u16(&buf[0..2]) == RCWT_MAGIC
        && buf[2] == RCWT_FORMAT_TAG
    {
        PROBE_SCORE_RCWT
    } else {
        0
    }
}

/// True when `path` ends in one of [`FILE_EXTENSIONS`] (case-insensitive).
pub fn has_rcwt_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FILE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}
