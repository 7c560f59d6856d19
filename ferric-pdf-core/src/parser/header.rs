//! PDF Header Parser
//!
//! Parses PDF header and version according to ISO 32000-1 Section 7.5.2

use super::lexer::Lexer;
use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use std::io::{Read, Seek};
use std::str::FromStr;
use tracing::warn;

/// How far into the file a lenient parse looks for `%PDF-`.
const HEADER_SEARCH: usize = 1024;
const MARKER: &[u8] = b"%PDF-";

/// PDF Version information
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PdfVersion {
    pub major: u8,
    pub minor: u8,
}

impl PdfVersion {
    pub const V1_4: PdfVersion = PdfVersion::new(1, 4);
    pub const V1_5: PdfVersion = PdfVersion::new(1, 5);
    pub const V1_7: PdfVersion = PdfVersion::new(1, 7);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Check if this version is supported
    pub fn is_supported(&self) -> bool {
        matches!((self.major, self.minor), (1, 0..=7) | (2, 0))
    }
}

impl Default for PdfVersion {
    fn default() -> Self {
        Self::V1_7
    }
}

impl std::fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PdfVersion {
    type Err = PdfError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PdfError::ValueOutOfRange(format!("invalid PDF version '{s}'"));
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self::new(
            major.parse().map_err(|_| invalid())?,
            minor.parse().map_err(|_| invalid())?,
        ))
    }
}

/// PDF Header information
#[derive(Debug, Clone, PartialEq)]
pub struct PdfHeader {
    pub version: PdfVersion,
    /// Offset of `%PDF-`; non-zero when the file carries leading junk
    pub offset: u64,
    pub has_binary_marker: bool,
}

impl PdfHeader {
    /// Parse the header at the start of the file.
    ///
    /// Strict parsing requires `%PDF-` at offset 0; otherwise the first
    /// kilobyte is searched.
    pub fn parse<R: Read + Seek>(lexer: &mut Lexer<R>, options: &ParseOptions) -> Result<Self> {
        let head = lexer.read_at(0, HEADER_SEARCH)?;
        let offset = head
            .windows(MARKER.len())
            .position(|w| w == MARKER)
            .ok_or_else(|| PdfError::syntax(0, "missing %PDF- header"))?;
        if offset != 0 {
            if options.strict {
                return Err(PdfError::syntax(
                    offset as u64,
                    "%PDF- header does not start the file",
                ));
            }
            warn!("PDF header found at offset {offset} instead of 0");
        }

        let rest = &head[offset + MARKER.len()..];
        let line_len = rest
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .unwrap_or(rest.len());
        let version = Self::parse_version(&rest[..line_len], offset as u64, options)?;
        let has_binary_marker = Self::check_binary_marker(&rest[line_len..]);

        Ok(PdfHeader {
            version,
            offset: offset as u64,
            has_binary_marker,
        })
    }

    fn parse_version(line: &[u8], offset: u64, options: &ParseOptions) -> Result<PdfVersion> {
        // Some producers put a comment or garbage after the version digits
        let text: String = String::from_utf8_lossy(line)
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let version: PdfVersion = text
            .parse()
            .map_err(|_| PdfError::syntax(offset, format!("invalid PDF version '{text}'")))?;

        if !version.is_supported() {
            if options.strict {
                return Err(PdfError::syntax(
                    offset,
                    format!("unsupported PDF version {version}"),
                ));
            }
            warn!("Unsupported PDF version {version}, reading anyway");
        }
        Ok(version)
    }

    /// Check for the binary comment on the line after the version.
    fn check_binary_marker(after: &[u8]) -> bool {
        let start = after
            .iter()
            .position(|&b| b != b'\r' && b != b'\n')
            .unwrap_or(after.len());
        let line = &after[start..];
        if line.first() != Some(&b'%') {
            return false;
        }
        line.iter()
            .skip(1)
            .take_while(|&&b| b != b'\r' && b != b'\n')
            .filter(|&&b| b >= 128)
            .count()
            >= 4
    }
}
