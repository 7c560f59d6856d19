//! Parser configuration
//!
//! [`ParseOptions`] is threaded through every reader constructor. The only
//! process-wide setting is the object-count ceiling, which seeds
//! [`ParseOptions::default`].

use crate::error::{PdfError, Result};
use std::sync::atomic::{AtomicU32, Ordering};

/// Architectural limit for classic xref tables (2^23 - 1).
pub const DEFAULT_MAX_OBJECT_COUNT: u32 = 8_388_607;

/// Nesting depth for arrays and dictionaries before parsing is aborted.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 512;

/// Upper bound on the decoded size of a single stream.
pub const DEFAULT_MAX_DECODED_STREAM_SIZE: usize = 256 * 1024 * 1024;

static MAX_OBJECT_COUNT: AtomicU32 = AtomicU32::new(DEFAULT_MAX_OBJECT_COUNT);

/// Current process-wide maximum object count.
pub fn max_object_count() -> u32 {
    MAX_OBJECT_COUNT.load(Ordering::Relaxed)
}

/// Change the process-wide maximum object count.
///
/// Only affects [`ParseOptions`] created afterwards.
pub fn set_max_object_count(count: u32) -> Result<()> {
    if count == 0 || count > (u32::MAX >> 1) {
        return Err(PdfError::ValueOutOfRange(format!(
            "maximum object count {count} must be in 1..={}",
            u32::MAX >> 1
        )));
    }
    MAX_OBJECT_COUNT.store(count, Ordering::Relaxed);
    Ok(())
}

/// Options controlling how tolerant the parser is and which limits apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Reject malformations that lenient parsing would repair.
    pub strict: bool,
    /// Hard bound on object numbers accepted from xref sections.
    pub max_object_count: u32,
    /// Maximum array/dictionary nesting.
    pub max_nesting_depth: usize,
    /// Maximum decoded size of one stream, checked before buffers grow.
    pub max_decoded_stream_size: usize,
    /// Rebuild the xref index by scanning for objects when it is unusable.
    pub recover_xref: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strict: false,
            max_object_count: max_object_count(),
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_decoded_stream_size: DEFAULT_MAX_DECODED_STREAM_SIZE,
            recover_xref: false,
        }
    }
}

impl ParseOptions {
    /// Fail on every deviation from ISO 32000.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Tolerate common producer bugs and rebuild broken xref data.
    pub fn lenient() -> Self {
        Self {
            strict: false,
            recover_xref: true,
            ..Self::default()
        }
    }

    pub fn with_max_object_count(mut self, count: u32) -> Self {
        self.max_object_count = count;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    pub fn with_max_decoded_stream_size(mut self, size: usize) -> Self {
        self.max_decoded_stream_size = size;
        self
    }

    pub fn with_recovery(mut self, recover: bool) -> Self {
        self.recover_xref = recover;
        self
    }
}
