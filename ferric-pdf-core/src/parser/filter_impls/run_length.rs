//! RunLengthDecode filter (ISO 32000-1:2008 Section 7.4.5)
//!
//! A length byte `0..=127` copies the next `len + 1` bytes literally,
//! `129..=255` repeats the next byte `257 - len` times and 128 is EOD.

use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::Dictionary;
use crate::parser::filters::{FilterSession, FilterType, OutputLimit, PdfFilter};

const NAME: &str = "RunLengthDecode";
const EOD: u8 = 128;
const MAX_RUN: usize = 128;

pub struct RunLengthFilter;

impl PdfFilter for RunLengthFilter {
    fn filter_type(&self) -> FilterType {
        FilterType::RunLength
    }

    fn begin_decode(
        &self,
        _params: Option<&Dictionary>,
        options: &ParseOptions,
    ) -> Result<Box<dyn FilterSession>> {
        Ok(Box::new(RleDecoder {
            state: RleState::Length,
            finished: false,
            strict: options.strict,
            limit: OutputLimit::new(options.max_decoded_stream_size),
        }))
    }

    fn begin_encode(&self, _params: Option<&Dictionary>) -> Result<Box<dyn FilterSession>> {
        Ok(Box::new(RleEncoder {
            pending: Vec::with_capacity(MAX_RUN),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
enum RleState {
    Length,
    /// Literal bytes still to copy.
    Literal(usize),
    /// Waiting for the byte to repeat this many times.
    Repeat(usize),
}

struct RleDecoder {
    state: RleState,
    finished: bool,
    strict: bool,
    limit: OutputLimit,
}

impl FilterSession for RleDecoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let mut pos = 0;
        while pos < block.len() && !self.finished {
            match self.state {
                RleState::Length => {
                    let len = block[pos];
                    pos += 1;
                    self.state = match len {
                        EOD => {
                            self.finished = true;
                            RleState::Length
                        }
                        0..=127 => RleState::Literal(usize::from(len) + 1),
                        _ => RleState::Repeat(257 - usize::from(len)),
                    };
                }
                RleState::Literal(remaining) => {
                    let take = remaining.min(block.len() - pos);
                    self.limit.claim(take)?;
                    out.extend_from_slice(&block[pos..pos + take]);
                    pos += take;
                    self.state = if take == remaining {
                        RleState::Length
                    } else {
                        RleState::Literal(remaining - take)
                    };
                }
                RleState::Repeat(count) => {
                    self.limit.claim(count)?;
                    out.resize(out.len() + count, block[pos]);
                    pos += 1;
                    self.state = RleState::Length;
                }
            }
        }
        Ok(())
    }

    fn end(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        match self.state {
            RleState::Length if self.finished || !self.strict => Ok(()),
            RleState::Length => Err(PdfError::decode(NAME, "missing end-of-data marker")),
            _ => Err(PdfError::decode(NAME, "data ends inside a run")),
        }
    }
}

/// Buffers a literal run; repeated bytes are flushed as runs as soon as seen.
struct RleEncoder {
    pending: Vec<u8>,
}

impl RleEncoder {
    fn flush_literal(&mut self, out: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            out.push((self.pending.len() - 1) as u8);
            out.extend_from_slice(&self.pending);
            self.pending.clear();
        }
    }
}

impl FilterSession for RleEncoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        // Runs spanning block boundaries are split; output stays valid.
        let mut pos = 0;
        while pos < block.len() {
            let byte = block[pos];
            let run = block[pos..]
                .iter()
                .take(MAX_RUN)
                .take_while(|&&b| b == byte)
                .count();
            if run >= 2 {
                self.flush_literal(out);
                out.push((257 - run) as u8);
                out.push(byte);
                pos += run;
            } else {
                self.pending.push(byte);
                if self.pending.len() == MAX_RUN {
                    self.flush_literal(out);
                }
                pos += 1;
            }
        }
        Ok(())
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.flush_literal(out);
        out.push(EOD);
        Ok(())
    }
}
