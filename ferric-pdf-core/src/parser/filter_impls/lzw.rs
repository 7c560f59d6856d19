//! LZWDecode filter (ISO 32000-1:2008 Section 7.4.4)
//!
//! Codes start 9 bits wide and grow to 12 bits as the table fills. Code 256
//! clears the table, 257 ends the data. With `/EarlyChange 1` (the default)
//! the width grows one code early.

use super::predictor;
use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::Dictionary;
use crate::parser::filters::{FilterSession, FilterType, OutputLimit, PdfFilter};
use std::collections::HashMap;

const NAME: &str = "LZWDecode";
const CLEAR_TABLE: u16 = 256;
const EOD: u16 = 257;
const FIRST_FREE: usize = 258;
const MAX_ENTRIES: usize = 4096;

/// Width in bits of the next code, given the decoder's table size.
fn code_width(table_len: usize, early_change: usize) -> u32 {
    match table_len + early_change {
        n if n >= 2048 => 12,
        n if n >= 1024 => 11,
        n if n >= 512 => 10,
        _ => 9,
    }
}

fn early_change(params: Option<&Dictionary>) -> Result<usize> {
    match params.and_then(|p| p.get_integer("EarlyChange")) {
        None | Some(1) => Ok(1),
        Some(0) => Ok(0),
        Some(other) => Err(PdfError::ValueOutOfRange(format!("/EarlyChange {other}"))),
    }
}

pub struct LzwFilter;

impl PdfFilter for LzwFilter {
    fn filter_type(&self) -> FilterType {
        FilterType::Lzw
    }

    fn begin_decode(
        &self,
        params: Option<&Dictionary>,
        options: &ParseOptions,
    ) -> Result<Box<dyn FilterSession>> {
        let decoder = LzwDecoder::new(
            early_change(params)?,
            options.strict,
            OutputLimit::new(options.max_decoded_stream_size),
        );
        predictor::wrap_decoder(Box::new(decoder), params, options)
    }

    fn begin_encode(&self, params: Option<&Dictionary>) -> Result<Box<dyn FilterSession>> {
        let encoder = LzwEncoder::new(early_change(params)?);
        predictor::wrap_encoder(Box::new(encoder), params)
    }
}

/// A table string stored as its last byte plus the code of its prefix.
#[derive(Debug, Clone, Copy)]
struct Entry {
    prefix: u16,
    byte: u8,
    first: u8,
    len: u32,
}

struct LzwDecoder {
    table: Vec<Entry>,
    previous: Option<u16>,
    early_change: usize,
    acc: u32,
    nbits: u32,
    finished: bool,
    strict: bool,
    limit: OutputLimit,
}

impl LzwDecoder {
    fn new(early_change: usize, strict: bool, limit: OutputLimit) -> Self {
        let mut table = Vec::with_capacity(MAX_ENTRIES);
        for byte in 0..=255u8 {
            table.push(Entry {
                prefix: 0,
                byte,
                first: byte,
                len: 1,
            });
        }
        // Placeholders for the clear and EOD codes
        for _ in 0..2 {
            table.push(Entry {
                prefix: 0,
                byte: 0,
                first: 0,
                len: 0,
            });
        }
        Self {
            table,
            previous: None,
            early_change,
            acc: 0,
            nbits: 0,
            finished: false,
            strict,
            limit,
        }
    }

    fn write_string(&mut self, code: u16, out: &mut Vec<u8>) -> Result<()> {
        let len = self.table[usize::from(code)].len as usize;
        self.limit.claim(len)?;
        let start = out.len();
        out.resize(start + len, 0);
        let mut current = code;
        for slot in out[start..].iter_mut().rev() {
            let entry = self.table[usize::from(current)];
            *slot = entry.byte;
            current = entry.prefix;
        }
        Ok(())
    }

    fn process(&mut self, code: u16, out: &mut Vec<u8>) -> Result<()> {
        match code {
            CLEAR_TABLE => {
                self.table.truncate(FIRST_FREE);
                self.previous = None;
                return Ok(());
            }
            EOD => {
                self.finished = true;
                return Ok(());
            }
            _ => {}
        }

        let next = self.table.len();
        let index = usize::from(code);
        if index < 256 || (FIRST_FREE..next).contains(&index) {
            self.write_string(code, out)?;
            if let Some(prev) = self.previous {
                let first = self.table[index].first;
                self.add_entry(prev, first);
            }
        } else if index == next {
            // The string being defined: previous string plus its own first byte
            let prev = self.previous.ok_or_else(|| {
                PdfError::decode(NAME, format!("code {code} with no previous code"))
            })?;
            let first = self.table[usize::from(prev)].first;
            self.add_entry(prev, first);
            self.write_string(code, out)?;
        } else {
            return Err(PdfError::decode(
                NAME,
                format!("code {code} exceeds table size {next}"),
            ));
        }
        self.previous = Some(code);
        Ok(())
    }

    fn add_entry(&mut self, prefix: u16, byte: u8) {
        if self.table.len() < MAX_ENTRIES {
            let parent = self.table[usize::from(prefix)];
            self.table.push(Entry {
                prefix,
                byte,
                first: parent.first,
                len: parent.len + 1,
            });
        }
    }
}

impl FilterSession for LzwDecoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        for &byte in block {
            if self.finished {
                return Ok(());
            }
            self.acc = (self.acc << 8) | u32::from(byte);
            self.nbits += 8;
            loop {
                let width = code_width(self.table.len(), self.early_change);
                if self.nbits < width || self.finished {
                    break;
                }
                self.nbits -= width;
                let code = ((self.acc >> self.nbits) & ((1 << width) - 1)) as u16;
                self.acc &= (1 << self.nbits) - 1;
                self.process(code, out)?;
            }
        }
        Ok(())
    }

    fn end(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        if !self.finished {
            if self.strict {
                return Err(PdfError::decode(NAME, "missing end-of-data code"));
            }
            tracing::debug!("LZWDecode: data ends without EOD code");
        }
        Ok(())
    }
}

struct LzwEncoder {
    codes: HashMap<(u16, u8), u16>,
    next_code: usize,
    /// Table size the decoder will have when it reads the next code.
    decoder_len: usize,
    first_after_clear: bool,
    current: Option<u16>,
    early_change: usize,
    acc: u32,
    nbits: u32,
    started: bool,
}

impl LzwEncoder {
    fn new(early_change: usize) -> Self {
        Self {
            codes: HashMap::new(),
            next_code: FIRST_FREE,
            decoder_len: FIRST_FREE,
            first_after_clear: true,
            current: None,
            early_change,
            acc: 0,
            nbits: 0,
            started: false,
        }
    }

    fn put_bits(&mut self, code: u16, width: u32, out: &mut Vec<u8>) {
        self.acc = (self.acc << width) | u32::from(code);
        self.nbits += width;
        while self.nbits >= 8 {
            self.nbits -= 8;
            out.push((self.acc >> self.nbits) as u8);
        }
        self.acc &= (1 << self.nbits) - 1;
    }

    fn emit(&mut self, code: u16, out: &mut Vec<u8>) {
        let width = code_width(self.decoder_len, self.early_change);
        self.put_bits(code, width, out);
        if code == CLEAR_TABLE {
            self.decoder_len = FIRST_FREE;
            self.first_after_clear = true;
        } else if self.first_after_clear {
            self.first_after_clear = false;
        } else {
            self.decoder_len = (self.decoder_len + 1).min(MAX_ENTRIES);
        }
    }

    fn clear(&mut self, out: &mut Vec<u8>) {
        self.emit(CLEAR_TABLE, out);
        self.codes.clear();
        self.next_code = FIRST_FREE;
    }
}

impl FilterSession for LzwEncoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if !self.started {
            self.clear(out);
            self.started = true;
        }
        for &byte in block {
            let Some(prefix) = self.current else {
                self.current = Some(u16::from(byte));
                continue;
            };
            if let Some(&code) = self.codes.get(&(prefix, byte)) {
                self.current = Some(code);
                continue;
            }
            self.emit(prefix, out);
            self.codes.insert((prefix, byte), self.next_code as u16);
            self.next_code += 1;
            self.current = Some(u16::from(byte));
            if self.next_code == MAX_ENTRIES {
                self.clear(out);
            }
        }
        Ok(())
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if !self.started {
            self.clear(out);
            self.started = true;
        }
        if let Some(code) = self.current.take() {
            self.emit(code, out);
        }
        self.emit(EOD, out);
        if self.nbits > 0 {
            out.push((self.acc << (8 - self.nbits)) as u8);
            self.acc = 0;
            self.nbits = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::objects::Object;
    use crate::parser::filters::{decode, decode_with_options, encode};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    /// Pack 9-bit codes MSB first.
    fn pack9(codes: &[u16]) -> Vec<u8> {
        let mut encoder = LzwEncoder::new(1);
        let mut out = Vec::new();
        for &code in codes {
            encoder.put_bits(code, 9, &mut out);
        }
        if encoder.nbits > 0 {
            out.push((encoder.acc << (8 - encoder.nbits)) as u8);
        }
        out
    }

    #[test]
    fn test_code_width_transitions() {
        assert_eq!(code_width(510, 1), 9);
        assert_eq!(code_width(511, 1), 10);
        assert_eq!(code_width(511, 0), 9);
        assert_eq!(code_width(512, 0), 10);
        assert_eq!(code_width(1023, 1), 11);
        assert_eq!(code_width(2047, 1), 12);
        assert_eq!(code_width(4096, 1), 12);
    }

    #[test]
    fn test_decode_reference_sequence() {
        // ISO 32000-1 Section 7.4.4.2 example
        let data = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        assert_eq!(
            decode(FilterType::Lzw, None, &data).unwrap(),
            b"-----A---B"
        );
    }

    #[test]
    fn test_decode_kwkwk_case() {
        // 'a' then code 258 which is being defined: "aa"
        let data = pack9(&[CLEAR_TABLE, u16::from(b'a'), 258, EOD]);
        assert_eq!(decode(FilterType::Lzw, None, &data).unwrap(), b"aaa");
    }

    #[test]
    fn test_rejects_code_beyond_table() {
        let data = pack9(&[CLEAR_TABLE, u16::from(b'a'), 300, EOD]);
        let err = decode(FilterType::Lzw, None, &data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamDecode);
    }

    #[test]
    fn test_rejects_next_code_without_previous() {
        let data = pack9(&[CLEAR_TABLE, 258, EOD]);
        let err = decode(FilterType::Lzw, None, &data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamDecode);
    }

    #[test]
    fn test_missing_eod() {
        let data = pack9(&[CLEAR_TABLE, u16::from(b'x')]);
        assert_eq!(decode(FilterType::Lzw, None, &data).unwrap(), b"x");
        let err = decode_with_options(FilterType::Lzw, None, &data, &ParseOptions::strict())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamDecode);
    }

    #[test]
    fn test_encode_reference_sequence() {
        let encoded = encode(FilterType::Lzw, None, b"-----A---B").unwrap();
        assert_eq!(
            encoded,
            vec![0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01]
        );
    }

    #[test]
    fn test_table_fills_and_clears() {
        // Enough distinct pairs to force several table resets
        let data: Vec<u8> = (0..40_000u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        for early in [0, 1] {
            let mut params = Dictionary::new();
            params.set("EarlyChange", early);
            let encoded = encode(FilterType::Lzw, Some(&params), &data).unwrap();
            assert_eq!(decode(FilterType::Lzw, Some(&params), &encoded).unwrap(), data);
        }
    }

    #[test]
    fn test_with_png_predictor() {
        let mut params = Dictionary::new();
        params.set("Predictor", 15);
        params.set("Columns", 4);
        params.set("Colors", Object::Integer(1));
        let data: Vec<u8> = (0..64).collect();
        let encoded = encode(FilterType::Lzw, Some(&params), &data).unwrap();
        assert_eq!(decode(FilterType::Lzw, Some(&params), &encoded).unwrap(), data);
    }

    #[test]
    fn test_invalid_early_change() {
        let mut params = Dictionary::new();
        params.set("EarlyChange", 2);
        let err = decode(FilterType::Lzw, Some(&params), &[0x80]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueOutOfRange);
    }

    proptest! {
        #[test]
        fn prop_encode_decode_inverse(data in proptest::collection::vec(0u8..8, 0..4096)) {
            let encoded = encode(FilterType::Lzw, None, &data).unwrap();
            prop_assert_eq!(decode(FilterType::Lzw, None, &encoded).unwrap(), data);
        }

        #[test]
        fn prop_decoder_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode(FilterType::Lzw, None, &data);
        }
    }
}
