//! ASCII85Decode filter (ISO 32000-1:2008 Section 7.4.3)
//!
//! Five characters in `!`..=`u` encode four bytes in base 85. `z` stands for a
//! group of four zero bytes and `~>` marks end of data.

use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::Dictionary;
use crate::parser::filters::{FilterSession, FilterType, OutputLimit, PdfFilter};
use crate::parser::lexer::is_whitespace;

const NAME: &str = "ASCII85Decode";
const LINE_WIDTH: usize = 75;

pub struct Ascii85Filter;

impl PdfFilter for Ascii85Filter {
    fn filter_type(&self) -> FilterType {
        FilterType::Ascii85
    }

    fn begin_decode(
        &self,
        _params: Option<&Dictionary>,
        options: &ParseOptions,
    ) -> Result<Box<dyn FilterSession>> {
        Ok(Box::new(A85Decoder {
            group: [0; 5],
            filled: 0,
            state: DecodeState::Start,
            strict: options.strict,
            limit: OutputLimit::new(options.max_decoded_stream_size),
        }))
    }

    fn begin_encode(&self, _params: Option<&Dictionary>) -> Result<Box<dyn FilterSession>> {
        Ok(Box::new(A85Encoder {
            group: [0; 4],
            filled: 0,
            column: 0,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Nothing but whitespace seen; an optional `<~` prefix may follow.
    Start,
    /// Saw `<` at the start.
    PrefixOpen,
    Data,
    /// Saw `~`, expecting `>`.
    Tilde,
    Done,
}

struct A85Decoder {
    group: [u8; 5],
    filled: usize,
    state: DecodeState,
    strict: bool,
    limit: OutputLimit,
}

impl A85Decoder {
    fn flush_group(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.filled == 0 {
            return Ok(());
        }
        if self.filled == 1 {
            return Err(PdfError::decode(NAME, "final group has a single character"));
        }

        // Missing characters are padded with 'u' and the extra bytes dropped
        let produced = self.filled - 1;
        for slot in self.group.iter_mut().skip(self.filled) {
            *slot = 84;
        }
        let value = self
            .group
            .iter()
            .try_fold(0u64, |acc, &digit| acc.checked_mul(85)?.checked_add(u64::from(digit)))
            .filter(|v| *v <= u64::from(u32::MAX))
            .ok_or_else(|| PdfError::decode(NAME, "group value exceeds 2^32 - 1"))?;

        self.limit.claim(produced)?;
        out.extend_from_slice(&(value as u32).to_be_bytes()[..produced]);
        self.filled = 0;
        Ok(())
    }
}

impl FilterSession for A85Decoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        for &ch in block {
            if self.state == DecodeState::Done {
                break;
            }
            if is_whitespace(ch) {
                continue;
            }
            match self.state {
                DecodeState::Start if ch == b'<' => {
                    self.state = DecodeState::PrefixOpen;
                    continue;
                }
                DecodeState::PrefixOpen => {
                    if ch != b'~' {
                        return Err(PdfError::decode(NAME, "'<' not followed by '~'"));
                    }
                    self.state = DecodeState::Data;
                    continue;
                }
                DecodeState::Tilde => {
                    if ch != b'>' {
                        return Err(PdfError::decode(NAME, "'~' not followed by '>'"));
                    }
                    self.flush_group(out)?;
                    self.state = DecodeState::Done;
                    continue;
                }
                _ => self.state = DecodeState::Data,
            }

            match ch {
                b'~' => self.state = DecodeState::Tilde,
                b'z' if self.filled == 0 => {
                    self.limit.claim(4)?;
                    out.extend_from_slice(&[0; 4]);
                }
                b'z' => {
                    return Err(PdfError::decode(NAME, "'z' inside a group"));
                }
                b'!'..=b'u' => {
                    self.group[self.filled] = ch - b'!';
                    self.filled += 1;
                    if self.filled == 5 {
                        self.flush_group(out)?;
                    }
                }
                other => {
                    return Err(PdfError::decode(
                        NAME,
                        format!("invalid character 0x{other:02x}"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        match self.state {
            DecodeState::Done => Ok(()),
            DecodeState::Tilde | DecodeState::PrefixOpen => {
                Err(PdfError::decode(NAME, "truncated end-of-data marker"))
            }
            _ if self.strict => Err(PdfError::decode(NAME, "missing end-of-data marker '~>'")),
            _ => {
                tracing::warn!("ASCII85Decode: data ends without '~>'");
                self.flush_group(out)
            }
        }
    }
}

struct A85Encoder {
    group: [u8; 4],
    filled: usize,
    column: usize,
}

impl A85Encoder {
    fn push_char(&mut self, ch: u8, out: &mut Vec<u8>) {
        if self.column >= LINE_WIDTH {
            out.push(b'\n');
            self.column = 0;
        }
        out.push(ch);
        self.column += 1;
    }

    /// Encode the buffered group, `len` of its bytes being real data.
    fn emit_group(&mut self, len: usize, out: &mut Vec<u8>) {
        let value = u32::from_be_bytes(self.group);
        if value == 0 && len == 4 {
            self.push_char(b'z', out);
            return;
        }
        let mut digits = [0u8; 5];
        let mut rest = value;
        for digit in digits.iter_mut().rev() {
            *digit = (rest % 85) as u8 + b'!';
            rest /= 85;
        }
        for &ch in &digits[..len + 1] {
            self.push_char(ch, out);
        }
    }
}

impl FilterSession for A85Encoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.reserve(block.len() / 4 * 5 + 5);
        for &byte in block {
            self.group[self.filled] = byte;
            self.filled += 1;
            if self.filled == 4 {
                self.emit_group(4, out);
                self.filled = 0;
            }
        }
        Ok(())
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.filled > 0 {
            let len = self.filled;
            for slot in self.group.iter_mut().skip(len) {
                *slot = 0;
            }
            self.emit_group(len, out);
            self.filled = 0;
        }
        out.extend_from_slice(b"~>");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ParseOptions;
    use crate::error::ErrorKind;
    use crate::parser::filters::{decode, decode_with_options, encode, FilterType};
    use proptest::prelude::*;

    #[test]
    fn test_decode_known_text() {
        assert_eq!(
            decode(FilterType::Ascii85, None, b"87cURD]i,\"Ebo80~>").unwrap(),
            b"Hello World!"
        );
    }

    #[test]
    fn test_decode_with_prefix_and_whitespace() {
        assert_eq!(
            decode(FilterType::Ascii85, None, b"<~87cUR\nD]i,\"E bo80~>").unwrap(),
            b"Hello World!"
        );
    }

    #[test]
    fn test_z_shorthand() {
        assert_eq!(
            decode(FilterType::Ascii85, None, b"z~>").unwrap(),
            vec![0u8; 4]
        );
        let err = decode(FilterType::Ascii85, None, b"!!z~>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamDecode);
    }

    #[test]
    fn test_partial_final_group() {
        // "A" encodes to "5l"
        assert_eq!(decode(FilterType::Ascii85, None, b"5l~>").unwrap(), b"A");
        let err = decode(FilterType::Ascii85, None, b"5~>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamDecode);
    }

    #[test]
    fn test_invalid_characters() {
        for input in [&b"87cv~>"[..], b"87c{~>", b"87c~x"] {
            let err = decode(FilterType::Ascii85, None, input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::StreamDecode);
        }
    }

    #[test]
    fn test_group_overflow() {
        let err = decode(FilterType::Ascii85, None, b"uuuuu~>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamDecode);
    }

    #[test]
    fn test_missing_terminator() {
        assert_eq!(decode(FilterType::Ascii85, None, b"5l").unwrap(), b"A");
        let err =
            decode_with_options(FilterType::Ascii85, None, b"5l", &ParseOptions::strict()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamDecode);
    }

    #[test]
    fn test_encode_zero_group() {
        let encoded = encode(FilterType::Ascii85, None, &[0, 0, 0, 0, 1]).unwrap();
        assert!(encoded.starts_with(b"z"));
        assert!(encoded.ends_with(b"~>"));
    }

    proptest! {
        #[test]
        fn prop_encode_decode_inverse(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode(FilterType::Ascii85, None, &data).unwrap();
            prop_assert_eq!(decode(FilterType::Ascii85, None, &encoded).unwrap(), data);
        }
    }
}
