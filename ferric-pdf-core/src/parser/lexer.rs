//! PDF Lexer
//!
//! Tokenizes PDF syntax according to ISO 32000-1 Section 7.2. Whitespace and
//! comments are skipped; bytes that do not start any known token are returned
//! as [`Token::Keyword`] so malformed input surfaces as data instead of
//! aborting the lexer.

use crate::error::{PdfError, Result};
use std::io::{BufReader, Read, Seek, SeekFrom};

/// PDF Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    /// Literal string `( ... )`
    String(Vec<u8>),
    /// Hexadecimal string `< ... >`
    HexString(Vec<u8>),
    /// Name object without the leading slash, `#xx` escapes decoded
    Name(String),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    /// Any other run of regular characters (`obj`, `R`, `xref`, ...)
    /// or a single stray delimiter.
    Keyword(Vec<u8>),
    Null,
    Eof,
}

impl Token {
    pub fn is_keyword(&self, keyword: &[u8]) -> bool {
        matches!(self, Token::Keyword(k) if k.as_slice() == keyword)
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Keyword(k) => format!("keyword '{}'", String::from_utf8_lossy(k)),
            Token::Name(n) => format!("name /{n}"),
            Token::Integer(i) => format!("integer {i}"),
            Token::Real(r) => format!("real {r}"),
            other => format!("{other:?}"),
        }
    }
}

pub(crate) fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

pub(crate) fn is_delimiter(ch: u8) -> bool {
    matches!(
        ch,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

fn is_regular(ch: u8) -> bool {
    !is_whitespace(ch) && !is_delimiter(ch)
}

pub(crate) fn hex_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

/// Tokens can be pushed back at most this many times in a row.
const MAX_PUSHBACK: usize = 4;

/// PDF Lexer for tokenizing PDF content
pub struct Lexer<R> {
    reader: BufReader<R>,
    position: u64,
    peek_buffer: Option<u8>,
    token_buffer: Vec<(Token, u64)>,
    token_start: u64,
    strict: bool,
}

impl<R: Read> Lexer<R> {
    /// Create a new lexer from a reader
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            position: 0,
            peek_buffer: None,
            token_buffer: Vec::new(),
            token_start: 0,
            strict: false,
        }
    }

    /// Reject number spellings that lenient mode repairs (`--5`, a lone `-`).
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Offset just past the last consumed byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Offset at which the most recently returned token started.
    pub fn token_start(&self) -> u64 {
        self.token_start
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token> {
        if let Some((token, start)) = self.token_buffer.pop() {
            self.token_start = start;
            return Ok(token);
        }

        self.skip_whitespace()?;
        self.token_start = self.position;

        let ch = match self.peek_char()? {
            Some(ch) => ch,
            None => return Ok(Token::Eof),
        };

        match ch {
            b'/' => self.read_name(),
            b'(' => self.read_literal_string(),
            b'<' => self.read_angle_bracket(),
            b'>' => {
                self.consume_char()?;
                if self.peek_char()? == Some(b'>') {
                    self.consume_char()?;
                    Ok(Token::DictEnd)
                } else {
                    Ok(Token::Keyword(vec![b'>']))
                }
            }
            b'[' => {
                self.consume_char()?;
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.consume_char()?;
                Ok(Token::ArrayEnd)
            }
            b')' | b'{' | b'}' => {
                self.consume_char()?;
                Ok(Token::Keyword(vec![ch]))
            }
            b'+' | b'-' | b'0'..=b'9' | b'.' => self.read_number(),
            _ => self.read_keyword(),
        }
    }

    /// Push back a token to be returned by the next call to `next_token`
    pub fn push_token(&mut self, token: Token) {
        debug_assert!(self.token_buffer.len() < MAX_PUSHBACK);
        self.token_buffer.push((token, self.token_start));
    }

    /// Peek at the next character without consuming it
    fn peek_char(&mut self) -> Result<Option<u8>> {
        if let Some(ch) = self.peek_buffer {
            return Ok(Some(ch));
        }

        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.peek_buffer = Some(buf[0]);
                    return Ok(Some(buf[0]));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Consume the next character
    fn consume_char(&mut self) -> Result<Option<u8>> {
        let ch = self.peek_char()?;
        if ch.is_some() {
            self.peek_buffer = None;
            self.position += 1;
        }
        Ok(ch)
    }

    /// Skip whitespace and comments
    pub fn skip_whitespace(&mut self) -> Result<()> {
        while let Some(ch) = self.peek_char()? {
            if is_whitespace(ch) {
                self.consume_char()?;
            } else if ch == b'%' {
                while let Some(ch) = self.peek_char()? {
                    if ch == b'\n' || ch == b'\r' {
                        break;
                    }
                    self.consume_char()?;
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Read a name object (e.g., /Type)
    fn read_name(&mut self) -> Result<Token> {
        self.consume_char()?; // consume '/'
        let mut name = String::new();

        while let Some(ch) = self.peek_char()? {
            if !is_regular(ch) {
                break;
            }
            self.consume_char()?;

            // /A#20B means "A B"; a malformed escape is kept literally
            if ch == b'#' {
                let hi = self.peek_char()?.and_then(hex_value);
                if let Some(hi) = hi {
                    self.consume_char()?;
                    if let Some(lo) = self.peek_char()?.and_then(hex_value) {
                        self.consume_char()?;
                        name.push(char::from(hi << 4 | lo));
                        continue;
                    }
                    name.push('#');
                    name.push(char::from(b"0123456789ABCDEF"[hi as usize]));
                    continue;
                }
            }
            name.push(char::from(ch));
        }

        Ok(Token::Name(name))
    }

    /// Read a literal string (parentheses)
    fn read_literal_string(&mut self) -> Result<Token> {
        let start = self.position;
        self.consume_char()?; // consume '('
        let mut string = Vec::new();
        let mut depth = 1usize;

        loop {
            let ch = self
                .consume_char()?
                .ok_or_else(|| PdfError::syntax(start, "unterminated literal string"))?;

            match ch {
                b'\\' => {
                    let escaped = self
                        .consume_char()?
                        .ok_or_else(|| PdfError::syntax(start, "unterminated literal string"))?;
                    match escaped {
                        b'n' => string.push(b'\n'),
                        b'r' => string.push(b'\r'),
                        b't' => string.push(b'\t'),
                        b'b' => string.push(b'\x08'),
                        b'f' => string.push(b'\x0C'),
                        b'0'..=b'7' => {
                            let mut value = u32::from(escaped - b'0');
                            for _ in 0..2 {
                                match self.peek_char()? {
                                    Some(next @ b'0'..=b'7') => {
                                        self.consume_char()?;
                                        value = value * 8 + u32::from(next - b'0');
                                    }
                                    _ => break,
                                }
                            }
                            // High-order overflow is ignored
                            string.push((value & 0xFF) as u8);
                        }
                        // Line continuation
                        b'\r' => {
                            if self.peek_char()? == Some(b'\n') {
                                self.consume_char()?;
                            }
                        }
                        b'\n' => {}
                        // \( \) \\ and unknown escapes yield the character itself
                        other => string.push(other),
                    }
                }
                b'(' => {
                    depth += 1;
                    string.push(ch);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    string.push(ch);
                }
                b'\r' => {
                    if self.peek_char()? == Some(b'\n') {
                        self.consume_char()?;
                    }
                    string.push(b'\n');
                }
                _ => string.push(ch),
            }
        }

        Ok(Token::String(string))
    }

    /// Read angle bracket tokens (hex strings or dict markers)
    fn read_angle_bracket(&mut self) -> Result<Token> {
        let start = self.position;
        self.consume_char()?; // consume '<'

        if self.peek_char()? == Some(b'<') {
            self.consume_char()?;
            return Ok(Token::DictStart);
        }

        let mut bytes = Vec::new();
        let mut high: Option<u8> = None;
        loop {
            let ch = self
                .consume_char()?
                .ok_or_else(|| PdfError::syntax(start, "unterminated hex string"))?;
            if ch == b'>' {
                break;
            }
            if is_whitespace(ch) {
                continue;
            }
            let value = hex_value(ch).ok_or_else(|| {
                PdfError::syntax(
                    self.position - 1,
                    format!("invalid character 0x{ch:02X} in hex string"),
                )
            })?;
            match high.take() {
                Some(h) => bytes.push(h << 4 | value),
                None => high = Some(value),
            }
        }

        // An odd digit count behaves as if followed by 0
        if let Some(h) = high {
            bytes.push(h << 4);
        }

        Ok(Token::HexString(bytes))
    }

    /// Read a number (integer or real)
    fn read_number(&mut self) -> Result<Token> {
        let start = self.position;
        let mut negative = false;
        let mut signs = 0usize;

        while let Some(ch @ (b'+' | b'-')) = self.peek_char()? {
            self.consume_char()?;
            signs += 1;
            if signs == 1 {
                negative = ch == b'-';
            }
        }
        if signs > 1 && self.strict {
            return Err(PdfError::syntax(start, "repeated sign in number"));
        }

        let mut digits = String::new();
        let mut has_dot = false;
        while let Some(ch) = self.peek_char()? {
            match ch {
                b'0'..=b'9' => digits.push(char::from(ch)),
                b'.' if !has_dot => {
                    has_dot = true;
                    digits.push('.');
                }
                _ => break,
            }
            self.consume_char()?;
        }

        if digits.is_empty() || digits == "." {
            if self.strict {
                return Err(PdfError::syntax(start, "sign or dot without digits"));
            }
            return Ok(Token::Integer(0));
        }

        if !has_dot {
            if let Ok(value) = digits.parse::<i64>() {
                return Ok(Token::Integer(if negative { -value } else { value }));
            }
        }

        let value = digits
            .parse::<f64>()
            .map_err(|_| PdfError::syntax(start, format!("invalid number '{digits}'")))?;
        Ok(Token::Real(if negative { -value } else { value }))
    }

    /// Read a keyword
    fn read_keyword(&mut self) -> Result<Token> {
        let mut word = Vec::new();
        while let Some(ch) = self.peek_char()? {
            if !is_regular(ch) {
                break;
            }
            self.consume_char()?;
            word.push(ch);
        }

        Ok(match word.as_slice() {
            b"true" => Token::Boolean(true),
            b"false" => Token::Boolean(false),
            b"null" => Token::Null,
            _ => Token::Keyword(word),
        })
    }

    /// Consume the end-of-line marker that follows the `stream` keyword.
    ///
    /// `\r\n` and `\n` are standard; a bare `\r`, or spaces before the EOL,
    /// are accepted unless strict.
    pub fn skip_stream_eol(&mut self) -> Result<()> {
        let offset = self.position;
        if !self.strict {
            while self.peek_char()? == Some(b' ') {
                self.consume_char()?;
            }
        }
        match self.peek_char()? {
            Some(b'\n') => {
                self.consume_char()?;
            }
            Some(b'\r') => {
                self.consume_char()?;
                if self.peek_char()? == Some(b'\n') {
                    self.consume_char()?;
                } else if self.strict {
                    return Err(PdfError::syntax(offset, "bare CR after 'stream'"));
                }
            }
            _ if self.strict => {
                return Err(PdfError::syntax(offset, "missing EOL after 'stream'"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Read exactly `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(n);
        if n > 0 {
            if let Some(ch) = self.peek_buffer.take() {
                bytes.push(ch);
            }
        }
        let remaining = (n - bytes.len()) as u64;
        (&mut self.reader).take(remaining).read_to_end(&mut bytes)?;
        self.position += bytes.len() as u64;
        if bytes.len() < n {
            return Err(PdfError::UnexpectedEof(self.position));
        }
        Ok(bytes)
    }

    /// Read up to `limit` bytes until `sequence` is found.
    ///
    /// Returns the bytes before the sequence and leaves the lexer just past
    /// it, or `None` when the sequence does not occur.
    pub fn read_until_sequence(&mut self, sequence: &[u8], limit: usize) -> Result<Option<Vec<u8>>> {
        let mut result = Vec::new();
        while result.len() < limit.saturating_add(sequence.len()) {
            let Some(ch) = self.consume_char()? else {
                return Ok(None);
            };
            result.push(ch);
            if result.ends_with(sequence) {
                result.truncate(result.len() - sequence.len());
                return Ok(Some(result));
            }
        }
        Ok(None)
    }
}

impl<R: Read + Seek> Lexer<R> {
    /// Reposition to an absolute offset, dropping buffered state.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        self.peek_buffer = None;
        self.token_buffer.clear();
        Ok(())
    }

    /// Total length of the underlying source. Leaves the position unchanged.
    pub fn len(&mut self) -> Result<u64> {
        let current = self.position;
        let end = self.reader.seek(SeekFrom::End(0))?;
        self.seek(current)?;
        Ok(end)
    }

    /// Read up to `n` bytes at `offset` without disturbing the token state.
    pub fn read_at(&mut self, offset: u64, n: usize) -> Result<Vec<u8>> {
        let saved = self.position;
        let pushed = std::mem::take(&mut self.token_buffer);
        self.seek(offset)?;
        let mut bytes = Vec::with_capacity(n);
        (&mut self.reader).take(n as u64).read_to_end(&mut bytes)?;
        self.seek(saved)?;
        self.token_buffer = pushed;
        Ok(bytes)
    }

    pub(crate) fn get_mut(&mut self) -> &mut R {
        self.reader.get_mut()
    }
}
