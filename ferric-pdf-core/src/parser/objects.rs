//! Object parser
//!
//! Builds [`Object`] values from lexer tokens, assembles `N G R` references
//! with two-token lookahead and captures stream payloads.

use super::lexer::{Lexer, Token};
use super::stack_safe::StackSafeContext;
use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId, PdfString};
use std::io::{Read, Seek};
use tracing::warn;

/// Body of an indirect object as found after `N G obj`.
#[derive(Debug)]
pub enum IndirectBody {
    Object(Object),
    /// A stream dictionary; the payload starts at `data_offset`.
    Stream {
        dict: Dictionary,
        data_offset: u64,
    },
}

/// Keywords that end an object; seeing one inside a container means the
/// container was never closed.
fn is_object_boundary(token: &Token) -> bool {
    [&b"endobj"[..], b"stream", b"endstream", b"obj", b"xref", b"trailer", b"startxref"]
        .iter()
        .any(|k| token.is_keyword(k))
}

/// Parse one direct object from the lexer.
pub fn parse_object<R: Read>(lexer: &mut Lexer<R>, options: &ParseOptions) -> Result<Object> {
    let mut ctx = StackSafeContext::new(options.max_nesting_depth);
    let token = lexer.next_token()?;
    parse_value(lexer, token, options, &mut ctx)
}

fn parse_value<R: Read>(
    lexer: &mut Lexer<R>,
    token: Token,
    options: &ParseOptions,
    ctx: &mut StackSafeContext,
) -> Result<Object> {
    match token {
        Token::Integer(n) => parse_number_or_reference(lexer, n),
        Token::Real(r) => Ok(Object::Real(r)),
        Token::Boolean(b) => Ok(Object::Boolean(b)),
        Token::Null => Ok(Object::Null),
        Token::String(bytes) => Ok(Object::String(PdfString::new(bytes))),
        Token::HexString(bytes) => Ok(Object::String(PdfString::hex(bytes))),
        Token::Name(name) => Ok(Object::Name(name)),
        Token::ArrayStart => parse_array(lexer, options, ctx),
        Token::DictStart => parse_dictionary(lexer, options, ctx),
        Token::Eof => Err(PdfError::UnexpectedEof(lexer.position())),
        other => Err(PdfError::syntax(
            lexer.token_start(),
            format!("unexpected {}", other.describe()),
        )),
    }
}

fn parse_number_or_reference<R: Read>(lexer: &mut Lexer<R>, number: i64) -> Result<Object> {
    if !(0..=i64::from(u32::MAX)).contains(&number) {
        return Ok(Object::Integer(number));
    }

    let second = lexer.next_token()?;
    let generation = match second {
        Token::Integer(g) if (0..=i64::from(u16::MAX)).contains(&g) => g as u16,
        _ => {
            lexer.push_token(second);
            return Ok(Object::Integer(number));
        }
    };

    let third = lexer.next_token()?;
    if third.is_keyword(b"R") {
        return Ok(Object::Reference(ObjectId::new(number as u32, generation)));
    }
    lexer.push_token(third);
    lexer.push_token(second);
    Ok(Object::Integer(number))
}

fn parse_array<R: Read>(
    lexer: &mut Lexer<R>,
    options: &ParseOptions,
    ctx: &mut StackSafeContext,
) -> Result<Object> {
    let start = lexer.token_start();
    ctx.enter(start)?;
    let mut items = Vec::new();

    loop {
        let token = lexer.next_token()?;
        match token {
            Token::ArrayEnd => break,
            Token::Eof => return Err(PdfError::syntax(start, "unterminated array")),
            ref t if is_object_boundary(t) => {
                return Err(PdfError::syntax(start, "unterminated array"));
            }
            Token::Keyword(ref k) if !options.strict => {
                warn!(
                    "Skipping stray token '{}' in array at offset {}",
                    String::from_utf8_lossy(k),
                    lexer.token_start()
                );
            }
            Token::DictEnd if !options.strict => {
                warn!("Skipping stray '>>' in array at offset {}", lexer.token_start());
            }
            token => items.push(parse_value(lexer, token, options, ctx)?),
        }
    }

    ctx.exit();
    Ok(Object::Array(items))
}

fn parse_dictionary<R: Read>(
    lexer: &mut Lexer<R>,
    options: &ParseOptions,
    ctx: &mut StackSafeContext,
) -> Result<Object> {
    let start = lexer.token_start();
    ctx.enter(start)?;
    let mut dict = Dictionary::new();

    loop {
        let token = lexer.next_token()?;
        let key = match token {
            Token::DictEnd => break,
            Token::Name(key) => key,
            Token::Eof => return Err(PdfError::syntax(start, "unterminated dictionary")),
            ref t if is_object_boundary(t) => {
                return Err(PdfError::syntax(start, "unterminated dictionary"));
            }
            other if options.strict => {
                return Err(PdfError::syntax(
                    lexer.token_start(),
                    format!("expected dictionary key, found {}", other.describe()),
                ));
            }
            other => {
                warn!(
                    "Skipping {} in place of a dictionary key at offset {}",
                    other.describe(),
                    lexer.token_start()
                );
                continue;
            }
        };

        let value_token = lexer.next_token()?;
        if value_token == Token::DictEnd {
            if options.strict {
                return Err(PdfError::syntax(
                    lexer.token_start(),
                    format!("dictionary key /{key} has no value"),
                ));
            }
            warn!("Dictionary key /{key} has no value at offset {}", lexer.token_start());
            break;
        }

        let value = parse_value(lexer, value_token, options, ctx)?;
        // A null value is equivalent to the key being absent
        if !value.is_null() {
            dict.set(key, value);
        }
    }

    ctx.exit();
    Ok(Object::Dictionary(dict))
}

fn expect_integer<R: Read>(lexer: &mut Lexer<R>, what: &str, max: i64) -> Result<i64> {
    match lexer.next_token()? {
        Token::Integer(n) if (0..=max).contains(&n) => Ok(n),
        Token::Eof => Err(PdfError::UnexpectedEof(lexer.position())),
        other => Err(PdfError::syntax(
            lexer.token_start(),
            format!("expected {what}, found {}", other.describe()),
        )),
    }
}

/// Parse `N G obj` and the value after it.
///
/// When the value is a dictionary followed by `stream`, the end-of-line after
/// the keyword is consumed and the payload offset is returned instead.
pub fn parse_indirect_header<R: Read>(
    lexer: &mut Lexer<R>,
    options: &ParseOptions,
) -> Result<(ObjectId, IndirectBody)> {
    let number = expect_integer(lexer, "object number", i64::from(u32::MAX))?;
    let generation = expect_integer(lexer, "generation number", i64::from(u16::MAX))?;
    let keyword = lexer.next_token()?;
    if !keyword.is_keyword(b"obj") {
        return Err(PdfError::syntax(
            lexer.token_start(),
            format!("expected 'obj', found {}", keyword.describe()),
        ));
    }
    let id = ObjectId::new(number as u32, generation as u16);

    let value_token = lexer.next_token()?;
    if value_token.is_keyword(b"endobj") {
        if options.strict {
            return Err(PdfError::syntax(lexer.token_start(), format!("object {id} is empty")));
        }
        lexer.push_token(value_token);
        return Ok((id, IndirectBody::Object(Object::Null)));
    }

    let mut ctx = StackSafeContext::new(options.max_nesting_depth);
    let value = parse_value(lexer, value_token, options, &mut ctx)?;

    if let Object::Dictionary(dict) = value {
        let next = lexer.next_token()?;
        if next.is_keyword(b"stream") {
            lexer.skip_stream_eol()?;
            return Ok((
                id,
                IndirectBody::Stream {
                    dict,
                    data_offset: lexer.position(),
                },
            ));
        }
        lexer.push_token(next);
        return Ok((id, IndirectBody::Object(Object::Dictionary(dict))));
    }

    Ok((id, IndirectBody::Object(value)))
}

/// Consume the closing `endobj`; tolerated missing unless strict.
pub fn expect_endobj<R: Read>(lexer: &mut Lexer<R>, options: &ParseOptions) -> Result<()> {
    let token = lexer.next_token()?;
    if token.is_keyword(b"endobj") {
        return Ok(());
    }
    if options.strict {
        return Err(PdfError::syntax(
            lexer.token_start(),
            format!("expected 'endobj', found {}", token.describe()),
        ));
    }
    warn!("Missing 'endobj' at offset {}", lexer.token_start());
    Ok(())
}

/// Read a stream payload starting at `data_offset`.
///
/// `length` is the resolved `/Length`, if any. When it is missing, runs past
/// the end of the file or is not followed by `endstream`, lenient parsing
/// delimits the payload by scanning for `endstream` instead.
pub fn read_stream_payload<R: Read + Seek>(
    lexer: &mut Lexer<R>,
    data_offset: u64,
    length: Option<u64>,
    file_len: u64,
    options: &ParseOptions,
) -> Result<Vec<u8>> {
    match length {
        Some(len) if data_offset.checked_add(len).is_some_and(|end| end <= file_len) => {
            if len > options.max_decoded_stream_size as u64 {
                return Err(PdfError::OutOfMemory {
                    requested: usize::try_from(len).unwrap_or(usize::MAX),
                    limit: options.max_decoded_stream_size,
                });
            }
            lexer.seek(data_offset)?;
            let data = lexer.read_bytes(len as usize)?;
            if lexer.next_token()?.is_keyword(b"endstream") {
                return Ok(data);
            }
            if options.strict {
                return Err(PdfError::broken(
                    data_offset + len,
                    "stream data not followed by 'endstream'",
                ));
            }
            warn!(
                "Stream at offset {data_offset} has wrong /Length {len}, scanning for 'endstream'"
            );
        }
        Some(len) => {
            if options.strict {
                return Err(PdfError::broken(
                    data_offset,
                    format!("stream /Length {len} runs past end of file"),
                ));
            }
            warn!("Stream at offset {data_offset} has /Length {len} past end of file");
        }
        None => {
            if options.strict {
                return Err(PdfError::broken(data_offset, "stream without usable /Length"));
            }
            warn!("Stream at offset {data_offset} has no usable /Length");
        }
    }

    lexer.seek(data_offset)?;
    let mut data = lexer
        .read_until_sequence(b"endstream", options.max_decoded_stream_size)?
        .ok_or_else(|| PdfError::broken(data_offset, "no 'endstream' after stream data"))?;
    if data.ends_with(b"\r\n") {
        data.truncate(data.len() - 2);
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data.truncate(data.len() - 1);
    }
    Ok(data)
}
