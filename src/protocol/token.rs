//! Whitespace-delimited token framing.
//!
//! The host writes envelopes separated by any run of whitespace (usually a
//! newline). [`TokenCodec`] splits the inbound byte stream into those tokens
//! and never yields an empty one. A token with no trailing whitespace at end
//! of stream is still yielded.
//!
//! Tokens longer than the configured maximum are skipped in full and reported
//! as [`Token::Oversized`] so a runaway producer cannot grow the buffer
//! without bound.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use cmdpipe::protocol::{Token, TokenCodec};
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = TokenCodec::new();
//! let mut buf = BytesMut::from(&b"  {\"a\":1}\n\n{\"b\":2}"[..]);
//!
//! assert_eq!(codec.decode(&mut buf).unwrap(), Some(Token::Word("{\"a\":1}".into())));
//! assert_eq!(codec.decode(&mut buf).unwrap(), None);
//! assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Token::Word("{\"b\":2}".into())));
//! ```

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// Default maximum token length (8 MiB).
pub const DEFAULT_MAX_TOKEN_LENGTH: usize = 8 * 1024 * 1024;

/// One unit read from the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A non-empty run of non-whitespace bytes.
    Word(Bytes),
    /// A token longer than the limit was skipped; carries its length.
    Oversized(usize),
}

/// Splits a byte stream on whitespace.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    /// Maximum accepted token length.
    max_length: usize,
    /// Offset already scanned for a delimiter in the current token.
    next_index: usize,
    /// Set while skipping the rest of an oversized token.
    discarding: bool,
    /// Bytes skipped so far for the oversized token.
    discarded: usize,
}

impl TokenCodec {
    /// Create a codec with the default maximum token length.
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_TOKEN_LENGTH)
    }

    /// Create a codec with a custom maximum token length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
            discarded: 0,
        }
    }

    /// Maximum accepted token length.
    #[inline]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn finish_discard(&mut self) -> Token {
        let len = self.discarded;
        self.discarding = false;
        self.discarded = 0;
        Token::Oversized(len)
    }
}

impl Default for TokenCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Whitespace as the host's scanner sees it: space, tab, LF, VT, FF, CR.
#[inline]
fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

impl Decoder for TokenCodec {
    type Item = Token;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Token>, io::Error> {
        if self.discarding {
            return match buf.iter().position(|&b| is_space(b)) {
                Some(end) => {
                    self.discarded += end;
                    buf.advance(end);
                    Ok(Some(self.finish_discard()))
                }
                None => {
                    self.discarded += buf.len();
                    buf.clear();
                    Ok(None)
                }
            };
        }

        if self.next_index == 0 {
            match buf.iter().position(|&b| !is_space(b)) {
                Some(start) => buf.advance(start),
                None => {
                    buf.clear();
                    return Ok(None);
                }
            }
        }

        match buf[self.next_index..].iter().position(|&b| is_space(b)) {
            Some(offset) => {
                let end = self.next_index + offset;
                self.next_index = 0;
                if end > self.max_length {
                    buf.advance(end);
                    return Ok(Some(Token::Oversized(end)));
                }
                Ok(Some(Token::Word(buf.split_to(end).freeze())))
            }
            None if buf.len() > self.max_length => {
                self.next_index = 0;
                self.discarding = true;
                self.discarded = buf.len();
                buf.clear();
                Ok(None)
            }
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Token>, io::Error> {
        if let Some(token) = self.decode(buf)? {
            return Ok(Some(token));
        }

        if self.discarding {
            return Ok(Some(self.finish_discard()));
        }

        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let len = buf.len();
        Ok(Some(Token::Word(buf.split_to(len).freeze())))
    }
}
