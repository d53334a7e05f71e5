//! Protocol module - envelope types and token framing.
//!
//! This module implements the line-oriented JSON protocol:
//! - Whitespace-delimited token framing of the inbound stream
//! - Inbound [`Command`] envelopes with their [`Signal`] codes
//! - Outbound [`Response`] envelopes, one per line

mod envelope;
mod token;

pub use envelope::{Command, Response, Signal, NO_SIGNAL, TERMINATION};
pub use token::{Token, TokenCodec, DEFAULT_MAX_TOKEN_LENGTH};
