//! Decoded messages: named fields, recovered problems, views, and the
//! fetch-to-display pipeline.

use std::fmt;

use serde::Serialize;

pub mod fields;
pub mod pipeline;
pub mod view;

pub use fields::{extract_fields, HeaderFields, SUMMARY_FIELDS};
pub use pipeline::{decode_literal, decode_stream, fetch_message, FetchedMessage};
pub use view::{render, MessageView, View};

/// A problem that was recovered from while decoding a message.
///
/// The message is still displayable, but part of it may be incomplete or
/// shown undecoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// The server sent fewer bytes than the literal announced.
    TruncatedLiteral { declared: usize, received: usize },
    /// An encoded word in this header was kept raw.
    HeaderDecode { field: String },
    /// The MIME structure was malformed; part of it is shown as raw text.
    MimeParse,
    /// The body's charset was unknown or its bytes were invalid.
    Charset,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedLiteral { declared, received } => write!(
                f,
                "message truncated: received {received} of {declared} bytes"
            ),
            Self::HeaderDecode { field } => write!(f, "{field}: encoded text could not be decoded"),
            Self::MimeParse => f.write_str("MIME structure malformed, showing raw body"),
            Self::Charset => f.write_str("body charset could not be decoded cleanly"),
        }
    }
}
