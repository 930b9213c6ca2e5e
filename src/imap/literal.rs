//! Literal extraction from a captured IMAP response stream.
//!
//! A literal is announced by `{N}` at the end of a line and followed by
//! exactly `N` raw bytes. The payload is opaque: it may contain CRLFs, NULs,
//! or text that looks like protocol lines, so nothing inside it is parsed.

use tracing::{debug, warn};

use crate::error::{MailError, Result};

/// Raw bytes received from the server for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseStream {
    bytes: Vec<u8>,
}

impl ResponseStream {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for ResponseStream {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for ResponseStream {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

/// How a [`Literal`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralKind {
    /// All declared bytes were present.
    Complete,
    /// The stream ended early; the payload is the cleaned-up remainder.
    Truncated,
    /// No `{N}` marker; the whole stream is the payload.
    Implicit,
}

/// A length-prefixed payload lifted out of a response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    /// Byte count announced by the marker (equal to `bytes.len()` for
    /// implicit literals).
    pub declared_length: usize,
    pub bytes: Vec<u8>,
    pub kind: LiteralKind,
}

impl Literal {
    /// `true` when the payload came from the truncation fallback and may be
    /// incomplete or carry protocol residue.
    pub fn is_truncated(&self) -> bool {
        self.kind == LiteralKind::Truncated
    }

    /// Number of announced bytes that never arrived.
    pub fn missing_bytes(&self) -> usize {
        self.declared_length.saturating_sub(self.bytes.len())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// A `{N}` marker located in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Marker {
    declared: usize,
    /// Offset of the first payload byte (just past the line terminator).
    payload_start: usize,
}

/// Scanner state: where the last accepted marker's payload lies.
enum Found {
    None,
    Complete { declared: usize, start: usize },
    Truncated { declared: usize, start: usize },
}

/// Extract the authoritative literal from `stream`.
///
/// When several markers are present the last one wins. Payloads are skipped
/// while scanning, so marker-like text inside a payload never counts.
pub fn extract_literal(stream: &ResponseStream) -> Result<Literal> {
    let data = stream.as_bytes();
    let mut cursor = 0;
    let mut found = Found::None;

    while let Some(marker) = find_marker(data, cursor) {
        let available = data.len() - marker.payload_start;
        if available >= marker.declared {
            found = Found::Complete {
                declared: marker.declared,
                start: marker.payload_start,
            };
            cursor = marker.payload_start + marker.declared;
        } else {
            found = Found::Truncated {
                declared: marker.declared,
                start: marker.payload_start,
            };
            break;
        }
    }

    match found {
        Found::Complete { declared, start } => {
            debug!(declared, "Extracted literal");
            Ok(Literal {
                declared_length: declared,
                bytes: data[start..start + declared].to_vec(),
                kind: LiteralKind::Complete,
            })
        }
        Found::Truncated { declared, start } => {
            let payload = strip_trailing_status(&data[start..]);
            warn!(
                declared,
                received = data.len() - start,
                kept = payload.len(),
                "Literal truncated, using remainder of stream"
            );
            Ok(Literal {
                declared_length: declared,
                bytes: payload.to_vec(),
                kind: LiteralKind::Truncated,
            })
        }
        Found::None => {
            if is_degenerate(data) {
                return Err(MailError::NoLiteralFound(data.len()));
            }
            debug!(len = data.len(), "No literal marker, treating stream as payload");
            Ok(Literal {
                declared_length: data.len(),
                bytes: data.to_vec(),
                kind: LiteralKind::Implicit,
            })
        }
    }
}

/// Find the next `{digits}` + line terminator at or after `from`.
fn find_marker(data: &[u8], from: usize) -> Option<Marker> {
    let mut pos = from;
    while pos < data.len() {
        let open = pos + data[pos..].iter().position(|&b| b == b'{')?;
        if let Some(marker) = marker_at(data, open) {
            return Some(marker);
        }
        pos = open + 1;
    }
    None
}

/// Parse a marker whose `{` sits at `open`.
fn marker_at(data: &[u8], open: usize) -> Option<Marker> {
    let digits_start = open + 1;
    let digits_len = data[digits_start..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }
    let close = digits_start + digits_len;
    if data.get(close) != Some(&b'}') {
        return None;
    }

    let declared = data[digits_start..close].iter().try_fold(0usize, |acc, &d| {
        acc.checked_mul(10)?.checked_add(usize::from(d - b'0'))
    })?;

    let after = close + 1;
    let payload_start = if data[after..].starts_with(b"\r\n") {
        after + 2
    } else if data[after..].starts_with(b"\n") {
        after + 1
    } else {
        return None;
    };

    Some(Marker {
        declared,
        payload_start,
    })
}

/// If `line` ends with a literal marker, return the announced size.
///
/// Used by the session reader to know how many raw bytes follow a line.
pub(crate) fn trailing_marker(line: &[u8]) -> Option<usize> {
    let open = line.iter().rposition(|&b| b == b'{')?;
    let marker = marker_at(line, open)?;
    (marker.payload_start == line.len()).then_some(marker.declared)
}

/// Drop protocol residue from the tail of a truncated payload.
///
/// Removes, from the end, any tagged or untagged completion lines and a lone
/// `)` that closes the FETCH item.
fn strip_trailing_status(payload: &[u8]) -> &[u8] {
    let mut end = payload.len();
    loop {
        let content_end = trim_line_ending(payload, end);
        if content_end == 0 {
            return &payload[..end];
        }
        let line_start = payload[..content_end]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |p| p + 1);
        let line = &payload[line_start..content_end];
        if is_status_line(line) || line.trim_ascii() == b")" {
            end = line_start;
        } else {
            return &payload[..end];
        }
    }
}

fn trim_line_ending(data: &[u8], mut end: usize) -> usize {
    while end > 0 && matches!(data[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    end
}

/// `* OK ...`, `* BYE ...`, or `A0001 OK/NO/BAD ...`.
pub(crate) fn is_status_line(line: &[u8]) -> bool {
    let line = line.trim_ascii();
    let mut parts = line.splitn(3, |&b| b == b' ');
    let (Some(tag), Some(status)) = (parts.next(), parts.next()) else {
        return false;
    };
    let status = status.to_ascii_uppercase();
    if tag == b"*" {
        return matches!(status.as_slice(), b"OK" | b"NO" | b"BAD" | b"BYE" | b"PREAUTH");
    }
    is_command_tag(tag) && matches!(status.as_slice(), b"OK" | b"NO" | b"BAD")
}

/// Tags are short alphanumerics containing at least one digit (`A0001`, `a3`).
fn is_command_tag(tag: &[u8]) -> bool {
    !tag.is_empty()
        && tag.len() <= 32
        && tag.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'.')
        && tag.iter().any(u8::is_ascii_digit)
}

/// A stream with no payload: empty, blank, or only protocol chatter.
fn is_degenerate(data: &[u8]) -> bool {
    data.split(|&b| b == b'\n')
        .map(<[u8]>::trim_ascii)
        .filter(|line| !line.is_empty())
        .all(|line| {
            line.starts_with(b"* ") || line.starts_with(b"+ ") || line == b")" || is_status_line(line)
        })
}
