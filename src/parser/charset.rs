//! Charset decoding shared by header words and body parts.

use std::borrow::Cow;

use tracing::warn;

/// Text produced from bytes in a declared charset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetText {
    pub text: String,
    /// The charset was unknown or the bytes were invalid for it; `text` is a
    /// lossy rendition of the original bytes.
    pub degraded: bool,
}

/// Canonical form of a charset label: unquoted, lowercase, without an
/// RFC 2231 language suffix. Empty and ASCII labels become `utf-8`.
pub fn normalize_label(charset: &str) -> Cow<'_, str> {
    let label = charset.trim().trim_matches('"');
    let label = label.split('*').next().unwrap_or(label).trim();
    if label.is_empty()
        || label.eq_ignore_ascii_case("us-ascii")
        || label.eq_ignore_ascii_case("ascii")
        || label.eq_ignore_ascii_case("utf8")
    {
        return Cow::Borrowed("utf-8");
    }
    if label.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(label.to_ascii_lowercase())
    } else {
        Cow::Borrowed(label)
    }
}

/// Whether `charset` names an encoding that can be decoded.
pub fn is_known_label(charset: &str) -> bool {
    let label = normalize_label(charset);
    label == "utf-8" || encoding_rs::Encoding::for_label(label.as_bytes()).is_some()
}

/// Decode `bytes` as `charset`.
///
/// Never fails: unknown labels and malformed input fall back to lossy UTF-8
/// and set `degraded`.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> CharsetText {
    let label = normalize_label(charset);
    if label == "utf-8" {
        return match std::str::from_utf8(bytes) {
            Ok(s) => CharsetText {
                text: s.to_string(),
                degraded: false,
            },
            Err(_) => CharsetText {
                text: String::from_utf8_lossy(bytes).into_owned(),
                degraded: true,
            },
        };
    }

    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) => {
            let (decoded, _, had_errors) = encoding.decode(bytes);
            CharsetText {
                text: decoded.into_owned(),
                degraded: had_errors,
            }
        }
        None => {
            warn!(charset = %label, "Unknown charset, falling back to UTF-8 lossy");
            CharsetText {
                text: String::from_utf8_lossy(bytes).into_owned(),
                degraded: true,
            }
        }
    }
}

/// Decode bytes of unknown charset for display.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every
/// byte). A leading UTF-8 BOM is dropped.
pub fn decode_lenient(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Convert CRLF and lone CR line endings to LF.
pub fn normalize_newlines(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}
