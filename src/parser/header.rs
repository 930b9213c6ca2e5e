//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), and date parsing.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::charset::{decode_charset, decode_lenient};

/// Base64 engine that accepts missing or superfluous padding and trailing
/// bits, which real-world mailers produce routinely.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// The header section of a message: everything before the first blank line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderBlock<'a> {
    raw: &'a [u8],
}

impl<'a> HeaderBlock<'a> {
    pub fn new(raw: &'a [u8]) -> Self {
        Self { raw }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.trim_ascii().is_empty()
    }

    /// Each field's physical lines, folding preserved (joined with `\n`).
    pub fn raw_lines(&self) -> Vec<String> {
        let text = decode_lenient(self.raw);
        let mut fields: Vec<String> = Vec::new();
        for line in text.lines() {
            if line.starts_with([' ', '\t']) {
                if let Some(last) = fields.last_mut() {
                    last.push('\n');
                    last.push_str(line);
                }
            } else if split_field(line).is_some() {
                fields.push(line.to_string());
            }
            // Anything else (an mbox "From " line, garbage) is skipped.
        }
        fields
    }

    /// Unfolded `(name, raw_value)` pairs in order. Names keep their case.
    pub fn fields(&self) -> Vec<(String, String)> {
        self.raw_lines()
            .iter()
            .filter_map(|field| {
                let unfolded = unfold(field);
                let (name, value) = split_field(&unfolded)?;
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }
}

/// Split a raw message into its header block and body.
///
/// The header block ends at the first blank line, or at the first line that
/// is neither a `Name: value` field nor a continuation; such a line starts
/// the body. Input that never leaves the header block has an empty body.
pub fn split_message(raw: &[u8]) -> (HeaderBlock<'_>, &[u8]) {
    let (end, body_start) = find_header_end(raw);
    (HeaderBlock::new(&raw[..end]), &raw[body_start..])
}

/// Returns (end of headers, start of body).
fn find_header_end(data: &[u8]) -> (usize, usize) {
    let mut pos = 0;
    while pos < data.len() {
        let line_end = data[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(data.len(), |i| pos + i + 1);
        let line = &data[pos..line_end];

        if matches!(line, b"\r\n" | b"\n") {
            return (pos, line_end);
        }
        let continuation = pos > 0 && matches!(line.first(), Some(b' ' | b'\t'));
        let mbox_from = pos == 0 && line.starts_with(b"From ");
        let field = split_field(&String::from_utf8_lossy(line)).is_some();
        if !(continuation || mbox_from || field) {
            return (pos, pos);
        }
        pos = line_end;
    }
    (data.len(), data.len())
}

/// Join a folded field into one line.
///
/// Each line break plus the continuation's leading whitespace becomes a
/// single space. Stray CR or LF characters also become spaces.
pub fn unfold(field: &str) -> String {
    let mut lines = field.lines();
    let mut out = String::with_capacity(field.len());
    push_single_line(&mut out, lines.next().unwrap_or_default().trim_end());
    for cont in lines {
        let cont = cont.trim();
        if cont.is_empty() {
            continue;
        }
        out.push(' ');
        push_single_line(&mut out, cont);
    }
    out
}

/// `Name: value` with a syntactically valid field name.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim_end();
    let valid = !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':');
    valid.then(|| (name, value.trim()))
}

// ── Decoded fields ──────────────────────────────────────────────

/// A header field after unfolding and RFC 2047 decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedHeader {
    pub name: String,
    /// Single-line display value.
    pub value: String,
    /// At least one encoded word could not be decoded and was kept raw.
    pub degraded: bool,
}

/// Decode every field of `block`, in order.
pub fn decode_header_block(block: &HeaderBlock) -> Vec<DecodedHeader> {
    block
        .fields()
        .into_iter()
        .map(|(name, raw)| decode_field(name, &raw))
        .collect()
}

/// Decoded value of the first field called `name` (case-insensitive).
///
/// A field present with no value yields `Some("")`.
pub fn get_field(block: &HeaderBlock, name: &str) -> Option<String> {
    find_field(block, name).map(|h| h.value)
}

/// Like [`get_field`], keeping the field's name and degradation flag.
pub fn find_field(block: &HeaderBlock, name: &str) -> Option<DecodedHeader> {
    block
        .fields()
        .into_iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(n, raw)| decode_field(n, &raw))
}

fn decode_field(name: String, raw: &str) -> DecodedHeader {
    let (value, degraded) = decode_encoded_words_checked(raw);
    if degraded {
        warn!(field = %name, "Undecodable encoded word kept raw");
    }
    DecodedHeader {
        name,
        value,
        degraded,
    }
}

// ── RFC 2047 ────────────────────────────────────────────────────

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?="` → `"Hola"`
///
/// Undecodable words are kept as written. Text between words, including
/// whitespace between two encoded words, is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    decode_encoded_words_checked(input).0
}

/// [`decode_encoded_words`], also reporting whether any word was kept raw.
pub fn decode_encoded_words_checked(input: &str) -> (String, bool) {
    let mut result = String::with_capacity(input.len());
    let mut degraded = false;
    let mut remaining = input;

    while let Some(start) = remaining.find("=?") {
        result.push_str(&remaining[..start]);
        let word = &remaining[start..];

        match EncodedWord::parse(word) {
            Some(ew) => {
                match ew.decode() {
                    Some(text) => push_single_line(&mut result, &text),
                    None => {
                        debug!(word = &word[..ew.len], "Keeping undecodable encoded word");
                        result.push_str(&word[..ew.len]);
                        degraded = true;
                    }
                }
                remaining = &word[ew.len..];
            }
            None => {
                result.push_str("=?");
                remaining = &word[2..];
            }
        }
    }

    result.push_str(remaining);
    (result, degraded)
}

/// Append `text` with any line breaks flattened to spaces.
fn push_single_line(out: &mut String, text: &str) {
    out.extend(text.chars().map(|c| if c == '\r' || c == '\n' { ' ' } else { c }));
}

/// A syntactically well-formed `=?charset?encoding?payload?=` token.
struct EncodedWord<'a> {
    charset: &'a str,
    encoding: &'a str,
    payload: &'a str,
    /// Length of the whole token including delimiters.
    len: usize,
}

impl<'a> EncodedWord<'a> {
    /// Parse a word at the start of `s`, which must begin with `=?`.
    fn parse(s: &'a str) -> Option<Self> {
        let body = s.strip_prefix("=?")?;
        let (charset, rest) = body.split_once('?')?;
        let (encoding, rest) = rest.split_once('?')?;
        let end = rest.find("?=")?;
        let payload = &rest[..end];

        let well_formed = !charset.is_empty()
            && !encoding.is_empty()
            && [charset, encoding, payload]
                .iter()
                .all(|part| !part.contains(|c: char| c.is_whitespace()));
        if !well_formed {
            return None;
        }

        Some(Self {
            charset,
            encoding,
            payload,
            len: 2 + charset.len() + 1 + encoding.len() + 1 + end + 2,
        })
    }

    /// Decoded text, or `None` when any step fails.
    fn decode(&self) -> Option<String> {
        let bytes = match self.encoding {
            "B" | "b" => LENIENT_BASE64.decode(self.payload).ok()?,
            "Q" | "q" => decode_q_encoding(self.payload)?,
            _ => return None,
        };
        let decoded = decode_charset(self.charset, &bytes);
        (!decoded.degraded).then_some(decoded.text)
    }
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
///
/// A malformed escape fails the whole word.
fn decode_q_encoding(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => {
                result.push(hex_pair(bytes.get(i + 1..i + 3)?)?);
                i += 3;
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    Some(result)
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    let hi = (pair[0] as char).to_digit(16)?;
    let lo = (pair[1] as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

// ── Dates ───────────────────────────────────────────────────────

const DATE_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S",
    "%b %d %H:%M:%S %Y",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

const NAMED_ZONES: &[(&str, &str)] = &[
    ("UTC", "+0000"),
    ("GMT", "+0000"),
    ("UT", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
    ("CEST", "+0200"),
    ("CET", "+0100"),
    ("JST", "+0900"),
];

/// Parse a `Date` header value.
///
/// Accepts RFC 2822, RFC 3339, IMAP-style `16-JUL-2025 03:01:03`, named
/// zones, and whatever `mail-parser` understands as a last resort.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = strip_trailing_comment(value.trim());
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let bare = strip_weekday(value);
    let mut candidates = vec![bare.to_string()];
    candidates.extend(imap_style(bare));
    let zoned: Vec<String> = candidates.iter().filter_map(|c| numeric_zone(c)).collect();
    candidates.extend(zoned);

    for candidate in &candidates {
        for fmt in DATE_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
    }

    let parsed = mail_parser_date(value);
    if parsed.is_none() {
        warn!(date = value, "Could not parse date");
    }
    parsed
}

fn mail_parser_date(value: &str) -> Option<DateTime<Utc>> {
    let wrapped = format!("Date: {value}\r\n\r\n");
    let message = mail_parser::MessageParser::default().parse(wrapped.as_bytes())?;
    DateTime::from_timestamp(message.date()?.to_timestamp(), 0)
}

/// `"... +0000 (UTC)"` → `"... +0000"`.
fn strip_trailing_comment(s: &str) -> &str {
    match s.strip_suffix(')').and_then(|rest| rest.rfind('(')) {
        Some(open) => s[..open].trim_end(),
        None => s,
    }
}

fn strip_weekday(s: &str) -> &str {
    let Some((head, rest)) = s.split_once([',', ' ']) else {
        return s;
    };
    if head.len() == 3 && head.chars().all(|c| c.is_ascii_alphabetic()) {
        rest.trim_start()
    } else {
        s
    }
}

/// `16-JUL-2025 03:01:03` → `16 Jul 2025 03:01:03`.
fn imap_style(s: &str) -> Option<String> {
    let (date, time) = s.split_once(' ').unwrap_or((s, ""));
    let mut parts = date.splitn(3, '-');
    let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
    if month.len() != 3 || !month.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let month = format!("{}{}", &month[..1].to_ascii_uppercase(), &month[1..].to_ascii_lowercase());
    Some(format!("{day} {month} {year} {time}").trim_end().to_string())
}

/// Replace a trailing zone abbreviation with its numeric offset.
fn numeric_zone(s: &str) -> Option<String> {
    let (head, zone) = s.rsplit_once(' ')?;
    let offset = NAMED_ZONES
        .iter()
        .find(|(name, _)| zone.eq_ignore_ascii_case(name))
        .map(|(_, offset)| offset)?;
    Some(format!("{head} {offset}"))
}
