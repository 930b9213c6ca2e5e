//! MIME structure parsing and body text selection.
//!
//! `mail-parser` does the MIME work (boundaries, transfer and charset
//! decoding). Its flat part list is turned into a [`MimeEntity`] tree.
//! Structure problems never abort parsing: the affected entity becomes an
//! opaque leaf of unknown type holding its raw body.

use std::borrow::Cow;

use mail_parser::{ContentType, Message, MessageParser, MessagePart, MimeHeaders, PartType};
use serde::Serialize;
use tracing::{debug, warn};

use super::charset::{decode_lenient, is_known_label, normalize_label, normalize_newlines};
use super::header::split_message;
use super::html::html_to_text;
use crate::store::RawMessage;

/// Maximum nesting of multipart and message/rfc822 entities.
const MAX_DEPTH: usize = 10;

/// The media types the resolver distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    PlainText,
    Html,
    /// `multipart/<subtype>`.
    Multipart(String),
    /// `message/rfc822` (and `message/global`).
    Message,
    /// Any other well-formed `type/subtype`.
    Other(String),
    /// Opaque content left by a structure error.
    Unknown,
}

impl MediaType {
    /// Parse a lowercase `type/subtype`; `None` when it has no subtype.
    fn from_essence(essence: &str) -> Option<Self> {
        let (main, sub) = essence.split_once('/')?;
        let (main, sub) = (main.trim(), sub.trim());
        if main.is_empty() || sub.is_empty() {
            return None;
        }
        Some(match (main, sub) {
            ("text", "plain") => Self::PlainText,
            ("text", "html") => Self::Html,
            ("multipart", sub) => Self::Multipart(sub.to_string()),
            ("message", "rfc822" | "global") => Self::Message,
            _ => Self::Other(format!("{main}/{sub}")),
        })
    }

    fn from_content_type(ct: &ContentType) -> Option<Self> {
        let essence = format!("{}/{}", ct.ctype(), ct.subtype().unwrap_or_default());
        Self::from_essence(&essence.to_ascii_lowercase())
    }

    pub fn essence(&self) -> Cow<'_, str> {
        match self {
            Self::PlainText => "text/plain".into(),
            Self::Html => "text/html".into(),
            Self::Multipart(sub) => format!("multipart/{sub}").into(),
            Self::Message => "message/rfc822".into(),
            Self::Other(essence) => essence.as_str().into(),
            Self::Unknown => "application/octet-stream".into(),
        }
    }
}

/// A node of the MIME tree.
#[derive(Debug, Clone)]
pub enum MimeEntity<'a> {
    Leaf(Leaf<'a>),
    Composite(Composite<'a>),
}

/// A single body part.
#[derive(Debug, Clone)]
pub struct Leaf<'a> {
    pub media_type: MediaType,
    /// Normalized charset label (`utf-8` when undeclared).
    pub charset: String,
    /// Decoded text of `text/*` parts; empty for binary parts.
    pub text: Cow<'a, str>,
    /// `Content-Disposition: attachment`.
    pub is_attachment: bool,
    /// Invalid transfer encoding, unknown charset, or bytes invalid for the
    /// charset. Opaque leaves are always degraded.
    pub degraded: bool,
    /// Body as it appeared in the message, before transfer decoding.
    pub raw_body: Cow<'a, [u8]>,
}

/// A multipart entity or an enclosed message.
#[derive(Debug, Clone)]
pub struct Composite<'a> {
    pub media_type: MediaType,
    pub children: Vec<MimeEntity<'a>>,
    pub raw_body: Cow<'a, [u8]>,
}

impl<'a> MimeEntity<'a> {
    pub fn media_type(&self) -> &MediaType {
        match self {
            Self::Leaf(leaf) => &leaf.media_type,
            Self::Composite(composite) => &composite.media_type,
        }
    }

    /// The entity's body bytes as they appear in the message.
    pub fn raw_body(&self) -> &[u8] {
        match self {
            Self::Leaf(leaf) => &leaf.raw_body,
            Self::Composite(composite) => &composite.raw_body,
        }
    }

    /// Leaves in depth-first document order.
    pub fn leaves(&self) -> Vec<&Leaf<'a>> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'s>(&'s self, out: &mut Vec<&'s Leaf<'a>>) {
        match self {
            Self::Leaf(leaf) => out.push(leaf),
            Self::Composite(composite) => {
                for child in &composite.children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Some part of the tree could not be parsed and was kept opaque.
    pub fn is_malformed(&self) -> bool {
        self.leaves()
            .iter()
            .any(|leaf| leaf.media_type == MediaType::Unknown)
    }
}

// ── Parsing ─────────────────────────────────────────────────────

/// Parse a raw message into its MIME tree.
pub fn parse_mime(raw: &RawMessage) -> MimeEntity<'_> {
    parse_bytes(raw.as_bytes())
}

/// Parse message bytes (headers + body) into a MIME tree.
pub fn parse_bytes(bytes: &[u8]) -> MimeEntity<'_> {
    let bytes = skip_from_line(bytes);
    let (headers, body) = split_message(bytes);
    let separated = headers.as_bytes().len() + body.len() < bytes.len();

    let entity = if !separated && !body.is_empty() {
        warn!("Body starts without a blank line, keeping it opaque");
        opaque(Cow::Borrowed(body))
    } else {
        match MessageParser::default().parse(bytes) {
            Some(message) => convert_message(message, 0),
            None if body.trim_ascii().is_empty() => empty_text(),
            None => opaque(Cow::Borrowed(body)),
        }
    };

    debug!(
        media_type = %entity.media_type().essence(),
        leaves = entity.leaves().len(),
        "Parsed MIME structure"
    );
    entity
}

/// Drop a leading mbox `From ` separator line.
fn skip_from_line(data: &[u8]) -> &[u8] {
    if !data.starts_with(b"From ") {
        return data;
    }
    match data.iter().position(|&b| b == b'\n') {
        Some(nl) => &data[nl + 1..],
        None => &data[data.len()..],
    }
}

fn convert_message(message: Message<'_>, depth: usize) -> MimeEntity<'_> {
    let Message {
        parts,
        raw_message,
        ..
    } = message;
    let mut parts: Vec<Option<MessagePart<'_>>> = parts.into_iter().map(Some).collect();
    convert_part(&mut parts, 0, &raw_message, depth)
}

fn convert_part<'a>(
    parts: &mut [Option<MessagePart<'a>>],
    id: usize,
    raw: &Cow<'a, [u8]>,
    depth: usize,
) -> MimeEntity<'a> {
    let Some(part) = parts.get_mut(id).and_then(Option::take) else {
        return opaque(Cow::default());
    };

    let raw_body = slice_raw(raw, part.offset_body, part.offset_end);
    let content_type = part.content_type();
    let declared = content_type.and_then(MediaType::from_content_type);
    let charset = content_type
        .and_then(|ct| ct.attribute("charset"))
        .map(|cs| normalize_label(cs).into_owned())
        .unwrap_or_else(|| "utf-8".to_string());
    let is_attachment = part
        .content_disposition()
        .is_some_and(|cd| cd.is_attachment());
    let encoding_problem = part.is_encoding_problem;

    match (part.body, declared) {
        (PartType::Multipart(ids), declared) => {
            if depth >= MAX_DEPTH {
                warn!(depth, "MIME nesting too deep, keeping part opaque");
                return opaque(raw_body);
            }
            let subtype = match declared {
                Some(MediaType::Multipart(subtype)) => subtype,
                _ => "mixed".to_string(),
            };
            let children = ids
                .into_iter()
                .map(|child| convert_part(parts, child, raw, depth + 1))
                .collect();
            MimeEntity::Composite(Composite {
                media_type: MediaType::Multipart(subtype),
                children,
                raw_body,
            })
        }
        // mail-parser keeps a multipart body it could not split as a plain part.
        (_, Some(MediaType::Multipart(subtype))) => {
            warn!(
                subtype = %subtype,
                "Multipart boundary missing or never found, keeping body opaque"
            );
            opaque(raw_body)
        }
        (PartType::Message(message), _) if !is_attachment => {
            if depth >= MAX_DEPTH {
                warn!(depth, "MIME nesting too deep, keeping part opaque");
                return opaque(raw_body);
            }
            MimeEntity::Composite(Composite {
                media_type: MediaType::Message,
                children: vec![convert_message(message, depth + 1)],
                raw_body,
            })
        }
        (PartType::Text(text), declared) => {
            let media_type = declared.unwrap_or(MediaType::PlainText);
            text_leaf(media_type, charset, text, is_attachment, encoding_problem, raw_body)
        }
        (PartType::Html(text), _) => {
            text_leaf(MediaType::Html, charset, text, is_attachment, encoding_problem, raw_body)
        }
        (PartType::Binary(_) | PartType::InlineBinary(_), declared) => MimeEntity::Leaf(Leaf {
            media_type: declared
                .unwrap_or_else(|| MediaType::Other("application/octet-stream".to_string())),
            charset,
            text: Cow::default(),
            is_attachment,
            degraded: encoding_problem,
            raw_body,
        }),
        (PartType::Message(_), _) => MimeEntity::Leaf(Leaf {
            media_type: MediaType::Message,
            charset,
            text: Cow::default(),
            is_attachment,
            degraded: encoding_problem,
            raw_body,
        }),
    }
}

fn text_leaf<'a>(
    media_type: MediaType,
    charset: String,
    text: Cow<'a, str>,
    is_attachment: bool,
    encoding_problem: bool,
    raw_body: Cow<'a, [u8]>,
) -> MimeEntity<'a> {
    let unknown_charset = !is_known_label(&charset);
    if unknown_charset {
        warn!(charset = %charset, "Unknown charset, text decoded as lossy UTF-8");
    }
    let degraded = encoding_problem || unknown_charset || text.contains('\u{FFFD}');
    MimeEntity::Leaf(Leaf {
        media_type,
        charset,
        text,
        is_attachment,
        degraded,
        raw_body,
    })
}

/// `raw[start..end]`, borrowing when the message itself is borrowed.
fn slice_raw<'a>(raw: &Cow<'a, [u8]>, start: usize, end: usize) -> Cow<'a, [u8]> {
    let range = start.min(end)..end;
    match *raw {
        Cow::Borrowed(bytes) => Cow::Borrowed(bytes.get(range).unwrap_or_default()),
        Cow::Owned(ref bytes) => Cow::Owned(bytes.get(range).unwrap_or_default().to_vec()),
    }
}

fn opaque(body: Cow<'_, [u8]>) -> MimeEntity<'_> {
    MimeEntity::Leaf(Leaf {
        media_type: MediaType::Unknown,
        charset: "utf-8".to_string(),
        text: Cow::default(),
        is_attachment: false,
        degraded: true,
        raw_body: body,
    })
}

fn empty_text<'a>() -> MimeEntity<'a> {
    MimeEntity::Leaf(Leaf {
        media_type: MediaType::PlainText,
        charset: "utf-8".to_string(),
        text: Cow::default(),
        is_attachment: false,
        degraded: false,
        raw_body: Cow::default(),
    })
}

// ── Text selection ──────────────────────────────────────────────

/// Where the body text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySource {
    PlainText,
    HtmlConverted,
    RawFallback,
}

/// The human-readable body of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedBody {
    /// Body text with `\n` line endings.
    pub text: String,
    pub source_kind: BodySource,
    /// The chosen part had an unknown charset, invalid bytes for its
    /// charset, or an invalid transfer encoding.
    pub degraded: bool,
}

/// Pick the best text representation in `entity`.
///
/// First non-empty `text/plain` leaf in document order, else the first
/// non-empty `text/html` leaf converted to text, else the entity's raw body.
/// Attachments are never chosen.
pub fn extract_best_text(entity: &MimeEntity) -> ExtractedBody {
    let leaves = entity.leaves();
    let candidates = |media_type: MediaType| {
        leaves
            .iter()
            .copied()
            .filter(|leaf| leaf.media_type == media_type && !leaf.is_attachment)
            .collect::<Vec<_>>()
    };

    for leaf in candidates(MediaType::PlainText) {
        if !leaf.text.trim().is_empty() {
            return ExtractedBody {
                text: normalize_newlines(&leaf.text),
                source_kind: BodySource::PlainText,
                degraded: leaf.degraded,
            };
        }
    }

    for leaf in candidates(MediaType::Html) {
        let text = html_to_text(&normalize_newlines(&leaf.text));
        if !text.is_empty() {
            return ExtractedBody {
                text,
                source_kind: BodySource::HtmlConverted,
                degraded: leaf.degraded,
            };
        }
    }

    debug!("No text part found, using raw body");
    ExtractedBody {
        text: normalize_newlines(&decode_lenient(entity.raw_body())),
        source_kind: BodySource::RawFallback,
        degraded: false,
    }
}

/// Parse `raw` and select its body text.
pub fn resolve_body(raw: &RawMessage) -> ExtractedBody {
    extract_best_text(&parse_mime(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> MimeEntity<'_> {
        parse_bytes(raw.as_bytes())
    }

    const ALTERNATIVE: &str = "Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
        \r\n\
        preamble\r\n\
        --b1\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Plain version\r\n\
        --b1\r\n\
        Content-Type: text/html\r\n\
        \r\n\
        <p>HTML <b>version</b></p>\r\n\
        --b1--\r\n\
        epilogue\r\n";

    #[test]
    fn test_alternative_tree() {
        let entity = parse(ALTERNATIVE);
        let MimeEntity::Composite(composite) = &entity else {
            panic!("expected composite");
        };
        assert_eq!(composite.media_type, MediaType::Multipart("alternative".into()));
        assert_eq!(composite.children.len(), 2);
        assert_eq!(entity.leaves()[1].media_type, MediaType::Html);
        assert!(!entity.is_malformed());
    }

    #[test]
    fn test_plain_beats_html() {
        let body = extract_best_text(&parse(ALTERNATIVE));
        assert_eq!(body.source_kind, BodySource::PlainText);
        assert_eq!(body.text, "Plain version");
    }

    #[test]
    fn test_html_used_when_plain_is_empty() {
        let raw = ALTERNATIVE.replace("Plain version", "  ");
        let body = extract_best_text(&parse(&raw));
        assert_eq!(body.source_kind, BodySource::HtmlConverted);
        assert_eq!(body.text, "HTML version");
    }

    #[test]
    fn test_attachment_never_chosen() {
        let raw = "Content-Type: multipart/mixed; boundary=m\r\n\r\n\
            --m\r\n\
            Content-Type: text/plain\r\n\
            Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
            \r\n\
            attached notes\r\n\
            --m\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            real body\r\n\
            --m--\r\n";
        let body = extract_best_text(&parse(raw));
        assert_eq!(body.text, "real body");
    }

    #[test]
    fn test_quoted_printable_latin1_leaf() {
        let raw = "Content-Type: text/plain; charset=ISO-8859-1\r\n\
            Content-Transfer-Encoding: quoted-printable\r\n\
            \r\n\
            Caf=E9 cr=E8me=\r\n brul=E9e\r\n";
        let body = extract_best_text(&parse(raw));
        assert_eq!(body.text.trim_end(), "Café crème brulée");
        assert!(!body.degraded);
    }

    #[test]
    fn test_base64_html_leaf() {
        // "<p>Hi &amp; bye</p>"
        let raw = "Content-Type: text/html\r\nContent-Transfer-Encoding: base64\r\n\r\n\
            PHA+SGkgJmFtcDsgYnllPC9wPg==\r\n";
        let body = extract_best_text(&parse(raw));
        assert_eq!(body.source_kind, BodySource::HtmlConverted);
        assert_eq!(body.text, "Hi & bye");
    }

    #[test]
    fn test_missing_boundary_is_opaque_raw_fallback() {
        let raw = "Content-Type: multipart/mixed\r\n\r\nsome raw text\r\n";
        let entity = parse(raw);
        assert!(entity.is_malformed());
        let body = extract_best_text(&entity);
        assert_eq!(body.source_kind, BodySource::RawFallback);
        assert_eq!(body.text, "some raw text\n");
    }

    #[test]
    fn test_boundary_never_present_is_raw_fallback() {
        let raw = "Content-Type: multipart/mixed; boundary=zzz\r\n\r\n--other\r\nbody\r\n";
        let body = extract_best_text(&parse(raw));
        assert_eq!(body.source_kind, BodySource::RawFallback);
        assert!(!body.text.is_empty());
    }

    #[test]
    fn test_unknown_charset_degrades_but_returns_text() {
        let raw = "Content-Type: text/plain; charset=x-unknown\r\n\r\nhello\r\n";
        let body = extract_best_text(&parse(raw));
        assert_eq!(body.source_kind, BodySource::PlainText);
        assert_eq!(body.text, "hello\n");
        assert!(body.degraded);
    }

    #[test]
    fn test_empty_body() {
        let body = extract_best_text(&parse("Subject: nothing\r\n\r\n"));
        assert_eq!(body.text, "");
        assert_eq!(body.source_kind, BodySource::RawFallback);
    }

    #[test]
    fn test_nested_message_rfc822() {
        let raw = "Content-Type: multipart/mixed; boundary=o\r\n\r\n\
            --o\r\n\
            Content-Type: message/rfc822\r\n\
            \r\n\
            Subject: inner\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            forwarded text\r\n\
            --o--\r\n";
        let entity = parse(raw);
        let body = extract_best_text(&entity);
        assert_eq!(body.text, "forwarded text");
        assert_eq!(entity.leaves().len(), 1);
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let mut raw = String::new();
        for depth in 0..(MAX_DEPTH + 2) {
            raw.push_str(&format!(
                "Content-Type: multipart/mixed; boundary=b{depth}\r\n\r\n--b{depth}\r\n"
            ));
        }
        raw.push_str("\r\ninnermost\r\n");
        let entity = parse(&raw);
        assert!(entity.is_malformed());
        assert!(!extract_best_text(&entity).text.is_empty());
    }

    #[test]
    fn test_missing_close_delimiter_keeps_parts() {
        let raw = "Content-Type: multipart/mixed; boundary=x\n\n--x\nContent-Type: text/html\n\n<p>A</p>\n--x\nContent-Type: text/plain\n\nB\n";
        let entity = parse(raw);
        assert!(!entity.is_malformed());
        let body = extract_best_text(&entity);
        assert_eq!(body.source_kind, BodySource::PlainText);
        assert_eq!(body.text.trim_end(), "B");
    }

    #[test]
    fn test_body_without_blank_line_is_raw_fallback() {
        let entity = parse("Subject: x\r\nThis line is body text\r\nand more\r\n");
        assert!(entity.is_malformed());
        let body = extract_best_text(&entity);
        assert_eq!(body.source_kind, BodySource::RawFallback);
        assert_eq!(body.text, "This line is body text\nand more\n");
    }

    #[test]
    fn test_input_without_headers_is_raw_fallback() {
        let body = extract_best_text(&parse("just some text\r\nmore text\r\n"));
        assert_eq!(body.source_kind, BodySource::RawFallback);
        assert_eq!(body.text, "just some text\nmore text\n");
    }

    #[test]
    fn test_binary_part_is_skipped() {
        let raw = "Content-Type: multipart/mixed; boundary=m\r\n\r\n\
            --m\r\n\
            Content-Type: image/png\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            iVBORw0KGgo=\r\n\
            --m\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            caption\r\n\
            --m--\r\n";
        let entity = parse(raw);
        let leaves = entity.leaves();
        assert_eq!(leaves[0].media_type, MediaType::Other("image/png".into()));
        assert!(leaves[0].text.is_empty());
        assert_eq!(extract_best_text(&entity).text, "caption");
    }

    #[test]
    fn test_mbox_separator_line_ignored() {
        let raw = "From a@b.c Thu Jan 01 00:00:00 2024\r\n\
            Subject: hi\r\n\
            \r\n\
            mbox body\r\n";
        let body = extract_best_text(&parse(raw));
        assert_eq!(body.source_kind, BodySource::PlainText);
        assert_eq!(body.text.trim_end(), "mbox body");
    }
}
