//! Fetch → extract → stage → decode.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::fields::{extract_fields, HeaderFields, SUMMARY_FIELDS};
use super::Degradation;
use crate::config::{AccountConfig, PerformanceConfig};
use crate::credentials::Credentials;
use crate::error::{MailError, Result};
use crate::imap::literal::{extract_literal, Literal, LiteralKind, ResponseStream};
use crate::imap::{tls, Session};
use crate::parser::header::{parse_date, split_message};
use crate::parser::mime::{extract_best_text, parse_mime, ExtractedBody};
use crate::store::RawMessage;

/// One message, decoded for display.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedMessage {
    /// Mailbox sequence number; `None` for messages parsed from a file.
    pub sequence: Option<u32>,
    /// Size of the raw message in bytes.
    pub size: usize,
    pub literal_kind: LiteralKind,
    pub headers: HeaderFields,
    /// The `Date` field, normalized to UTC when it could be parsed.
    pub date: Option<DateTime<Utc>>,
    pub body: ExtractedBody,
    pub degradations: Vec<Degradation>,
}

impl FetchedMessage {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Decode a captured response stream.
pub fn decode_stream(
    stream: &ResponseStream,
    sequence: Option<u32>,
    perf: &PerformanceConfig,
) -> Result<FetchedMessage> {
    let literal = extract_literal(stream)?;
    decode_literal(literal, sequence, perf)
}

/// Decode an extracted literal.
///
/// Payloads above the staging threshold go through a temporary file, which
/// is removed before this function returns.
pub fn decode_literal(
    literal: Literal,
    sequence: Option<u32>,
    perf: &PerformanceConfig,
) -> Result<FetchedMessage> {
    let mut degradations = Vec::new();
    if literal.is_truncated() {
        degradations.push(Degradation::TruncatedLiteral {
            declared: literal.declared_length,
            received: literal.bytes.len(),
        });
    }
    let kind = literal.kind;
    let raw = RawMessage::from_literal(literal.into_bytes(), perf.staging_threshold)?;
    Ok(decode_raw(&raw, sequence, kind, degradations))
}

/// Decode headers and body of `raw`.
pub fn decode_raw(
    raw: &RawMessage,
    sequence: Option<u32>,
    literal_kind: LiteralKind,
    mut degradations: Vec<Degradation>,
) -> FetchedMessage {
    let headers = extract_fields(&raw.header_block(), SUMMARY_FIELDS);
    degradations.extend(
        headers
            .degraded_fields()
            .map(|field| Degradation::HeaderDecode {
                field: field.to_string(),
            }),
    );
    let date = Some(headers.get("Date"))
        .filter(|d| !d.is_empty())
        .and_then(parse_date);

    let entity = parse_mime(raw);
    if entity.is_malformed() {
        degradations.push(Degradation::MimeParse);
    }
    let body = extract_best_text(&entity);
    if body.degraded {
        degradations.push(Degradation::Charset);
    }

    for problem in &degradations {
        warn!(sequence, %problem, "Message decoded with problems");
    }
    debug!(
        sequence,
        size = raw.len(),
        source_kind = ?body.source_kind,
        "Decoded message"
    );

    FetchedMessage {
        sequence,
        size: raw.len(),
        literal_kind,
        headers,
        date,
        body,
        degradations,
    }
}

/// Log in, select `mailbox`, run `f`, and log out whatever happened.
fn with_mailbox<S, T>(
    session: &mut Session<S>,
    creds: &Credentials,
    mailbox: &str,
    f: impl FnOnce(&mut Session<S>, u32) -> Result<T>,
) -> Result<T>
where
    S: Read + Write,
{
    session.login(&creds.username, &creds.password)?;
    let result = session
        .select(mailbox)
        .and_then(|status| f(session, status.exists));
    session.logout();
    result
}

/// Fetch and decode message `sequence` over an open session.
pub fn fetch_with_session<S: Read + Write>(
    session: &mut Session<S>,
    creds: &Credentials,
    mailbox: &str,
    sequence: u32,
    perf: &PerformanceConfig,
) -> Result<FetchedMessage> {
    let stream = with_mailbox(session, creds, mailbox, |session, exists| {
        if sequence == 0 || sequence > exists {
            return Err(MailError::NoSuchMessage {
                sequence,
                mailbox: mailbox.to_string(),
                exists,
            });
        }
        session.fetch_message(sequence)
    })?;
    debug!(sequence, bytes = stream.len(), "Captured FETCH response");
    decode_stream(&stream, Some(sequence), perf)
}

/// Connect to the account's server and fetch message `sequence`.
pub fn fetch_message(
    account: &AccountConfig,
    creds: &Credentials,
    mailbox: &str,
    sequence: u32,
    perf: &PerformanceConfig,
) -> Result<FetchedMessage> {
    let mut session = tls::connect(account, perf)?;
    fetch_with_session(&mut session, creds, mailbox, sequence, perf)
}

/// One row of the `list` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageListing {
    pub sequence: u32,
    pub from: String,
    pub subject: String,
    pub date: String,
}

/// Header summaries of the newest `limit` messages, newest first.
pub fn list_with_session<S: Read + Write>(
    session: &mut Session<S>,
    creds: &Credentials,
    mailbox: &str,
    limit: u32,
) -> Result<Vec<MessageListing>> {
    with_mailbox(session, creds, mailbox, |session, exists| {
        let oldest = exists.saturating_sub(limit) + 1;
        info!(mailbox, exists, limit, "Listing messages");

        let mut listing = Vec::new();
        for sequence in (oldest..=exists).rev() {
            let stream = session.fetch_header(sequence)?;
            let literal = extract_literal(&stream)?;
            let (block, _) = split_message(&literal.bytes);
            let fields = extract_fields(&block, &["From", "Subject", "Date"]);
            listing.push(MessageListing {
                sequence,
                from: fields.get("From").to_string(),
                subject: fields.get("Subject").to_string(),
                date: fields.get("Date").to_string(),
            });
        }
        Ok(listing)
    })
}

/// Connect and list the newest `limit` messages of `mailbox`.
pub fn list_recent(
    account: &AccountConfig,
    creds: &Credentials,
    mailbox: &str,
    limit: u32,
    perf: &PerformanceConfig,
) -> Result<Vec<MessageListing>> {
    let mut session = tls::connect(account, perf)?;
    list_with_session(&mut session, creds, mailbox, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::mime::BodySource;

    fn perf() -> PerformanceConfig {
        PerformanceConfig::default()
    }

    fn wrap(payload: &[u8]) -> ResponseStream {
        let mut data = format!("* 1 FETCH (BODY[] {{{}}}\r\n", payload.len()).into_bytes();
        data.extend_from_slice(payload);
        data.extend_from_slice(b")\r\nA0003 OK FETCH completed\r\n");
        ResponseStream::new(data)
    }

    #[test]
    fn test_encoded_subject_scenario() {
        let payload = b"From: a@example.com\r\nSubject: =?utf-8?B?SGVsbG8=?=\r\n\r\nJust text.\r\n";
        let msg = decode_stream(&wrap(payload), Some(1), &perf()).unwrap();
        assert_eq!(msg.headers.get("Subject"), "Hello");
        assert_eq!(msg.body.text, "Just text.\n");
        assert_eq!(msg.body.source_kind, BodySource::PlainText);
        assert!(!msg.is_degraded());
        assert_eq!(msg.size, payload.len());
    }

    #[test]
    fn test_truncation_recorded() {
        let stream = ResponseStream::from(&b"* 1 FETCH (BODY[] {900}\r\nSubject: x\r\n\r\npartial"[..]);
        let msg = decode_stream(&stream, None, &perf()).unwrap();
        assert_eq!(msg.literal_kind, LiteralKind::Truncated);
        assert!(msg.degradations.contains(&Degradation::TruncatedLiteral {
            declared: 900,
            received: 21,
        }));
    }

    #[test]
    fn test_all_degradations_surface() {
        let payload = b"Subject: =?bad?Q?x?=\r\nContent-Type: multipart/mixed\r\n\r\nraw\r\n";
        let msg = decode_stream(&wrap(payload), None, &perf()).unwrap();
        assert!(msg.degradations.contains(&Degradation::HeaderDecode {
            field: "Subject".into()
        }));
        assert!(msg.degradations.contains(&Degradation::MimeParse));
        assert_eq!(msg.body.source_kind, BodySource::RawFallback);
    }

    #[test]
    fn test_date_normalized() {
        let payload = b"Date: Thu, 04 Jan 2024 10:00:00 +0100\r\n\r\nx";
        let msg = decode_stream(&wrap(payload), None, &perf()).unwrap();
        let date = msg.date.unwrap();
        assert_eq!(date.to_rfc3339(), "2024-01-04T09:00:00+00:00");
    }

    #[test]
    fn test_empty_stream_is_error() {
        let err = decode_stream(&ResponseStream::default(), None, &perf()).unwrap_err();
        assert!(matches!(err, MailError::NoLiteralFound(0)));
    }
}
