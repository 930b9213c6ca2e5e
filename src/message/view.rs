//! The four ways a fetched message can be shown.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::fields::HeaderFields;
use super::pipeline::FetchedMessage;
use crate::parser::mime::ExtractedBody;

/// Which part of a message to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum View {
    /// Sender, date, subject and the first lines of the body.
    #[default]
    Summary,
    /// The decoded header fields.
    Headers,
    /// The full body text.
    Body,
    /// Headers followed by the full body.
    Full,
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary" => Ok(Self::Summary),
            "headers" => Ok(Self::Headers),
            "body" => Ok(Self::Body),
            "full" => Ok(Self::Full),
            other => Err(format!(
                "unknown view '{other}' (expected summary, headers, body or full)"
            )),
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Summary => "summary",
            Self::Headers => "headers",
            Self::Body => "body",
            Self::Full => "full",
        })
    }
}

/// A structured view of a message, borrowed from it.
#[derive(Debug, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum MessageView<'m> {
    Summary {
        from: &'m str,
        date: &'m str,
        subject: &'m str,
        preview: Vec<&'m str>,
        /// The body has more lines than `preview`.
        truncated: bool,
    },
    Headers {
        headers: &'m HeaderFields,
    },
    Body {
        body: &'m ExtractedBody,
    },
    Full {
        headers: &'m HeaderFields,
        body: &'m ExtractedBody,
    },
}

/// Build `view` of `message`; `lines` limits the summary preview.
pub fn render(message: &FetchedMessage, view: View, lines: usize) -> MessageView<'_> {
    match view {
        View::Summary => {
            let mut body_lines = message.body.text.lines();
            let preview: Vec<&str> = body_lines.by_ref().take(lines).collect();
            MessageView::Summary {
                from: message.headers.get("From"),
                date: message.headers.get("Date"),
                subject: message.headers.get("Subject"),
                preview,
                truncated: body_lines.next().is_some(),
            }
        }
        View::Headers => MessageView::Headers {
            headers: &message.headers,
        },
        View::Body => MessageView::Body {
            body: &message.body,
        },
        View::Full => MessageView::Full {
            headers: &message.headers,
            body: &message.body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::literal::LiteralKind;
    use crate::message::fields::{extract_fields, SUMMARY_FIELDS};
    use crate::parser::header::HeaderBlock;
    use crate::parser::mime::BodySource;

    fn message(body: &str) -> FetchedMessage {
        let block = HeaderBlock::new(b"From: a@b.c\r\nSubject: Hi\r\nDate: today\r\n");
        FetchedMessage {
            sequence: Some(1),
            size: 0,
            literal_kind: LiteralKind::Complete,
            headers: extract_fields(&block, SUMMARY_FIELDS),
            date: None,
            body: ExtractedBody {
                text: body.to_string(),
                source_kind: BodySource::PlainText,
                degraded: false,
            },
            degradations: Vec::new(),
        }
    }

    #[test]
    fn test_view_from_str() {
        assert_eq!("Summary".parse::<View>(), Ok(View::Summary));
        assert_eq!(" full ".parse::<View>(), Ok(View::Full));
        assert!("raw".parse::<View>().is_err());
    }

    #[test]
    fn test_summary_preview_truncates() {
        let msg = message("one\ntwo\nthree\n");
        let MessageView::Summary {
            from,
            subject,
            preview,
            truncated,
            ..
        } = render(&msg, View::Summary, 2)
        else {
            panic!("expected summary");
        };
        assert_eq!(from, "a@b.c");
        assert_eq!(subject, "Hi");
        assert_eq!(preview, ["one", "two"]);
        assert!(truncated);
    }

    #[test]
    fn test_summary_preview_exact_fit() {
        let msg = message("one\ntwo");
        let view = render(&msg, View::Summary, 2);
        assert!(matches!(view, MessageView::Summary { truncated: false, .. }));
    }

    #[test]
    fn test_full_view_json_shape() {
        let msg = message("body text");
        let json = serde_json::to_value(render(&msg, View::Full, 0)).unwrap();
        assert_eq!(json["view"], "full");
        assert_eq!(json["headers"]["Subject"], "Hi");
        assert_eq!(json["headers"]["Cc"], "");
        assert_eq!(json["body"]["text"], "body text");
        assert_eq!(json["body"]["source_kind"], "plain_text");
    }
}
