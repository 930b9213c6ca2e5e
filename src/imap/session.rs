//! Minimal IMAP4rev1 client session: LOGIN, SELECT, FETCH, LOGOUT.
//!
//! The session is generic over the transport so the same code drives a TLS
//! socket in production and a scripted buffer in tests. Responses are
//! captured as raw bytes; literals are read by length, never by line, so a
//! payload that happens to contain `A0003 OK` cannot end the capture early.

use std::io::{BufRead, BufReader, Read, Write};

use tracing::{debug, info, warn};

use crate::error::{MailError, Result};
use crate::imap::literal::{is_status_line, trailing_marker, ResponseStream};

/// Fetch item for the whole message without setting `\Seen`.
pub const FETCH_WHOLE_MESSAGE: &str = "BODY.PEEK[]";

/// Fetch item for the header section only, also without setting `\Seen`.
pub const FETCH_HEADER_ONLY: &str = "BODY.PEEK[HEADER]";

/// Final status of a tagged command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Ok(String),
    No(String),
    Bad(String),
    /// The connection closed before the tagged reply arrived.
    Eof,
}

/// Everything the server sent in reply to one command.
#[derive(Debug)]
pub struct Reply {
    /// Raw bytes, including untagged lines, literals and the tagged line.
    pub stream: ResponseStream,
    pub completion: Completion,
}

/// Mailbox counters reported by SELECT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub exists: u32,
}

/// A client session over any byte transport.
pub struct Session<S: Read + Write> {
    conn: BufReader<S>,
    next_tag: u32,
    max_literal_size: usize,
}

impl<S: Read + Write> Session<S> {
    /// Wrap a freshly opened transport. Call [`Session::read_greeting`] next.
    pub fn new(transport: S, max_literal_size: usize) -> Self {
        Self {
            conn: BufReader::new(transport),
            next_tag: 1,
            max_literal_size,
        }
    }

    /// Consume the server greeting (`* OK` or `* PREAUTH`).
    pub fn read_greeting(&mut self) -> Result<()> {
        let mut line = Vec::new();
        if self.conn.read_until(b'\n', &mut line)? == 0 {
            return Err(MailError::Transport(std::io::ErrorKind::UnexpectedEof.into()));
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        debug!(greeting = text, "Server greeting");
        if text.starts_with("* OK") || text.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailError::Protocol {
                command: "greeting".into(),
                reply: text.to_string(),
            })
        }
    }

    /// Authenticate with LOGIN. A NO/BAD reply becomes [`MailError::Auth`].
    pub fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let args = format!("LOGIN {} {}", quote(user), quote(password));
        let reply = self.command_redacted(&args, "LOGIN <redacted>")?;
        match reply.completion {
            Completion::Ok(_) => {
                info!(user, "Logged in");
                Ok(())
            }
            Completion::No(text) | Completion::Bad(text) => Err(MailError::Auth {
                user: user.to_string(),
                reply: text,
            }),
            Completion::Eof => Err(MailError::Auth {
                user: user.to_string(),
                reply: "connection closed".into(),
            }),
        }
    }

    /// SELECT a mailbox and report its message count.
    pub fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let reply = self.command(&format!("SELECT {}", quote(mailbox)))?;
        expect_ok("SELECT", &reply.completion)?;

        let mut status = MailboxStatus::default();
        for line in reply.stream.as_bytes().split(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(line);
            let mut words = line.split_whitespace();
            if let (Some("*"), Some(count), Some(kind)) = (words.next(), words.next(), words.next())
            {
                if kind.eq_ignore_ascii_case("EXISTS") {
                    status.exists = count.parse().unwrap_or(0);
                }
            }
        }
        debug!(mailbox, exists = status.exists, "Mailbox selected");
        Ok(status)
    }

    /// FETCH one message by sequence number and return the raw response.
    ///
    /// A connection that drops mid-literal still yields the bytes received so
    /// far; the literal extractor flags the result as truncated.
    pub fn fetch(&mut self, sequence: u32, item: &str) -> Result<ResponseStream> {
        let reply = self.command(&format!("FETCH {sequence} {item}"))?;
        match reply.completion {
            Completion::Ok(_) => Ok(reply.stream),
            Completion::Eof => {
                warn!(sequence, "Connection closed before FETCH completed");
                Ok(reply.stream)
            }
            Completion::No(text) | Completion::Bad(text) => Err(MailError::Protocol {
                command: "FETCH".into(),
                reply: text,
            }),
        }
    }

    /// Fetch the complete message without marking it as read.
    pub fn fetch_message(&mut self, sequence: u32) -> Result<ResponseStream> {
        self.fetch(sequence, FETCH_WHOLE_MESSAGE)
    }

    /// Fetch only the header section of a message.
    pub fn fetch_header(&mut self, sequence: u32) -> Result<ResponseStream> {
        self.fetch(sequence, FETCH_HEADER_ONLY)
    }

    /// Say goodbye. Failures are logged, not returned.
    pub fn logout(&mut self) {
        match self.command("LOGOUT") {
            Ok(_) => debug!("Logged out"),
            Err(e) => warn!(error = %e, "LOGOUT failed"),
        }
    }

    /// Access the underlying transport (tests inspect what was written).
    pub fn get_ref(&self) -> &S {
        self.conn.get_ref()
    }

    fn command(&mut self, args: &str) -> Result<Reply> {
        self.command_redacted(args, args)
    }

    /// Send `args` under a fresh tag; `shown` is what gets logged.
    fn command_redacted(&mut self, args: &str, shown: &str) -> Result<Reply> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;

        debug!(tag = %tag, command = shown, "Sending command");
        let writer = self.conn.get_mut();
        writer.write_all(format!("{tag} {args}\r\n").as_bytes())?;
        writer.flush()?;

        self.read_reply(&tag)
    }

    /// Capture everything up to and including the line tagged `tag`.
    fn read_reply(&mut self, tag: &str) -> Result<Reply> {
        let mut captured: Vec<u8> = Vec::new();
        let mut line: Vec<u8> = Vec::with_capacity(256);
        let tag_prefix = format!("{tag} ");

        loop {
            line.clear();
            if self.conn.read_until(b'\n', &mut line)? == 0 {
                return Ok(Reply {
                    stream: ResponseStream::new(captured),
                    completion: Completion::Eof,
                });
            }
            captured.extend_from_slice(&line);

            if let Some(size) = trailing_marker(&line) {
                if size > self.max_literal_size {
                    return Err(MailError::LiteralTooLarge {
                        declared: size,
                        max: self.max_literal_size,
                    });
                }
                debug!(size, "Reading literal");
                let before = captured.len();
                captured.reserve(size);
                (&mut self.conn).take(size as u64).read_to_end(&mut captured)?;
                if captured.len() - before < size {
                    return Ok(Reply {
                        stream: ResponseStream::new(captured),
                        completion: Completion::Eof,
                    });
                }
                continue;
            }

            if line.starts_with(tag_prefix.as_bytes()) && is_status_line(&line) {
                let text = String::from_utf8_lossy(&line[tag_prefix.len()..])
                    .trim_end()
                    .to_string();
                debug!(tag, reply = %text, "Tagged reply");
                let completion = match text.split_whitespace().next().map(str::to_ascii_uppercase) {
                    Some(word) if word == "OK" => Completion::Ok(text),
                    Some(word) if word == "NO" => Completion::No(text),
                    _ => Completion::Bad(text),
                };
                return Ok(Reply {
                    stream: ResponseStream::new(captured),
                    completion,
                });
            }
        }
    }
}

fn expect_ok(command: &str, completion: &Completion) -> Result<()> {
    match completion {
        Completion::Ok(_) => Ok(()),
        Completion::No(text) | Completion::Bad(text) => Err(MailError::Protocol {
            command: command.to_string(),
            reply: text.clone(),
        }),
        Completion::Eof => Err(MailError::Transport(
            std::io::ErrorKind::UnexpectedEof.into(),
        )),
    }
}

/// Render an IMAP quoted string.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::imap::literal::{extract_literal, LiteralKind};

    /// Replays canned server output and records what the client wrote.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Scripted {
        fn new(server_output: &[u8]) -> Self {
            Self {
                input: Cursor::new(server_output.to_vec()),
                written: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    const MESSAGE: &[u8] = b"Subject: Hi\r\n\r\nA0003 OK fake line inside the literal\r\n";

    fn script() -> Vec<u8> {
        let mut s = b"* OK IMAP ready\r\n\
A0001 OK LOGIN completed\r\n\
* FLAGS (\\Seen)\r\n\
* 7 EXISTS\r\n\
A0002 OK [READ-WRITE] SELECT completed\r\n"
            .to_vec();
        s.extend_from_slice(format!("* 3 FETCH (BODY[] {{{}}}\r\n", MESSAGE.len()).as_bytes());
        s.extend_from_slice(MESSAGE);
        s.extend_from_slice(b")\r\nA0003 OK FETCH completed\r\n");
        s
    }

    #[test]
    fn test_full_exchange() {
        let mut session = Session::new(Scripted::new(&script()), 1 << 20);
        session.read_greeting().unwrap();
        session.login("user@example.com", "p\"w").unwrap();
        let status = session.select("INBOX").unwrap();
        assert_eq!(status.exists, 7);

        let stream = session.fetch_message(3).unwrap();
        let literal = extract_literal(&stream).unwrap();
        assert_eq!(literal.kind, LiteralKind::Complete);
        assert_eq!(literal.bytes, MESSAGE);

        let written = String::from_utf8(session.get_ref().written.clone()).unwrap();
        assert!(written.contains("A0001 LOGIN \"user@example.com\" \"p\\\"w\"\r\n"));
        assert!(written.contains("A0002 SELECT \"INBOX\"\r\n"));
        assert!(written.contains("A0003 FETCH 3 BODY.PEEK[]\r\n"));
    }

    #[test]
    fn test_login_rejected_is_auth_error() {
        let server = b"* OK ready\r\nA0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n";
        let mut session = Session::new(Scripted::new(server), 1024);
        session.read_greeting().unwrap();
        let err = session.login("u", "bad").unwrap_err();
        assert!(matches!(err, MailError::Auth { .. }));
    }

    #[test]
    fn test_bad_greeting() {
        let mut session = Session::new(Scripted::new(b"* BYE go away\r\n"), 1024);
        assert!(matches!(
            session.read_greeting().unwrap_err(),
            MailError::Protocol { .. }
        ));
    }

    #[test]
    fn test_fetch_eof_mid_literal_returns_partial() {
        let server = b"* 1 FETCH (BODY[] {100}\r\nSubject: cut\r\n\r\npartial";
        let mut session = Session::new(Scripted::new(server), 1024);
        let stream = session.fetch_message(1).unwrap();
        let literal = extract_literal(&stream).unwrap();
        assert!(literal.is_truncated());
        assert_eq!(literal.bytes, b"Subject: cut\r\n\r\npartial");
    }

    #[test]
    fn test_fetch_no_is_protocol_error() {
        let server = b"A0001 NO no such message\r\n";
        let mut session = Session::new(Scripted::new(server), 1024);
        assert!(matches!(
            session.fetch_message(99).unwrap_err(),
            MailError::Protocol { .. }
        ));
    }

    #[test]
    fn test_literal_too_large() {
        let server = b"* 1 FETCH (BODY[] {4096}\r\n";
        let mut session = Session::new(Scripted::new(server), 1024);
        assert!(matches!(
            session.fetch_message(1).unwrap_err(),
            MailError::LiteralTooLarge { declared: 4096, max: 1024 }
        ));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }
}
