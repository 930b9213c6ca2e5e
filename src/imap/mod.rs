//! IMAP transport: the session that captures a FETCH response and the
//! extractor that lifts the message literal out of it.

pub mod literal;
pub mod session;
pub mod tls;

pub use literal::{extract_literal, Literal, LiteralKind, ResponseStream};
pub use session::{MailboxStatus, Session};
