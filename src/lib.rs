//! `mailpeek`: read a single message from an IMAP mailbox without marking it as read.
//!
//! The library captures a FETCH response, lifts the message literal out of
//! it, and decodes headers and body into plain text. Decoding problems are
//! recovered from and reported alongside the result.

pub mod config;
pub mod credentials;
pub mod error;
pub mod imap;
pub mod message;
pub mod parser;
pub mod store;
