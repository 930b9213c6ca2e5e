//! Message parsing: header decoding, MIME structure, and body text selection.

pub mod charset;
pub mod header;
pub mod html;
pub mod mime;
