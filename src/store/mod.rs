//! Raw message storage.

pub mod staging;

pub use staging::RawMessage;
