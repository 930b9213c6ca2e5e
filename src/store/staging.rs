//! Raw message storage, optionally staged to a temporary file.
//!
//! Large payloads are written to a uniquely named temporary file and read
//! back from it, so the literal buffer can be released before parsing. The
//! file is deleted when the [`RawMessage`] is dropped, which also happens
//! during unwinding.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{MailError, Result};
use crate::parser::header::{split_message, HeaderBlock};

/// A complete RFC 822 message as raw bytes.
#[derive(Debug)]
pub enum RawMessage {
    Memory(Vec<u8>),
    Staged { bytes: Vec<u8>, file: NamedTempFile },
}

impl RawMessage {
    /// Keep `bytes` in memory.
    pub fn in_memory(bytes: Vec<u8>) -> Self {
        Self::Memory(bytes)
    }

    /// Take ownership of a literal payload, staging it to disk when it is
    /// larger than `threshold` bytes. A threshold of 0 disables staging.
    ///
    /// The literal buffer is released before the file is read back.
    pub fn from_literal(bytes: Vec<u8>, threshold: usize) -> Result<Self> {
        if threshold == 0 || bytes.len() <= threshold {
            return Ok(Self::Memory(bytes));
        }
        let len = bytes.len();
        let file = write_temp(&bytes, None)?;
        drop(bytes);
        Self::read_back(file, len)
    }

    /// Write `bytes` to a temporary file (in `dir`, or the system temp dir)
    /// and read the message back from it.
    pub fn stage(bytes: &[u8], dir: Option<&Path>) -> Result<Self> {
        let file = write_temp(bytes, dir)?;
        Self::read_back(file, bytes.len())
    }

    fn read_back(mut file: NamedTempFile, len: usize) -> Result<Self> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| MailError::io(file.path(), e))?;
        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)
            .map_err(|e| MailError::io(file.path(), e))?;

        debug!(path = %file.path().display(), len, "Staged message to disk");
        Ok(Self::Staged { bytes, file })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Memory(bytes) => bytes.as_slice(),
            Self::Staged { bytes, .. } => bytes.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Path of the staging file, if the message was staged.
    pub fn staging_path(&self) -> Option<&Path> {
        match self {
            Self::Memory(_) => None,
            Self::Staged { file, .. } => Some(file.path()),
        }
    }

    /// The header section (everything before the first blank line).
    pub fn header_block(&self) -> HeaderBlock<'_> {
        split_message(self.as_bytes()).0
    }
}

fn write_temp(bytes: &[u8], dir: Option<&Path>) -> Result<NamedTempFile> {
    let mut file = match dir {
        Some(dir) => NamedTempFile::new_in(dir).map_err(|e| MailError::io(dir, e))?,
        None => NamedTempFile::new().map_err(|e| MailError::io(std::env::temp_dir(), e))?,
    };
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(|e| MailError::io(file.path(), e))?;
    Ok(file)
}
