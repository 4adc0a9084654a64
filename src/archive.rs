//! Shared archive vocabulary: entries, errors and table-reading helpers used
//! by the [`rarc`](crate::rarc), [`u8arc`](crate::u8arc) and
//! [`j3d`](crate::j3d) parsers.
//!
//! Parsers never copy payloads.  An [`ArchiveEntry`] only names a byte range
//! of the buffer it was parsed from, and that range is guaranteed to lie
//! inside the buffer.

use std::io::{self, Cursor};
use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Header or table fields disagree with the buffer they came from.
    #[error("Malformed container: {0}")]
    MalformedContainer(String),
    #[error("Entry not found: {0}")]
    EntryNotFound(String),
    #[error("Read of {needed} byte(s) at {offset:#x} runs past the {available}-byte buffer")]
    Truncated { offset: usize, needed: usize, available: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── ArchiveEntry ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryKind {
    File { offset: usize, length: usize },
    Directory,
}

/// One named item of an archive.  Files carry an absolute byte range of the
/// archive buffer; directories carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub kind: EntryKind,
}

impl ArchiveEntry {
    pub fn file(path: String, offset: usize, length: usize) -> Self {
        Self { path, kind: EntryKind::File { offset, length } }
    }

    pub fn directory(path: String) -> Self {
        Self { path, kind: EntryKind::Directory }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// Byte range inside the archive buffer, `None` for directories.
    pub fn range(&self) -> Option<Range<usize>> {
        match self.kind {
            EntryKind::File { offset, length } => Some(offset..offset + length),
            EntryKind::Directory               => None,
        }
    }

    pub fn len(&self) -> usize {
        match self.kind {
            EntryKind::File { length, .. } => length,
            EntryKind::Directory           => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Listing ──────────────────────────────────────────────────────────────────

/// Lightweight descriptor for the `list` command.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub path:   String,
    #[serde(flatten)]
    pub kind:   EntryKind,
    /// First four payload bytes, hex-encoded (files only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magic:  Option<String>,
}

impl EntryInfo {
    pub fn describe(entry: &ArchiveEntry, data: &[u8]) -> Self {
        let magic = entry
            .range()
            .and_then(|r| data.get(r.start..r.end.min(r.start + 4)))
            .map(hex::encode);
        EntryInfo { path: entry.path.clone(), kind: entry.kind, magic }
    }
}

// ── Table helpers ────────────────────────────────────────────────────────────

/// Big-endian cursor over `data[offset..offset + len]`.
pub(crate) fn table(data: &[u8], offset: usize, len: usize) -> Result<Cursor<&[u8]>, ArchiveError> {
    let end = offset.checked_add(len).filter(|&e| e <= data.len()).ok_or(
        ArchiveError::Truncated { offset, needed: len, available: data.len() },
    )?;
    Ok(Cursor::new(&data[offset..end]))
}

/// NUL-terminated string starting at `offset`.
pub(crate) fn read_cstr(data: &[u8], offset: usize) -> Result<String, ArchiveError> {
    let tail = data.get(offset..).ok_or(ArchiveError::Truncated {
        offset,
        needed:    1,
        available: data.len(),
    })?;
    let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
}

/// `true` when `offset..offset + len` lies inside a buffer of `size` bytes.
#[inline]
pub(crate) fn fits(offset: usize, len: usize, size: usize) -> bool {
    offset.checked_add(len).is_some_and(|end| end <= size)
}
