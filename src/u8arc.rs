//! U8: flat file-table archive (Wii/GameCube).
//!
//! ## Layout
//! ```text
//! [0x00] Magic 0x55AA382D     (u32)
//! [0x04] NodeTableOffset      (u32, absolute)
//! [0x08] NodeTableSize        (u32, entries + string table)
//! [0x0C] DataOffset           (u32, absolute)
//! [...]  Nodes                (Count × 0x0C), root first
//! [...]  String table         (immediately after the last node)
//! ```
//!
//! ## Node (0x0C bytes)
//! ```text
//! [0x00] Type                 (u8, 0 = file, 1 = directory)
//! [0x01] NameOffset           (u24, into string table)
//! [0x04] DataStart | Parent   (u32)
//! [0x08] DataSize  | Next     (u32)
//! ```
//! For directories `Next` is the index of the first node that is *not* a
//! descendant.  The root is a directory whose `Next` equals the node count.

use byteorder::{BigEndian, ReadBytesExt};
use tracing::{debug, warn};

use crate::archive::{fits, read_cstr, table, ArchiveEntry, ArchiveError};

pub const MAGIC: u32 = 0x55AA_382D;
pub const HEADER_SIZE: usize = 0x10;
pub const NODE_SIZE: usize = 0x0C;

pub fn matches(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == MAGIC.to_be_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U8Header {
    pub node_offset: usize,
    pub node_size:   usize,
    pub data_offset: usize,
}

impl U8Header {
    pub fn read(data: &[u8]) -> Result<Self, ArchiveError> {
        if !matches(data) {
            return Err(ArchiveError::MalformedContainer("missing U8 magic".into()));
        }
        let mut cur = table(data, 4, HEADER_SIZE - 4)?;
        Ok(Self {
            node_offset: cur.read_u32::<BigEndian>()? as usize,
            node_size:   cur.read_u32::<BigEndian>()? as usize,
            data_offset: cur.read_u32::<BigEndian>()? as usize,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    File { name: usize, start: usize, size: usize },
    Directory { name: usize, next: usize },
}

impl Node {
    fn read(data: &[u8], offset: usize) -> Result<Self, ArchiveError> {
        let mut cur = table(data, offset, NODE_SIZE)?;
        let type_and_name = cur.read_u32::<BigEndian>()?;
        let first = cur.read_u32::<BigEndian>()? as usize;
        let second = cur.read_u32::<BigEndian>()? as usize;
        let name = (type_and_name & 0x00FF_FFFF) as usize;
        match type_and_name >> 24 {
            0 => Ok(Node::File { name, start: first, size: second }),
            1 => Ok(Node::Directory { name, next: second }),
            t => Err(ArchiveError::MalformedContainer(format!(
                "node at {offset:#x} has unknown type {t}"
            ))),
        }
    }
}

/// Whether `start..start + size` touches the header or the node table.
fn overlaps_tables(header: &U8Header, start: usize, size: usize) -> bool {
    let end = start + size;
    let hits = |lo: usize, hi: usize| start < hi && lo < end;
    hits(0, HEADER_SIZE) || hits(header.node_offset, header.node_offset + header.node_size)
}

/// Parsed U8 file table, entries in table order.
#[derive(Debug, Clone)]
pub struct U8Archive {
    pub header: U8Header,
    entries:    Vec<ArchiveEntry>,
}

impl U8Archive {
    pub fn parse(data: &[u8]) -> Result<Self, ArchiveError> {
        let header = U8Header::read(data)?;
        if !fits(header.node_offset, header.node_size, data.len()) {
            return Err(ArchiveError::MalformedContainer(format!(
                "node table {:#x}+{:#x} runs past the buffer",
                header.node_offset, header.node_size
            )));
        }

        let count = match Node::read(data, header.node_offset)? {
            Node::Directory { next, .. } => next,
            Node::File { .. } => {
                return Err(ArchiveError::MalformedContainer("root node is not a directory".into()))
            }
        };
        let nodes_len = count.checked_mul(NODE_SIZE).unwrap_or(usize::MAX);
        if count == 0 || nodes_len > header.node_size {
            return Err(ArchiveError::MalformedContainer(format!(
                "{count} nodes do not fit a node table of {:#x} bytes",
                header.node_size
            )));
        }
        let strings = header.node_offset + nodes_len;

        let mut entries = Vec::with_capacity(count.saturating_sub(1));
        // (first index past this directory, path of this directory)
        let mut dirs: Vec<(usize, String)> = vec![(count, String::new())];

        for i in 1..count {
            while dirs.len() > 1 && dirs.last().is_some_and(|(end, _)| *end <= i) {
                dirs.pop();
            }
            let parent = dirs.last().map(|(_, p)| p.as_str()).unwrap_or("");

            let node = Node::read(data, header.node_offset + i * NODE_SIZE)?;
            let name_offset = match node {
                Node::File { name, .. } | Node::Directory { name, .. } => name,
            };
            let name = read_cstr(data, strings + name_offset)?;
            let path = if parent.is_empty() { name } else { format!("{parent}/{name}") };

            match node {
                Node::Directory { next, .. } => {
                    if next <= i || next > count {
                        return Err(ArchiveError::MalformedContainer(format!(
                            "directory '{path}' ends at node {next}, outside {}..={count}",
                            i + 1
                        )));
                    }
                    entries.push(ArchiveEntry::directory(path.clone()));
                    dirs.push((next, path));
                }
                Node::File { start, size, .. } => {
                    if !fits(start, size, data.len()) {
                        warn!(path = %path, start, size, "U8 entry outside archive, skipped");
                        continue;
                    }
                    if start < header.data_offset || overlaps_tables(&header, start, size) {
                        warn!(path = %path, start, size, "U8 entry overlaps the file table, skipped");
                        continue;
                    }
                    entries.push(ArchiveEntry::file(path, start, size));
                }
            }
        }

        debug!(entries = entries.len(), "parsed U8");
        Ok(Self { header, entries })
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter()
    }

    pub fn files(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().filter(|e| !e.is_directory())
    }

    pub fn entry(&self, path: &str) -> Result<&ArchiveEntry, ArchiveError> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .ok_or_else(|| ArchiveError::EntryNotFound(path.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
