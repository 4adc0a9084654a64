//! RARC: hierarchical archive used by GameCube/Wii titles.
//!
//! ## Layout
//! ```text
//! [0x00] Header        (0x40 bytes)
//! [0x40] Node table    (NodeCount × 0x10)
//! [...]  File entries  (TotalFiles × 0x14)
//! [...]  String table  (NUL-terminated names)
//! [...]  Data
//! ```
//! Every offset in the header except the node table is relative to `0x20`.
//!
//! ## Header
//! ```text
//! [0x00] "RARC"
//! [0x04] TotalSize            (u32)
//! [0x0C] DataStart            (u32, +0x20)
//! [0x20] NodeCount            (u32)
//! [0x28] TotalFiles           (u32)
//! [0x2C] FileEntriesOffset    (u32, +0x20)
//! [0x34] StringTableOffset    (u32, +0x20)
//! ```
//!
//! ## Node (0x10 bytes)
//! ```text
//! [0x00] Type tag             (4 bytes, e.g. "ROOT")
//! [0x04] NameOffset           (u32, into string table)
//! [0x08] NameHash             (u16)
//! [0x0A] EntryCount           (u16)
//! [0x0C] FirstEntryIndex      (u32)
//! ```
//!
//! ## File entry (0x14 bytes)
//! ```text
//! [0x00] Id                   (u16, 0xFFFF = subdirectory link)
//! [0x02] NameHash             (u16)
//! [0x04] Flags                (u16)
//! [0x06] NameOffset           (u16)
//! [0x08] DataOffset           (u32, relative to DataStart; node index for links)
//! [0x0C] DataSize             (u32)
//! [0x10] Reserved             (u32)
//! ```

use std::collections::{BTreeMap, HashSet};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::{debug, warn};

use crate::archive::{fits, read_cstr, table, ArchiveEntry, ArchiveError};

pub const MAGIC: &[u8; 4] = b"RARC";

pub const HEADER_SIZE: usize = 0x40;
pub const NODE_SIZE:   usize = 0x10;
pub const ENTRY_SIZE:  usize = 0x14;

/// Base that header offsets are relative to.
const OFFSET_BASE: usize = 0x20;

/// File-entry id marking a subdirectory link.
pub const DIRECTORY_ID: u16 = 0xFFFF;

pub fn matches(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Header with every offset already made absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RarcHeader {
    pub total_size:   usize,
    pub data_start:   usize,
    pub node_count:   usize,
    pub file_count:   usize,
    pub file_table:   usize,
    pub string_table: usize,
}

impl RarcHeader {
    pub fn read(data: &[u8]) -> Result<Self, ArchiveError> {
        if !matches(data) {
            return Err(ArchiveError::MalformedContainer("missing RARC magic".into()));
        }
        let mut cur = table(data, 0, HEADER_SIZE)?;

        cur.set_position(0x04);
        let total_size = cur.read_u32::<BigEndian>()? as usize;
        cur.set_position(0x0C);
        let data_start = cur.read_u32::<BigEndian>()? as usize + OFFSET_BASE;
        cur.set_position(0x20);
        let node_count = cur.read_u32::<BigEndian>()? as usize;
        cur.set_position(0x28);
        let file_count = cur.read_u32::<BigEndian>()? as usize;
        let file_table = cur.read_u32::<BigEndian>()? as usize + OFFSET_BASE;
        cur.set_position(0x34);
        let string_table = cur.read_u32::<BigEndian>()? as usize + OFFSET_BASE;

        let header = Self { total_size, data_start, node_count, file_count, file_table, string_table };
        header.validate(data.len())?;
        Ok(header)
    }

    fn validate(&self, len: usize) -> Result<(), ArchiveError> {
        let malformed = |what: String| Err(ArchiveError::MalformedContainer(what));

        if self.total_size > len {
            return malformed(format!("declared size {:#x} exceeds buffer of {len:#x}", self.total_size));
        }
        if self.node_count == 0 {
            return malformed("archive has no root node".into());
        }
        let nodes_fit = self
            .node_count
            .checked_mul(NODE_SIZE)
            .is_some_and(|n| fits(HEADER_SIZE, n, len));
        if !nodes_fit {
            return malformed(format!("{} nodes do not fit in the buffer", self.node_count));
        }
        let entries_fit = self
            .file_count
            .checked_mul(ENTRY_SIZE)
            .is_some_and(|n| fits(self.file_table, n, len));
        if !entries_fit {
            return malformed(format!(
                "{} file entries at {:#x} do not fit in the buffer",
                self.file_count, self.file_table
            ));
        }
        if self.string_table >= len {
            return malformed(format!("string table at {:#x} is past the end", self.string_table));
        }
        if self.data_start > len {
            return malformed(format!("data start {:#x} is past the end", self.data_start));
        }
        Ok(())
    }
}

// ── Node & file records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarcNode {
    pub tag:         [u8; 4],
    pub name_offset: usize,
    pub entry_count: usize,
    pub first_entry: usize,
}

impl RarcNode {
    fn read(data: &[u8], index: usize) -> Result<Self, ArchiveError> {
        let mut cur = table(data, HEADER_SIZE + index * NODE_SIZE, NODE_SIZE)?;
        let mut tag = [0u8; 4];
        std::io::Read::read_exact(&mut cur, &mut tag)?;
        let name_offset = cur.read_u32::<BigEndian>()? as usize;
        let _hash = cur.read_u16::<BigEndian>()?;
        let entry_count = cur.read_u16::<BigEndian>()? as usize;
        let first_entry = cur.read_u32::<BigEndian>()? as usize;
        Ok(Self { tag, name_offset, entry_count, first_entry })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileRecord {
    id:          u16,
    name_offset: usize,
    data_offset: usize,
    data_size:   usize,
}

impl FileRecord {
    fn read(data: &[u8], header: &RarcHeader, index: usize) -> Result<Self, ArchiveError> {
        if index >= header.file_count {
            return Err(ArchiveError::MalformedContainer(format!(
                "file entry {index} is past the table of {}",
                header.file_count
            )));
        }
        let mut cur = table(data, header.file_table + index * ENTRY_SIZE, ENTRY_SIZE)?;
        let id = cur.read_u16::<BigEndian>()?;
        let _hash = cur.read_u16::<BigEndian>()?;
        let _flags = cur.read_u16::<BigEndian>()?;
        let name_offset = cur.read_u16::<BigEndian>()? as usize;
        let data_offset = cur.read_u32::<BigEndian>()? as usize;
        let data_size = cur.read_u32::<BigEndian>()? as usize;
        Ok(Self { id, name_offset, data_offset, data_size })
    }

    fn is_directory(&self) -> bool {
        self.id == DIRECTORY_ID
    }
}

// ── RarcArchive ──────────────────────────────────────────────────────────────

/// Parsed RARC directory: every file and directory keyed by its full path.
#[derive(Debug, Clone)]
pub struct RarcArchive {
    pub header: RarcHeader,
    entries:    BTreeMap<String, ArchiveEntry>,
}

impl RarcArchive {
    pub fn parse(data: &[u8]) -> Result<Self, ArchiveError> {
        let header = RarcHeader::read(data)?;
        let mut entries = BTreeMap::new();
        let mut visited = HashSet::new();

        let root = RarcNode::read(data, 0)?;
        let root_name = read_cstr(data, header.string_table + root.name_offset)?;

        // Depth-first over (node index, node, path of that node).
        let mut stack = vec![(0usize, root, root_name)];
        while let Some((index, node, node_path)) = stack.pop() {
            if !visited.insert(index) {
                return Err(ArchiveError::MalformedContainer(format!(
                    "node {index} is linked more than once"
                )));
            }

            for i in node.first_entry..node.first_entry + node.entry_count {
                let record = FileRecord::read(data, &header, i)?;
                let name = read_cstr(data, header.string_table + record.name_offset)?;
                if name == "." || name == ".." {
                    continue;
                }
                let path = format!("{node_path}/{name}");

                if record.is_directory() {
                    let child_index = record.data_offset;
                    if child_index >= header.node_count {
                        return Err(ArchiveError::MalformedContainer(format!(
                            "'{path}' links to node {child_index} of {}",
                            header.node_count
                        )));
                    }
                    let child = RarcNode::read(data, child_index)?;
                    insert(&mut entries, ArchiveEntry::directory(path.clone()));
                    stack.push((child_index, child, path));
                    continue;
                }

                let offset = header.data_start + record.data_offset;
                if !fits(offset, record.data_size, data.len()) {
                    warn!(path = %path, offset, size = record.data_size, "RARC entry outside archive, skipped");
                    continue;
                }
                insert(&mut entries, ArchiveEntry::file(path, offset, record.data_size));
            }
        }

        debug!(entries = entries.len(), nodes = visited.len(), "parsed RARC");
        Ok(Self { header, entries })
    }

    /// Every entry in path order.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values()
    }

    /// File entries only, in path order.
    pub fn files(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values().filter(|e| !e.is_directory())
    }

    pub fn entry(&self, path: &str) -> Result<&ArchiveEntry, ArchiveError> {
        self.entries
            .get(path)
            .ok_or_else(|| ArchiveError::EntryNotFound(path.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn insert(entries: &mut BTreeMap<String, ArchiveEntry>, entry: ArchiveEntry) {
    if let Some(previous) = entries.insert(entry.path.clone(), entry) {
        warn!(path = %previous.path, "duplicate RARC path, keeping the later entry");
    }
}
