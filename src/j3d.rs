//! J3D model, material and animation files.
//!
//! ## Outer header (0x20 bytes)
//! ```text
//! [0x00] Magic          (8 bytes, e.g. "J3D2bmd3")
//! [0x08] FileSize       (u32)
//! [0x0C] BlockCount     (u32)
//! [0x10] Reserved       (16 bytes)
//! ```
//!
//! ## Block header
//! ```text
//! [0x00] Tag            (4 bytes, e.g. "JNT1")
//! [0x04] BlockSize      (u32, header included)
//! [0x08] Block-specific counts and offsets, relative to the block start
//! ```
//!
//! Only the payload window of each block is exposed.  Counts, offset tables
//! and string tables sit outside the windows, so mutating a window never
//! breaks the structure used to locate it.
//!
//! | Block | Window begin                       | Window end        |
//! |-------|------------------------------------|-------------------|
//! | INF1  | `u32@0x14`                         | block end         |
//! | VTX1  | `u32@0x0C`                         | block end         |
//! | EVP1  | `u32@0x18`                         | block end         |
//! | DRW1  | `u32@0x10`                         | block end         |
//! | JNT1  | `u32@0x0C`                         | begin + n × 0x40  |
//! | SHP1  | `u32@0x20`                         | `u32@0x28`        |
//! | MAT3  | `u32@0x0C`                         | block end         |
//! | TEX1  | `u32@0x0C` + n × 0x20              | block end         |
//!
//! `n` is the `u16` count at `0x08` of the block.

use std::fmt;
use std::ops::Range;

use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use tracing::debug;

use crate::archive::{table, ArchiveError};

pub const HEADER_SIZE:       usize = 0x20;
pub const BLOCK_HEADER_SIZE: usize = 0x08;

const JOINT_ENTRY_SIZE:   usize = 0x40;
const TEXTURE_ENTRY_SIZE: usize = 0x20;

/// Bytes skipped at the front of `bck`/`btk` animation files.
pub const KEYFRAME_ANIMATION_SKIP: usize = 0x60;
/// Bytes skipped at the front of `btp` animation files.
pub const PATTERN_ANIMATION_SKIP:  usize = 0x20;

// ── Kinds ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum J3dKind {
    /// `J3D2bmd3` / `J3D2bmd2`: all eight blocks.
    Model,
    /// `J3D2bmt3`: a single MAT3 block.
    Materials,
    /// `J3D1bck1` / `J3D1btk1` / `J3D1btp1`: one window over the body.
    Animation,
}

/// Identify a J3D file by its 8-byte magic.
pub fn sniff(data: &[u8]) -> Option<J3dKind> {
    match data.get(..8)? {
        b"J3D2bmd3" | b"J3D2bmd2"             => Some(J3dKind::Model),
        b"J3D2bmt3"                           => Some(J3dKind::Materials),
        b"J3D1bck1" | b"J3D1btk1" | b"J3D1btp1" => Some(J3dKind::Animation),
        _ => None,
    }
}

/// Whether `data` carries any `J3D1`/`J3D2` magic, known variant or not.
pub fn is_family(data: &[u8]) -> bool {
    matches!(data.get(..4), Some(b"J3D1" | b"J3D2"))
}

// ── BlockRole ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockRole {
    /// Scene graph / skeleton info.
    Inf1,
    /// Vertex formats and arrays.
    Vtx1,
    /// Envelopes (skinning weights).
    Evp1,
    /// Draw matrices.
    Drw1,
    Jnt1,
    Shp1,
    Mat3,
    Tex1,
    /// Whole body of an animation file.
    Animation,
}

impl BlockRole {
    /// Canonical order of a model file.
    pub const MODEL_ORDER: [BlockRole; 8] = [
        BlockRole::Inf1,
        BlockRole::Vtx1,
        BlockRole::Evp1,
        BlockRole::Drw1,
        BlockRole::Jnt1,
        BlockRole::Shp1,
        BlockRole::Mat3,
        BlockRole::Tex1,
    ];

    pub fn tag(self) -> Option<&'static [u8; 4]> {
        Some(match self {
            BlockRole::Inf1      => b"INF1",
            BlockRole::Vtx1      => b"VTX1",
            BlockRole::Evp1      => b"EVP1",
            BlockRole::Drw1      => b"DRW1",
            BlockRole::Jnt1      => b"JNT1",
            BlockRole::Shp1      => b"SHP1",
            BlockRole::Mat3      => b"MAT3",
            BlockRole::Tex1      => b"TEX1",
            BlockRole::Animation => return None,
        })
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::MODEL_ORDER.iter().copied().find(|r| r.tag().is_some_and(|t| t == tag))
    }
}

impl fmt::Display for BlockRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            Some(tag) => f.write_str(&String::from_utf8_lossy(tag)),
            None      => f.write_str("animation"),
        }
    }
}

// ── SubBlock ─────────────────────────────────────────────────────────────────

/// One block and the payload window inside it.
///
/// Invariant: `header_offset ≤ begin ≤ end ≤ header_offset + size ≤ len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubBlock {
    pub role:          BlockRole,
    pub header_offset: usize,
    pub size:          usize,
    pub begin:         usize,
    pub end:           usize,
}

impl SubBlock {
    pub fn window(&self) -> Range<usize> {
        self.begin..self.end
    }

    fn checked(self, len: usize) -> Result<Self, ArchiveError> {
        let block_end = self.header_offset + self.size;
        if self.header_offset <= self.begin
            && self.begin <= self.end
            && self.end <= block_end
            && block_end <= len
        {
            Ok(self)
        } else {
            Err(ArchiveError::MalformedContainer(format!(
                "{} window {:#x}..{:#x} escapes block {:#x}+{:#x}",
                self.role, self.begin, self.end, self.header_offset, self.size
            )))
        }
    }
}

// ── J3dFile ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct J3dFile {
    pub kind:     J3dKind,
    pub magic:    [u8; 8],
    pub declared: usize,
    blocks:       Vec<SubBlock>,
}

impl J3dFile {
    pub fn parse(data: &[u8]) -> Result<Self, ArchiveError> {
        let kind = sniff(data)
            .ok_or_else(|| ArchiveError::MalformedContainer("missing J3D magic".into()))?;
        let mut cur = table(data, 0, HEADER_SIZE)?;
        let mut magic = [0u8; 8];
        std::io::Read::read_exact(&mut cur, &mut magic)?;
        let declared = cur.read_u32::<BigEndian>()? as usize;
        let block_count = cur.read_u32::<BigEndian>()? as usize;

        if declared > data.len() {
            return Err(ArchiveError::MalformedContainer(format!(
                "declared size {declared:#x} exceeds buffer of {:#x}",
                data.len()
            )));
        }

        let blocks = match kind {
            J3dKind::Model     => walk(data, block_count, &BlockRole::MODEL_ORDER)?,
            J3dKind::Materials => walk(data, block_count, &[BlockRole::Mat3])?,
            J3dKind::Animation => {
                let skip = if &magic == b"J3D1btp1" {
                    PATTERN_ANIMATION_SKIP
                } else {
                    KEYFRAME_ANIMATION_SKIP
                };
                let begin = skip.min(data.len());
                vec![SubBlock {
                    role:          BlockRole::Animation,
                    header_offset: 0,
                    size:          data.len(),
                    begin,
                    end:           data.len(),
                }]
            }
        };

        debug!(magic = %String::from_utf8_lossy(&magic), blocks = blocks.len(), "parsed J3D");
        Ok(Self { kind, magic, declared, blocks })
    }

    pub fn blocks(&self) -> &[SubBlock] {
        &self.blocks
    }

    pub fn block(&self, role: BlockRole) -> Option<&SubBlock> {
        self.blocks.iter().find(|b| b.role == role)
    }
}

/// Walk the block chain after the outer header collecting `expected` roles in
/// order.  Unrecognised tags are stepped over by their size.
fn walk(data: &[u8], block_count: usize, expected: &[BlockRole]) -> Result<Vec<SubBlock>, ArchiveError> {
    let mut blocks = Vec::with_capacity(expected.len());
    let mut next = expected.iter().copied().peekable();
    let mut offset = HEADER_SIZE;

    for _ in 0..block_count {
        let Some(&want) = next.peek() else { break };

        let mut cur = table(data, offset, BLOCK_HEADER_SIZE)?;
        let mut tag = [0u8; 4];
        std::io::Read::read_exact(&mut cur, &mut tag)?;
        let size = cur.read_u32::<BigEndian>()? as usize;
        if size < BLOCK_HEADER_SIZE || offset.checked_add(size).map_or(true, |e| e > data.len()) {
            return Err(ArchiveError::MalformedContainer(format!(
                "block {} at {offset:#x} declares size {size:#x}",
                String::from_utf8_lossy(&tag)
            )));
        }

        match BlockRole::from_tag(&tag) {
            Some(role) if role == want => {
                blocks.push(payload(data, role, offset, size)?);
                next.next();
            }
            Some(role) if expected.contains(&role) => {
                return Err(ArchiveError::MalformedContainer(format!(
                    "block {role} at {offset:#x} found where {want} was expected"
                )));
            }
            _ => debug!(tag = %String::from_utf8_lossy(&tag), offset, "skipping J3D block"),
        }
        offset += size;
    }

    if let Some(missing) = next.next() {
        return Err(ArchiveError::MalformedContainer(format!("J3D file has no {missing} block")));
    }
    Ok(blocks)
}

/// Compute the payload window of one block.
fn payload(data: &[u8], role: BlockRole, at: usize, size: usize) -> Result<SubBlock, ArchiveError> {
    let block = &data[at..at + size];
    let u32_at = |field: usize| -> Result<usize, ArchiveError> {
        Ok(table(block, field, 4)?.read_u32::<BigEndian>()? as usize)
    };
    let count = || -> Result<usize, ArchiveError> {
        Ok(table(block, 0x08, 2)?.read_u16::<BigEndian>()? as usize)
    };
    let block_end = at + size;

    let (begin, end) = match role {
        BlockRole::Inf1 => (at + u32_at(0x14)?, block_end),
        BlockRole::Vtx1 => (at + u32_at(0x0C)?, block_end),
        BlockRole::Evp1 => (at + u32_at(0x18)?, block_end),
        BlockRole::Drw1 => (at + u32_at(0x10)?, block_end),
        BlockRole::Jnt1 => {
            let begin = at + u32_at(0x0C)?;
            (begin, begin + count()? * JOINT_ENTRY_SIZE)
        }
        BlockRole::Shp1 => (at + u32_at(0x20)?, at + u32_at(0x28)?),
        BlockRole::Mat3 => (at + u32_at(0x0C)?, block_end),
        BlockRole::Tex1 => (at + u32_at(0x0C)? + count()? * TEXTURE_ENTRY_SIZE, block_end),
        BlockRole::Animation => (at, block_end),
    };

    SubBlock { role, header_offset: at, size, begin, end }.checked(data.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outer(magic: &[u8; 8], blocks: &[Vec<u8>]) -> Vec<u8> {
        let body: usize = blocks.iter().map(Vec::len).sum();
        let mut v = magic.to_vec();
        v.extend_from_slice(&((HEADER_SIZE + body) as u32).to_be_bytes());
        v.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
        v.resize(HEADER_SIZE, 0);
        for b in blocks {
            v.extend_from_slice(b);
        }
        v
    }

    fn mat3(payload_at: u32, size: usize) -> Vec<u8> {
        let mut b = b"MAT3".to_vec();
        b.extend_from_slice(&(size as u32).to_be_bytes());
        b.resize(0x0C, 0);
        b.extend_from_slice(&payload_at.to_be_bytes());
        b.resize(size, 0xAB);
        b
    }

    #[test]
    fn sniff_recognises_family() {
        assert_eq!(sniff(b"J3D2bmd3...."), Some(J3dKind::Model));
        assert_eq!(sniff(b"J3D2bmd2"), Some(J3dKind::Model));
        assert_eq!(sniff(b"J3D2bmt3"), Some(J3dKind::Materials));
        assert_eq!(sniff(b"J3D1btp1"), Some(J3dKind::Animation));
        assert_eq!(sniff(b"J3D2bdl4"), None);
        assert_eq!(sniff(b"J3D"), None);
        assert!(is_family(b"J3D2bdl4"));
        assert!(is_family(b"J3D1brk1"));
        assert!(!is_family(b"J3D3bmd3"));
    }

    #[test]
    fn materials_file_exposes_one_window() {
        let data = outer(b"J3D2bmt3", &[mat3(0x20, 0x40)]);
        let file = J3dFile::parse(&data).unwrap();
        assert_eq!(file.kind, J3dKind::Materials);
        let mat = file.block(BlockRole::Mat3).unwrap();
        assert_eq!(mat.window(), 0x40..0x60);
    }

    #[test]
    fn unknown_blocks_are_stepped_over() {
        let mut junk = b"MDL3".to_vec();
        junk.extend_from_slice(&0x10u32.to_be_bytes());
        junk.resize(0x10, 0);
        let data = outer(b"J3D2bmt3", &[junk, mat3(0x10, 0x20)]);
        let file = J3dFile::parse(&data).unwrap();
        assert_eq!(file.blocks()[0].window(), 0x40..0x50);
    }

    #[test]
    fn window_past_block_is_malformed() {
        let data = outer(b"J3D2bmt3", &[mat3(0x80, 0x40)]);
        assert!(matches!(J3dFile::parse(&data), Err(ArchiveError::MalformedContainer(_))));
    }

    #[test]
    fn missing_block_is_malformed() {
        let data = outer(b"J3D2bmt3", &[]);
        assert!(matches!(J3dFile::parse(&data), Err(ArchiveError::MalformedContainer(_))));
    }

    #[test]
    fn animation_skips_fixed_header() {
        let mut data = outer(b"J3D1bck1", &[]);
        data.resize(0x100, 0);
        let file = J3dFile::parse(&data).unwrap();
        assert_eq!(file.blocks()[0].window(), 0x60..0x100);

        data[..8].copy_from_slice(b"J3D1btp1");
        let file = J3dFile::parse(&data).unwrap();
        assert_eq!(file.blocks()[0].window(), 0x20..0x100);
    }
}
