//! Codec registry for the Nintendo LZSS family.
//!
//! # Identity rules
//! A compressed buffer is identified by its first four bytes:
//!   - `Yaz0`: one interleaved stream after a 16-byte header.
//!   - `Yay0`: code, back-reference and literal streams at offsets declared
//!     in the header.
//!
//! Anything else is [`CodecId::None`] and is handed to the container layer
//! verbatim.
//!
//! # Endianness
//! Every header field is big-endian.  Offsets are relative to the start of
//! the compressed buffer.

use std::io::{self, Cursor};

use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use thiserror::Error;

pub mod yay0;
pub mod yaz0;

pub use yay0::Yay0Codec;
pub use yaz0::Yaz0Codec;

pub const YAZ0_MAGIC: &[u8; 4] = b"Yaz0";
pub const YAY0_MAGIC: &[u8; 4] = b"Yay0";

/// Both variants carry a 16-byte header.
pub const HEADER_SIZE: usize = 0x10;

/// Sliding-window size shared by both variants (12-bit distance).
pub const WINDOW_SIZE: usize = 0x1000;

// ── CodecId ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    None,
    Yaz0,
    Yay0,
}

impl CodecId {
    pub fn magic(self) -> Option<&'static [u8; 4]> {
        match self {
            CodecId::None => None,
            CodecId::Yaz0 => Some(YAZ0_MAGIC),
            CodecId::Yay0 => Some(YAY0_MAGIC),
        }
    }

    /// Human-readable name (diagnostics and CLI).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Yaz0 => "yaz0",
            CodecId::Yay0 => "yay0",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CodecId::None),
            "yaz0" => Some(CodecId::Yaz0),
            "yay0" => Some(CodecId::Yay0),
            _      => None,
        }
    }
}

/// Identify the compression variant of `data` from its magic.
pub fn sniff(data: &[u8]) -> CodecId {
    match data.get(..4) {
        Some(m) if m == YAZ0_MAGIC => CodecId::Yaz0,
        Some(m) if m == YAY0_MAGIC => CodecId::Yay0,
        _                          => CodecId::None,
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Missing or unknown compression magic")]
    BadMagic,
    /// A read ran off the end of the compressed input.
    #[error("Truncated stream: needed {needed} byte(s) at {offset:#x}, input is {available} byte(s)")]
    TruncatedStream { offset: usize, needed: usize, available: usize },
    /// A back-reference points before the start of the decoded output.
    #[error("Back-reference distance {distance} at output position {position:#x} reaches before the start")]
    InvalidBackReference { distance: usize, position: usize },
    #[error("Unsupported codec operation: {0}")]
    Unsupported(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── CompressedHeader ─────────────────────────────────────────────────────────

/// Where each stream begins inside the compressed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLayout {
    /// Control bits, tokens and literals interleaved from `data`.
    Interleaved { data: usize },
    /// Three independent streams.
    Split { codes: usize, counts: usize, literals: usize },
}

/// The 16-byte header shared by both variants.  Parsed once per buffer and
/// consumed immediately by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedHeader {
    pub codec:        CodecId,
    pub decoded_size: u32,
    pub layout:       StreamLayout,
}

impl CompressedHeader {
    pub fn read(data: &[u8]) -> Result<Self, CodecError> {
        let codec = sniff(data);
        if codec == CodecId::None {
            return Err(CodecError::BadMagic);
        }
        if data.len() < HEADER_SIZE {
            return Err(CodecError::TruncatedStream {
                offset:    0,
                needed:    HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut cur = Cursor::new(&data[4..HEADER_SIZE]);
        let decoded_size = cur.read_u32::<BigEndian>()?;
        let layout = match codec {
            CodecId::Yay0 => StreamLayout::Split {
                codes:    HEADER_SIZE,
                counts:   cur.read_u32::<BigEndian>()? as usize,
                literals: cur.read_u32::<BigEndian>()? as usize,
            },
            _ => StreamLayout::Interleaved { data: HEADER_SIZE },
        };

        Ok(Self { codec, decoded_size, layout })
    }
}

// ── Bit-flag reader shared by both decoders ──────────────────────────────────

/// MSB-first control-bit cursor.  `next` fetches a fresh control byte from
/// the supplied stream whenever the previous eight flags are used up.
#[derive(Debug, Default)]
pub(crate) struct FlagReader {
    byte:      u8,
    remaining: u8,
}

impl FlagReader {
    /// Returns `true` for a literal, `false` for a back-reference.
    #[inline]
    pub(crate) fn next(&mut self, src: &[u8], pos: &mut usize) -> Result<bool, CodecError> {
        if self.remaining == 0 {
            self.byte = read_byte(src, pos)?;
            self.remaining = 8;
        }
        let literal = self.byte & 0x80 != 0;
        self.byte <<= 1;
        self.remaining -= 1;
        Ok(literal)
    }
}

#[inline]
pub(crate) fn read_byte(src: &[u8], pos: &mut usize) -> Result<u8, CodecError> {
    let b = *src.get(*pos).ok_or(CodecError::TruncatedStream {
        offset:    *pos,
        needed:    1,
        available: src.len(),
    })?;
    *pos += 1;
    Ok(b)
}

/// Expand a back-reference token into `out`.
///
/// `byte1`'s high nibble is the run length minus 2; zero means the true
/// length is `extra + 0x12`, where `extra` comes from `next_extra`.
#[inline]
pub(crate) fn copy_back_reference(
    out:        &mut Vec<u8>,
    byte1:      u8,
    byte2:      u8,
    next_extra: impl FnOnce() -> Result<u8, CodecError>,
    limit:      usize,
) -> Result<(), CodecError> {
    let distance = (((byte1 & 0x0F) as usize) << 8) | byte2 as usize;
    let length = match byte1 >> 4 {
        0 => next_extra()? as usize + 0x12,
        n => n as usize + 2,
    };

    let position = out.len();
    if distance + 1 > position {
        return Err(CodecError::InvalidBackReference { distance, position });
    }

    // Byte-at-a-time: source and destination may overlap.
    let mut src = position - distance - 1;
    for _ in 0..length {
        if out.len() >= limit {
            break;
        }
        let b = out[src];
        out.push(b);
        src += 1;
    }
    Ok(())
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId { CodecId::None }
    fn compress(&self, data: &[u8])   -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a CodecId to a built-in codec.
pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None => Box::new(NoneCodec),
        CodecId::Yaz0 => Box::new(Yaz0Codec),
        CodecId::Yay0 => Box::new(Yay0Codec),
    }
}

/// Decode `data` if it carries a known compression magic, otherwise return
/// it unchanged.  The detected codec is returned alongside the bytes.
pub fn decompress(data: &[u8]) -> Result<(CodecId, Vec<u8>), CodecError> {
    let id = sniff(data);
    let decoded = get_codec(id).decompress(data)?;
    Ok((id, decoded))
}
