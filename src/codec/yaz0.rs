//! Yaz0: interleaved LZSS stream.
//!
//! ```text
//! [0x00] "Yaz0"
//! [0x04] decoded size      (u32 BE)
//! [0x08] reserved          (8 bytes, zero)
//! [0x10] groups of: control byte (MSB first, 1 = literal, 0 = token)
//!                   followed by up to 8 literals / tokens
//! ```
//!
//! Token layout:
//! ```text
//! NR RR          2 bytes, N = length - 2 (1..=15), R = distance - 1
//! 0R RR NN       3 bytes, NN = length - 0x12
//! ```

use super::{
    copy_back_reference, read_byte, Codec, CodecError, CodecId, CompressedHeader, FlagReader,
    StreamLayout, HEADER_SIZE, WINDOW_SIZE, YAZ0_MAGIC,
};

/// Longest run a 3-byte token can express.
pub const MAX_RUN: usize = 0xFF + 0x12;

/// Upper bound on the up-front output reservation; larger outputs still
/// decode, they just grow incrementally.
const MAX_RESERVE: usize = 64 * 1024 * 1024;

pub struct Yaz0Codec;

impl Codec for Yaz0Codec {
    fn codec_id(&self) -> CodecId { CodecId::Yaz0 }
    fn compress(&self, data: &[u8])   -> Result<Vec<u8>, CodecError> { Ok(encode(data)) }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { decode(data) }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

pub fn decode(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header = CompressedHeader::read(data)?;
    let StreamLayout::Interleaved { data: start } = header.layout else {
        return Err(CodecError::BadMagic);
    };

    let size = header.decoded_size as usize;
    let mut out = Vec::with_capacity(size.min(MAX_RESERVE));
    let mut pos = start;
    let mut flags = FlagReader::default();

    while out.len() < size {
        if flags.next(data, &mut pos)? {
            out.push(read_byte(data, &mut pos)?);
        } else {
            let byte1 = read_byte(data, &mut pos)?;
            let byte2 = read_byte(data, &mut pos)?;
            copy_back_reference(&mut out, byte1, byte2, || read_byte(data, &mut pos), size)?;
        }
    }

    Ok(out)
}

// ── Encoder ──────────────────────────────────────────────────────────────────

/// Longest match for `src[pos..]` inside the preceding window.
///
/// Returns `(length, match_pos)`.  A length of 2 is reported as 1: a 2-byte
/// token costs as much as the two literals it replaces.
fn simple_match(src: &[u8], pos: usize) -> (usize, usize) {
    let window_start = pos.saturating_sub(WINDOW_SIZE);
    let max = (src.len() - pos).min(MAX_RUN);
    let mut best_len = 1;
    let mut best_pos = 0;

    for i in window_start..pos {
        let mut j = 0;
        while j < max && src[i + j] == src[pos + j] {
            j += 1;
        }
        if j > best_len {
            best_len = j;
            best_pos = i;
        }
    }

    if best_len == 2 { (1, best_pos) } else { (best_len, best_pos) }
}

/// Greedy matcher with one byte of lookahead.
#[derive(Default)]
struct Matcher {
    /// Match already computed for the current position by the previous step.
    pending: Option<(usize, usize)>,
}

impl Matcher {
    fn next(&mut self, src: &[u8], pos: usize) -> (usize, usize) {
        if let Some(m) = self.pending.take() {
            return m;
        }

        let here = simple_match(src, pos);
        if here.0 >= 3 {
            let ahead = simple_match(src, pos + 1);
            if ahead.0 >= here.0 + 2 {
                self.pending = Some(ahead);
                return (1, 0);
            }
        }
        here
    }
}

/// Compress `src` into a complete Yaz0 file (header included).
pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + src.len() + src.len() / 8 + 1);
    out.extend_from_slice(YAZ0_MAGIC);
    out.extend_from_slice(&(src.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0u8; 8]);

    let mut matcher = Matcher::default();
    let mut group: Vec<u8> = Vec::with_capacity(24);
    let mut code: u8 = 0;
    let mut units = 0u32;
    let mut pos = 0usize;

    while pos < src.len() {
        let (len, match_pos) = matcher.next(src, pos);

        if len < 3 {
            group.push(src[pos]);
            code |= 0x80 >> units;
            pos += 1;
        } else {
            let dist = pos - match_pos - 1;
            let len = len.min(MAX_RUN);
            if len >= 0x12 {
                group.push((dist >> 8) as u8);
                group.push(dist as u8);
                group.push((len - 0x12) as u8);
            } else {
                group.push((((len - 2) << 4) | (dist >> 8)) as u8);
                group.push(dist as u8);
            }
            pos += len;
        }

        units += 1;
        if units == 8 {
            out.push(code);
            out.append(&mut group);
            code = 0;
            units = 0;
        }
    }

    if units > 0 {
        out.push(code);
        out.append(&mut group);
    }

    out
}
