//! Yay0: LZSS with split streams.
//!
//! ```text
//! [0x00] "Yay0"
//! [0x04] decoded size            (u32 BE)
//! [0x08] back-reference offset   (u32 BE)  2- or 3-byte tokens live here
//! [0x0C] literal offset          (u32 BE)  literals and length-overflow bytes
//! [0x10] control bits            (MSB first, 1 = literal)
//! ```
//!
//! Token semantics are identical to Yaz0; only the stream layout differs.
//! There is no encoder.

use super::{
    copy_back_reference, read_byte, Codec, CodecError, CodecId, CompressedHeader, FlagReader,
    StreamLayout,
};

pub struct Yay0Codec;

impl Codec for Yay0Codec {
    fn codec_id(&self) -> CodecId { CodecId::Yay0 }
    fn compress(&self, _: &[u8]) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Unsupported("Yay0 encoding"))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { decode(data) }
}

pub fn decode(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header = CompressedHeader::read(data)?;
    let StreamLayout::Split { codes, counts, literals } = header.layout else {
        return Err(CodecError::BadMagic);
    };

    let size = header.decoded_size as usize;
    let mut out = Vec::with_capacity(size.min(64 * 1024 * 1024));
    let (mut code_pos, mut count_pos, mut literal_pos) = (codes, counts, literals);
    let mut flags = FlagReader::default();

    while out.len() < size {
        if flags.next(data, &mut code_pos)? {
            out.push(read_byte(data, &mut literal_pos)?);
        } else {
            let byte1 = read_byte(data, &mut count_pos)?;
            let byte2 = read_byte(data, &mut count_pos)?;
            copy_back_reference(&mut out, byte1, byte2, || read_byte(data, &mut literal_pos), size)?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a Yay0 file from its three streams.
    fn build(size: u32, codes: &[u8], counts: &[u8], literals: &[u8]) -> Vec<u8> {
        let count_off = 0x10 + codes.len() as u32;
        let literal_off = count_off + counts.len() as u32;
        let mut v = b"Yay0".to_vec();
        v.extend_from_slice(&size.to_be_bytes());
        v.extend_from_slice(&count_off.to_be_bytes());
        v.extend_from_slice(&literal_off.to_be_bytes());
        v.extend_from_slice(codes);
        v.extend_from_slice(counts);
        v.extend_from_slice(literals);
        v
    }

    #[test]
    fn literals_only() {
        let raw = build(4, &[0xF0], &[], b"WXYZ");
        assert_eq!(decode(&raw).unwrap(), b"WXYZ");
    }

    #[test]
    fn tokens_read_from_count_stream() {
        // "ab" + copy 4 from distance 2
        let raw = build(6, &[0b1100_0000], &[0x20, 0x01], b"ab");
        assert_eq!(decode(&raw).unwrap(), b"ababab");
    }

    #[test]
    fn long_run_takes_overflow_byte_from_literals() {
        // 'z' then a 3-byte token whose extra length byte (0x02) sits in the literal stream
        let raw = build(21, &[0b1000_0000], &[0x00, 0x00], &[b'z', 0x02]);
        assert_eq!(decode(&raw).unwrap(), vec![b'z'; 21]);
    }

    #[test]
    fn truncated_literal_stream() {
        let raw = build(4, &[0xF0], &[], b"WX");
        assert!(matches!(decode(&raw), Err(CodecError::TruncatedStream { .. })));
    }

    #[test]
    fn encoding_is_unsupported() {
        assert!(matches!(Yay0Codec.compress(b"abc"), Err(CodecError::Unsupported(_))));
    }
}
