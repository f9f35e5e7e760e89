//! Length-prefixed record framing: a 4-byte little-endian length `L`
//! followed by exactly `L` bytes of ciphertext.

use crate::cipher::{self, Key};
use byteorder::{ByteOrder, LittleEndian};

const LEN_PREFIX_SIZE: usize = 4;

/// Outcome of attempting to pull one frame out of a read buffer.
pub enum FrameResult {
    /// Not enough bytes buffered yet for a complete frame.
    NeedMore,
    /// A complete frame decrypted successfully; `consumed` is the number of
    /// bytes (including the length prefix) the caller should advance its
    /// read cursor by, and `plaintext` is the decrypted body.
    Consumed { consumed: usize, plaintext: Vec<u8> },
    /// The frame's length prefix was present but decryption failed.
    Fatal,
}

/// Attempts to decode one frame from the front of `buf`. Leaves `buf`
/// untouched — the caller advances its own cursor by `consumed` bytes on
/// success. Multiple frames buffered at once are handled by calling this
/// repeatedly, advancing between calls; this function only ever looks at
/// the front of the buffer.
pub fn decode(buf: &[u8], key: &Key) -> FrameResult {
    if buf.len() < LEN_PREFIX_SIZE {
        return FrameResult::NeedMore;
    }

    let ciphertext_len = LittleEndian::read_u32(&buf[..LEN_PREFIX_SIZE]) as usize;
    let total_len = LEN_PREFIX_SIZE + ciphertext_len;

    if buf.len() < total_len {
        return FrameResult::NeedMore;
    }

    let ciphertext = &buf[LEN_PREFIX_SIZE..total_len];

    match cipher::decrypt(ciphertext, key) {
        Some(plaintext) => FrameResult::Consumed {
            consumed: total_len,
            plaintext,
        },
        None => FrameResult::Fatal,
    }
}

/// Encrypts `plaintext` and produces a complete wire frame: 4-byte
/// little-endian ciphertext length followed by the ciphertext itself.
pub fn encode(plaintext: &[u8], key: &Key) -> Vec<u8> {
    let ciphertext = cipher::encrypt(plaintext, key);

    let mut framed = Vec::with_capacity(LEN_PREFIX_SIZE + ciphertext.len());
    let mut len_prefix = [0u8; LEN_PREFIX_SIZE];
    LittleEndian::write_u32(&mut len_prefix, ciphertext.len() as u32);
    framed.extend_from_slice(&len_prefix);
    framed.extend_from_slice(&ciphertext);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Key {
        Key::from_password("frame test password")
    }

    #[test]
    fn need_more_on_short_length_prefix() {
        let key = test_key();
        let buf = [0u8, 1, 2];
        assert!(matches!(decode(&buf, &key), FrameResult::NeedMore));
    }

    #[test]
    fn need_more_one_byte_short_of_full_frame() {
        let key = test_key();
        let mut framed = encode(b"hello there", &key);
        framed.pop();
        assert!(matches!(decode(&framed, &key), FrameResult::NeedMore));
    }

    #[test]
    fn roundtrip_consumes_whole_frame() {
        let key = test_key();
        let framed = encode(b"hello there", &key);

        match decode(&framed, &key) {
            FrameResult::Consumed { consumed, plaintext } => {
                assert_eq!(consumed, framed.len());
                assert_eq!(plaintext, b"hello there");
            }
            _ => panic!("expected a fully consumed frame"),
        }
    }

    #[test]
    fn extra_trailing_bytes_are_left_unconsumed() {
        let key = test_key();
        let mut framed = encode(b"frame one", &key);
        let frame_len = framed.len();
        framed.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        match decode(&framed, &key) {
            FrameResult::Consumed { consumed, .. } => assert_eq!(consumed, frame_len),
            _ => panic!("expected a fully consumed frame"),
        }
    }
}
