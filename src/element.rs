//! Fixed-width element codec.
//!
//! Everything the sorter moves between memory and disk goes through the
//! [`Element`] trait: a fixed-width, bitwise-copyable, totally-ordered scalar
//! with a little-endian encoding. Keeping the codec behind a trait pins the
//! on-disk layout independently of the host while letting the containers stay
//! generic over the record type.

use byteorder::{ByteOrder, LittleEndian};

/// A sortable record that can be copied bit-for-bit to and from disk.
///
/// `WIDTH` is the encoded size in bytes; every encode/decode round-trip must
/// be the identity, and the comparison order must match the in-memory `Ord`.
pub trait Element: Copy + Ord + Send + Sync + 'static {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Decodes one element from `buf`; `buf` holds exactly `WIDTH` bytes.
    fn decode(buf: &[u8]) -> Self;

    /// Encodes `self` into `buf`; `buf` holds exactly `WIDTH` bytes.
    fn encode(self, buf: &mut [u8]);
}

impl Element for i32 {
    const WIDTH: usize = 4;

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }

    fn encode(self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, self);
    }
}

impl Element for u32 {
    const WIDTH: usize = 4;

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }

    fn encode(self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, self);
    }
}

impl Element for i64 {
    const WIDTH: usize = 8;

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }

    fn encode(self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, self);
    }
}

impl Element for u64 {
    const WIDTH: usize = 8;

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }

    fn encode(self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, self);
    }
}

/// Decodes `raw` (a whole number of encoded elements) into `dst`, replacing
/// its previous contents.
pub fn decode_block<T: Element>(raw: &[u8], dst: &mut Vec<T>) {
    dst.clear();
    dst.extend(raw.chunks_exact(T::WIDTH).map(T::decode));
}

/// Encodes `src` into `raw`, replacing its previous contents.
pub fn encode_block<T: Element>(src: &[T], raw: &mut Vec<u8>) {
    raw.resize(src.len() * T::WIDTH, 0);
    for (item, chunk) in src.iter().zip(raw.chunks_exact_mut(T::WIDTH)) {
        item.encode(chunk);
    }
}
