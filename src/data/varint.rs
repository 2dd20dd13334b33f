//! Unsigned LEB128 varints

use bytes::BufMut;

/// Max encoded length of a 32-bit value
pub const MAX_VARINT_LEN32: usize = 5;

/// Max encoded length of a 64-bit value
pub const MAX_VARINT_LEN64: usize = 10;

/// Encode unsigned integer as varint (7 bits per byte, high bit = continue)
pub fn put_uvarint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Decode a varint from the front of `buf`
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// buffer ends mid-varint or the value overflows 64 bits.
pub fn get_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN64 {
            return None;
        }
        if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
            return None;
        }

        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }

    None
}
