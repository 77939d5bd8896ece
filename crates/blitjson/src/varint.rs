//! Variable-size integers used by the binary document layout.
//!
//! Sizes and counts are written as little-endian base-128 varints: seven bits
//! per byte with the high bit set on every byte but the last. Signed integers
//! are zig-zag mapped first so that small negative numbers stay short.

/// Largest number of bytes a `u64` varint can take.
pub(crate) const MAX_VARINT_LEN: usize = 10;

/// Appends `value` as a varint, returning the number of bytes written.
pub(crate) fn write_u64(out: &mut Vec<u8>, mut value: u64) -> usize {
    let mut count = 1;
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
        count += 1;
    }
    out.push(value as u8);
    count
}

/// Appends `value` as a varint.
pub(crate) fn write_usize(out: &mut Vec<u8>, value: usize) -> usize {
    write_u64(out, value as u64)
}

/// Appends `value` zig-zag encoded.
pub(crate) fn write_i64(out: &mut Vec<u8>, value: i64) -> usize {
    write_u64(out, zigzag(value))
}

/// Maps signed integers onto unsigned ones: 0, -1, 1, -2, 2, ...
#[inline]
pub(crate) fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub(crate) fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Reads a varint starting at `pos`.
///
/// Returns the value and the number of bytes consumed, or `None` if the input
/// ends inside the varint or the varint is longer than a `u64`.
pub(crate) fn read_u64(bytes: &[u8], pos: usize) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &b) in bytes.get(pos..)?.iter().enumerate().take(MAX_VARINT_LEN) {
        let low = u64::from(b & 0x7F);
        if shift == 63 && low > 1 {
            return None;
        }
        value |= low << shift;
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

pub(crate) fn read_i64(bytes: &[u8], pos: usize) -> Option<(i64, usize)> {
    read_u64(bytes, pos).map(|(v, len)| (unzigzag(v), len))
}
