//! Escape positions.
//!
//! Strings are stored decoded. To write one back as JSON, the bytes that must
//! be escaped again are remembered as a list of deltas: each entry counts the
//! bytes between the previous escaped byte (exclusive) and the next one. For
//! `a\"b\\` the decoded bytes are `a"b\` and the deltas are `[1, 1]`.

use crate::varint;

/// Whether a decoded byte has to be escaped inside a JSON string.
#[inline]
#[must_use]
pub fn needs_escape(byte: u8) -> bool {
    byte == b'"' || byte == b'\\' || byte < 0x20
}

/// Computes the escape deltas of `bytes` into `positions`, replacing its
/// contents.
pub fn find_escape_positions(bytes: &[u8], positions: &mut Vec<usize>) {
    positions.clear();
    let mut last = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if needs_escape(b) {
            positions.push(i - last);
            last = i + 1;
        }
    }
}

/// Writes `bytes` as the body of a JSON string, escaping exactly the bytes
/// named by `positions`.
pub fn write_escaped(bytes: &[u8], positions: &[usize], out: &mut Vec<u8>) {
    let mut start = 0;
    for &delta in positions {
        let at = start + delta;
        let Some(&b) = bytes.get(at) else {
            break;
        };
        out.extend_from_slice(&bytes[start..at]);
        push_escape(b, out);
        start = at + 1;
    }
    out.extend_from_slice(bytes.get(start..).unwrap_or_default());
}

fn push_escape(byte: u8, out: &mut Vec<u8>) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let short = match byte {
        b'"' => b'"',
        b'\\' => b'\\',
        b'\n' => b'n',
        b'\r' => b'r',
        b'\t' => b't',
        0x08 => b'b',
        0x0C => b'f',
        _ => {
            out.extend_from_slice(b"\\u00");
            out.push(HEX[usize::from(byte >> 4)]);
            out.push(HEX[usize::from(byte & 0xF)]);
            return;
        }
    };
    out.push(b'\\');
    out.push(short);
}

/// Appends the escape table: the number of deltas followed by the deltas.
pub(crate) fn write_table(positions: &[usize], out: &mut Vec<u8>) {
    varint::write_usize(out, positions.len());
    for &delta in positions {
        varint::write_usize(out, delta);
    }
}

/// Reads an escape table at `pos`, returning the deltas and the table size.
pub(crate) fn read_table(bytes: &[u8], pos: usize) -> Option<(Vec<usize>, usize)> {
    let (count, mut len) = varint::read_u64(bytes, pos)?;
    let count = usize::try_from(count).ok()?;
    // Each delta takes at least one byte.
    if count > bytes.len().saturating_sub(pos + len) {
        return None;
    }
    let mut positions = Vec::with_capacity(count);
    for _ in 0..count {
        let (delta, used) = varint::read_u64(bytes, pos + len)?;
        positions.push(usize::try_from(delta).ok()?);
        len += used;
    }
    Some((positions, len))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(b"plain", &[])]
    #[case(b"a\"b\\", &[1, 1])]
    #[case(b"\n\"\\A", &[0, 0, 0])]
    #[case(b"tab\there\r\n", &[3, 4, 0])]
    #[case(b"\x01", &[0])]
    fn finds_positions(#[case] bytes: &[u8], #[case] expected: &[usize]) {
        let mut positions = vec![99];
        find_escape_positions(bytes, &mut positions);
        assert_eq!(positions, expected);
    }

    #[test]
    fn rederives_escaped_form() {
        let mut out = Vec::new();
        write_escaped(b"\n\"\\A", &[0, 0, 0], &mut out);
        assert_eq!(out, br#"\n\"\\A"#);

        out.clear();
        write_escaped(b"x\x01y\x0C", &[1, 1], &mut out);
        assert_eq!(out, br"x\u0001y\f");
    }

    #[test]
    fn only_listed_bytes_are_escaped() {
        let mut out = Vec::new();
        write_escaped(b"a\nb\nc", &[1], &mut out);
        assert_eq!(out, b"a\\nb\nc");
    }

    #[test]
    fn table_round_trips() {
        let mut out = vec![0xAA];
        write_table(&[0, 3, 300], &mut out);
        assert_eq!(read_table(&out, 1), Some((vec![0, 3, 300], out.len() - 1)));
        assert_eq!(read_table(&[0x05, 0x00], 0), None);
    }
}
