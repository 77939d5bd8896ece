//! Appends values in the blittable layout (see [`format`](crate::format)).

use crate::builder::{PropertyTag, WriteToken};
use crate::error::FormatError;
use crate::escape;
use crate::format::{BlittableToken, FOOTER_SIZE, FORMAT_VERSION, OffsetWidth, TokenKind};
use crate::varint;

#[derive(Debug, Default)]
pub(crate) struct BlittableWriter {
    out: Vec<u8>,
}

impl BlittableWriter {
    pub(crate) fn position(&self) -> usize {
        self.out.len()
    }

    pub(crate) fn clear(&mut self) {
        self.out.clear();
    }

    fn scalar(&self, kind: TokenKind, position: usize) -> WriteToken {
        WriteToken {
            position,
            token: BlittableToken::scalar(kind),
        }
    }

    pub(crate) fn write_integer(&mut self, value: i64) -> WriteToken {
        let position = self.position();
        varint::write_i64(&mut self.out, value);
        self.scalar(TokenKind::Integer, position)
    }

    pub(crate) fn write_float(&mut self, text: &[u8]) -> WriteToken {
        let position = self.position();
        varint::write_usize(&mut self.out, text.len());
        self.out.extend_from_slice(text);
        self.scalar(TokenKind::Float, position)
    }

    pub(crate) fn write_string(&mut self, bytes: &[u8], escape_positions: &[usize]) -> WriteToken {
        let position = self.position();
        write_string_body(&mut self.out, bytes, escape_positions);
        self.scalar(TokenKind::String, position)
    }

    pub(crate) fn write_compressed(&mut self, len: usize, compressed: &[u8], escape_positions: &[usize]) -> WriteToken {
        let position = self.position();
        varint::write_usize(&mut self.out, len);
        varint::write_usize(&mut self.out, compressed.len());
        self.out.extend_from_slice(compressed);
        escape::write_table(escape_positions, &mut self.out);
        self.scalar(TokenKind::CompressedString, position)
    }

    pub(crate) fn write_bool(&mut self, value: bool) -> WriteToken {
        let position = self.position();
        self.out.push(u8::from(value));
        self.scalar(TokenKind::Boolean, position)
    }

    pub(crate) fn write_null(&mut self) -> WriteToken {
        let position = self.position();
        self.scalar(TokenKind::Null, position)
    }

    /// Writes the property table of an object. `properties` must already be
    /// sorted by name.
    pub(crate) fn write_object(
        &mut self,
        properties: &[PropertyTag],
        max_property_id: u32,
    ) -> Result<WriteToken, FormatError> {
        let position = self.position();
        let first = properties.iter().map(|p| p.position).min().unwrap_or(position);
        let offsets = self.width_for(position - first)?;
        let ids = self.width_for(max_property_id as usize)?;

        varint::write_usize(&mut self.out, properties.len());
        for property in properties {
            offsets.write(&mut self.out, position - property.position);
            ids.write(&mut self.out, property.property as usize);
            self.out.push(property.token.byte());
        }
        Ok(WriteToken {
            position,
            token: BlittableToken::object(offsets, ids),
        })
    }

    /// Writes the element table of an array.
    pub(crate) fn write_array(&mut self, elements: &[WriteToken]) -> Result<WriteToken, FormatError> {
        let position = self.position();
        let first = elements.iter().map(|e| e.position).min().unwrap_or(position);
        let offsets = self.width_for(position - first)?;

        varint::write_usize(&mut self.out, elements.len());
        for element in elements {
            offsets.write(&mut self.out, position - element.position);
            self.out.push(element.token.byte());
        }
        Ok(WriteToken {
            position,
            token: BlittableToken::array(offsets),
        })
    }

    /// Appends the names table and the footer and hands out the document,
    /// leaving the writer empty.
    pub(crate) fn finish<'n>(
        &mut self,
        root: WriteToken,
        names: impl ExactSizeIterator<Item = (&'n [u8], &'n [usize])>,
    ) -> Result<Vec<u8>, FormatError> {
        let table = self.position();
        let count = names.len();
        let count_bytes = self.to_u32(count)?.to_le_bytes();
        self.out.extend_from_slice(&count_bytes);
        let offsets_at = self.position();
        self.out.resize(offsets_at + 4 * count, 0);

        for (i, (name, escape_positions)) in names.enumerate() {
            let offset = self.to_u32(self.position() - table)?;
            let slot = offsets_at + 4 * i;
            self.out[slot..slot + 4].copy_from_slice(&offset.to_le_bytes());
            write_string_body(&mut self.out, name, escape_positions);
        }

        let root_position = self.to_u32(root.position)?;
        let table_position = self.to_u32(table)?;
        self.out.reserve(FOOTER_SIZE);
        self.out.extend_from_slice(&root_position.to_le_bytes());
        self.out.extend_from_slice(&table_position.to_le_bytes());
        self.out.push(root.token.byte());
        self.out.push(FORMAT_VERSION);
        self.to_u32(self.out.len())?;
        Ok(core::mem::take(&mut self.out))
    }

    fn width_for(&self, max: usize) -> Result<OffsetWidth, FormatError> {
        OffsetWidth::for_value(max).ok_or(FormatError::DocumentTooLarge(self.out.len()))
    }

    fn to_u32(&self, value: usize) -> Result<u32, FormatError> {
        u32::try_from(value).map_err(|_| FormatError::DocumentTooLarge(self.out.len()))
    }
}

fn write_string_body(out: &mut Vec<u8>, bytes: &[u8], escape_positions: &[usize]) {
    varint::write_usize(out, bytes.len());
    out.extend_from_slice(bytes);
    escape::write_table(escape_positions, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_use_their_compact_encodings() {
        let mut writer = BlittableWriter::default();
        assert_eq!(writer.write_integer(-3).position, 0);
        assert_eq!(writer.write_float(b"1.5").position, 1);
        let s = writer.write_string(b"a\"", &[1]);
        assert_eq!(s.position, 5);
        let null = writer.write_null();
        assert_eq!(null.position, writer.position());
        assert_eq!(writer.out, [5, 3, b'1', b'.', b'5', 2, b'a', b'"', 1, 1]);
    }

    #[test]
    fn object_entries_point_back_at_values() {
        let mut writer = BlittableWriter::default();
        let a = writer.write_bool(true);
        let b = writer.write_integer(7);
        let object = writer
            .write_object(
                &[
                    PropertyTag {
                        position: a.position,
                        token: a.token,
                        property: 0,
                    },
                    PropertyTag {
                        position: b.position,
                        token: b.token,
                        property: 1,
                    },
                ],
                1,
            )
            .unwrap();
        assert_eq!(object.position, 2);
        assert_eq!(object.token, BlittableToken::object(OffsetWidth::U8, OffsetWidth::U8));
        assert_eq!(writer.out[2..], [2, 2, 0, 7, 1, 1, 3]);
    }

    #[test]
    fn wide_offsets_switch_width() {
        let mut writer = BlittableWriter::default();
        let long = writer.write_string(&[b'x'; 300], &[]);
        let array = writer.write_array(&[long]).unwrap();
        assert_eq!(array.token, BlittableToken::array(OffsetWidth::U16));
    }

    #[test]
    fn empty_containers_use_narrow_widths() {
        let mut writer = BlittableWriter::default();
        let array = writer.write_array(&[]).unwrap();
        assert_eq!(array.token, BlittableToken::array(OffsetWidth::U8));
        assert_eq!(writer.out, [0]);
    }

    #[test]
    fn finish_appends_names_and_footer() {
        let mut writer = BlittableWriter::default();
        let root = writer.write_array(&[]).unwrap();
        let names: [(&[u8], &[usize]); 1] = [(b"id", &[])];
        let bytes = writer.finish(root, names.into_iter()).unwrap();
        assert_eq!(
            bytes,
            [
                0, // empty array
                1, 0, 0, 0, // name count
                8, 0, 0, 0, // offset of the first name
                2, b'i', b'd', 0, // name
                0, 0, 0, 0, // root position
                1, 0, 0, 0, // names table position
                0x12, FORMAT_VERSION,
            ]
        );
        assert_eq!(writer.position(), 0);
    }
}
