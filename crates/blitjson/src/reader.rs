//! Reading blittable documents.
//!
//! A [`BlittableDocument`] validates the footer once and then navigates by
//! the recorded offsets: objects by binary search over their name-sorted
//! property tables, arrays by index. Nothing is decoded until asked for.

use std::cmp::Ordering;
use std::fmt;

use bstr::BStr;

use crate::compression::StringCompressor;
use crate::error::FormatError;
use crate::escape;
use crate::format::{BlittableToken, FOOTER_SIZE, FORMAT_VERSION, OffsetWidth, TokenKind};
use crate::value::{Map, Value};
use crate::varint;

/// A finished document.
#[derive(Clone, PartialEq, Eq)]
pub struct BlittableDocument {
    bytes: Vec<u8>,
    root_position: usize,
    root_token: BlittableToken,
    names_position: usize,
    name_count: usize,
}

impl fmt::Debug for BlittableDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlittableDocument")
            .field("size", &self.bytes.len())
            .field("root_position", &self.root_position)
            .field("root_token", &self.root_token)
            .field("names", &self.name_count)
            .finish()
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<usize, FormatError> {
    OffsetWidth::U32.read(bytes, pos).ok_or(FormatError::Truncated(pos))
}

fn read_varint(bytes: &[u8], pos: usize) -> Result<(usize, usize), FormatError> {
    if pos >= bytes.len() {
        return Err(FormatError::Truncated(pos));
    }
    let (value, len) = varint::read_u64(bytes, pos).ok_or(FormatError::BadVarint(pos))?;
    let value = usize::try_from(value).map_err(|_| FormatError::BadVarint(pos))?;
    Ok((value, len))
}

fn slice(bytes: &[u8], pos: usize, len: usize) -> Result<&[u8], FormatError> {
    pos.checked_add(len)
        .and_then(|end| bytes.get(pos..end))
        .ok_or(FormatError::Truncated(pos))
}

/// Reads `varint(len) bytes escape-table` at `pos`.
fn read_string(bytes: &[u8], pos: usize) -> Result<BlittableString<'_>, FormatError> {
    let (len, header) = read_varint(bytes, pos)?;
    let body = slice(bytes, pos + header, len)?;
    let table = pos + header + len;
    let (escapes, _) = escape::read_table(bytes, table).ok_or(FormatError::Truncated(table))?;
    Ok(BlittableString {
        position: pos,
        bytes: body,
        escapes,
    })
}

impl BlittableDocument {
    /// Opens a document, validating its footer and names table.
    ///
    /// # Errors
    ///
    /// [`FormatError`] if the footer or names table does not fit the bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FormatError> {
        let Some(footer) = bytes.len().checked_sub(FOOTER_SIZE) else {
            return Err(FormatError::Truncated(bytes.len()));
        };
        let version = bytes[footer + 9];
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let root_position = read_u32(&bytes, footer)?;
        let names_position = read_u32(&bytes, footer + 4)?;
        let root_token = BlittableToken::from_byte(bytes[footer + 8])?;
        if names_position > footer {
            return Err(FormatError::Truncated(names_position));
        }
        if root_position > names_position {
            return Err(FormatError::Truncated(root_position));
        }
        let name_count = read_u32(&bytes[..footer], names_position)?;
        name_count
            .checked_mul(4)
            .and_then(|size| size.checked_add(names_position + 4))
            .filter(|&end| end <= footer)
            .ok_or(FormatError::Truncated(names_position))?;

        Ok(Self {
            bytes,
            root_position,
            root_token,
            names_position,
            name_count,
        })
    }

    /// The encoded document.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Gives up the encoded document.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Size of the encoded document in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// The type of the root value.
    #[must_use]
    pub fn root_token(&self) -> BlittableToken {
        self.root_token
    }

    /// Number of distinct property names.
    #[must_use]
    pub fn name_count(&self) -> usize {
        self.name_count
    }

    /// The property name with the given id.
    ///
    /// # Errors
    ///
    /// [`FormatError::Truncated`] for ids past the names table or a damaged
    /// table.
    pub fn name(&self, id: usize) -> Result<BlittableString<'_>, FormatError> {
        if id >= self.name_count {
            return Err(FormatError::Truncated(self.names_position));
        }
        let names = &self.bytes[..self.bytes.len() - FOOTER_SIZE];
        let offset = read_u32(names, self.names_position + 4 + 4 * id)?;
        read_string(names, self.names_position + offset)
    }

    /// The root value.
    ///
    /// # Errors
    ///
    /// [`FormatError`] if the root value is damaged.
    pub fn root(&self) -> Result<BlittableValue<'_>, FormatError> {
        self.value_at(self.root_position, self.root_token)
    }

    fn values(&self) -> &[u8] {
        &self.bytes[..self.names_position]
    }

    fn value_at(&self, pos: usize, token: BlittableToken) -> Result<BlittableValue<'_>, FormatError> {
        let bytes = self.values();
        Ok(match token.kind() {
            TokenKind::Null => BlittableValue::Null,
            TokenKind::Boolean => BlittableValue::Boolean(*bytes.get(pos).ok_or(FormatError::Truncated(pos))? != 0),
            TokenKind::Integer => {
                if pos >= bytes.len() {
                    return Err(FormatError::Truncated(pos));
                }
                let (value, _) = varint::read_i64(bytes, pos).ok_or(FormatError::BadVarint(pos))?;
                BlittableValue::Integer(value)
            }
            TokenKind::Float => {
                let (len, header) = read_varint(bytes, pos)?;
                let text = slice(bytes, pos + header, len)?;
                let text = core::str::from_utf8(text).map_err(|_| FormatError::InvalidNumber(pos))?;
                BlittableValue::Float(LazyNumber { text, position: pos })
            }
            TokenKind::String => BlittableValue::String(read_string(bytes, pos)?),
            TokenKind::CompressedString => {
                let (len, first) = read_varint(bytes, pos)?;
                let (compressed_len, second) = read_varint(bytes, pos + first)?;
                let start = pos + first + second;
                let data = slice(bytes, start, compressed_len)?;
                let table = start + compressed_len;
                let (escapes, _) = escape::read_table(bytes, table).ok_or(FormatError::Truncated(table))?;
                BlittableValue::CompressedString(CompressedString {
                    position: pos,
                    len,
                    data,
                    escapes,
                })
            }
            TokenKind::Object => {
                let (offsets, ids) = token
                    .offset_width()
                    .zip(token.property_id_width())
                    .ok_or(FormatError::UnknownToken(token.byte()))?;
                let (count, header) = read_varint(bytes, pos)?;
                let entry_size = offsets.size() + ids.size() + 1;
                let table = Table::new(self, pos, count, pos + header, entry_size)?;
                BlittableValue::Object(BlittableObject { table, offsets, ids })
            }
            TokenKind::Array => {
                let offsets = token.offset_width().ok_or(FormatError::UnknownToken(token.byte()))?;
                let (count, header) = read_varint(bytes, pos)?;
                let table = Table::new(self, pos, count, pos + header, offsets.size() + 1)?;
                BlittableValue::Array(BlittableArray { table, offsets })
            }
        })
    }

    /// Materializes the document.
    ///
    /// # Errors
    ///
    /// [`FormatError::MissingCompressor`] if the document holds compressed
    /// strings, and any damage found on the way.
    pub fn to_value(&self) -> Result<Value, FormatError> {
        self.to_value_with(None)
    }

    /// Materializes the document, expanding compressed strings with
    /// `compressor`.
    ///
    /// # Errors
    ///
    /// Any damage found on the way.
    pub fn to_value_with(&self, compressor: Option<&dyn StringCompressor>) -> Result<Value, FormatError> {
        self.root()?.to_value(compressor)
    }

    /// Writes the document back as compact JSON with every escape restored.
    ///
    /// # Errors
    ///
    /// [`FormatError::MissingCompressor`] if the document holds compressed
    /// strings, and any damage found on the way.
    pub fn to_json(&self) -> Result<String, FormatError> {
        let mut out = Vec::with_capacity(self.bytes.len());
        self.write_json(None, &mut out)?;
        String::from_utf8(out).map_err(|err| FormatError::InvalidUtf8(err.utf8_error().valid_up_to()))
    }

    /// Appends the document as compact JSON to `out`.
    ///
    /// # Errors
    ///
    /// Any damage found on the way.
    pub fn write_json(&self, compressor: Option<&dyn StringCompressor>, out: &mut Vec<u8>) -> Result<(), FormatError> {
        self.root()?.write_json(compressor, out)
    }
}

/// A value inside a document.
#[derive(Debug, Clone, PartialEq)]
pub enum BlittableValue<'d> {
    /// `null`
    Null,
    /// `true` or `false`
    Boolean(bool),
    /// An integer.
    Integer(i64),
    /// A float kept as its literal text.
    Float(LazyNumber<'d>),
    /// A string.
    String(BlittableString<'d>),
    /// A string that needs a [`StringCompressor`] to read.
    CompressedString(CompressedString<'d>),
    /// An array.
    Array(BlittableArray<'d>),
    /// An object.
    Object(BlittableObject<'d>),
}

impl BlittableValue<'_> {
    /// Materializes the value.
    ///
    /// # Errors
    ///
    /// [`FormatError::MissingCompressor`] for compressed strings without a
    /// compressor, and any damage found on the way.
    pub fn to_value(&self, compressor: Option<&dyn StringCompressor>) -> Result<Value, FormatError> {
        Ok(match self {
            BlittableValue::Null => Value::Null,
            BlittableValue::Boolean(b) => Value::Boolean(*b),
            BlittableValue::Integer(n) => Value::Integer(*n),
            BlittableValue::Float(n) => Value::Float(n.parse()?),
            BlittableValue::String(s) => Value::String(s.to_str()?.to_owned()),
            BlittableValue::CompressedString(s) => {
                let bytes = s.decompress(compressor)?;
                Value::String(String::from_utf8(bytes).map_err(|_| FormatError::InvalidUtf8(s.position))?)
            }
            BlittableValue::Array(array) => {
                let mut items = Vec::with_capacity(array.len());
                for item in array.iter() {
                    items.push(item?.to_value(compressor)?);
                }
                Value::Array(items)
            }
            BlittableValue::Object(object) => {
                let mut map = Map::new();
                for property in object.iter() {
                    let (name, value) = property?;
                    map.insert(name.to_str()?.to_owned(), value.to_value(compressor)?);
                }
                Value::Object(map)
            }
        })
    }

    /// Appends the value as compact JSON to `out`.
    ///
    /// # Errors
    ///
    /// [`FormatError::MissingCompressor`] for compressed strings without a
    /// compressor, and any damage found on the way.
    pub fn write_json(&self, compressor: Option<&dyn StringCompressor>, out: &mut Vec<u8>) -> Result<(), FormatError> {
        match self {
            BlittableValue::Null => out.extend_from_slice(b"null"),
            BlittableValue::Boolean(true) => out.extend_from_slice(b"true"),
            BlittableValue::Boolean(false) => out.extend_from_slice(b"false"),
            BlittableValue::Integer(n) => out.extend_from_slice(n.to_string().as_bytes()),
            BlittableValue::Float(n) => out.extend_from_slice(n.as_str().as_bytes()),
            BlittableValue::String(s) => s.write_quoted(out),
            BlittableValue::CompressedString(s) => {
                let bytes = s.decompress(compressor)?;
                out.push(b'"');
                escape::write_escaped(&bytes, &s.escapes, out);
                out.push(b'"');
            }
            BlittableValue::Array(array) => {
                out.push(b'[');
                for (i, item) in array.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    item?.write_json(compressor, out)?;
                }
                out.push(b']');
            }
            BlittableValue::Object(object) => {
                out.push(b'{');
                for (i, property) in object.iter().enumerate() {
                    let (name, value) = property?;
                    if i > 0 {
                        out.push(b',');
                    }
                    name.write_quoted(out);
                    out.push(b':');
                    value.write_json(compressor, out)?;
                }
                out.push(b'}');
            }
        }
        Ok(())
    }
}

/// A float stored as the text it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LazyNumber<'d> {
    text: &'d str,
    position: usize,
}

impl<'d> LazyNumber<'d> {
    /// The literal text.
    #[must_use]
    pub fn as_str(&self) -> &'d str {
        self.text
    }

    /// Parses the text.
    ///
    /// # Errors
    ///
    /// [`FormatError::InvalidNumber`] for text that is not a float.
    pub fn parse(&self) -> Result<f64, FormatError> {
        self.text.parse().map_err(|_| FormatError::InvalidNumber(self.position))
    }
}

/// A string inside a document, with its escape table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlittableString<'d> {
    position: usize,
    bytes: &'d [u8],
    escapes: Vec<usize>,
}

impl<'d> BlittableString<'d> {
    /// The decoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &'d [u8] {
        self.bytes
    }

    /// The decoded bytes for display.
    #[must_use]
    pub fn as_bstr(&self) -> &'d BStr {
        BStr::new(self.bytes)
    }

    /// The decoded text.
    ///
    /// # Errors
    ///
    /// [`FormatError::InvalidUtf8`] if the input carried invalid UTF-8.
    pub fn to_str(&self) -> Result<&'d str, FormatError> {
        core::str::from_utf8(self.bytes).map_err(|_| FormatError::InvalidUtf8(self.position))
    }

    /// Delta-encoded positions of the bytes to escape on output.
    #[must_use]
    pub fn escape_positions(&self) -> &[usize] {
        &self.escapes
    }

    /// Appends the string as a quoted JSON literal.
    pub fn write_quoted(&self, out: &mut Vec<u8>) {
        out.push(b'"');
        escape::write_escaped(self.bytes, &self.escapes, out);
        out.push(b'"');
    }
}

/// A compressed string inside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedString<'d> {
    position: usize,
    len: usize,
    data: &'d [u8],
    escapes: Vec<usize>,
}

impl CompressedString<'_> {
    /// Length of the string once expanded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the expanded string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the stored form.
    #[must_use]
    pub fn compressed_len(&self) -> usize {
        self.data.len()
    }

    /// Delta-encoded positions of the bytes to escape on output.
    #[must_use]
    pub fn escape_positions(&self) -> &[usize] {
        &self.escapes
    }

    /// Expands the string.
    ///
    /// # Errors
    ///
    /// [`FormatError::MissingCompressor`] without a compressor and
    /// [`FormatError::Decompression`] if it rejects the data.
    pub fn decompress(&self, compressor: Option<&dyn StringCompressor>) -> Result<Vec<u8>, FormatError> {
        let compressor = compressor.ok_or(FormatError::MissingCompressor(self.position))?;
        let mut out = Vec::with_capacity(self.len);
        if compressor.decompress(self.data, self.len, &mut out) {
            Ok(out)
        } else {
            Err(FormatError::Decompression(self.position))
        }
    }
}

/// Entries of a container table.
#[derive(Clone, Copy)]
struct Table<'d> {
    doc: &'d BlittableDocument,
    position: usize,
    count: usize,
    entries: usize,
    entry_size: usize,
}

impl fmt::Debug for Table<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("position", &self.position)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Table<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.doc, other.doc) && self.position == other.position
    }
}

impl<'d> Table<'d> {
    fn new(
        doc: &'d BlittableDocument,
        position: usize,
        count: usize,
        entries: usize,
        entry_size: usize,
    ) -> Result<Self, FormatError> {
        count
            .checked_mul(entry_size)
            .and_then(|size| size.checked_add(entries))
            .filter(|&end| end <= doc.values().len())
            .ok_or(FormatError::Truncated(position))?;
        Ok(Self {
            doc,
            position,
            count,
            entries,
            entry_size,
        })
    }

    fn entry(&self, index: usize) -> usize {
        self.entries + index * self.entry_size
    }

    /// Resolves an entry offset and type byte. Only `null` may share its
    /// position with the container, so references always point backwards.
    fn value(&self, offset: usize, token: u8) -> Result<BlittableValue<'d>, FormatError> {
        let token = BlittableToken::from_byte(token)?;
        let position = self
            .position
            .checked_sub(offset)
            .filter(|_| offset > 0 || token.kind() == TokenKind::Null)
            .ok_or(FormatError::InvalidOffset(self.entry(0)))?;
        self.doc.value_at(position, token)
    }
}

/// An object inside a document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlittableObject<'d> {
    table: Table<'d>,
    offsets: OffsetWidth,
    ids: OffsetWidth,
}

impl<'d> BlittableObject<'d> {
    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.count
    }

    /// Whether the object has no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.count == 0
    }

    fn entry(&self, index: usize) -> Result<(usize, usize, u8), FormatError> {
        let bytes = self.table.doc.values();
        let at = self.table.entry(index);
        let offset = self.offsets.read(bytes, at).ok_or(FormatError::Truncated(at))?;
        let id = self.ids.read(bytes, at + self.offsets.size()).ok_or(FormatError::Truncated(at))?;
        let token = *bytes
            .get(at + self.offsets.size() + self.ids.size())
            .ok_or(FormatError::Truncated(at))?;
        Ok((offset, id, token))
    }

    /// The property at `index` in name order.
    ///
    /// # Errors
    ///
    /// [`FormatError`] if the entry is damaged; out of range indexes report
    /// [`FormatError::Truncated`].
    pub fn property(&self, index: usize) -> Result<(BlittableString<'d>, BlittableValue<'d>), FormatError> {
        if index >= self.len() {
            return Err(FormatError::Truncated(self.table.entry(index)));
        }
        let (offset, id, token) = self.entry(index)?;
        Ok((self.table.doc.name(id)?, self.table.value(offset, token)?))
    }

    /// Looks up a property by name.
    ///
    /// # Errors
    ///
    /// [`FormatError`] if an entry on the search path is damaged.
    pub fn get(&self, name: &str) -> Result<Option<BlittableValue<'d>>, FormatError> {
        let target = name.as_bytes();
        let (mut low, mut high) = (0, self.len());
        while low < high {
            let mid = low + (high - low) / 2;
            let (offset, id, token) = self.entry(mid)?;
            match self.table.doc.name(id)?.as_bytes().cmp(target) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return self.table.value(offset, token).map(Some),
            }
        }
        Ok(None)
    }

    /// The properties in name order.
    pub fn iter(&self) -> impl Iterator<Item = Result<(BlittableString<'d>, BlittableValue<'d>), FormatError>> + 'd {
        let object = *self;
        (0..object.len()).map(move |index| object.property(index))
    }
}

/// An array inside a document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlittableArray<'d> {
    table: Table<'d>,
    offsets: OffsetWidth,
}

impl<'d> BlittableArray<'d> {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.count
    }

    /// Whether the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.count == 0
    }

    /// The element at `index`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// [`FormatError`] if the entry is damaged.
    pub fn get(&self, index: usize) -> Result<Option<BlittableValue<'d>>, FormatError> {
        if index >= self.len() {
            return Ok(None);
        }
        let bytes = self.table.doc.values();
        let at = self.table.entry(index);
        let offset = self.offsets.read(bytes, at).ok_or(FormatError::Truncated(at))?;
        let token = *bytes.get(at + self.offsets.size()).ok_or(FormatError::Truncated(at))?;
        self.table.value(offset, token).map(Some)
    }

    /// The elements in order.
    pub fn iter(&self) -> impl Iterator<Item = Result<BlittableValue<'d>, FormatError>> + 'd {
        let array = *self;
        (0..array.len()).filter_map(move |index| array.get(index).transpose())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, UsageMode};

    fn document(json: &str) -> BlittableDocument {
        Context::default()
            .parse_buffer(json.as_bytes(), "reader", UsageMode::empty())
            .unwrap()
    }

    #[test]
    fn navigates_by_name_and_index() {
        let doc = document(r#"{"users": [{"name": "Ada"}, {"name": "Grace", "age": 85}], "count": 2}"#);
        let BlittableValue::Object(root) = doc.root().unwrap() else {
            panic!("root is not an object");
        };
        assert_eq!(root.len(), 2);
        assert_eq!(root.get("count").unwrap(), Some(BlittableValue::Integer(2)));
        assert_eq!(root.get("missing").unwrap(), None);

        let Some(BlittableValue::Array(users)) = root.get("users").unwrap() else {
            panic!("users is not an array");
        };
        assert_eq!(users.len(), 2);
        assert!(users.get(2).unwrap().is_none());
        let Some(BlittableValue::Object(grace)) = users.get(1).unwrap() else {
            panic!("second user is not an object");
        };
        let names: Vec<_> = grace
            .iter()
            .map(|property| property.unwrap().0.to_str().unwrap())
            .collect();
        assert_eq!(names, ["age", "name"]);
    }

    #[test]
    fn floats_keep_their_text() {
        let doc = document(r#"{"f": 1.50}"#);
        let BlittableValue::Object(root) = doc.root().unwrap() else {
            panic!("root is not an object");
        };
        let Some(BlittableValue::Float(f)) = root.get("f").unwrap() else {
            panic!("f is not a float");
        };
        assert_eq!(f.as_str(), "1.50");
        assert_eq!(f.parse().unwrap(), 1.5);
        assert_eq!(doc.to_json().unwrap(), r#"{"f":1.50}"#);
    }

    #[test]
    fn rejects_short_or_foreign_input() {
        assert_eq!(BlittableDocument::from_bytes(vec![1, 2, 3]), Err(FormatError::Truncated(3)));
        let mut bytes = document("{}").into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = 9;
        assert_eq!(BlittableDocument::from_bytes(bytes), Err(FormatError::UnsupportedVersion(9)));
    }

    #[test]
    fn rejects_self_referencing_entries() {
        // An array whose only entry points at the array itself.
        let bytes = vec![
            1, 0, 0x12, // array: one entry, offset 0, array token
            0, 0, 0, 0, // no names
            0, 0, 0, 0, // root position
            3, 0, 0, 0, // names table position
            0x12, FORMAT_VERSION,
        ];
        let doc = BlittableDocument::from_bytes(bytes).unwrap();
        assert!(matches!(doc.to_value(), Err(FormatError::InvalidOffset(_))));
    }

    #[test]
    fn rejects_tables_past_the_values() {
        let bytes = vec![
            5, // array claiming five entries
            0, 0, 0, 0, // no names
            0, 0, 0, 0, // root position
            1, 0, 0, 0, // names table position
            0x12, FORMAT_VERSION,
        ];
        let doc = BlittableDocument::from_bytes(bytes).unwrap();
        assert_eq!(doc.root(), Err(FormatError::Truncated(0)));
    }
}
