//! The blittable binary layout.
//!
//! ```text
//! document    := value* names-table footer
//! footer      := root_position:u32le names_table_position:u32le root_token:u8 version:u8
//! names-table := count:u32le (offset:u32le){count} string{count}
//! integer     := zigzag varint
//! float       := varint(len) ascii
//! string      := varint(len) bytes escape-table
//! compressed  := varint(len) varint(compressed_len) bytes escape-table
//! boolean     := u8
//! null        := (nothing)
//! object      := varint(count) (offset:W property_id:I token:u8){count}
//! array       := varint(count) (offset:W token:u8){count}
//! ```
//!
//! Values are written before the container that refers to them, so every
//! entry offset is the distance back from the container's position to the
//! value. Object entries are sorted by property name bytes, which lets a
//! reader binary search them. Name offsets inside the names table are
//! relative to the start of the table.

use std::fmt;

use crate::error::FormatError;

/// Version byte written into every footer.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the fixed footer at the end of every document.
pub const FOOTER_SIZE: usize = 10;

/// Strings shorter than this without escapes take the builder's fast path.
pub const SMALL_STRING_THRESHOLD: usize = 128;

/// A compressed string must save more than this many bytes to be kept.
pub(crate) const COMPRESSION_MIN_SAVING: usize = 8;

/// What a value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenKind {
    /// A property table.
    Object = 1,
    /// An element table.
    Array = 2,
    /// A zig-zag varint.
    Integer = 3,
    /// Floating point literal text.
    Float = 4,
    /// UTF-8 bytes with their escape table.
    String = 5,
    /// A string stored by a [`StringCompressor`](crate::StringCompressor).
    CompressedString = 6,
    /// One byte.
    Boolean = 7,
    /// No bytes.
    Null = 8,
}

impl TokenKind {
    fn from_bits(bits: u8) -> Option<TokenKind> {
        Some(match bits {
            1 => TokenKind::Object,
            2 => TokenKind::Array,
            3 => TokenKind::Integer,
            4 => TokenKind::Float,
            5 => TokenKind::String,
            6 => TokenKind::CompressedString,
            7 => TokenKind::Boolean,
            8 => TokenKind::Null,
            _ => return None,
        })
    }
}

/// Size of the offsets and property ids in a container table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OffsetWidth {
    /// One byte.
    U8 = 1,
    /// Two bytes, little endian.
    U16 = 2,
    /// Four bytes, little endian.
    U32 = 3,
}

impl OffsetWidth {
    /// The narrowest width that holds `max`, or `None` past `u32::MAX`.
    #[must_use]
    pub fn for_value(max: usize) -> Option<OffsetWidth> {
        if max <= usize::from(u8::MAX) {
            Some(OffsetWidth::U8)
        } else if max <= usize::from(u16::MAX) {
            Some(OffsetWidth::U16)
        } else if u32::try_from(max).is_ok() {
            Some(OffsetWidth::U32)
        } else {
            None
        }
    }

    /// Bytes per value.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            OffsetWidth::U8 => 1,
            OffsetWidth::U16 => 2,
            OffsetWidth::U32 => 4,
        }
    }

    fn from_bits(bits: u8) -> Option<OffsetWidth> {
        match bits {
            1 => Some(OffsetWidth::U8),
            2 => Some(OffsetWidth::U16),
            3 => Some(OffsetWidth::U32),
            _ => None,
        }
    }

    /// Appends `value`, which must fit this width.
    pub(crate) fn write(self, out: &mut Vec<u8>, value: usize) {
        match self {
            OffsetWidth::U8 => out.push(value as u8),
            OffsetWidth::U16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
            OffsetWidth::U32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
        }
    }

    pub(crate) fn read(self, bytes: &[u8], pos: usize) -> Option<usize> {
        let raw = bytes.get(pos..pos + self.size())?;
        Some(match self {
            OffsetWidth::U8 => usize::from(raw[0]),
            OffsetWidth::U16 => usize::from(u16::from_le_bytes([raw[0], raw[1]])),
            OffsetWidth::U32 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
        })
    }
}

/// The type byte stored next to every value reference.
///
/// Bits 0-3 hold the [`TokenKind`]. For containers bits 4-5 hold the offset
/// width of the table and, for objects, bits 6-7 the property id width.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlittableToken(u8);

impl BlittableToken {
    /// The token of a scalar value.
    #[must_use]
    pub fn scalar(kind: TokenKind) -> BlittableToken {
        BlittableToken(kind as u8)
    }

    /// The token of an object table.
    #[must_use]
    pub fn object(offsets: OffsetWidth, ids: OffsetWidth) -> BlittableToken {
        BlittableToken(TokenKind::Object as u8 | (offsets as u8) << 4 | (ids as u8) << 6)
    }

    /// The token of an array table.
    #[must_use]
    pub fn array(offsets: OffsetWidth) -> BlittableToken {
        BlittableToken(TokenKind::Array as u8 | (offsets as u8) << 4)
    }

    /// Validates a stored type byte.
    ///
    /// # Errors
    ///
    /// [`FormatError::UnknownToken`] for a byte with an unknown kind or a
    /// container without widths.
    pub fn from_byte(byte: u8) -> Result<BlittableToken, FormatError> {
        let token = BlittableToken(byte);
        let kind = TokenKind::from_bits(byte & 0x0F).ok_or(FormatError::UnknownToken(byte))?;
        let valid = match kind {
            TokenKind::Object => token.offset_width().is_some() && token.property_id_width().is_some(),
            TokenKind::Array => token.offset_width().is_some() && byte >> 6 == 0,
            _ => byte >> 4 == 0,
        };
        if valid { Ok(token) } else { Err(FormatError::UnknownToken(byte)) }
    }

    /// The raw byte.
    #[must_use]
    pub fn byte(self) -> u8 {
        self.0
    }

    /// The value kind.
    #[must_use]
    pub fn kind(self) -> TokenKind {
        // Tokens are only built by the constructors or `from_byte`.
        TokenKind::from_bits(self.0 & 0x0F).unwrap_or(TokenKind::Null)
    }

    /// Offset width of a container table.
    #[must_use]
    pub fn offset_width(self) -> Option<OffsetWidth> {
        OffsetWidth::from_bits((self.0 >> 4) & 0b11)
    }

    /// Property id width of an object table.
    #[must_use]
    pub fn property_id_width(self) -> Option<OffsetWidth> {
        OffsetWidth::from_bits(self.0 >> 6)
    }
}

impl fmt::Debug for BlittableToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TokenKind::Object => write!(
                f,
                "Object({:?}, {:?})",
                self.offset_width().unwrap_or(OffsetWidth::U8),
                self.property_id_width().unwrap_or(OffsetWidth::U8)
            ),
            TokenKind::Array => write!(f, "Array({:?})", self.offset_width().unwrap_or(OffsetWidth::U8)),
            kind => write!(f, "{kind:?}"),
        }
    }
}
