use thiserror::Error;

use crate::arena::{Generation, Lifetime};

/// Misuse of arena memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A block was used after its generation was retired by a reset.
    #[error(
        "UseAfterFree detected! Attempt to use {lifetime} memory from generation {block} while the \
         arena is at generation {current}"
    )]
    UseAfterFree {
        /// Arena the block was handed out by.
        lifetime: Lifetime,
        /// Generation stamped on the block.
        block: Generation,
        /// Generation of the arena at the time of use.
        current: Generation,
    },
    /// The arena cannot grow past its configured limit.
    #[error("arena exhausted: requested {requested} bytes with a limit of {limit}")]
    Exhausted {
        /// Total bytes the arena would have needed.
        requested: usize,
        /// Configured `max_arena_size`.
        limit: usize,
    },
    /// A block that does not lie inside the allocated region.
    #[error("block {offset}+{len} lies outside the {used} allocated bytes")]
    OutOfRange {
        /// Start of the block.
        offset: usize,
        /// Length of the block.
        len: usize,
        /// Bytes currently handed out by the arena.
        used: usize,
    },
    /// A block that overlaps memory already given back in this generation.
    #[error("block {offset}+{len} was already released")]
    AlreadyReleased {
        /// Start of the block.
        offset: usize,
        /// Length of the block.
        len: usize,
    },
}

/// Misuse of an operation context or of the strings it hands out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The context was disposed.
    #[error("the operation context has been disposed")]
    Disposed,
    /// Long-lived memory was requested after `reset` retired the long-lived
    /// arena and before `renew` re-created it.
    #[error("long-lived memory requested after reset() but before renew()")]
    LongLivedRetired,
    /// A string was disposed twice, or read after disposal.
    #[error("the string has already been disposed")]
    StringDisposed,
    /// A field name handle that belongs to a retired field-name cache.
    #[error("field name {index} belongs to a retired field-name cache")]
    StaleFieldName {
        /// Index the handle pointed to.
        index: u32,
    },
    /// Arena level failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// What went wrong while tokenizing or building.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    /// A byte that cannot start or continue a token at this position.
    #[error("Cannot have a '{}' in this position", escaped(.0))]
    InvalidCharacter(u8),
    /// A literal (`null`, `true`, `false` or the byte order mark) broken off
    /// by an unexpected byte.
    #[error("Invalid token found, expected: {0}")]
    InvalidLiteral(&'static str),
    /// A backslash followed by a byte that is not a known escape.
    #[error("Invalid escape char '{}'", escaped(.0))]
    InvalidEscapeChar(u8),
    /// A non hexadecimal digit inside `\uXXXX`.
    #[error("Invalid hex value '{}'", escaped(.0))]
    InvalidHexValue(u8),
    /// `,` or `:` right after another separator or an opening bracket.
    #[error("Cannot have a separator after {0}")]
    UnexpectedSeparator(&'static str),
    /// Something other than a string where a property name belongs.
    #[error("Expected property, but got {0}")]
    ExpectedProperty(&'static str),
    /// Something other than `{` where an object must start.
    #[error("Expected start of object, but got {0}")]
    ExpectedStartOfObject(&'static str),
    /// Something other than `[` where an array must start.
    #[error("Expected start of array, but got {0}")]
    ExpectedStartOfArray(&'static str),
    /// A token that cannot be a value.
    #[error("Expected a value, but got {0}")]
    ExpectedValue(&'static str),
    /// A floating point literal rejected by `UsageMode::VALIDATE_DOUBLE`.
    #[error("Could not parse double '{0}'")]
    InvalidDouble(String),
    /// The input ended before the document was complete.
    #[error("{0} ended without reaching end of json content")]
    UnexpectedEndOfInput(&'static str),
    /// A closing bracket that does not match the innermost open container.
    #[error("Unbalanced {0}")]
    UnbalancedContainer(&'static str),
}

/// A malformed-input error with its position in the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} ({line},{column}) around: {context}{}", DebugTag(.debug_tag))]
pub struct ParseError {
    /// The kind of failure.
    pub kind: SyntaxError,
    /// One-based line of the failure.
    pub line: usize,
    /// Byte column within the line.
    pub column: usize,
    /// A window of input around the failure, decoded lossily.
    pub context: String,
    /// The label of the operation that failed.
    pub debug_tag: Box<str>,
}

fn escaped(byte: &u8) -> core::ascii::EscapeDefault {
    core::ascii::escape_default(*byte)
}

struct DebugTag<'a>(&'a str);

impl core::fmt::Display for DebugTag<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0.is_empty() {
            Ok(())
        } else {
            write!(f, " [{}]", self.0)
        }
    }
}

/// Errors raised while reading a blittable document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The document ends before a structure it declares.
    #[error("document truncated at byte {0}")]
    Truncated(usize),
    /// A type tag that does not name a known value kind.
    #[error("unknown token 0x{0:02X}")]
    UnknownToken(u8),
    /// A varint longer than its target type.
    #[error("malformed varint at byte {0}")]
    BadVarint(usize),
    /// The document does not fit the 32-bit offsets of the layout.
    #[error("document of {0} bytes exceeds the format limit")]
    DocumentTooLarge(usize),
    /// A compressed string was read without a compressor.
    #[error("compressed string at byte {0} needs a string compressor")]
    MissingCompressor(usize),
    /// The compressor rejected a compressed string.
    #[error("could not decompress string at byte {0}")]
    Decompression(usize),
    /// A footer with an unsupported format version.
    #[error("unsupported document version {0}")]
    UnsupportedVersion(u8),
    /// Float text that does not parse as a number.
    #[error("invalid number at byte {0}")]
    InvalidNumber(usize),
    /// A table entry that does not point back at an earlier value.
    #[error("invalid value offset in table entry at byte {0}")]
    InvalidOffset(usize),
    /// String bytes that are not valid UTF-8.
    #[error("invalid utf-8 at byte {0}")]
    InvalidUtf8(usize),
}

/// Errors raised by the batch command consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The batch does not start with `[`.
    #[error("Expected start of batch array, but got {0}")]
    ExpectedStartOfBatch(&'static str),
    /// An array element that is not an object.
    #[error("Expected a command object, but got {0}")]
    ExpectedCommand(&'static str),
    /// A `Type` value this consumer does not know.
    #[error("Unknown command type '{0}'")]
    UnknownCommandType(String),
    /// A command missing a required field.
    #[error("Command is missing '{0}'")]
    MissingField(&'static str),
    /// A known property with a value of the wrong kind.
    #[error("Unexpected {token} for property '{property}'")]
    UnexpectedValue {
        /// The property being read.
        property: &'static str,
        /// The token that was found instead.
        token: &'static str,
    },
}

/// Every error this crate returns.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Misuse of a context, string or memory block.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Malformed binary document.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// Malformed command batch.
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// Failure reading the input stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<MemoryError> for Error {
    fn from(err: MemoryError) -> Self {
        Error::Context(ContextError::Memory(err))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_carries_position_and_tag() {
        let err = ParseError {
            kind: SyntaxError::InvalidCharacter(b'x'),
            line: 3,
            column: 7,
            context: "[1, x]".into(),
            debug_tag: "users/1".into(),
        };
        insta::assert_snapshot!(err, @"Cannot have a 'x' in this position (3,7) around: [1, x] [users/1]");
    }

    #[test]
    fn untagged_parse_error_has_no_suffix() {
        let err = ParseError {
            kind: SyntaxError::UnexpectedEndOfInput("Buffer"),
            line: 1,
            column: 2,
            context: "{".into(),
            debug_tag: "".into(),
        };
        insta::assert_snapshot!(err, @"Buffer ended without reaching end of json content (1,2) around: {");
    }

    #[test]
    fn memory_error_converts_through_context() {
        let err: Error = MemoryError::Exhausted { requested: 10, limit: 4 }.into();
        assert!(matches!(err, Error::Context(ContextError::Memory(MemoryError::Exhausted { .. }))));
    }
}
