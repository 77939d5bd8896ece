//! Streaming JSON to blittable binary documents.
//!
//! JSON arrives in arbitrary chunks and is turned into a compact,
//! offset-addressable binary document without ever materializing the full
//! text:
//!
//! - a [`Context`] owns the arenas, the interned field names and the pooled
//!   scratch lists of one operation;
//! - a [`Tokenizer`] is fed one buffer at a time through [`Feed`] and can stop
//!   and resume at any byte;
//! - a [`DocumentBuilder`] consumes the tokens with an explicit stack of
//!   [`ContinuationState`]s and writes values bottom-up;
//! - a [`BlittableDocument`] reads the result without parsing it again;
//! - a [`BatchCommandReader`] drives the builder to turn an array of
//!   `PUT`/`DELETE`/`PATCH` commands into [`Command`]s as the bytes arrive.
//!
//! ```
//! use blitjson::{BatchCommandReader, CommandType, Context, Progress, Tokenizer, UsageMode};
//!
//! let mut ctx = Context::default();
//! let mut tokenizer = Tokenizer::new("batch");
//! let mut reader = BatchCommandReader::new(UsageMode::empty(), "batch");
//! let mut commands = Vec::new();
//!
//! for chunk in [&br#"[{"Type":"PUT","Id":"users/1","Docu"#[..], br#"ment":{"Name":"Ada"}}]"#] {
//!     let mut feed = tokenizer.feed(&mut ctx, chunk);
//!     while let Progress::Command(command) = reader.next(&mut feed)? {
//!         commands.push(command);
//!     }
//! }
//!
//! assert!(reader.is_finished());
//! assert_eq!(commands[0].kind, CommandType::Put);
//! assert_eq!(commands[0].document.as_ref().unwrap().to_json()?, r#"{"Name":"Ada"}"#);
//! # Ok::<(), blitjson::Error>(())
//! ```

pub mod arena;
mod batch;
mod builder;
mod compression;
mod context;
mod error;
pub mod escape;
pub mod format;
mod lazy_string;
mod options;
mod parse;
mod reader;
mod tokenizer;
mod value;
mod varint;

#[cfg(any(test, feature = "fuzzing"))]
#[doc(hidden)]
pub mod chunk_utils;

#[cfg(test)]
mod tests;

pub use arena::{Arena, Generation, Lifetime, MemoryBlock};
pub use batch::{BatchCommandReader, Command, CommandType, Progress};
pub use builder::{ContinuationState, DocumentBuilder, PropertyTag, WriteToken};
pub use compression::{RunLengthCompressor, StringCompressor};
pub use context::{AvoidOverAllocationScope, Context, FieldId};
pub use error::{BatchError, ContextError, Error, FormatError, MemoryError, ParseError, Result, SyntaxError};
pub use format::{BlittableToken, OffsetWidth, TokenKind};
pub use lazy_string::{LazyStr, LazyString};
pub use options::{ContextOptions, UsageMode};
pub use reader::{
    BlittableArray, BlittableDocument, BlittableObject, BlittableString, BlittableValue, CompressedString,
    LazyNumber,
};
pub use tokenizer::{Continuation, Feed, ParserState, Token, Tokenizer};
pub use value::{Array, Map, Value};
