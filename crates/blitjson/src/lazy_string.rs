//! Strings that live in context memory and decode on demand.

use std::borrow::Cow;
use std::cell::{Cell, OnceCell};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use bstr::{BStr, ByteSlice};

use crate::arena::MemoryBlock;
use crate::context::Context;
use crate::error::ContextError;
use crate::escape;

/// A UTF-8 string stored in an arena of a [`Context`].
///
/// The wrapper owns no bytes: it records which block holds them, whether the
/// block must be returned when the string is disposed, the escape positions
/// of the original JSON text and, once requested, the decoded `String`.
/// Reading the bytes goes through [`LazyString::bind`], which checks the
/// block against the context's generation.
///
/// Wrappers are pooled by the context. A disposed wrapper is handed back to
/// [`Context::release_lazy_string`] and re-initialized in place the next time
/// a string is needed.
#[derive(Debug)]
pub struct LazyString {
    span: MemoryBlock,
    owns_memory: bool,
    pub(crate) decoded: OnceCell<String>,
    /// The decoded form replaced invalid UTF-8 and no longer mirrors the bytes.
    lossy: Cell<bool>,
    pub(crate) escape_positions: Vec<usize>,
    disposed: bool,
}

impl LazyString {
    pub(crate) fn new(span: MemoryBlock, owns_memory: bool) -> Self {
        Self {
            span,
            owns_memory,
            decoded: OnceCell::new(),
            lossy: Cell::new(false),
            escape_positions: Vec::new(),
            disposed: false,
        }
    }

    /// Re-initializes a pooled wrapper over `span`.
    ///
    /// Clears the escape positions and the disposed flag. If `text` is given it
    /// becomes the decoded form, reusing the previous allocation.
    pub fn renew(&mut self, text: Option<&str>, span: MemoryBlock, owns_memory: bool) {
        let mut cached = self.decoded.take().unwrap_or_default();
        if let Some(text) = text {
            cached.clear();
            cached.push_str(text);
            self.decoded = OnceCell::from(cached);
        }
        self.span = span;
        self.owns_memory = owns_memory;
        self.lossy.set(false);
        self.escape_positions.clear();
        self.disposed = false;
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.span.len()
    }

    /// Whether the string has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }

    /// The block holding the bytes.
    #[must_use]
    pub fn span(&self) -> MemoryBlock {
        self.span
    }

    /// Delta-encoded positions of the bytes that were escaped in the source.
    #[must_use]
    pub fn escape_positions(&self) -> &[usize] {
        &self.escape_positions
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Whether the decoded form has been computed.
    #[must_use]
    pub fn is_decoded(&self) -> bool {
        self.decoded.get().is_some()
    }

    /// A view of the bytes, checked against the context's generation.
    ///
    /// # Errors
    ///
    /// [`ContextError::StringDisposed`] after disposal and
    /// [`MemoryError::UseAfterFree`](crate::MemoryError::UseAfterFree) once
    /// the memory was reclaimed by a reset.
    pub fn bind<'a>(&'a self, ctx: &'a Context) -> Result<LazyStr<'a>, ContextError> {
        if self.disposed {
            return Err(ContextError::StringDisposed);
        }
        let bytes = ctx.memory(&self.span)?;
        Ok(LazyStr { bytes, string: self })
    }

    /// Returns the backing memory to the context and marks the wrapper
    /// disposed.
    ///
    /// # Errors
    ///
    /// [`ContextError::StringDisposed`] when called twice and
    /// [`MemoryError::UseAfterFree`](crate::MemoryError::UseAfterFree) if the
    /// context was reset since the string was created.
    pub fn dispose(&mut self, ctx: &mut Context) -> Result<(), ContextError> {
        if self.disposed {
            return Err(ContextError::StringDisposed);
        }
        if self.owns_memory {
            ctx.return_memory(self.span)?;
        }
        self.disposed = true;
        Ok(())
    }
}

/// A borrowed, generation-checked view of a [`LazyString`].
///
/// Equality, ordering and hashing work on the raw bytes. The view borrows the
/// context, so the context cannot be reset while it is alive.
#[derive(Clone, Copy)]
pub struct LazyStr<'a> {
    bytes: &'a [u8],
    string: &'a LazyString,
}

impl<'a> LazyStr<'a> {
    /// The stored bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The stored bytes as a [`BStr`].
    #[must_use]
    pub fn as_bstr(&self) -> &'a BStr {
        self.bytes.as_bstr()
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the string has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The decoded text, computed on first use and cached in the wrapper.
    ///
    /// Invalid UTF-8 decodes to U+FFFD.
    #[must_use]
    pub fn to_str(&self) -> &'a str {
        self.string
            .decoded
            .get_or_init(|| match self.bytes.to_str_lossy() {
                Cow::Borrowed(text) => text.to_owned(),
                Cow::Owned(text) => {
                    self.string.lossy.set(true);
                    text
                }
            })
            .as_str()
    }

    /// The cached decoded form, when it holds exactly the stored bytes.
    fn exact_decoded(&self) -> Option<&'a str> {
        if self.string.lossy.get() {
            return None;
        }
        self.string.decoded.get().map(String::as_str)
    }

    /// Delta-encoded escape positions.
    #[must_use]
    pub fn escape_positions(&self) -> &'a [usize] {
        &self.string.escape_positions
    }

    /// Appends the JSON-escaped form of the string, without quotes.
    pub fn write_escaped(&self, out: &mut Vec<u8>) {
        escape::write_escaped(self.bytes, &self.string.escape_positions, out);
    }

    /// Byte-wise comparison.
    #[must_use]
    pub fn compare_to(&self, other: &LazyStr<'_>) -> Ordering {
        self.bytes.cmp(other.bytes)
    }
}

impl PartialEq<LazyStr<'_>> for LazyStr<'_> {
    fn eq(&self, other: &LazyStr<'_>) -> bool {
        if let (Some(a), Some(b)) = (self.exact_decoded(), other.exact_decoded()) {
            return a == b;
        }
        self.bytes == other.bytes
    }
}

impl Eq for LazyStr<'_> {}

impl PartialEq<str> for LazyStr<'_> {
    fn eq(&self, other: &str) -> bool {
        match self.exact_decoded() {
            Some(decoded) => decoded == other,
            None => self.bytes == other.as_bytes(),
        }
    }
}

impl PartialEq<&str> for LazyStr<'_> {
    fn eq(&self, other: &&str) -> bool {
        *self == **other
    }
}

impl PartialOrd for LazyStr<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LazyStr<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_to(other)
    }
}

impl Hash for LazyStr<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for LazyStr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_bstr(), f)
    }
}

impl fmt::Debug for LazyStr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_bstr(), f)
    }
}
