//! The document builder.
//!
//! [`DocumentBuilder`] turns the token stream of a [`Feed`] into a blittable
//! document. It is a push-down automaton: instead of recursing into nested
//! containers it keeps an explicit stack of [`ContinuationState`] frames, so
//! when the feed runs dry in the middle of a document [`DocumentBuilder::read`]
//! returns `false` and the next call, with the next buffer, re-enters the
//! frame on top of the stack.
//!
//! Values are appended as soon as they are complete. Each finished property
//! remembers `(position, token, property id)` and each finished array element
//! `(position, token)`; when the container closes, its table is written after
//! its values and the container itself becomes a `(position, token)` pair for
//! the enclosing frame.

mod writer;

use std::collections::HashMap;
use std::fmt;

use tracing::debug;
use writer::BlittableWriter;

use crate::compression::StringCompressor;
use crate::context::{Context, FieldId};
use crate::error::{Error, FormatError, ParseError, SyntaxError};
use crate::format::{BlittableToken, COMPRESSION_MIN_SAVING, SMALL_STRING_THRESHOLD, TokenKind};
use crate::options::UsageMode;
use crate::reader::BlittableDocument;
use crate::tokenizer::{Feed, Token};

/// Where a frame of the builder resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationState {
    /// Expecting a property name or the end of the object.
    ReadPropertyName,
    /// Expecting the value of the current property.
    ReadPropertyValue,
    /// An array was opened.
    ReadArray,
    /// Expecting an element or the end of the array.
    ReadArrayValue,
    /// An object was opened.
    ReadObject,
    /// The current token starts a value.
    ReadValue,
    /// A property value was written.
    CompleteReadingPropertyValue,
    /// Expecting the `{` of a root object.
    ReadObjectDocument,
    /// Expecting the `[` of a root array.
    ReadArrayDocument,
    /// The root array was written.
    CompleteDocumentArray,
    /// The current array was closed.
    CompleteArray,
    /// An array element was written.
    CompleteArrayValue,
}

/// A finished property of an open object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyTag {
    /// Where the value starts.
    pub position: usize,
    /// The type of the value.
    pub token: BlittableToken,
    /// Index of the name in the document's names table.
    pub property: u32,
}

/// A written value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteToken {
    /// Where the value starts.
    pub position: usize,
    /// The type of the value.
    pub token: BlittableToken,
}

#[derive(Debug)]
struct BuildingState {
    state: ContinuationState,
    max_property_id: u32,
    current_property_id: u32,
    properties: Vec<PropertyTag>,
    elements: Vec<WriteToken>,
}

impl BuildingState {
    fn new(state: ContinuationState) -> Self {
        Self {
            state,
            max_property_id: 0,
            current_property_id: 0,
            properties: Vec::new(),
            elements: Vec::new(),
        }
    }
}

/// Builds one blittable document at a time from a token stream.
pub struct DocumentBuilder {
    mode: UsageMode,
    debug_tag: Box<str>,
    stack: Vec<BuildingState>,
    write_token: WriteToken,
    writer: BlittableWriter,
    names: Vec<FieldId>,
    local_ids: HashMap<u32, u32>,
    compressor: Option<Box<dyn StringCompressor>>,
    scratch: Vec<u8>,
    root: Option<WriteToken>,
}

impl fmt::Debug for DocumentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentBuilder")
            .field("mode", &self.mode)
            .field("debug_tag", &self.debug_tag)
            .field("depth", &self.stack.len())
            .field("position", &self.writer.position())
            .field("compressor", &self.compressor.is_some())
            .field("complete", &self.root.is_some())
            .finish_non_exhaustive()
    }
}

impl DocumentBuilder {
    /// Creates a builder. `debug_tag` labels its errors and log events.
    #[must_use]
    pub fn new(mode: UsageMode, debug_tag: &str) -> Self {
        Self {
            mode,
            debug_tag: debug_tag.into(),
            stack: Vec::new(),
            write_token: WriteToken {
                position: 0,
                token: BlittableToken::scalar(TokenKind::Null),
            },
            writer: BlittableWriter::default(),
            names: Vec::new(),
            local_ids: HashMap::new(),
            compressor: None,
            scratch: Vec::new(),
            root: None,
        }
    }

    /// Uses `compressor` for strings selected by the usage mode.
    #[must_use]
    pub fn with_compressor(mut self, compressor: Box<dyn StringCompressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// The usage mode.
    #[must_use]
    pub fn mode(&self) -> UsageMode {
        self.mode
    }

    /// The label attached to errors.
    #[must_use]
    pub fn debug_tag(&self) -> &str {
        &self.debug_tag
    }

    /// Whether the root container was closed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.root.is_some()
    }

    /// Expects the next token to open the root object.
    pub fn read_object_document(&mut self) {
        self.stack.push(BuildingState::new(ContinuationState::ReadObjectDocument));
    }

    /// Expects the next token to open the root array.
    pub fn read_array_document(&mut self) {
        self.stack.push(BuildingState::new(ContinuationState::ReadArrayDocument));
    }

    /// Builds an object whose `{` the caller has already consumed.
    pub fn read_nested_object(&mut self) {
        self.stack.push(BuildingState::new(ContinuationState::ReadObject));
    }

    /// Consumes tokens until the root container closes or `feed` runs dry.
    ///
    /// Returns `Ok(true)` once the document is complete; tokens after it are
    /// left in the feed. `Ok(false)` means more input is needed.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] for tokens that do not fit the document structure and
    /// every error of [`Feed::read`].
    pub fn read(&mut self, feed: &mut Feed<'_, '_>) -> Result<bool, Error> {
        loop {
            let Some(mut frame) = self.stack.pop() else {
                return Ok(self.root.is_some());
            };
            match frame.state {
                ContinuationState::ReadObjectDocument => {
                    if !feed.read()? {
                        self.stack.push(frame);
                        return Ok(false);
                    }
                    if feed.token() != Token::StartObject {
                        return Err(feed.error(SyntaxError::ExpectedStartOfObject(feed.token().name())).into());
                    }
                    frame.state = ContinuationState::ReadObject;
                    self.stack.push(frame);
                }
                ContinuationState::ReadArrayDocument => {
                    if !feed.read()? {
                        self.stack.push(frame);
                        return Ok(false);
                    }
                    if feed.token() != Token::StartArray {
                        return Err(feed.error(SyntaxError::ExpectedStartOfArray(feed.token().name())).into());
                    }
                    frame.state = ContinuationState::CompleteDocumentArray;
                    self.stack.push(frame);
                    self.stack.push(BuildingState::new(ContinuationState::ReadArray));
                }
                ContinuationState::CompleteDocumentArray => {
                    self.root = Some(self.write_token);
                    return Ok(true);
                }
                ContinuationState::ReadObject => {
                    frame.properties = feed.context_mut().property_lists.rent();
                    frame.state = ContinuationState::ReadPropertyName;
                    self.stack.push(frame);
                }
                ContinuationState::ReadArray => {
                    frame.elements = feed.context_mut().element_lists.rent();
                    frame.state = ContinuationState::ReadArrayValue;
                    self.stack.push(frame);
                }
                ContinuationState::ReadArrayValue => {
                    if !feed.read()? {
                        self.stack.push(frame);
                        return Ok(false);
                    }
                    match feed.token() {
                        Token::EndArray => frame.state = ContinuationState::CompleteArray,
                        Token::EndObject => {
                            return Err(feed.error(SyntaxError::UnbalancedContainer("Array")).into());
                        }
                        _ => {
                            frame.state = ContinuationState::CompleteArrayValue;
                            self.stack.push(frame);
                            frame = BuildingState::new(ContinuationState::ReadValue);
                        }
                    }
                    self.stack.push(frame);
                }
                ContinuationState::CompleteArrayValue => {
                    frame.elements.push(self.write_token);
                    frame.state = ContinuationState::ReadArrayValue;
                    self.stack.push(frame);
                }
                ContinuationState::CompleteArray => {
                    let elements = core::mem::take(&mut frame.elements);
                    self.write_token = self.writer.write_array(&elements)?;
                    feed.context_mut().element_lists.give_back(elements);
                }
                ContinuationState::ReadPropertyName => {
                    if !feed.read()? {
                        self.stack.push(frame);
                        return Ok(false);
                    }
                    match feed.token() {
                        Token::EndObject => {
                            let properties = core::mem::take(&mut frame.properties);
                            self.write_token = self.close_object(feed.context_mut(), properties, frame.max_property_id)?;
                            if self.stack.is_empty() {
                                self.root = Some(self.write_token);
                                return Ok(true);
                            }
                        }
                        Token::String => {
                            let field = feed.intern_string()?;
                            let id = self.local_id(field)?;
                            frame.current_property_id = id;
                            frame.max_property_id = frame.max_property_id.max(id);
                            frame.state = ContinuationState::ReadPropertyValue;
                            self.stack.push(frame);
                        }
                        Token::EndArray => {
                            return Err(feed.error(SyntaxError::UnbalancedContainer("Object")).into());
                        }
                        token => return Err(feed.error(SyntaxError::ExpectedProperty(token.name())).into()),
                    }
                }
                ContinuationState::ReadPropertyValue => {
                    if !feed.read()? {
                        self.stack.push(frame);
                        return Ok(false);
                    }
                    frame.state = ContinuationState::CompleteReadingPropertyValue;
                    self.stack.push(frame);
                    self.stack.push(BuildingState::new(ContinuationState::ReadValue));
                }
                ContinuationState::CompleteReadingPropertyValue => {
                    frame.properties.push(PropertyTag {
                        position: self.write_token.position,
                        token: self.write_token.token,
                        property: frame.current_property_id,
                    });
                    frame.state = ContinuationState::ReadPropertyName;
                    self.stack.push(frame);
                }
                ContinuationState::ReadValue => self.read_value(feed)?,
            }
        }
    }

    /// Writes the current token as a value, or opens a frame for a container.
    fn read_value(&mut self, feed: &Feed<'_, '_>) -> Result<(), Error> {
        self.write_token = match feed.token() {
            Token::StartObject => {
                self.stack.push(BuildingState::new(ContinuationState::ReadObject));
                return Ok(());
            }
            Token::StartArray => {
                self.stack.push(BuildingState::new(ContinuationState::ReadArray));
                return Ok(());
            }
            Token::Integer(value) => self.writer.write_integer(value),
            Token::Float => {
                let text = feed.string_bytes()?;
                if self.mode.contains(UsageMode::VALIDATE_DOUBLE) && !is_valid_double(text) {
                    let text = String::from_utf8_lossy(text).into_owned();
                    return Err(feed.error(SyntaxError::InvalidDouble(text)).into());
                }
                self.writer.write_float(text)
            }
            Token::String => self.write_string(feed)?,
            Token::True => self.writer.write_bool(true),
            Token::False => self.writer.write_bool(false),
            Token::Null => self.writer.write_null(),
            token @ (Token::None | Token::Separator | Token::EndArray | Token::EndObject) => {
                return Err(feed.error(SyntaxError::ExpectedValue(token.name())).into());
            }
        };
        Ok(())
    }

    fn write_string(&mut self, feed: &Feed<'_, '_>) -> Result<WriteToken, Error> {
        let bytes = feed.string_bytes()?;
        let escapes = feed.state().escape_positions();
        let size = bytes.len();
        let small = size <= SMALL_STRING_THRESHOLD;
        if escapes.is_empty() && size < SMALL_STRING_THRESHOLD && !self.mode.contains(UsageMode::COMPRESS_SMALL_STRINGS) {
            return Ok(self.writer.write_string(bytes, escapes));
        }

        let wanted = if small {
            UsageMode::COMPRESS_SMALL_STRINGS
        } else {
            UsageMode::COMPRESS_STRINGS
        };
        if let Some(compressor) = self.compressor.as_mut().filter(|_| self.mode.contains(wanted)) {
            if size > COMPRESSION_MIN_SAVING {
                let limit = size - COMPRESSION_MIN_SAVING - 1;
                self.scratch.clear();
                if compressor.compress(bytes, limit, &mut self.scratch) && self.scratch.len() <= limit {
                    return Ok(self.writer.write_compressed(size, &self.scratch, escapes));
                }
            }
        }
        Ok(self.writer.write_string(bytes, escapes))
    }

    fn local_id(&mut self, field: FieldId) -> Result<u32, FormatError> {
        if let Some(&id) = self.local_ids.get(&field.index()) {
            return Ok(id);
        }
        let id = next_local_id(self.names.len())?;
        self.local_ids.insert(field.index(), id);
        self.names.push(field);
        Ok(id)
    }

    /// Sorts the properties by name, keeping the last of duplicate names, and
    /// writes the object table.
    fn close_object(
        &mut self,
        ctx: &mut Context,
        mut properties: Vec<PropertyTag>,
        max_property_id: u32,
    ) -> Result<WriteToken, Error> {
        {
            let ctx: &Context = ctx;
            let mut named = Vec::with_capacity(properties.len());
            for property in properties.iter().rev() {
                let name = ctx.field_name(self.names[property.property as usize])?;
                named.push((name.as_bytes(), *property));
            }
            named.sort_by(|a, b| a.0.cmp(b.0));
            named.dedup_by(|later, earlier| later.0 == earlier.0);
            properties.clear();
            properties.extend(named.into_iter().map(|(_, property)| property));
        }
        let token = self.writer.write_object(&properties, max_property_id)?;
        ctx.property_lists.give_back(properties);
        Ok(token)
    }

    /// Appends the names table and footer and returns the document.
    ///
    /// The builder is left empty; call [`reset`](Self::reset) and one of the
    /// `read_*` entry points to build the next document.
    ///
    /// # Errors
    ///
    /// [`SyntaxError::UnexpectedEndOfInput`] if the root container is still
    /// open, stale field names if `ctx` retired its cache while building, and
    /// [`FormatError::DocumentTooLarge`](crate::FormatError::DocumentTooLarge).
    pub fn finalize_document(&mut self, ctx: &Context) -> Result<BlittableDocument, Error> {
        let Some(root) = self.root.take() else {
            return Err(ParseError {
                kind: SyntaxError::UnexpectedEndOfInput("Document"),
                line: 0,
                column: 0,
                context: String::new(),
                debug_tag: self.debug_tag.clone(),
            }
            .into());
        };

        let mut names = Vec::with_capacity(self.names.len());
        for &id in &self.names {
            let name = ctx.field_name(id)?;
            names.push((name.as_bytes(), name.escape_positions()));
        }
        let bytes = self.writer.finish(root, names.into_iter())?;
        debug!(
            tag = %self.debug_tag,
            size = bytes.len(),
            names = self.names.len(),
            root = ?root.token,
            "finalized document"
        );
        Ok(BlittableDocument::from_bytes(bytes)?)
    }

    /// Drops any partial document so the builder can start over.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.writer.clear();
        self.names.clear();
        self.local_ids.clear();
        self.scratch.clear();
        self.root = None;
    }
}

/// The id of the `count`th distinct property name of a document.
fn next_local_id(count: usize) -> Result<u32, FormatError> {
    u32::try_from(count).map_err(|_| FormatError::DocumentTooLarge(count))
}

fn is_valid_double(text: &[u8]) -> bool {
    core::str::from_utf8(text).is_ok_and(|text| text.parse::<f64>().is_ok())
}
