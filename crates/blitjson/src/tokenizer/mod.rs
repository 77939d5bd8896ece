//! Resumable JSON tokenizer.
//!
//! Overview
//! - The caller owns the input. Each buffer is lent to the tokenizer through
//!   [`Tokenizer::feed`], which returns a [`Feed`]. [`Feed::read`] yields one
//!   token at a time and returns `false` once the buffer is exhausted before a
//!   token boundary.
//! - Everything needed to resume lives in the [`Tokenizer`]: the lexer state,
//!   the half-matched literal, the partial `\u` escape and the bytes of the
//!   string or number read so far. A token may therefore be split at any byte
//!   and recognition does not depend on how the input was chopped.
//! - Strings and numbers accumulate in a write buffer carved from the
//!   context's short-lived arena, never in the caller's input. The decoded
//!   bytes of the current string are available through
//!   [`Feed::string_bytes`] until the next string starts.
//! - For every decoded byte that must be escaped again when the string is
//!   written back as JSON the tokenizer records its position as a delta from
//!   the previous one (see [`escape`](crate::escape)).
//!
//! Grammar
//! - Only tokens are recognized here. Separators (`,` and `:`) are consumed
//!   silently and merely rejected directly after another separator or an
//!   opening bracket; nesting is checked by the document builder.
//! - Strings may be quoted with `"` or `'`.
//! - Numbers are accumulated loosely from `[0-9.eE+-]`. Text that parses as an
//!   `i64` becomes [`Token::Integer`], anything else [`Token::Float`] with the
//!   literal text kept verbatim.

mod escape_buffer;
mod literal_buffer;
mod write_buffer;


use escape_buffer::UnicodeEscapeBuffer;
use literal_buffer::{ExpectedLiteralBuffer, Literal, Step};
use write_buffer::WriteBuffer;

use crate::context::{Context, FieldId};
use crate::error::{ContextError, Error, ParseError, SyntaxError};
use crate::escape::needs_escape;
use crate::lazy_string::LazyString;

/// Bytes of input shown on either side of a parse error.
const ERROR_CONTEXT: usize = 25;

// ------------------------------------------------------------------------------------------------
// Tokens & state
// ------------------------------------------------------------------------------------------------

/// The kind of the most recent token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Token {
    /// Nothing was read yet.
    #[default]
    None,
    /// `null`
    Null,
    /// `false`
    False,
    /// `true`
    True,
    /// A string; its bytes are in [`Feed::string_bytes`].
    String,
    /// A number that fits an `i64`.
    Integer(i64),
    /// Any other number; its literal text is in [`Feed::string_bytes`].
    Float,
    /// A `,` or `:`. Never returned by [`Feed::read`], only recorded between
    /// tokens.
    Separator,
    /// `{`
    StartObject,
    /// `[`
    StartArray,
    /// `]`
    EndArray,
    /// `}`
    EndObject,
}

impl Token {
    /// Name used in error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Token::None => "None",
            Token::Null => "Null",
            Token::False => "False",
            Token::True => "True",
            Token::String => "String",
            Token::Integer(_) => "Integer",
            Token::Float => "Float",
            Token::Separator => "Separator",
            Token::StartObject => "StartObject",
            Token::StartArray => "StartArray",
            Token::EndArray => "EndArray",
            Token::EndObject => "EndObject",
        }
    }
}

/// Where the tokenizer stopped when the input ran out mid-token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Continuation {
    /// The input ended between tokens.
    #[default]
    None,
    /// Inside `null`.
    PartialNull,
    /// Inside `true`.
    PartialTrue,
    /// Inside `false`.
    PartialFalse,
    /// Inside a number, or right after its last digit.
    PartialNumber,
    /// Inside a string, possibly in the middle of an escape.
    PartialString,
    /// Inside the UTF-8 byte order mark.
    PartialPreamble,
}

/// State shared between the tokenizer and its consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserState {
    current: Token,
    continuation: Continuation,
    string_size: usize,
    escape_positions: Vec<usize>,
    line: usize,
    column: usize,
}

impl Default for ParserState {
    fn default() -> Self {
        Self {
            current: Token::None,
            continuation: Continuation::None,
            string_size: 0,
            escape_positions: Vec::new(),
            line: 1,
            column: 0,
        }
    }
}

impl ParserState {
    /// The most recent token.
    #[must_use]
    pub fn current(&self) -> Token {
        self.current
    }

    /// Set when the last `read` ran out of input mid-token.
    #[must_use]
    pub fn continuation(&self) -> Continuation {
        self.continuation
    }

    /// Byte length of the current string or number text.
    #[must_use]
    pub fn string_size(&self) -> usize {
        self.string_size
    }

    /// Delta-encoded escape positions of the current string.
    #[must_use]
    pub fn escape_positions(&self) -> &[usize] {
        &self.escape_positions
    }

    /// One-based line of the last consumed byte.
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    /// Bytes consumed on the current line.
    #[must_use]
    pub fn column(&self) -> usize {
        self.column
    }

    fn clear(&mut self) {
        self.current = Token::None;
        self.continuation = Continuation::None;
        self.string_size = 0;
        self.escape_positions.clear();
        self.line = 1;
        self.column = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    /// Before the first byte of a document.
    Preamble,
    /// Between tokens.
    Default,
    /// Matching `null`, `true`, `false` or the byte order mark.
    Literal,
    Number,
    String,
    /// After a backslash.
    StringEscape,
    StringEscapeUnicode,
    /// After a backslash and carriage return; a following line feed belongs
    /// to the same line break.
    StringLineFeed,
}

// ------------------------------------------------------------------------------------------------
// Tokenizer
// ------------------------------------------------------------------------------------------------

/// A resumable tokenizer bound to no particular input.
///
/// One tokenizer reads one document (or one batch) at a time; call
/// [`reset`](Self::reset) before starting the next.
#[derive(Debug)]
pub struct Tokenizer {
    state: ParserState,
    lex: LexState,
    literal: ExpectedLiteralBuffer,
    unicode: UnicodeEscapeBuffer,
    high_surrogate: Option<u16>,
    quote: u8,
    prev_escape: usize,
    after_cr: bool,
    buffer: WriteBuffer,
    scratch: Vec<u8>,
    debug_tag: Box<str>,
}

impl Tokenizer {
    /// Creates a tokenizer. `debug_tag` labels its errors.
    #[must_use]
    pub fn new(debug_tag: &str) -> Self {
        Self {
            state: ParserState::default(),
            lex: LexState::Preamble,
            literal: ExpectedLiteralBuffer::none(),
            unicode: UnicodeEscapeBuffer::new(),
            high_surrogate: None,
            quote: b'"',
            prev_escape: 0,
            after_cr: false,
            buffer: WriteBuffer::default(),
            scratch: Vec::new(),
            debug_tag: debug_tag.into(),
        }
    }

    /// Lends the next input buffer.
    pub fn feed<'a, 'src>(&'a mut self, ctx: &'a mut Context, input: &'src [u8]) -> Feed<'a, 'src> {
        Feed {
            tokenizer: self,
            ctx,
            input,
            pos: 0,
        }
    }

    /// The shared parser state.
    #[must_use]
    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// The label attached to errors.
    #[must_use]
    pub fn debug_tag(&self) -> &str {
        &self.debug_tag
    }

    /// Prepares for a new document, dropping the write buffer if `ctx` was
    /// reset since it was allocated.
    pub fn reset(&mut self, ctx: &Context) {
        self.state.clear();
        self.lex = LexState::Preamble;
        self.literal = ExpectedLiteralBuffer::none();
        self.unicode.reset();
        self.high_surrogate = None;
        self.prev_escape = 0;
        self.after_cr = false;
        self.buffer.renew(ctx);
    }

    /// Returns the write buffer to `ctx`.
    ///
    /// # Errors
    ///
    /// [`ContextError::Disposed`] if the context is gone.
    pub fn dispose(&mut self, ctx: &mut Context) -> Result<(), ContextError> {
        self.buffer.dispose(ctx)
    }
}

/// A tokenizer reading from one input buffer.
pub struct Feed<'a, 'src> {
    tokenizer: &'a mut Tokenizer,
    ctx: &'a mut Context,
    input: &'src [u8],
    pos: usize,
}

impl<'src> Feed<'_, 'src> {
    /// Reads the next token.
    ///
    /// Returns `Ok(true)` with the token in [`token`](Self::token), or
    /// `Ok(false)` once the input is exhausted; the state's
    /// [`Continuation`] then tells whether a token was cut off.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] for malformed input and [`Error::Context`] if the
    /// write buffer cannot be used.
    pub fn read(&mut self) -> Result<bool, Error> {
        self.tokenizer.state.continuation = Continuation::None;
        loop {
            match self.tokenizer.lex {
                LexState::Preamble => {
                    let Some(b) = self.peek() else {
                        return Ok(self.suspend());
                    };
                    if b == 0xEF {
                        self.bump();
                        self.tokenizer.literal = ExpectedLiteralBuffer::new(b);
                        self.tokenizer.lex = LexState::Literal;
                    } else {
                        self.tokenizer.lex = LexState::Default;
                    }
                }
                LexState::Default => {
                    let Some(b) = self.peek() else {
                        return Ok(self.suspend());
                    };
                    self.bump();
                    let after_cr = core::mem::take(&mut self.tokenizer.after_cr);
                    match b {
                        b' ' | b'\t' => {}
                        b'\n' => {
                            if !after_cr {
                                self.newline();
                            }
                        }
                        b'\r' => {
                            self.newline();
                            self.tokenizer.after_cr = true;
                        }
                        b':' | b',' => {
                            let current = self.tokenizer.state.current;
                            if matches!(
                                current,
                                Token::None | Token::Separator | Token::StartObject | Token::StartArray
                            ) {
                                return Err(self.error(SyntaxError::UnexpectedSeparator(current.name())).into());
                            }
                            self.tokenizer.state.current = Token::Separator;
                        }
                        b'"' | b'\'' => self.start_string(b),
                        b'{' => return Ok(self.emit(Token::StartObject)),
                        b'}' => return Ok(self.emit(Token::EndObject)),
                        b'[' => return Ok(self.emit(Token::StartArray)),
                        b']' => return Ok(self.emit(Token::EndArray)),
                        b'n' | b't' | b'f' => {
                            self.tokenizer.literal = ExpectedLiteralBuffer::new(b);
                            self.tokenizer.lex = LexState::Literal;
                        }
                        b'-' | b'0'..=b'9' => {
                            self.tokenizer.buffer.clear();
                            self.tokenizer.buffer.write_byte(self.ctx, b)?;
                            self.tokenizer.lex = LexState::Number;
                        }
                        _ => return Err(self.error(SyntaxError::InvalidCharacter(b)).into()),
                    }
                }
                LexState::Literal => {
                    let Some(b) = self.peek() else {
                        return Ok(self.suspend());
                    };
                    let expected = self.tokenizer.literal.literal();
                    match self.tokenizer.literal.step(b) {
                        Step::NeedMore => self.bump(),
                        Step::Done(literal) => {
                            self.bump();
                            self.tokenizer.lex = LexState::Default;
                            if let Some(token) = literal.token() {
                                return Ok(self.emit(token));
                            }
                        }
                        Step::Reject => {
                            let name = expected.map_or("literal", Literal::name);
                            return Err(self.error(SyntaxError::InvalidLiteral(name)).into());
                        }
                    }
                }
                LexState::Number => {
                    let input = self.input;
                    let rest = &input[self.pos..];
                    let run = rest.iter().take_while(|b| is_number_byte(**b)).count();
                    self.tokenizer.buffer.write(self.ctx, &rest[..run])?;
                    self.advance(run);
                    if self.pos == self.input.len() {
                        return Ok(self.suspend());
                    }
                    self.tokenizer.lex = LexState::Default;
                    return self.finish_number();
                }
                LexState::String => {
                    let quote = self.tokenizer.quote;
                    let input = self.input;
                    let rest = &input[self.pos..];
                    let run = rest.iter().position(|&b| b == quote || b == b'\\').unwrap_or(rest.len());
                    if run > 0 {
                        self.flush_surrogate()?;
                        self.append_raw(&rest[..run])?;
                        self.advance(run);
                    }
                    match rest.get(run) {
                        None => return Ok(self.suspend()),
                        Some(&b) if b == quote => {
                            self.bump();
                            self.flush_surrogate()?;
                            self.tokenizer.lex = LexState::Default;
                            self.tokenizer.state.string_size = self.tokenizer.buffer.len();
                            return Ok(self.emit(Token::String));
                        }
                        Some(_) => {
                            self.bump();
                            self.tokenizer.lex = LexState::StringEscape;
                        }
                    }
                }
                LexState::StringEscape => {
                    let Some(b) = self.peek() else {
                        return Ok(self.suspend());
                    };
                    self.bump();
                    if b != b'u' {
                        self.flush_surrogate()?;
                    }
                    self.tokenizer.lex = LexState::String;
                    let decoded = match b {
                        b'"' | b'\\' | b'/' | b'\'' => b,
                        b'b' => 0x08,
                        b'f' => 0x0C,
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'u' => {
                            self.tokenizer.unicode.reset();
                            self.tokenizer.lex = LexState::StringEscapeUnicode;
                            continue;
                        }
                        b'\n' => {
                            self.newline();
                            continue;
                        }
                        b'\r' => {
                            self.newline();
                            self.tokenizer.lex = LexState::StringLineFeed;
                            continue;
                        }
                        _ => return Err(self.error(SyntaxError::InvalidEscapeChar(b)).into()),
                    };
                    self.append_decoded(&[decoded])?;
                }
                LexState::StringEscapeUnicode => {
                    let Some(b) = self.peek() else {
                        return Ok(self.suspend());
                    };
                    self.bump();
                    match self.tokenizer.unicode.feed(b) {
                        Ok(None) => {}
                        Ok(Some(unit)) => {
                            self.tokenizer.lex = LexState::String;
                            self.push_unit(unit)?;
                        }
                        Err(kind) => return Err(self.error(kind).into()),
                    }
                }
                LexState::StringLineFeed => {
                    let Some(b) = self.peek() else {
                        return Ok(self.suspend());
                    };
                    if b == b'\n' {
                        self.pos += 1;
                    }
                    self.tokenizer.lex = LexState::String;
                }
            }
        }
    }

    /// The most recent token.
    #[must_use]
    pub fn token(&self) -> Token {
        self.tokenizer.state.current
    }

    /// The shared parser state.
    #[must_use]
    pub fn state(&self) -> &ParserState {
        &self.tokenizer.state
    }

    /// The decoded bytes of the current string, or the text of the current
    /// float.
    ///
    /// # Errors
    ///
    /// Fails if the context was reset while the token was read.
    pub fn string_bytes(&self) -> Result<&[u8], ContextError> {
        self.tokenizer.buffer.bytes(&*self.ctx)
    }

    /// Copies the current string into a [`LazyString`] of its own.
    ///
    /// # Errors
    ///
    /// Fails if the context was reset or its arena is exhausted.
    pub fn lazy_string(&mut self) -> Result<LazyString, ContextError> {
        let state = &self.tokenizer.state;
        match self.tokenizer.buffer.block() {
            Some(block) => self
                .ctx
                .copy_to_lazy_string(&block, state.string_size, &state.escape_positions),
            None => self.ctx.get_lazy_string(""),
        }
    }

    /// Interns the current string as a field name.
    ///
    /// # Errors
    ///
    /// Fails if the context's long-lived arena is retired.
    pub fn intern_string(&mut self) -> Result<FieldId, ContextError> {
        let bytes = self.tokenizer.buffer.bytes(&*self.ctx)?;
        self.tokenizer.scratch.clear();
        self.tokenizer.scratch.extend_from_slice(bytes);
        self.ctx.intern_field_id(&self.tokenizer.scratch)
    }

    /// Bytes of this input consumed so far.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// The unread part of this input.
    #[must_use]
    pub fn remaining(&self) -> &'src [u8] {
        let input = self.input;
        &input[self.pos..]
    }

    /// The context the tokenizer allocates from.
    #[must_use]
    pub fn context(&self) -> &Context {
        &*self.ctx
    }

    /// Mutable access to the context.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut *self.ctx
    }

    /// Builds a positioned error around the current input position.
    #[must_use]
    pub fn error(&self, kind: SyntaxError) -> ParseError {
        let start = self.pos.saturating_sub(ERROR_CONTEXT);
        let end = self.input.len().min(self.pos + ERROR_CONTEXT);
        ParseError {
            kind,
            line: self.tokenizer.state.line,
            column: self.tokenizer.state.column,
            context: String::from_utf8_lossy(&self.input[start..end]).into_owned(),
            debug_tag: self.tokenizer.debug_tag.clone(),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Lexing helpers
    // --------------------------------------------------------------------------------------------

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    #[inline]
    fn bump(&mut self) {
        self.advance(1);
    }

    #[inline]
    fn advance(&mut self, n: usize) {
        self.pos += n;
        self.tokenizer.state.column += n;
    }

    fn newline(&mut self) {
        self.tokenizer.state.line += 1;
        self.tokenizer.state.column = 0;
    }

    fn emit(&mut self, token: Token) -> bool {
        self.tokenizer.state.current = token;
        true
    }

    fn suspend(&mut self) -> bool {
        let tokenizer = &mut *self.tokenizer;
        tokenizer.state.continuation = match tokenizer.lex {
            LexState::Preamble | LexState::Default => Continuation::None,
            LexState::Literal => match tokenizer.literal.literal() {
                Some(Literal::Null) => Continuation::PartialNull,
                Some(Literal::True) => Continuation::PartialTrue,
                Some(Literal::False) => Continuation::PartialFalse,
                Some(Literal::Preamble) => Continuation::PartialPreamble,
                None => Continuation::None,
            },
            LexState::Number => Continuation::PartialNumber,
            LexState::String
            | LexState::StringEscape
            | LexState::StringEscapeUnicode
            | LexState::StringLineFeed => Continuation::PartialString,
        };
        false
    }

    fn start_string(&mut self, quote: u8) {
        let tokenizer = &mut *self.tokenizer;
        tokenizer.buffer.clear();
        tokenizer.state.escape_positions.clear();
        tokenizer.prev_escape = 0;
        tokenizer.high_surrogate = None;
        tokenizer.quote = quote;
        tokenizer.lex = LexState::String;
    }

    fn finish_number(&mut self) -> Result<bool, Error> {
        let text = self.tokenizer.buffer.bytes(&*self.ctx)?;
        let token = match parse_integer(text) {
            Some(value) => Token::Integer(value),
            None => Token::Float,
        };
        self.tokenizer.state.string_size = text.len();
        self.tokenizer.state.escape_positions.clear();
        Ok(self.emit(token))
    }

    /// Appends unescaped string content. Raw bytes that still need escaping
    /// on output (a `"` inside a single-quoted string, control bytes) are
    /// recorded like decoded escapes.
    fn append_raw(&mut self, bytes: &[u8]) -> Result<(), ContextError> {
        let tokenizer = &mut *self.tokenizer;
        let base = tokenizer.buffer.len();
        for (i, &b) in bytes.iter().enumerate() {
            if needs_escape(b) {
                tokenizer.state.escape_positions.push(base + i - tokenizer.prev_escape);
                tokenizer.prev_escape = base + i + 1;
            }
        }
        tokenizer.buffer.write(self.ctx, bytes)
    }

    /// Appends the bytes of one decoded escape.
    fn append_decoded(&mut self, bytes: &[u8]) -> Result<(), ContextError> {
        if bytes.len() == 1 && needs_escape(bytes[0]) {
            let tokenizer = &mut *self.tokenizer;
            let at = tokenizer.buffer.len();
            tokenizer.state.escape_positions.push(at - tokenizer.prev_escape);
            tokenizer.prev_escape = at + 1;
        }
        self.tokenizer.buffer.write(self.ctx, bytes)
    }

    fn push_unit(&mut self, unit: u16) -> Result<(), ContextError> {
        if let Some(high) = self.tokenizer.high_surrogate.take() {
            if (0xDC00..=0xDFFF).contains(&unit) {
                let scalar = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(unit) - 0xDC00);
                return self.push_char(char::from_u32(scalar).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            self.push_char(char::REPLACEMENT_CHARACTER)?;
        }
        match unit {
            0xD800..=0xDBFF => {
                self.tokenizer.high_surrogate = Some(unit);
                Ok(())
            }
            0xDC00..=0xDFFF => self.push_char(char::REPLACEMENT_CHARACTER),
            _ => self.push_char(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER)),
        }
    }

    fn push_char(&mut self, c: char) -> Result<(), ContextError> {
        let mut utf8 = [0; 4];
        self.append_decoded(c.encode_utf8(&mut utf8).as_bytes())
    }

    /// A high surrogate not followed by a low one decodes to U+FFFD.
    fn flush_surrogate(&mut self) -> Result<(), ContextError> {
        if self.tokenizer.high_surrogate.take().is_some() {
            self.push_char(char::REPLACEMENT_CHARACTER)?;
        }
        Ok(())
    }
}

#[inline]
fn is_number_byte(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')
}

/// `-0` stays a float so its sign survives.
fn parse_integer(text: &[u8]) -> Option<i64> {
    if text.starts_with(b"-0") || text.first() == Some(&b'+') {
        return None;
    }
    core::str::from_utf8(text).ok()?.parse().ok()
}
