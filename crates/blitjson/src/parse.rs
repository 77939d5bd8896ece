//! One-shot drivers that build a whole document inside a [`Context`].

use std::io::{ErrorKind, Read};

use tracing::trace;

use crate::arena::Generation;
use crate::builder::DocumentBuilder;
use crate::context::Context;
use crate::error::{ContextError, Error, SyntaxError};
use crate::options::UsageMode;
use crate::reader::BlittableDocument;
use crate::tokenizer::Tokenizer;

impl Context {
    /// Builds the object document at the start of `bytes`.
    ///
    /// Bytes after the closing brace are ignored.
    ///
    /// # Errors
    ///
    /// [`SyntaxError::UnexpectedEndOfInput`] if the buffer ends before the
    /// document, and every error of [`DocumentBuilder::read`].
    ///
    /// ```
    /// use blitjson::{Context, UsageMode, Value};
    ///
    /// let mut ctx = Context::default();
    /// let doc = ctx.parse_buffer(br#"{"Name":"Ada"}"#, "users/1", UsageMode::empty())?;
    /// assert_eq!(doc.to_value()?.get("Name"), Some(&Value::from("Ada")));
    /// # Ok::<(), blitjson::Error>(())
    /// ```
    pub fn parse_buffer(&mut self, bytes: &[u8], debug_tag: &str, mode: UsageMode) -> Result<BlittableDocument, Error> {
        let generation = self.generation();
        let mut tokenizer = Tokenizer::new(debug_tag);
        let mut builder = DocumentBuilder::new(mode, debug_tag);
        builder.read_object_document();

        let result = self.build_from_buffer(&mut tokenizer, &mut builder, bytes);
        let released = self.release_tokenizer(&mut tokenizer, generation);
        let document = result?;
        released?;
        Ok(document)
    }

    /// Builds an object document from `reader`, refilling a buffer of
    /// [`stream_buffer_size`](crate::ContextOptions::stream_buffer_size)
    /// bytes until the document is complete.
    ///
    /// Bytes read past the closing brace are discarded.
    ///
    /// # Errors
    ///
    /// [`SyntaxError::UnexpectedEndOfInput`] if the stream ends first,
    /// [`Error::Io`] for read failures other than
    /// [`ErrorKind::Interrupted`], and every error of
    /// [`DocumentBuilder::read`].
    pub fn read_object<R: Read>(
        &mut self,
        reader: &mut R,
        debug_tag: &str,
        mode: UsageMode,
    ) -> Result<BlittableDocument, Error> {
        let generation = self.generation();
        let mut tokenizer = Tokenizer::new(debug_tag);
        let mut builder = DocumentBuilder::new(mode, debug_tag);
        builder.read_object_document();

        let result = self.build_from_reader(&mut tokenizer, &mut builder, reader);
        let released = self.release_tokenizer(&mut tokenizer, generation);
        let document = result?;
        released?;
        Ok(document)
    }

    fn build_from_buffer(
        &mut self,
        tokenizer: &mut Tokenizer,
        builder: &mut DocumentBuilder,
        bytes: &[u8],
    ) -> Result<BlittableDocument, Error> {
        let mut feed = tokenizer.feed(self, bytes);
        if !builder.read(&mut feed)? {
            return Err(feed.error(SyntaxError::UnexpectedEndOfInput("Buffer")).into());
        }
        drop(feed);
        builder.finalize_document(self)
    }

    fn build_from_reader<R: Read>(
        &mut self,
        tokenizer: &mut Tokenizer,
        builder: &mut DocumentBuilder,
        reader: &mut R,
    ) -> Result<BlittableDocument, Error> {
        let mut buffer = vec![0; self.options().stream_buffer_size.max(1)];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            let mut feed = tokenizer.feed(self, &buffer[..read]);
            if read == 0 {
                return Err(feed.error(SyntaxError::UnexpectedEndOfInput("Stream")).into());
            }
            trace!(read, "refilled stream buffer");
            if builder.read(&mut feed)? {
                break;
            }
        }
        builder.finalize_document(self)
    }

    /// Returns the tokenizer's memory unless the context moved on while it
    /// was in use. A build error takes precedence over a failure here.
    fn release_tokenizer(&mut self, tokenizer: &mut Tokenizer, generation: Generation) -> Result<(), ContextError> {
        if self.is_disposed() || self.generation() != generation {
            return Ok(());
        }
        tokenizer.dispose(self)
    }
}
