//! Streaming consumer for command batches.
//!
//! A batch is a JSON array of command objects:
//!
//! ```json
//! [{"Type": "PUT", "Id": "users/1", "Document": {"Name": "Ada"}},
//!  {"Type": "DELETE", "Id": "users/2", "ChangeVector": "A:1"}]
//! ```
//!
//! [`BatchCommandReader`] pulls tokens from a [`Feed`] and yields one
//! [`Command`] at a time. Like the tokenizer and the builder it can stop at any
//! byte: [`Progress::NeedsInput`] asks for the next buffer, after which the
//! reader continues where it left off. `Document` values are built into
//! blittable documents as they stream by; properties the reader does not know
//! are skipped, nested containers included.

use tracing::trace;

use crate::builder::DocumentBuilder;
use crate::compression::StringCompressor;
use crate::error::{BatchError, Error, SyntaxError};
use crate::options::UsageMode;
use crate::reader::BlittableDocument;
use crate::tokenizer::{Feed, Token};

/// What a command does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// Store a document.
    Put,
    /// Remove a document.
    Delete,
    /// Modify a document in place.
    Patch,
}

impl CommandType {
    /// The wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CommandType::Put => "PUT",
            CommandType::Delete => "DELETE",
            CommandType::Patch => "PATCH",
        }
    }

    fn from_bytes(bytes: &[u8]) -> Option<CommandType> {
        match bytes.len() {
            3 if bytes == b"PUT" => Some(CommandType::Put),
            5 if bytes == b"PATCH" => Some(CommandType::Patch),
            6 if bytes == b"DELETE" => Some(CommandType::Delete),
            _ => None,
        }
    }
}

/// One command of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// What to do.
    pub kind: CommandType,
    /// The document id.
    pub id: String,
    /// Expected change vector, for optimistic concurrency.
    pub change_vector: Option<String>,
    /// The document, when the command carries one.
    pub document: Option<BlittableDocument>,
}

/// Result of [`BatchCommandReader::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// A complete command.
    Command(Command),
    /// The feed ran dry; call again with the next buffer.
    NeedsInput,
    /// The batch array was closed.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Type,
    Id,
    ChangeVector,
    Document,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Field> {
        match name.len() {
            2 if name == b"Id" => Some(Field::Id),
            4 if name == b"Type" => Some(Field::Type),
            8 if name == b"Document" => Some(Field::Document),
            12 if name == b"ChangeVector" => Some(Field::ChangeVector),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Field::Type => "Type",
            Field::Id => "Id",
            Field::ChangeVector => "ChangeVector",
            Field::Document => "Document",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    NextCommand,
    PropertyName,
    PropertyValue(Field),
    /// Inside the value of an unknown property.
    Skip,
    Document,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

impl Container {
    fn name(self) -> &'static str {
        match self {
            Container::Object => "Object",
            Container::Array => "Array",
        }
    }
}

#[derive(Debug, Default)]
struct PartialCommand {
    kind: Option<CommandType>,
    id: Option<String>,
    change_vector: Option<String>,
    document: Option<BlittableDocument>,
}

impl PartialCommand {
    fn finish(&mut self) -> Result<Command, BatchError> {
        let command = core::mem::take(self);
        Ok(Command {
            kind: command.kind.ok_or(BatchError::MissingField("Type"))?,
            id: command.id.ok_or(BatchError::MissingField("Id"))?,
            change_vector: command.change_vector,
            document: command.document,
        })
    }
}

/// Reads commands out of a batch array.
#[derive(Debug)]
pub struct BatchCommandReader {
    state: State,
    builder: DocumentBuilder,
    current: PartialCommand,
    /// Containers open inside the skipped value.
    skipping: Vec<Container>,
}

impl BatchCommandReader {
    /// Creates a reader that builds documents with `mode`. `debug_tag`
    /// labels its errors.
    #[must_use]
    pub fn new(mode: UsageMode, debug_tag: &str) -> Self {
        Self {
            state: State::Start,
            builder: DocumentBuilder::new(mode, debug_tag),
            current: PartialCommand::default(),
            skipping: Vec::new(),
        }
    }

    /// Compresses document strings with `compressor` when `mode` asks for it.
    #[must_use]
    pub fn with_compressor(mut self, compressor: Box<dyn StringCompressor>) -> Self {
        self.builder = self.builder.with_compressor(compressor);
        self
    }

    /// Whether the batch array was closed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Reads until the next command is complete, the feed runs dry or the
    /// batch ends.
    ///
    /// # Errors
    ///
    /// [`Error::Batch`] for malformed commands and the errors of the
    /// tokenizer and the document builder.
    pub fn next(&mut self, feed: &mut Feed<'_, '_>) -> Result<Progress, Error> {
        loop {
            match self.state {
                State::Finished => return Ok(Progress::Finished),
                State::Document => {
                    if !self.builder.read(feed)? {
                        return Ok(Progress::NeedsInput);
                    }
                    let document = self.builder.finalize_document(feed.context())?;
                    self.builder.reset();
                    self.current.document = Some(document);
                    self.state = State::PropertyName;
                }
                State::Start => {
                    let Some(token) = next_token(feed)? else {
                        return Ok(Progress::NeedsInput);
                    };
                    if token != Token::StartArray {
                        return Err(BatchError::ExpectedStartOfBatch(token.name()).into());
                    }
                    self.state = State::NextCommand;
                }
                State::NextCommand => match next_token(feed)? {
                    None => return Ok(Progress::NeedsInput),
                    Some(Token::StartObject) => {
                        self.current = PartialCommand::default();
                        self.state = State::PropertyName;
                    }
                    Some(Token::EndArray) => {
                        self.state = State::Finished;
                        return Ok(Progress::Finished);
                    }
                    Some(token) => return Err(BatchError::ExpectedCommand(token.name()).into()),
                },
                State::PropertyName => match next_token(feed)? {
                    None => return Ok(Progress::NeedsInput),
                    Some(Token::EndObject) => {
                        self.state = State::NextCommand;
                        let command = self.current.finish()?;
                        trace!(kind = command.kind.name(), id = %command.id, "read batch command");
                        return Ok(Progress::Command(command));
                    }
                    Some(Token::String) => {
                        let name = feed.string_bytes()?;
                        self.state = match Field::from_name(name) {
                            Some(field) => State::PropertyValue(field),
                            None => {
                                trace!(property = %bstr::BStr::new(name), "skipping unknown command property");
                                self.skipping.clear();
                                State::Skip
                            }
                        };
                    }
                    Some(token) => return Err(feed.error(SyntaxError::ExpectedProperty(token.name())).into()),
                },
                State::PropertyValue(field) => {
                    let Some(token) = next_token(feed)? else {
                        return Ok(Progress::NeedsInput);
                    };
                    self.read_field(feed, field, token)?;
                }
                State::Skip => {
                    let Some(token) = next_token(feed)? else {
                        return Ok(Progress::NeedsInput);
                    };
                    self.skip(feed, token)?;
                    if self.skipping.is_empty() {
                        self.state = State::PropertyName;
                    }
                }
            }
        }
    }

    /// Tracks the containers of a skipped value so that it is closed the way
    /// it was opened.
    fn skip(&mut self, feed: &Feed<'_, '_>, token: Token) -> Result<(), Error> {
        let closing = match token {
            Token::StartObject => {
                self.skipping.push(Container::Object);
                return Ok(());
            }
            Token::StartArray => {
                self.skipping.push(Container::Array);
                return Ok(());
            }
            Token::EndObject => Container::Object,
            Token::EndArray => Container::Array,
            Token::None | Token::Separator => {
                return Err(feed.error(SyntaxError::ExpectedValue(token.name())).into());
            }
            _ => return Ok(()),
        };
        match self.skipping.pop() {
            None => Err(feed.error(SyntaxError::ExpectedValue(token.name())).into()),
            Some(open) if open != closing => Err(feed.error(SyntaxError::UnbalancedContainer(open.name())).into()),
            Some(_) => Ok(()),
        }
    }

    fn read_field(&mut self, feed: &Feed<'_, '_>, field: Field, token: Token) -> Result<(), Error> {
        let unexpected = || BatchError::UnexpectedValue {
            property: field.name(),
            token: token.name(),
        };
        self.state = State::PropertyName;
        match (field, token) {
            (Field::Document, Token::StartObject) => {
                self.builder.reset();
                self.builder.read_nested_object();
                self.state = State::Document;
            }
            (Field::Document | Field::ChangeVector, Token::Null) => {}
            (Field::Type, Token::String) => {
                let name = feed.string_bytes()?;
                let kind = CommandType::from_bytes(name)
                    .ok_or_else(|| BatchError::UnknownCommandType(String::from_utf8_lossy(name).into_owned()))?;
                self.current.kind = Some(kind);
            }
            (Field::Id, Token::String) => {
                self.current.id = Some(String::from_utf8_lossy(feed.string_bytes()?).into_owned());
            }
            (Field::ChangeVector, Token::String) => {
                self.current.change_vector = Some(String::from_utf8_lossy(feed.string_bytes()?).into_owned());
            }
            _ => return Err(unexpected().into()),
        }
        Ok(())
    }
}

fn next_token(feed: &mut Feed<'_, '_>) -> Result<Option<Token>, Error> {
    Ok(if feed.read()? { Some(feed.token()) } else { None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use crate::tokenizer::Tokenizer;
    use crate::value::Value;

    fn read_all(chunks: &[&[u8]]) -> Result<Vec<Command>, Error> {
        let mut ctx = Context::default();
        let mut tokenizer = Tokenizer::new("batch");
        let mut reader = BatchCommandReader::new(UsageMode::empty(), "batch");
        let mut commands = Vec::new();
        for chunk in chunks {
            let mut feed = tokenizer.feed(&mut ctx, chunk);
            loop {
                match reader.next(&mut feed)? {
                    Progress::Command(command) => commands.push(command),
                    Progress::NeedsInput => break,
                    Progress::Finished => return Ok(commands),
                }
            }
        }
        panic!("batch did not finish");
    }

    #[test]
    fn reads_every_command_type() {
        let commands = read_all(&[br#"[
            {"Type": "PUT", "Id": "users/1", "Document": {"Name": "Ada"}},
            {"Type": "DELETE", "Id": "users/2", "ChangeVector": "A:1"},
            {"Id": "users/3", "Type": "PATCH", "ChangeVector": null, "Document": null}
        ]"#])
        .unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].kind, CommandType::Put);
        assert_eq!(
            commands[0].document.as_ref().unwrap().to_value().unwrap(),
            Value::Object([("Name".to_owned(), Value::from("Ada"))].into())
        );
        assert_eq!(commands[1].kind, CommandType::Delete);
        assert_eq!(commands[1].change_vector.as_deref(), Some("A:1"));
        assert_eq!(commands[2].kind, CommandType::Patch);
        assert_eq!(commands[2].id, "users/3");
        assert!(commands[2].document.is_none());
    }

    #[test]
    fn unknown_properties_are_skipped() {
        let with = read_all(&[br#"[{"Type":"PUT","Mystery":{"a":[1,2,3]},"Id":"x"}]"#]).unwrap();
        let without = read_all(&[br#"[{"Type":"PUT","Id":"x"}]"#]).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn skipping_resumes_across_buffers() {
        let input = br#"[{"Type":"PUT","Mystery":{"a":[1,"]}",{"b":null}]},"Id":"x"}]"#;
        let expected = read_all(&[input]).unwrap();
        for split in 0..=input.len() {
            let (a, b) = input.split_at(split);
            assert_eq!(read_all(&[a, b]).unwrap(), expected, "split at {split}");
        }
    }

    #[test]
    fn missing_fields_are_reported() {
        let err = read_all(&[br#"[{"Id": "x"}]"#]).unwrap_err();
        assert!(matches!(err, Error::Batch(BatchError::MissingField("Type"))));
        let err = read_all(&[br#"[{"Type": "DELETE"}]"#]).unwrap_err();
        assert!(matches!(err, Error::Batch(BatchError::MissingField("Id"))));
    }

    #[test]
    fn malformed_batches_are_rejected() {
        assert!(matches!(
            read_all(&[b"{}"]).unwrap_err(),
            Error::Batch(BatchError::ExpectedStartOfBatch("StartObject"))
        ));
        assert!(matches!(
            read_all(&[b"[1]"]).unwrap_err(),
            Error::Batch(BatchError::ExpectedCommand("Integer"))
        ));
        assert!(matches!(
            read_all(&[br#"[{"Type": "MOVE"}]"#]).unwrap_err(),
            Error::Batch(BatchError::UnknownCommandType(kind)) if kind == "MOVE"
        ));
        assert!(matches!(
            read_all(&[br#"[{"Id": 7}]"#]).unwrap_err(),
            Error::Batch(BatchError::UnexpectedValue { property: "Id", token: "Integer" })
        ));
    }

    #[test]
    fn skipped_values_must_close_what_they_open() {
        for (input, open) in [
            (&br#"[{"Type":"PUT","Mystery":[1,2},"Id":"x"}]"#[..], "Array"),
            (br#"[{"Type":"PUT","Mystery":{"a":[{}]]},"Id":"x"}]"#, "Object"),
        ] {
            let err = read_all(&[input]).unwrap_err();
            assert!(
                matches!(&err, Error::Parse(err) if err.kind == SyntaxError::UnbalancedContainer(open)),
                "{err:?}"
            );
        }
    }
}
