//! Streams a command batch from stdin (or a built-in sample) through a
//! [`BatchCommandReader`] in small chunks and prints every command.
//!
//! ```text
//! cargo run --example command_batch < batch.json
//! ```
#![allow(missing_docs)]

use std::io::{self, IsTerminal, Read};

use blitjson::{BatchCommandReader, Context, ContextOptions, Progress, Tokenizer, UsageMode};
use tracing::{Level, info};

const SAMPLE: &str = r#"[
    {"Type": "PUT", "Id": "users/1", "Document": {"Name": "Ada", "Langs": ["en", "fr"]}},
    {"Type": "PUT", "Id": "users/2", "Mystery": {"a": [1, 2, 3]}, "Document": {"Name": "Grace"}},
    {"Type": "DELETE", "Id": "users/3", "ChangeVector": "A:7-abc"}
]"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let mut input = Vec::new();
    let stdin = io::stdin();
    if stdin.is_terminal() {
        input.extend_from_slice(SAMPLE.as_bytes());
    } else {
        stdin.lock().read_to_end(&mut input)?;
    }

    let mut ctx = Context::new(ContextOptions {
        initial_size: 4 * 1024,
        ..Default::default()
    });
    let mut tokenizer = Tokenizer::new("stdin");
    let mut reader = BatchCommandReader::new(UsageMode::VALIDATE_DOUBLE, "stdin");

    for chunk in input.chunks(16) {
        let mut feed = tokenizer.feed(&mut ctx, chunk);
        loop {
            match reader.next(&mut feed)? {
                Progress::Command(command) => {
                    let document = match &command.document {
                        Some(document) => document.to_json()?,
                        None => "-".to_owned(),
                    };
                    println!("{} {} {document}", command.kind.name(), command.id);
                }
                Progress::NeedsInput => break,
                Progress::Finished => {
                    info!(allocated = feed.context().allocated(), "batch finished");
                    return Ok(());
                }
            }
        }
    }
    Err("input ended before the batch was closed".into())
}
