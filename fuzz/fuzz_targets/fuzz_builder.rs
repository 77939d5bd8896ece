#![no_main]
use std::cell::RefCell;

use arbitrary::Arbitrary;
use blitjson::chunk_utils::split_with_seed;
use blitjson::{
    BatchCommandReader, Context, DocumentBuilder, Progress, RunLengthCompressor, Tokenizer, UsageMode,
};
use libfuzzer_sys::{fuzz_mutator, fuzz_target, fuzzer_mutate};
use rand::rngs::SmallRng; // faster than StdRng
use rand::{Rng, RngCore, SeedableRng};
use serde_json::{Map, Value};

const HEADER: usize = 9; // 1 flag + 8-byte split seed

thread_local! {
    // One SmallRng per thread, seeded once from the host OS
    static RNG: RefCell<SmallRng> =
        RefCell::new(SmallRng::from_os_rng());
}

/// Helper: borrow the thread-local RNG and run a closure with it.
fn with_rng<F, R>(f: F) -> R
where
    F: FnOnce(&mut SmallRng) -> R,
{
    RNG.with(|cell| f(&mut cell.borrow_mut()))
}

fn mutator(data: &mut [u8], size: usize, max_size: usize, seed: u32) -> usize {
    if size < HEADER || seed.is_multiple_of(10) {
        data[0] = with_rng(|rng| rng.next_u32() as u8);
        data[1..HEADER].copy_from_slice(&with_rng(|rng| rng.next_u64().to_le_bytes()));

        let limit = max_size - HEADER;
        HEADER + append_document(&mut data[HEADER..], size, limit)
    } else {
        fuzzer_mutate(data, size, max_size)
    }
}

/// Write a serialized object (or, for batches, an array of command objects)
/// into `data`, truncated to `limit`.
fn append_document(data: &mut [u8], size: usize, limit: usize) -> usize {
    let value = loop {
        let s = with_rng(|rng| rng.random_range(size / 2..size * 2 + 1).min(limit));
        let bytes: Vec<u8> = with_rng(|rng| (0..s).map(|_| rng.random::<u8>()).collect());
        if let Ok(value) = ArbitraryValue::arbitrary(&mut arbitrary::Unstructured::new(&bytes)) {
            break value;
        }
    };

    let root = if with_rng(|rng| rng.random_bool(0.5)) {
        let mut command = Map::new();
        command.insert("Type".into(), Value::String("PUT".into()));
        command.insert("Id".into(), Value::String("fuzz/1".into()));
        command.insert("Document".into(), wrap(value.0));
        Value::Array(vec![Value::Object(command)])
    } else {
        wrap(value.0)
    };

    let serialized = serde_json::to_vec(&root).unwrap_or_default();
    let len = serialized.len().min(limit);
    data[..len].copy_from_slice(&serialized[..len]);
    len
}

fn wrap(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map),
        other => Value::Object(Map::from_iter([("v".to_owned(), other)])),
    }
}

fuzz_mutator!(|data: &mut [u8], size: usize, max_size: usize, seed: u32| {
    mutator(data, size, max_size, seed)
});

#[derive(Debug)]
struct ArbitraryValue(Value);

impl<'a> Arbitrary<'a> for ArbitraryValue {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let node_type = u.choose_index(21)?;
        let value = match node_type {
            0 => Value::Null,
            1 => Value::Bool(u.arbitrary()?),
            2 => {
                let n: f64 = u.arbitrary()?;
                Value::Number(serde_json::Number::from_f64(n).ok_or(arbitrary::Error::IncorrectFormat)?)
            }
            3 => Value::Number(u.arbitrary::<i64>()?.into()),
            4..=10 => Value::String(u.arbitrary()?),
            11..=15 => {
                let elems: Vec<ArbitraryValue> = u.arbitrary()?;
                Value::Array(elems.into_iter().map(|v| v.0).collect())
            }
            16..=20 => {
                let m: Vec<(String, ArbitraryValue)> = u.arbitrary()?;
                Value::Object(Map::from_iter(m.into_iter().map(|(k, v)| (k, v.0))))
            }
            _ => Err(arbitrary::Error::IncorrectFormat)?,
        };
        Ok(ArbitraryValue(value))
    }
}

fn mode(flags: u8) -> UsageMode {
    UsageMode::from_bits_truncate(flags)
}

/// Build the input as a single document, then again in seeded chunks, and
/// require both runs to agree.
fn build_document(data: &[u8], flags: u8, split_seed: u64) {
    let mut ctx = Context::default();
    let whole = ctx.parse_buffer(data, "fuzz", mode(flags));

    let mut tokenizer = Tokenizer::new("fuzz");
    let mut builder = DocumentBuilder::new(mode(flags), "fuzz").with_compressor(Box::new(RunLengthCompressor));
    builder.read_object_document();
    let mut complete = false;
    for chunk in split_with_seed(data, split_seed) {
        let mut feed = tokenizer.feed(&mut ctx, chunk);
        match builder.read(&mut feed) {
            Ok(true) => {
                complete = true;
                break;
            }
            Ok(false) => {}
            Err(_) => {
                assert!(whole.is_err(), "chunked build failed where the buffer succeeded");
                return;
            }
        }
    }
    if !complete {
        assert!(whole.is_err(), "chunked build ran dry where the buffer succeeded");
        return;
    }

    let chunked = builder.finalize_document(&ctx).expect("complete document finalizes");
    let value = chunked.to_value_with(Some(&RunLengthCompressor));
    // Lenient numbers and raw non-UTF-8 bytes only fail when read.
    if let Ok(whole) = whole {
        // The buffered build has no compressor, so compare values, not bytes.
        assert_eq!(whole.to_value().ok(), value.ok());
    }
}

fn read_batch(data: &[u8], flags: u8, split_seed: u64) {
    let mut ctx = Context::default();
    let mut tokenizer = Tokenizer::new("fuzz");
    let mut reader = BatchCommandReader::new(mode(flags), "fuzz");
    for chunk in split_with_seed(data, split_seed) {
        let mut feed = tokenizer.feed(&mut ctx, chunk);
        loop {
            match reader.next(&mut feed) {
                Ok(Progress::Command(command)) => {
                    if let Some(document) = command.document {
                        let _ = document.to_json();
                    }
                }
                Ok(Progress::NeedsInput) => break,
                Ok(Progress::Finished) | Err(_) => return,
            }
        }
    }
}

fn builder(data: &[u8]) {
    if data.len() < HEADER {
        return;
    }

    let flags = data[0];
    let split_seed = u64::from_le_bytes(data[1..HEADER].try_into().unwrap());
    let data = &data[HEADER..];

    if data.is_empty() {
        return;
    }

    if data[0] == b'[' {
        read_batch(data, flags, split_seed);
    } else {
        build_document(data, flags, split_seed);
    }
}

fuzz_target!(|data: &[u8]| builder(data));
