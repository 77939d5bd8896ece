use quickcheck::QuickCheck;
use rstest::rstest;

use crate::{BlittableDocument, Context, DocumentBuilder, Map, Tokenizer, UsageMode, Value};

fn wrap(value: Value) -> Value {
    let mut map = Map::new();
    map.insert("v".to_owned(), value);
    Value::Object(map)
}

/// Feeds `src` in chunks whose sizes are derived from `splits`.
fn build_in_chunks(ctx: &mut Context, src: &[u8], splits: &[usize], mode: UsageMode) -> BlittableDocument {
    let mut tokenizer = Tokenizer::new("partition");
    let mut builder = DocumentBuilder::new(mode, "partition");
    builder.read_object_document();

    let mut rest = src;
    let mut splits = splits.iter();
    loop {
        let size = match splits.next() {
            Some(s) if !rest.is_empty() => 1 + s % rest.len(),
            _ => rest.len(),
        };
        let (chunk, tail) = rest.split_at(size);
        rest = tail;
        let mut feed = tokenizer.feed(ctx, chunk);
        if builder.read(&mut feed).unwrap() || rest.is_empty() {
            break;
        }
    }
    builder.finalize_document(ctx).unwrap()
}

/// Property: a document fed in arbitrarily sized chunks has the same bytes as
/// one built from a single buffer, and reads back as the value it was
/// written from.
#[test]
fn partition_roundtrip_quickcheck() {
    #[allow(clippy::needless_pass_by_value)]
    fn prop(value: Value, splits: Vec<usize>, mode: UsageMode) -> bool {
        let expected = wrap(value);
        let src = expected.to_string();

        let mut ctx = Context::default();
        let whole = ctx.parse_buffer(src.as_bytes(), "partition", mode).unwrap();
        let chunked = build_in_chunks(&mut ctx, src.as_bytes(), &splits, mode);

        whole == chunked && chunked.to_value().unwrap() == expected
    }

    #[cfg(not(miri))]
    let tests = if is_ci::cached() { 10_000 } else { 1_000 };
    #[cfg(miri)]
    let tests = 10;

    QuickCheck::new()
        .tests(tests)
        .quickcheck(prop as fn(Value, Vec<usize>, UsageMode) -> bool);
}

/// Property: re-encoding a document's JSON yields the same document.
#[test]
fn reencoding_is_stable_quickcheck() {
    #[allow(clippy::needless_pass_by_value)]
    fn prop(value: Value) -> bool {
        let src = wrap(value).to_string();
        let mut ctx = Context::default();
        let first = ctx.parse_buffer(src.as_bytes(), "reencode", UsageMode::empty()).unwrap();
        let json = first.to_json().unwrap();
        let second = ctx.parse_buffer(json.as_bytes(), "reencode", UsageMode::empty()).unwrap();
        first == second
    }

    #[cfg(not(miri))]
    let tests = if is_ci::cached() { 5_000 } else { 500 };
    #[cfg(miri)]
    let tests = 10;

    QuickCheck::new().tests(tests).quickcheck(prop as fn(Value) -> bool);
}

#[rstest]
#[case(r#"{}"#)]
#[case(r#"{"a":null,"b":true,"c":false}"#)]
#[case(r#"{"n":[0,-1,9223372036854775807,-9223372036854775808,1.5,-2.25e-3,1E+2]}"#)]
#[case(r#"{"nested":{"deeper":{"deepest":[[],[{}],[[1]]]}}}"#)]
#[case(r#"{"z":1,"a":2,"m":{"y":"yes","b":"bee"}}"#)]
#[case(r#"{"s":"line\nbreak \"quoted\" back\\slash \u00e9 \ud83d\ude00 \/"}"#)]
#[case(" { \"spaced\" : [ 1 , 2 ] ,\r\n\"tabs\"\t:\t\"x\" } ")]
fn documents_match_serde_json(#[case] src: &str) {
    let mut ctx = Context::default();
    let doc = ctx.parse_buffer(src.as_bytes(), "oracle", UsageMode::empty()).unwrap();
    let ours: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();
    let theirs: serde_json::Value = serde_json::from_str(src).unwrap();
    assert_eq!(ours, theirs);
}

#[test]
fn every_split_of_a_nested_document_builds_the_same_bytes() {
    let src = br#"{"Name":"Ada","Tags":["math","A\n"],"Born":1815,"Ratio":0.5,"Dead":null}"#;
    let mut ctx = Context::default();
    let whole = ctx.parse_buffer(src, "split", UsageMode::empty()).unwrap();
    for at in 1..src.len() {
        let chunked = build_in_chunks(&mut ctx, src, &[at - 1], UsageMode::empty());
        assert_eq!(chunked, whole, "split at {at}");
    }
}
