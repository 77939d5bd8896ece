#![allow(missing_docs)]
#![expect(clippy::needless_raw_string_hashes)]

use core::fmt::Write;

use blitjson::{
    BlittableDocument, BlittableValue, Context, DocumentBuilder, OffsetWidth, RunLengthCompressor, TokenKind,
    Tokenizer, UsageMode, Value,
};

fn hex(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write!(out, "{b:02x}").unwrap();
    }
    out
}

fn parse(json: &str) -> BlittableDocument {
    Context::default()
        .parse_buffer(json.as_bytes(), "documents", UsageMode::empty())
        .unwrap()
}

#[test]
fn layout_of_a_small_document() {
    let doc = parse(r#"{"b":[1,"x"],"a":null}"#);
    // values | root table | names table | footer
    insta::assert_snapshot!(
        hex(doc.as_bytes()),
        @"02 01 78 00 02 04 03 03 05 02 00 01 08 05 00 12 02 00 00 00 0c 00 00 00 0f 00 00 00 01 62 00 01 61 00 09 00 00 00 10 00 00 00 51 01"
    );
    assert_eq!(doc.name_count(), 2);
    assert_eq!(doc.name(0).unwrap().as_bytes(), b"b");
    assert_eq!(doc.name(1).unwrap().as_bytes(), b"a");
    assert_eq!(doc.to_json().unwrap(), r#"{"a":null,"b":[1,"x"]}"#);
}

#[test]
fn layout_of_a_command_document() {
    let doc = parse(r#"{"Name":"Ada"}"#);
    insta::assert_snapshot!(
        hex(doc.as_bytes()),
        @"03 41 64 61 00 01 05 00 05 01 00 00 00 08 00 00 00 04 4e 61 6d 65 00 05 00 00 00 09 00 00 00 51 01"
    );
}

#[test]
fn root_array_documents() {
    let mut ctx = Context::default();
    let mut tokenizer = Tokenizer::new("array");
    let mut builder = DocumentBuilder::new(UsageMode::empty(), "array");
    builder.read_array_document();
    let mut feed = tokenizer.feed(&mut ctx, br#"[true,{"k":-1}]"#);
    assert!(builder.read(&mut feed).unwrap());
    drop(feed);
    let doc = builder.finalize_document(&ctx).unwrap();

    assert_eq!(doc.root_token().kind(), TokenKind::Array);
    insta::assert_snapshot!(doc.to_json().unwrap(), @r#"[true,{"k":-1}]"#);
}

#[test]
fn navigation_without_materializing() {
    let doc = parse(r#"{"users":[{"name":"Ada","born":1815},{"name":"Grace","born":1906.5}],"count":2}"#);
    let BlittableValue::Object(root) = doc.root().unwrap() else {
        panic!("object root expected");
    };
    assert_eq!(root.len(), 2);

    let Some(BlittableValue::Array(users)) = root.get("users").unwrap() else {
        panic!("users should be an array");
    };
    assert_eq!(users.len(), 2);
    let Some(BlittableValue::Object(grace)) = users.get(1).unwrap() else {
        panic!("users[1] should be an object");
    };
    let Some(BlittableValue::Float(born)) = grace.get("born").unwrap() else {
        panic!("born should be a float");
    };
    assert_eq!(born.as_str(), "1906.5");
    assert!(grace.get("missing").unwrap().is_none());
    assert!(users.get(2).unwrap().is_none());

    let names: Vec<_> = root
        .iter()
        .map(|entry| entry.unwrap().0.to_str().unwrap().to_owned())
        .collect();
    assert_eq!(names, ["count", "users"]);
}

#[test]
fn wide_offsets_are_chosen_for_large_values() {
    let long = "y".repeat(300);
    let doc = parse(&format!(r#"{{"long":"{long}","short":1}}"#));
    let root_width = doc.root_token().offset_width();
    assert_eq!(root_width, Some(OffsetWidth::U16));
    assert_eq!(doc.to_value().unwrap().get("long"), Some(&Value::String(long)));
}

#[test]
fn compressed_strings_need_a_compressor_to_read() {
    let mut ctx = Context::default();
    let mut tokenizer = Tokenizer::new("compressed");
    let mut builder =
        DocumentBuilder::new(UsageMode::TO_DISK, "compressed").with_compressor(Box::new(RunLengthCompressor));
    builder.read_object_document();

    let json = format!(r#"{{"pad":"{}"}}"#, "-".repeat(200));
    let mut feed = tokenizer.feed(&mut ctx, json.as_bytes());
    assert!(builder.read(&mut feed).unwrap());
    drop(feed);
    let doc = builder.finalize_document(&ctx).unwrap();

    assert!(doc.size() < 40);
    assert!(doc.to_value().is_err());
    let value = doc.to_value_with(Some(&RunLengthCompressor)).unwrap();
    assert_eq!(value.get("pad").and_then(Value::as_str), Some("-".repeat(200).as_str()));
}

#[test]
fn documents_survive_a_byte_copy() {
    let doc = parse(r#"{"k":[1,2,3],"s":"text"}"#);
    let copy = BlittableDocument::from_bytes(doc.as_bytes().to_vec()).unwrap();
    assert_eq!(copy, doc);
    assert_eq!(copy.to_value().unwrap(), doc.to_value().unwrap());
}
