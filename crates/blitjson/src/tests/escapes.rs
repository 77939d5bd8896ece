use crate::{BlittableValue, Context, UsageMode, Value};

#[test]
fn escapes_decode_and_reencode() {
    let src = br#"{"s":"\n \" \\ \u0041"}"#;
    let mut ctx = Context::default();
    let doc = ctx.parse_buffer(src, "escapes", UsageMode::empty()).unwrap();

    let BlittableValue::Object(root) = doc.root().unwrap() else {
        panic!("expected an object root");
    };
    let Some(BlittableValue::String(s)) = root.get("s").unwrap() else {
        panic!("expected a plain string");
    };
    assert_eq!(s.as_bytes(), b"\n \" \\ A");
    assert_eq!(s.escape_positions(), [0, 1, 1]);
    assert_eq!(doc.to_value().unwrap().get("s"), Some(&Value::from("\n \" \\ A")));
    assert_eq!(doc.to_json().unwrap(), r#"{"s":"\n \" \\ A"}"#);
}

#[test]
fn escaped_property_names_are_written_back_escaped() {
    let src = br#"{"a\"b":1,"tab\tname":2}"#;
    let mut ctx = Context::default();
    let doc = ctx.parse_buffer(src, "escapes", UsageMode::empty()).unwrap();
    assert_eq!(doc.to_json().unwrap(), r#"{"a\"b":1,"tab\tname":2}"#);
    assert_eq!(doc.to_value().unwrap().get("tab\tname"), Some(&Value::Integer(2)));
}

#[test]
fn raw_control_bytes_are_recorded_as_escapes() {
    let src = b"{\"s\":\"a\x01b\"}";
    let mut ctx = Context::default();
    let doc = ctx.parse_buffer(src, "escapes", UsageMode::empty()).unwrap();
    assert_eq!(doc.to_json().unwrap(), r#"{"s":"a\u0001b"}"#);
}
