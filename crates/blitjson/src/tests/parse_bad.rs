use rstest::rstest;

use crate::{Context, Error, ParseError, SyntaxError, UsageMode};

fn parse_error(input: &[u8], mode: UsageMode) -> ParseError {
    let mut ctx = Context::default();
    match ctx.parse_buffer(input, "bad", mode) {
        Err(Error::Parse(err)) => err,
        other => panic!("expected a parse error for {:?}, got {other:?}", bstr::BStr::new(input)),
    }
}

#[rstest]
#[case::array_root(b"[1]", SyntaxError::ExpectedStartOfObject("StartArray"))]
#[case::scalar_root(b"42 ", SyntaxError::ExpectedStartOfObject("Integer"))]
#[case::string_root(br#""x""#, SyntaxError::ExpectedStartOfObject("String"))]
#[case::numeric_name(b"{1:2}", SyntaxError::ExpectedProperty("Integer"))]
#[case::nested_name(b"{{}:2}", SyntaxError::ExpectedProperty("StartObject"))]
#[case::bracket_in_object(br#"{"a":1]"#, SyntaxError::UnbalancedContainer("Object"))]
#[case::brace_in_array(br#"{"a":[1}"#, SyntaxError::UnbalancedContainer("Array"))]
#[case::missing_value(br#"{"a":}"#, SyntaxError::ExpectedValue("EndObject"))]
#[case::double_separator(br#"{"a":1,,"b":2}"#, SyntaxError::UnexpectedSeparator("Separator"))]
#[case::leading_separator(br#"{,"a":1}"#, SyntaxError::UnexpectedSeparator("StartObject"))]
#[case::bad_literal(br#"{"a":tru}"#, SyntaxError::InvalidLiteral("true"))]
#[case::stray_byte(br#"{"a":#}"#, SyntaxError::InvalidCharacter(b'#'))]
#[case::truncated(br#"{"a":[1,2"#, SyntaxError::UnexpectedEndOfInput("Buffer"))]
#[case::empty(b"", SyntaxError::UnexpectedEndOfInput("Buffer"))]
fn malformed_documents(#[case] input: &[u8], #[case] kind: SyntaxError) {
    assert_eq!(parse_error(input, UsageMode::empty()).kind, kind);
}

#[rstest]
#[case(b"{\"a\":1.2.3}")]
#[case(b"{\"a\":--1}")]
#[case(b"{\"a\":1e}")]
fn validate_double_rejects_malformed_numbers(#[case] input: &[u8]) {
    assert!(matches!(
        parse_error(input, UsageMode::VALIDATE_DOUBLE).kind,
        SyntaxError::InvalidDouble(_)
    ));
    // Without validation the text is kept and only fails when read.
    let mut ctx = Context::default();
    let doc = ctx.parse_buffer(input, "lenient", UsageMode::empty()).unwrap();
    assert!(doc.to_value().is_err());
}

#[test]
fn errors_point_at_the_line() {
    let err = parse_error(b"{\n  \"a\": 1,\n  \"b\": @\n}", UsageMode::empty());
    assert_eq!(err.kind, SyntaxError::InvalidCharacter(b'@'));
    assert_eq!(err.line, 3);
    assert_eq!(&*err.debug_tag, "bad");
}
