#![allow(missing_docs)]

use blitjson::{Context, ContextError, ContextOptions, Error, MemoryError, UsageMode, Value};

#[test]
fn documents_outlive_the_operation_that_built_them() {
    let mut ctx = Context::default();
    let doc = ctx
        .parse_buffer(br#"{"Name":"Ada","Tags":["a","b"]}"#, "users/1", UsageMode::empty())
        .unwrap();
    ctx.reset(true).unwrap();
    ctx.renew().unwrap();

    assert_eq!(doc.to_value().unwrap().get("Name"), Some(&Value::from("Ada")));
}

#[test]
fn strings_are_rejected_after_reset() {
    let mut ctx = Context::default();
    let s = ctx.get_lazy_string("short lived").unwrap();
    assert_eq!(s.bind(&ctx).unwrap().to_str(), "short lived");

    ctx.reset(false).unwrap();
    let err = s.bind(&ctx).unwrap_err();
    assert!(matches!(err, ContextError::Memory(MemoryError::UseAfterFree { .. })));

    assert!(ctx.release_lazy_string(s).is_err());
}

#[test]
fn released_strings_are_pooled() {
    let mut ctx = Context::default();
    let s = ctx.get_lazy_string("first").unwrap();
    ctx.release_lazy_string(s).unwrap();
    assert_eq!(ctx.pooled_strings(), 1);

    let reused = ctx.get_lazy_string("second").unwrap();
    assert_eq!(ctx.pooled_strings(), 0);
    assert_eq!(reused.bind(&ctx).unwrap().to_str(), "second");
}

#[test]
fn field_names_are_shared_across_documents_until_retired() {
    let mut ctx = Context::default();
    ctx.parse_buffer(br#"{"Name":"Ada"}"#, "a", UsageMode::empty()).unwrap();
    ctx.parse_buffer(br#"{"Name":"Grace"}"#, "b", UsageMode::empty()).unwrap();
    assert_eq!(ctx.cached_field_names(), 1);

    let id = ctx.intern_field_id(b"Name").unwrap();
    ctx.reset(true).unwrap();
    assert_eq!(ctx.cached_field_names(), 0);

    let err = ctx.parse_buffer(br#"{"Name":"Linus"}"#, "c", UsageMode::empty()).unwrap_err();
    assert!(matches!(err, Error::Context(ContextError::LongLivedRetired)));

    ctx.renew().unwrap();
    assert!(matches!(
        ctx.field_name(id),
        Err(ContextError::StaleFieldName { .. })
    ));
    ctx.parse_buffer(br#"{"Name":"Linus"}"#, "c", UsageMode::empty()).unwrap();
    assert_eq!(ctx.cached_field_names(), 1);
}

#[test]
fn every_operation_starts_from_an_empty_short_lived_arena() {
    let mut ctx = Context::new(ContextOptions {
        initial_size: 256,
        write_buffer_size: 8,
        ..Default::default()
    });
    for i in 0..16 {
        let json = format!(r#"{{"n":{i},"text":"{}"}}"#, "x".repeat(i * 10));
        let doc = ctx.parse_buffer(json.as_bytes(), "loop", UsageMode::empty()).unwrap();
        assert_eq!(doc.to_value().unwrap().get("n"), Some(&Value::Integer(i64::try_from(i).unwrap())));
        ctx.reset(false).unwrap();
        assert_eq!(ctx.allocated(), 0);
        assert_eq!(ctx.generation().get(), u64::try_from(i + 1).unwrap());
    }
}

#[test]
fn arena_limit_is_reported() {
    let mut ctx = Context::new(ContextOptions {
        initial_size: 16,
        max_arena_size: 64,
        write_buffer_size: 8,
        ..Default::default()
    });
    let json = format!(r#"{{"big":"{}"}}"#, "z".repeat(200));
    let err = ctx.parse_buffer(json.as_bytes(), "limit", UsageMode::empty()).unwrap_err();
    assert!(matches!(
        err,
        Error::Context(ContextError::Memory(MemoryError::Exhausted { limit: 64, .. }))
    ));
}

#[test]
fn disposed_contexts_refuse_work() {
    let mut ctx = Context::default();
    ctx.dispose();
    assert!(ctx.is_disposed());
    assert!(matches!(ctx.get_memory(1), Err(ContextError::Disposed)));
    assert!(matches!(ctx.reset(false), Err(ContextError::Disposed)));
    assert!(matches!(
        ctx.parse_buffer(br#"{"a":1}"#, "gone", UsageMode::empty()),
        Err(Error::Context(ContextError::Disposed))
    ));
}
