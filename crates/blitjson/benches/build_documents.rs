//! Benchmark: building blittable documents from chunked input
#![allow(missing_docs)]

use std::time::Duration;

use blitjson::{BatchCommandReader, Context, DocumentBuilder, Progress, Tokenizer, UsageMode};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

/// A deterministic document of roughly `users` entries with nested objects,
/// arrays, numbers and escaped strings.
fn make_document(users: usize) -> String {
    let mut s = String::from(r#"{"users":["#);
    for i in 0..users {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&format!(
            r#"{{"id":{i},"name":"user \"{i}\"","score":{}.5,"tags":["a","b\n"],"active":{}}}"#,
            i * 3,
            i % 2 == 0
        ));
    }
    s.push_str(r#"],"count":"#);
    s.push_str(&users.to_string());
    s.push('}');
    s
}

fn make_batch(commands: usize) -> String {
    let mut s = String::from("[");
    for i in 0..commands {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&format!(
            r#"{{"Type":"PUT","Id":"users/{i}","Meta":{{"skip":[1,2,3]}},"Document":{{"Name":"User {i}","Age":{i}}}}}"#
        ));
    }
    s.push(']');
    s
}

/// Builds `payload` fed in `parts` chunks and returns the document size.
fn build(ctx: &mut Context, payload: &[u8], parts: usize) -> usize {
    let chunk_size = payload.len().div_ceil(parts);
    let mut tokenizer = Tokenizer::new("bench");
    let mut builder = DocumentBuilder::new(UsageMode::empty(), "bench");
    builder.read_object_document();
    for chunk in payload.chunks(chunk_size) {
        let mut feed = tokenizer.feed(ctx, chunk);
        if builder.read(&mut feed).unwrap() {
            break;
        }
    }
    let size = builder.finalize_document(ctx).unwrap().size();
    ctx.reset(false).unwrap();
    size
}

fn read_batch(ctx: &mut Context, payload: &[u8], parts: usize) -> usize {
    let chunk_size = payload.len().div_ceil(parts);
    let mut tokenizer = Tokenizer::new("bench");
    let mut reader = BatchCommandReader::new(UsageMode::empty(), "bench");
    let mut commands = 0;
    for chunk in payload.chunks(chunk_size) {
        let mut feed = tokenizer.feed(ctx, chunk);
        while let Progress::Command(_) = reader.next(&mut feed).unwrap() {
            commands += 1;
        }
    }
    ctx.reset(false).unwrap();
    commands
}

fn bench_build_documents(c: &mut Criterion) {
    let payload = make_document(500);

    let mut group = c.benchmark_group("build_document_split");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    for &parts in &[1usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(parts), &parts, |b, &parts| {
            let mut ctx = Context::default();
            b.iter(|| black_box(build(&mut ctx, black_box(payload.as_bytes()), parts)));
        });
    }
    group.finish();
}

fn bench_read_batch(c: &mut Criterion) {
    let payload = make_batch(200);

    let mut group = c.benchmark_group("read_batch_split");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    for &parts in &[1usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(parts), &parts, |b, &parts| {
            let mut ctx = Context::default();
            b.iter(|| black_box(read_batch(&mut ctx, black_box(payload.as_bytes()), parts)));
        });
    }
    group.finish();
}

fn criterion() -> Criterion {
    let mut c = Criterion::default();
    if cfg!(feature = "bench-fast") {
        c = c
            .warm_up_time(Duration::from_millis(10))
            .measurement_time(Duration::from_millis(100))
            .sample_size(10);
    } else {
        c = c
            .warm_up_time(Duration::from_secs(3))
            .measurement_time(Duration::from_secs(10));
    }
    c
}

criterion_group! { name = benches; config = criterion(); targets = bench_build_documents, bench_read_batch }
criterion_main!(benches);
