//! Performance benchmarks for VoxAssist Gateway
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;

use voxassist_gateway::core::pipeline::sentiment;
use voxassist_gateway::core::session::{SessionRegistry, Speaker};
use voxassist_gateway::handlers::ws::messages::IncomingMessage;
use voxassist_gateway::utils::normalize_e164;

/// Benchmark inbound message parsing
fn bench_message_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_parsing");
    group.measurement_time(Duration::from_secs(5));

    let join = r#"{"type":"join_call","callId":"bench-call-1","token":"tok"}"#;
    let transcript = format!(
        r#"{{"type":"transcript_message","callId":"bench-call-1","message":{{"speaker":"customer","text":"{}"}}}}"#,
        "I was charged twice on my last invoice and would like a refund. ".repeat(8)
    );

    group.throughput(Throughput::Bytes(join.len() as u64));
    group.bench_with_input(BenchmarkId::new("join_call", join.len()), &join, |b, msg| {
        b.iter(|| {
            let _: Result<IncomingMessage, _> = serde_json::from_str(black_box(msg));
        });
    });

    group.throughput(Throughput::Bytes(transcript.len() as u64));
    group.bench_with_input(
        BenchmarkId::new("transcript_message", transcript.len()),
        &transcript,
        |b, msg| {
            b.iter(|| {
                let _: Result<IncomingMessage, _> = serde_json::from_str(black_box(msg.as_str()));
            });
        },
    );

    group.finish();
}

/// Benchmark the lexicon sentiment analyzer
fn bench_sentiment(c: &mut Criterion) {
    let short = "my bill is wrong";
    let long = "this is terrible, the app is broken, I am frustrated and upset \
                and I want a refund for the wrong charge on my invoice "
        .repeat(4);

    c.bench_function("sentiment_short", |b| {
        b.iter(|| sentiment::analyze(black_box(short)))
    });
    c.bench_function("sentiment_long", |b| {
        b.iter(|| sentiment::analyze(black_box(&long)))
    });
    c.bench_function("intent_detection", |b| {
        b.iter(|| sentiment::detect_intent(black_box("I was charged twice, get me an agent")))
    });
}

/// Benchmark transcript appends and fan-out against a live registry
fn bench_session_fanout(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("append_transcript", |b| {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create("bench");
        b.iter(|| {
            session.append_transcript(Speaker::Customer, "bench turn".to_string(), None, None)
        });
    });

    for subscribers in [1usize, 8, 64] {
        c.bench_with_input(
            BenchmarkId::new("broadcast", subscribers),
            &subscribers,
            |b, &n| {
                let registry = SessionRegistry::new();
                let _guards: Vec<_> = runtime.block_on(async {
                    (0..n)
                        .map(|i| {
                            let (tx, rx) = tokio::sync::mpsc::channel(10_000);
                            registry.attach("bench", i as u64, tx);
                            rx
                        })
                        .collect()
                });
                let event = r#"{"type":"transcript_update","callId":"bench"}"#;
                b.iter(|| registry.broadcast(black_box("bench"), black_box(event)));
            },
        );
    }
}

/// Benchmark E.164 validation
fn bench_phone_validation(c: &mut Criterion) {
    c.bench_function("normalize_e164", |b| {
        b.iter(|| normalize_e164(black_box("+1 (415) 555-0100")))
    });
}

criterion_group!(
    benches,
    bench_message_parsing,
    bench_sentiment,
    bench_session_fanout,
    bench_phone_validation
);
criterion_main!(benches);
