use agentcore::session::compaction::{estimate_tokens, select_cut_point, should_compact};
use agentcore::session::Session;
use agentcore::Message;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::tempdir;

fn create_messages(count: usize, text_size: usize) -> Vec<Message> {
    let text = "a".repeat(text_size);
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(&text)
            } else {
                Message::assistant_error(agentcore::Api::AnthropicMessages, "anthropic", "claude", &text)
            }
        })
        .collect()
}

fn bench_cut_point_by_message_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("cut_point_by_message_count");

    for count in [0, 1, 5, 10, 20, 50, 100].iter() {
        let messages = create_messages(*count, 100);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| select_cut_point(black_box(msgs), 0));
        });
    }

    group.finish();
}

fn bench_estimate_tokens_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_size");

    for size in [10, 100, 1000, 10000].iter() {
        let text = "a".repeat(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &text, |b, text| {
            b.iter(|| estimate_tokens(black_box(text)));
        });
    }

    group.finish();
}

fn bench_should_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("should_compact");

    for tokens in [1000, 50_000, 190_000, 500_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(tokens), tokens, |b, tokens| {
            b.iter(|| should_compact(black_box(*tokens), black_box(200_000), black_box(16_384)));
        });
    }

    group.finish();
}

fn bench_select_cut_point(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_cut_point");

    let test_cases = vec![
        ("small_keep_5000", create_messages(20, 100), 5_000),
        ("medium_keep_10000", create_messages(50, 100), 10_000),
        ("large_keep_20000", create_messages(100, 100), 20_000),
    ];

    for (name, messages, keep) in test_cases {
        group.bench_with_input(
            BenchmarkId::new(name, format!("{}/{}", messages.len(), keep)),
            &(messages, keep),
            |b, (msgs, keep)| {
                b.iter(|| select_cut_point(black_box(msgs), black_box(*keep)));
            },
        );
    }

    group.finish();
}

fn bench_context_reconstruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_reconstruction");

    for count in [10, 50, 200].iter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.ndjson");
        let mut session = Session::create(&path, "/work", None).unwrap();
        for msg in create_messages(*count, 100) {
            session.append_message(msg).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &session, |b, session| {
            b.iter(|| session.context());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cut_point_by_message_count,
    bench_estimate_tokens_by_size,
    bench_should_compact,
    bench_select_cut_point,
    bench_context_reconstruction,
);
criterion_main!(benches);
