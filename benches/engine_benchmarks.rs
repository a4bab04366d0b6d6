//! Line consumption benchmarks
//!
//! The watch task runs every log line through the relevance check, the
//! filters and the engine. Measures that path on realistic training output.
//!
//! Run with: cargo bench --bench engine_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use metrics_collector::engine::{EarlyStoppingEngine, ObjectiveDirection, ObjectiveTracker};
use metrics_collector::extract::{observation_log_from_text, MetricExtractor};
use metrics_collector::rules::parse_rules;

const SMALL_LINES: usize = 1_000;
const LARGE_LINES: usize = 100_000;

/// Training output: mostly noise, a metrics line every fourth line.
fn training_log(lines: usize) -> Vec<String> {
    (0..lines)
        .map(|i| {
            if i % 4 == 0 {
                format!(
                    "2024-03-01T10:00:00Z epoch={} accuracy={:.4} loss={:.4}",
                    i / 4,
                    0.5 + (i as f64 / lines as f64) * 0.4,
                    1.0 - (i as f64 / lines as f64) * 0.8
                )
            } else {
                format!("step {i}: batch processed in 12ms")
            }
        })
        .collect()
}

fn engine() -> EarlyStoppingEngine {
    // Thresholds out of reach so the whole log is consumed.
    let rules = parse_rules(["loss;0.01;less;10", "accuracy;0.99;greater;0"]).unwrap();
    EarlyStoppingEngine::new(
        rules,
        ObjectiveTracker::new("accuracy", ObjectiveDirection::Maximize),
    )
}

/// Benchmark feeding lines to the engine
fn bench_consume_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("consume_lines");
    let extractor = MetricExtractor::default();

    for size in [SMALL_LINES, LARGE_LINES] {
        let lines = training_log(size);
        group.bench_with_input(BenchmarkId::new("default_filter", size), &lines, |b, lines| {
            b.iter(|| {
                let mut engine = engine();
                for line in lines {
                    black_box(engine.consume_line(black_box(line), &extractor));
                }
                engine.live_rule_count()
            });
        });
    }

    group.finish();
}

/// Benchmark extraction alone
fn bench_extract(c: &mut Criterion) {
    let extractor = MetricExtractor::default();
    let line = "2024-03-01T10:00:00Z epoch=12 accuracy=0.8731 loss=0.2113 lr=1e-4";
    c.bench_function("extract_single_line", |b| {
        b.iter(|| extractor.extract(black_box(line)));
    });
}

/// Benchmark whole-file collection for reporting
fn bench_collect(c: &mut Criterion) {
    let extractor = MetricExtractor::default();
    let text = training_log(LARGE_LINES).join("\n");
    c.bench_function("collect_observation_log_100k", |b| {
        b.iter(|| observation_log_from_text(black_box(&text), &["accuracy", "loss"], &extractor));
    });
}

criterion_group!(benches, bench_consume_lines, bench_extract, bench_collect);
criterion_main!(benches);
