//! Benchmarks for log readout decoding and tick reconciliation
//!
//! Run with: cargo bench

use boardlink::logger::{
    parse_readout, BoundPart, LogDecoder, LogEntry, LoggerBinding, TickReconciler, TickSource,
    TimeReference, DEFAULT_TICK_PERIOD_US,
};
use boardlink::signal::catalog;
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Readout payload of `count` entries alternating between two loggers
fn readout(count: usize) -> Vec<u8> {
    (0..count)
        .flat_map(|i| {
            LogEntry {
                logger_id: (i % 2) as u8,
                reset_uid: 0,
                tick: (i as u32).wrapping_mul(7),
                data: [i as u8, 0, (i >> 8) as u8, 0],
            }
            .to_bytes()
        })
        .collect()
}

/// Decoder logging acceleration across loggers 0 (x, y) and 1 (z)
fn acceleration_decoder() -> LogDecoder {
    let signal = catalog::acceleration();
    let mut decoder = LogDecoder::new(DEFAULT_TICK_PERIOD_US);
    decoder.clock_mut().set_reference(TimeReference {
        reset_uid: 0,
        tick: 0,
        epoch: Utc::now(),
    });
    decoder.bind(LoggerBinding {
        name: "acceleration".into(),
        route: None,
        terminal: None,
        source: signal.source,
        shape: signal.shape,
        parts: vec![
            BoundPart {
                logger_id: 0,
                offset: 0,
                length: 4,
            },
            BoundPart {
                logger_id: 1,
                offset: 4,
                length: 2,
            },
        ],
    });
    decoder
}

fn bench_parse_readout(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_readout");

    for count in [2, 64, 1024].iter() {
        let payload = readout(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("entries", count), &payload, |b, payload| {
            b.iter(|| black_box(parse_readout(black_box(payload)).unwrap()));
        });
    }

    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");

    for count in [64, 1024].iter() {
        let payload = readout(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("multi_part", count),
            &payload,
            |b, payload| {
                b.iter_batched(
                    acceleration_decoder,
                    |mut decoder| black_box(decoder.ingest(payload).unwrap()),
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_tick_extension(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_extension");

    group.bench_function("wrapping_sequence", |b| {
        b.iter(|| {
            let mut ticks = TickReconciler::new();
            let source = TickSource::Logger(0);
            let mut raw = u32::MAX - 500;
            for _ in 0..1000 {
                raw = raw.wrapping_add(1);
                black_box(ticks.extend(source, 0, raw, Some(u32::MAX - 500)));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_parse_readout, bench_ingest, bench_tick_extension);

criterion_main!(benches);
