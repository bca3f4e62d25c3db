//! Stream parsing benchmarks.
//!
//! Measures demultiplexing of signed key event logs and a full credential
//! presentation in both text and binary attachment domains.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cesr_verifier_core::{parse, Domain};
use cesr_verifier_testkit::fixtures::IssuedCredential;
use cesr_verifier_testkit::generators::{key_event_log, LogStep};

fn bench_key_event_logs(c: &mut Criterion) {
    let mut group = c.benchmark_group("kel");
    for len in [1usize, 16, 128] {
        let steps: Vec<LogStep> = (0..len)
            .map(|i| if i % 4 == 3 { LogStep::Rotate } else { LogStep::Interact })
            .collect();
        let (_, events) = key_event_log(1, &steps);
        for domain in [Domain::Text, Domain::Binary] {
            let bytes: Vec<u8> = events.iter().flat_map(|e| e.pipelined(domain)).collect();
            group.throughput(Throughput::Bytes(bytes.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{domain:?}"), len + 1),
                &bytes,
                |b, bytes| b.iter(|| parse(black_box(bytes)).count()),
            );
        }
    }
    group.finish();
}

fn bench_presentation(c: &mut Criterion) {
    let (_, issued) = IssuedCredential::new(2, "bench");
    let bytes = issued.to_bytes();
    c.bench_function("presentation", |b| {
        b.iter(|| parse(black_box(&bytes)).count())
    });
}

criterion_group!(benches, bench_key_event_logs, bench_presentation);
criterion_main!(benches);
