//! Frame cycle benchmarks
//!
//! Measures the host side of a frame against the simulated coprocessor.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use merry_core::{CoprocessorSession, FirmwareImage, SessionConfig, NUM_SOURCES};
use merry_platform::sim::SimBackend;

fn booted_session() -> CoprocessorSession {
    let mut session =
        CoprocessorSession::new(SimBackend::new(), SessionConfig::with_watchdog())
            .expect("valid config");
    session
        .boot(&FirmwareImage::from_bytes(vec![0u8; 256]))
        .expect("simulated boot");
    session
}

fn benchmark_frame_cycle(c: &mut Criterion) {
    let mut session = booted_session();

    c.bench_function("idle_frame", |b| {
        b.iter(|| {
            session.wait_for_frame().unwrap();
            black_box(session.publish_frame().unwrap());
        })
    });
}

fn benchmark_config_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_writes");
    let mut session = booted_session();

    for sources in [1usize, 8, NUM_SOURCES].iter() {
        group.throughput(Throughput::Elements(*sources as u64));
        group.bench_function(format!("gain_rate_{}_sources", sources), |b| {
            b.iter(|| {
                session.wait_for_frame().unwrap();
                {
                    let write = session.write_view().unwrap();
                    for index in 0..*sources {
                        let source = write.source_config(index).unwrap();
                        source.set_gain(0, black_box([1.0, 1.0, 0.0, 0.0])).unwrap();
                        source.set_rate_multiplier(black_box(1.0));
                    }
                }
                session.publish_frame().unwrap();
            })
        });
    }

    group.finish();
}

fn benchmark_status_snapshot(c: &mut Criterion) {
    let mut session = booted_session();
    session.wait_for_frame().unwrap();

    c.bench_function("status_snapshot_all_sources", |b| {
        b.iter(|| black_box(session.read_view().unwrap().source_statuses()))
    });
}

criterion_group!(
    benches,
    benchmark_frame_cycle,
    benchmark_config_writes,
    benchmark_status_snapshot
);
criterion_main!(benches);
