//! Benchmarks for the Tidings broker and frame codec
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::time::{Duration, Instant};
use tidings::stream::{BackpressurePolicy, Broker, BrokerConfig, Payload};
use tidings::websocket::frame::{encode, Frame};

fn bench_publish(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(1));

    group.bench_function("no_subscribers", |b| {
        let broker = Broker::new(BrokerConfig::default());
        b.iter(|| broker.publish(black_box("bench"), Payload::token("hello")).unwrap());
        broker.stop();
    });

    group.bench_function("history_1000", |b| {
        let broker = Broker::new(BrokerConfig {
            history_limit: 1000,
            ..Default::default()
        });
        b.iter(|| broker.publish(black_box("bench"), Payload::progress(42)).unwrap());
        broker.stop();
    });

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("fan_out");

    for subscribers in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(subscribers as u64));

        group.bench_function(format!("subscribers_{}", subscribers), |b| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    // Large enough that no subscriber is ever evicted
                    let broker = Broker::new(BrokerConfig {
                        backpressure: BackpressurePolicy::Buffer {
                            max_backlog: iters as usize + 1,
                            send_timeout: Duration::from_secs(60),
                        },
                        ..Default::default()
                    });

                    let readers: Vec<_> = (0..subscribers)
                        .map(|_| {
                            let mut sub = broker.subscribe("bench", None);
                            tokio::spawn(async move {
                                let mut received = 0u64;
                                while received < iters {
                                    if sub.recv().await.is_none() {
                                        break;
                                    }
                                    received += 1;
                                }
                                received
                            })
                        })
                        .collect();

                    let start = Instant::now();

                    for i in 0..iters {
                        broker.publish("bench", Payload::progress(i)).unwrap();
                    }
                    for reader in readers {
                        reader.await.unwrap();
                    }

                    let elapsed = start.elapsed();
                    broker.stop();
                    elapsed
                })
            });
        });
    }

    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let broker = Broker::new(BrokerConfig::default());
    for i in 0..100 {
        broker.publish("bench", Payload::progress(i)).unwrap();
    }

    let mut group = c.benchmark_group("replay");

    group.bench_function("subscribe_full_history", |b| {
        b.iter(|| broker.subscribe(black_box("bench"), None))
    });

    group.bench_function("subscribe_resume_tail", |b| {
        b.iter(|| broker.subscribe(black_box("bench"), Some("90")))
    });

    group.finish();
    broker.stop();
}

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    for size in [100, 1000, 70_000] {
        let frame = Frame::text("x".repeat(size));
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{}", size), |b| {
            b.iter(|| encode(black_box(&frame), None))
        });

        group.bench_function(format!("encode_masked_{}", size), |b| {
            b.iter(|| encode(black_box(&frame), Some([1, 2, 3, 4])))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_publish, bench_fan_out, bench_replay, bench_frames);
criterion_main!(benches);
