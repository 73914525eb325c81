//! Runtime benchmarks using criterion.

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use strand::prelude::*;

struct Ping(u64);

struct Counter {
    seen: Cell<u64>,
}

impl Subscriber for Counter {
    fn subscriptions(table: &mut SubscriptionTable<Self>) {
        table
            .on::<Ping>("first", |counter, _ctx, ping| {
                counter.seen.set(counter.seen.get() + ping.0);
                Ok(())
            })
            .on_with_priority::<Ping>("second", Priority::LOWER_1, |counter, _ctx, _ping| {
                counter.seen.set(counter.seen.get() + 1);
                Ok(())
            });
    }
}

fn submit_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");
    let event_loop = Loop::spawn("bench-submit").expect("loop should spawn");

    for count in [1_u64, 100, 10_000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("wait_last", count), &count, |b, &count| {
            b.iter(|| {
                let mut last = None;
                for i in 0..count {
                    last = Some(event_loop.submit(move |_| black_box(i)));
                }
                last.map(|handle| handle.wait())
            });
        });
    }

    group.finish();
    event_loop.shutdown();
    event_loop.await_termination(Duration::from_secs(5));
}

fn post_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("post");
    let event_loop = Loop::spawn("bench-post").expect("loop should spawn");

    for subscribers in [1_usize, 16, 256] {
        let events = 1_000_u64;
        group.throughput(Throughput::Elements(events));

        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &subscribers| {
                b.iter(|| {
                    event_loop
                        .submit(move |ctx| {
                            let bus = EventBus::new(ctx.config());
                            let counters: Vec<Rc<Counter>> = (0..subscribers)
                                .map(|_| Rc::new(Counter { seen: Cell::new(0) }))
                                .collect();
                            for counter in &counters {
                                bus.register(ctx, counter);
                            }
                            for i in 0..events {
                                black_box(bus.post(ctx, &Ping(i)));
                            }
                            counters.iter().map(|c| c.seen.get()).sum::<u64>()
                        })
                        .wait()
                });
            },
        );
    }

    group.finish();
    event_loop.shutdown();
    event_loop.await_termination(Duration::from_secs(5));
}

fn entity_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("entity");
    let event_loop = Loop::builder("bench-entity")
        .on_start(strand::install_core)
        .spawn()
        .expect("loop should spawn");

    for count in [100_u64, 10_000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(
            BenchmarkId::new("register_unregister", count),
            &count,
            |b, &count| {
                b.iter(|| {
                    event_loop
                        .submit(move |ctx| {
                            let Some(manager) = ctx.component::<EntityManager>() else {
                                return 0;
                            };
                            for i in 0..count {
                                manager.register_entity(ctx, Entity::new(format!("e{i}")));
                            }
                            manager.unregister_all(ctx)
                        })
                        .wait()
                });
            },
        );
    }

    group.finish();
    event_loop.shutdown();
    event_loop.await_termination(Duration::from_secs(5));
}

criterion_group!(benches, submit_benchmarks, post_benchmarks, entity_benchmarks);
criterion_main!(benches);
