//! Benchmarks for the scheduling kernel.
//!
//! Benchmarks cover:
//! - Permit acquire/release on the semaphore
//! - Raw job throughput on the thread pool
//! - Guard chain evaluation
//! - End-to-end queue, admit, run and wait through the engine

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::mpsc;

use modest_engine::config::{EngineConfig, ThreadPoolConfig};
use modest_engine::core::{
    Admission, Engine, FnMutator, GuardChain, Operation, OperationGuard, RunContext,
};
use modest_engine::rt::{Semaphore, ThreadPool, WorkerContext};

// ============================================================================
// Primitives
// ============================================================================

fn bench_semaphore(c: &mut Criterion) {
    let sem = Semaphore::new(4);
    c.bench_function("semaphore_try_acquire_release", |b| {
        b.iter(|| {
            if sem.try_acquire() {
                sem.release();
            }
        });
    });
}

fn bench_guard_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard_chain");
    let op: Operation<u64> = Operation::builder().build();
    for len in [1usize, 8, 64] {
        let mut chain: GuardChain<u64> = GuardChain::default();
        for i in 0..len as u64 {
            chain.add(
                Box::new(move |state: &u64, _op: &Operation<u64>| {
                    if *state >= i {
                        Admission::MayExecute
                    } else {
                        Admission::MustWait
                    }
                }),
                false,
            );
        }
        group.bench_with_input(BenchmarkId::from_parameter(len), &chain, |b, chain| {
            b.iter(|| chain.evaluate(black_box(&u64::MAX), &op));
        });
    }
    group.finish();
}

// ============================================================================
// Pool and engine
// ============================================================================

fn bench_pool_jobs(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_pool");
    const BATCH: u64 = 64;
    group.throughput(Throughput::Elements(BATCH));
    for size in [1u32, 4] {
        let pool = ThreadPool::new(size, 256 * 1024);
        group.bench_with_input(BenchmarkId::new("run_job", size), &pool, |b, pool| {
            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                for _ in 0..BATCH {
                    let tx = tx.clone();
                    pool.run_job(Box::new(move |_ctx: &WorkerContext<'_>| {
                        let _ = tx.send(());
                    }));
                }
                drop(tx);
                rx.iter().count()
            });
        });
    }
    group.finish();
}

fn bench_engine_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    const BATCH: u64 = 32;
    group.throughput(Throughput::Elements(BATCH));

    let config = EngineConfig::new().with_thread_pool(
        ThreadPoolConfig::new()
            .with_pool_size(4)
            .with_thread_stack_size(256 * 1024),
    );
    let Ok(engine) = Engine::with_config(&config, 0i64) else {
        return;
    };
    if engine.start().is_err() {
        return;
    }

    group.bench_function("queue_and_wait", |b| {
        b.iter(|| {
            let ops: Vec<_> = (0..BATCH)
                .map(|_| {
                    Operation::builder()
                        .runnable(|_ctx: &RunContext<'_, i64>| {})
                        .guard(|active: &i64, _op: &Operation<i64>| {
                            if *active < 2 {
                                Admission::MayExecute
                            } else {
                                Admission::MustWait
                            }
                        })
                        .state_mutator(FnMutator::new(
                            |active: &mut i64, _op: &Operation<i64>| *active += 1,
                            |active: &mut i64, _op: &Operation<i64>| *active -= 1,
                        ))
                        .build()
                })
                .collect();
            for op in &ops {
                let _ = engine.queue(op);
            }
            for op in &ops {
                let _ = black_box(op.wait_for(false, 0));
            }
        });
    });
    group.finish();
    engine.stop();
}

criterion_group!(primitive_benches, bench_semaphore, bench_guard_chain);
criterion_group!(pool_benches, bench_pool_jobs, bench_engine_round_trip);
criterion_main!(primitive_benches, pool_benches);
