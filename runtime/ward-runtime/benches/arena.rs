use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ward_runtime::Arena;

fn bench_alloc_then_clear(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena");
    for size in [64usize, 1024, 16 * 1024] {
        group.bench_with_input(BenchmarkId::new("alloc_clear", size), &size, |b, &size| {
            let mut arena = Arena::new();
            b.iter(|| {
                for _ in 0..128 {
                    black_box(arena.alloc(size));
                }
                arena.clear();
            });
        });
    }
    group.finish();
}

fn bench_fresh_arena_per_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena");
    group.bench_function("retire_and_reuse", |b| {
        b.iter(|| {
            let mut arena = Arena::new();
            for _ in 0..32 {
                black_box(arena.alloc(256));
            }
            drop(arena);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_alloc_then_clear, bench_fresh_arena_per_round);
criterion_main!(benches);
