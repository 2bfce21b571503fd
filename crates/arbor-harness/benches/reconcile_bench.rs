//! Benchmarks for keyed child reconciliation.
//!
//! Run with: cargo bench -p arbor-harness

use arbor_harness::TestRoot;
use arbor_reconciler::{Node, host};
use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn list(keys: impl IntoIterator<Item = usize>) -> Node {
    host("ul")
        .children(Node::list(
            keys.into_iter()
                .map(|k| host("li").key(k).attr("id", k).child(k.to_string()).build()),
        ))
        .build()
}

fn mounted(n: usize) -> TestRoot {
    let root = TestRoot::new();
    root.render(list(0..n)).expect("mount");
    root.take_ops();
    root
}

fn bench_mount(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/mount");

    for n in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("keyed_list", n), &n, |b, &n| {
            b.iter_batched(
                TestRoot::new,
                |root| {
                    root.render(list(0..n)).expect("mount");
                    black_box(root.host().node_count())
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/update");

    for n in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("identical", n), &n, |b, &n| {
            let root = mounted(n);
            b.iter(|| {
                root.render(list(0..n)).expect("update");
                black_box(root.take_ops().len())
            })
        });

        group.bench_with_input(BenchmarkId::new("append_one", n), &n, |b, &n| {
            b.iter_batched(
                || mounted(n),
                |root| {
                    root.render(list(0..=n)).expect("update");
                    black_box(root.take_ops().len())
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/reorder");

    for n in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("reverse", n), &n, |b, &n| {
            b.iter_batched(
                || mounted(n),
                |root| {
                    root.render(list((0..n).rev())).expect("reverse");
                    black_box(root.take_ops().len())
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("rotate_last_to_front", n), &n, |b, &n| {
            b.iter_batched(
                || mounted(n),
                |root| {
                    let rotated = std::iter::once(n - 1).chain(0..n - 1);
                    root.render(list(rotated)).expect("rotate");
                    black_box(root.take_ops().len())
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mount, bench_update, bench_reorder);

criterion_main!(benches);
