use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use bufpool::prelude::*;

fn bench_read_hit(c: &mut Criterion) {
    let bp = get_test_bp(64);
    let page_id = bp.new_page();
    {
        let mut guard = bp.write_page(page_id);
        guard.data_mut()[0] = 1;
    }

    c.bench_function("read_page_hit", |b| {
        b.iter(|| {
            let guard = bp.read_page(black_box(page_id));
            black_box(guard.data()[0]);
        })
    });
}

fn bench_write_hit(c: &mut Criterion) {
    let bp = get_test_bp(64);
    let page_id = bp.new_page();

    c.bench_function("write_page_hit", |b| {
        b.iter(|| {
            let mut guard = bp.write_page(black_box(page_id));
            let v = guard.data()[0];
            guard.data_mut()[0] = v.wrapping_add(1);
        })
    });
}

criterion_group!(benches, bench_read_hit, bench_write_hit);
criterion_main!(benches);
