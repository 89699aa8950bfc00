use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use dcb_core::cfg::CfgSet;
use dcb_core::problem::{Alg, Direction, Problem};
use dcb_core::types::DType;
use dcb_core::{EngineKind, TestBuffer};
use dcb_harness::{fill, RunMode};

fn prb(ih: i64, iw: i64) -> Problem {
    Problem::new_2d(
        Direction::FwdBias,
        Alg::Direct,
        CfgSet::all_f32(),
        4,
        1,
        32,
        32,
        (ih, iw),
        (3, 3),
        (1, 1),
        (1, 1),
    )
}

fn bench_fill_src(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_src");
    for side in [32i64, 64, 128] {
        let p = prb(side, side);
        let mut dt = TestBuffer::new(&p.src_dims(), p.cfg.src.dt, EngineKind::Host);
        let mut fp = TestBuffer::new(&p.src_dims(), DType::F32, EngineKind::Host);
        group.bench_with_input(BenchmarkId::from_parameter(side), &p, |b, p| {
            b.iter(|| fill::fill_src(p, &mut dt, &mut fp, RunMode::Correctness).unwrap())
        });
    }
    group.finish();
}

fn bench_fill_src_with_reorder_check(c: &mut Criterion) {
    let mut p = prb(64, 64);
    p.cfg = CfgSet::u8s8s8();
    let mut dt = TestBuffer::new(&p.src_dims(), p.cfg.src.dt, EngineKind::Host);
    let mut fp = TestBuffer::new(&p.src_dims(), DType::F32, EngineKind::Host);
    c.bench_function("fill_src/u8_roundtrip_checked", |b| {
        b.iter(|| fill::fill_src(&p, &mut dt, &mut fp, RunMode::Correctness).unwrap())
    });
}

fn bench_fill_wei(c: &mut Criterion) {
    let p = prb(64, 64);
    let mut dt = TestBuffer::new(&p.wei_dims(), p.cfg.wei.dt, EngineKind::Host);
    let mut fp = TestBuffer::new(&p.wei_dims(), DType::F32, EngineKind::Host);
    c.bench_function("fill_wei/32x32x3x3", |b| {
        b.iter(|| {
            fill::fill_wei(&p, &mut dt, &mut fp, true, EngineKind::Host, RunMode::Correctness)
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_fill_src,
    bench_fill_src_with_reorder_check,
    bench_fill_wei
);
criterion_main!(benches);
