//! End-to-end driver behaviors on hand-picked cases.

mod common;

use std::sync::atomic::Ordering;

use common::AccelDouble;
use dcb_core::cfg::CfgSet;
use dcb_core::problem::{Alg, DataKind, Direction, Problem};
use dcb_core::types::DType;
use dcb_core::{CaseState, EngineKind, TestBuffer};
use dcb_cpu::CpuBackend;
use dcb_harness::orchestrate::{transpose_weights, wei_tr_dims};
use dcb_harness::{compare, fill, run_case, RunConfig, RunMode};

fn padded_2d(dir: Direction, cfg: CfgSet) -> Problem {
    // ih=5, k=3, s=1, p=1 keeps oh == ih, so no spatial zeroing applies.
    Problem::new_2d(dir, Alg::Direct, cfg, 2, 1, 4, 4, (5, 5), (3, 3), (1, 1), (1, 1))
}

#[test]
fn test_all_base_fill_passes_with_raw_epsilon_threshold() {
    let mut p = padded_2d(Direction::FwdBias, CfgSet::all_f32());
    p.cfg.src.sparsity = 0.0;
    p.cfg.wei.sparsity = 0.0;
    p.cfg.bia.sparsity = 0.0;
    p.cfg.dst.sparsity = 0.0;
    // nonzero bases keep the constant output clear of the zero-trust rule
    p.cfg.src.base = 1;
    p.cfg.wei.base = 1;

    // every filled element pins to its role's configured base value
    let mut src_dt = TestBuffer::new(&p.src_dims(), p.cfg.src.dt, EngineKind::Host);
    let mut src_fp = TestBuffer::new(&p.src_dims(), DType::F32, EngineKind::Host);
    fill::fill_src(&p, &mut src_dt, &mut src_fp, RunMode::Correctness).unwrap();
    assert!(src_fp.as_slice().iter().all(|&v| v == p.cfg.src.base as f32));

    let mut wei_dt = TestBuffer::new(&p.wei_dims(), p.cfg.wei.dt, EngineKind::Host);
    let mut wei_fp = TestBuffer::new(&p.wei_dims(), DType::F32, EngineKind::Host);
    fill::fill_wei(&p, &mut wei_dt, &mut wei_fp, true, EngineKind::Host, RunMode::Correctness)
        .unwrap();
    assert!(wei_fp.as_slice().iter().all(|&v| v == p.cfg.wei.base as f32));

    // direct algorithm: threshold is the raw per-dtype epsilon
    let policy = compare::setup_compare(&p, DataKind::Dst);
    assert_eq!(policy.threshold, p.cfg.dst.eps);
    assert!(!policy.norm_mode);

    // bit-identical f64 maths on both sides: the verdict is a pass
    let res = run_case(&CpuBackend, &p, &RunConfig::default());
    assert_eq!(res.state, CaseState::Passed, "{:?}", res.error);
}

#[test]
fn test_u8_destination_adds_exactly_one_zeroing_condition() {
    let f32_p = padded_2d(Direction::FwdInference, CfgSet::all_f32());
    let u8_p = padded_2d(Direction::FwdInference, CfgSet::u8s8u8());

    // no post-ops, no spatial growth: f32 has z = 0, u8 has z = 1
    let f32_trust = compare::non_zero_trust(&f32_p, DataKind::Dst);
    let u8_trust = compare::non_zero_trust(&u8_p, DataKind::Dst);
    assert_eq!(f32_trust, 0.3);
    assert_eq!(u8_trust, 0.3 / 2.0);

    let f32_policy = compare::setup_compare(&f32_p, DataKind::Dst);
    let u8_policy = compare::setup_compare(&u8_p, DataKind::Dst);
    assert!(u8_policy.zero_trust_percent > f32_policy.zero_trust_percent);
}

#[test]
fn test_weight_transposition_swaps_only_channel_axes() {
    // groups=2, out-channels=4, in-channels=4, 1x1x1 kernel
    let p = Problem::new_2d(
        Direction::BwdWeights,
        Alg::Direct,
        CfgSet::all_f32(),
        1,
        2,
        4,
        4,
        (3, 3),
        (1, 1),
        (1, 1),
        (0, 0),
    );
    assert_eq!(p.wei_dims().as_slice(), &[2, 2, 2, 1, 1, 1]);
    assert_eq!(wei_tr_dims(&p), &[2, 2, 2, 1, 1, 1]);

    // label each element by coordinates: v = 100*g + 10*oc + ic
    let mut wei = TestBuffer::new(&p.wei_dims(), DType::F32, EngineKind::Host);
    for g in 0..2i64 {
        for oc in 0..2i64 {
            for ic in 0..2i64 {
                let v = (100 * g + 10 * oc + ic) as f32;
                wei.set(p.wei_off(g, oc, ic, 0, 0, 0), v);
            }
        }
    }
    let mut tr = TestBuffer::new(&wei_tr_dims(&p), DType::F32, EngineKind::Host);
    transpose_weights(&p, &wei, &mut tr).unwrap();

    // group axis untouched, oc/ic swapped within each group
    for g in 0..2i64 {
        for oc in 0..2i64 {
            for ic in 0..2i64 {
                let off = ((g * 2 + ic) * 2 + oc) as usize;
                assert_eq!(tr.get(off), (100 * g + 10 * oc + ic) as f32);
            }
        }
    }
}

#[test]
fn test_grouped_backward_weights_passes_end_to_end() {
    let p = Problem::new_2d(
        Direction::BwdWeightsBias,
        Alg::Direct,
        CfgSet::all_f32(),
        2,
        2,
        4,
        4,
        (4, 4),
        (3, 3),
        (1, 1),
        (0, 0),
    );
    let res = run_case(&CpuBackend, &p, &RunConfig::default());
    assert_eq!(res.state, CaseState::Passed, "{:?}", res.error);
}

#[test]
fn test_unimplemented_case_runs_no_fill_or_execute() {
    let backend = AccelDouble::unbuildable();
    let p = padded_2d(Direction::FwdBias, CfgSet::all_f32());
    let res = run_case(&backend, &p, &RunConfig::default());

    assert_eq!(res.state, CaseState::Unimplemented);
    assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
    assert_eq!(backend.executes.load(Ordering::SeqCst), 0);
    // nothing beyond the state was touched
    assert!(res.reason.is_none());
    assert!(res.diag.is_none());
    assert!(res.perf.is_none());
    assert!(res.error.is_none());
}

#[test]
fn test_gated_dtype_case_never_builds() {
    let backend = AccelDouble::new();
    let mut p = padded_2d(Direction::FwdInference, CfgSet::all_f32());
    p.cfg.wei.dt = DType::S8; // f32 src with s8 wei is not a thing
    let res = run_case(&backend, &p, &RunConfig::default());

    assert_eq!(res.state, CaseState::Unimplemented);
    assert_eq!(backend.builds.load(Ordering::SeqCst), 0);
    assert_eq!(backend.executes.load(Ordering::SeqCst), 0);
}
