//! Cross-engine runs against the accelerator stand-in.

mod common;

use std::sync::atomic::Ordering;

use common::AccelDouble;
use dcb_core::attr::OutputScale;
use dcb_core::cfg::CfgSet;
use dcb_core::problem::{Alg, Direction, Problem};
use dcb_core::types::DType;
use dcb_core::{CaseState, SkipReason};
use dcb_harness::{run_case, RunConfig, RunMode};

fn prb(cfg: CfgSet) -> Problem {
    Problem::new_2d(
        Direction::FwdBias,
        Alg::Direct,
        cfg,
        2,
        1,
        4,
        4,
        (5, 5),
        (3, 3),
        (1, 1),
        (1, 1),
    )
}

#[test]
fn test_bf16_case_passes_against_host_reference() {
    let backend = AccelDouble::new();
    let res = run_case(&backend, &prb(CfgSet::bf16()), &RunConfig::default());
    assert_eq!(res.state, CaseState::Passed, "{:?}", res.error);
    assert_eq!(backend.executes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_int8_case_passes_against_host_reference() {
    for cfg in [CfgSet::u8s8s8(), CfgSet::u8s8u8(), CfgSet::s8s8f32()] {
        let backend = AccelDouble::new();
        let res = run_case(&backend, &prb(cfg), &RunConfig::default());
        assert_eq!(res.state, CaseState::Passed, "{:?}", res.error);
    }
}

#[test]
fn test_int8_with_source_zero_point_passes() {
    let mut p = prb(CfgSet::u8s8s8());
    p.attr.src_zp = Some(2);
    let backend = AccelDouble::new();
    let res = run_case(&backend, &p, &RunConfig::default());
    assert_eq!(res.state, CaseState::Passed, "{:?}", res.error);
}

#[test]
fn test_runtime_output_scale_runs_on_accel() {
    let mut p = prb(CfgSet::all_f32());
    p.attr.oscale = OutputScale::Runtime(0.5);
    let backend = AccelDouble::new();
    let res = run_case(&backend, &p, &RunConfig::default());
    assert_eq!(res.state, CaseState::Passed, "{:?}", res.error);
}

#[test]
fn test_s8_weights_bf16_dst_skipped_on_accel() {
    let mut p = prb(CfgSet::u8s8s8());
    p.cfg.dst = dcb_core::FillConfig::new(dcb_core::DataKind::Dst, DType::BF16);
    let backend = AccelDouble::new();
    let res = run_case(&backend, &p, &RunConfig::default());
    assert_eq!(res.state, CaseState::Skipped);
    assert_eq!(res.reason, Some(SkipReason::CaseNotSupported));
    assert_eq!(backend.builds.load(Ordering::SeqCst), 0);
}

#[test]
fn test_wide_reference_agrees_when_fast_ref_disabled() {
    let cfg = RunConfig {
        fast_ref: false,
        ..RunConfig::default()
    };
    let backend = AccelDouble::new();
    let res = run_case(&backend, &prb(CfgSet::f16()), &cfg);
    assert_eq!(res.state, CaseState::Passed, "{:?}", res.error);
}

#[test]
fn test_perf_mode_records_timings() {
    let cfg = RunConfig {
        mode: RunMode::Both,
        ..RunConfig::default()
    };
    let backend = AccelDouble::new();
    let res = run_case(&backend, &prb(CfgSet::all_f32()), &cfg);
    assert_eq!(res.state, CaseState::Passed, "{:?}", res.error);
    let perf = res.perf.expect("perf report");
    assert!(perf.iters >= 1);
    assert!(perf.min_ns <= perf.avg_ns);
}
