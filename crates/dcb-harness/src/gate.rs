//! Case screening before any data is synthesized.
//!
//! Verdicts are policy outcomes, never failures. A gated case must not
//! reach the filler or the orchestrator; the memory rule is applied
//! separately because the scratchpad size is only known after the
//! primitive is built.

use dcb_core::backend::Backend;
use dcb_core::problem::Problem;
use dcb_core::types::DType;
use dcb_core::{CaseResult, EngineKind, SkipReason};

use crate::orchestrate::estimate_case_bytes;

/// Screening that needs no built primitive. First match wins; returns
/// false when the case was gated.
pub fn pre_build_gate(prb: &Problem, backend: &dyn Backend, res: &mut CaseResult) -> bool {
    if !backend.supports_dtypes(prb) {
        tracing::debug!(problem = %prb, "dtype combination not implemented");
        res.unimplemented();
        return false;
    }
    if let Some(sum) = prb.attr.find_sum() {
        if !backend.supports_sum(sum) {
            tracing::debug!(problem = %prb, "sum post-op dtype not implemented");
            res.unimplemented();
            return false;
        }
    }

    let unsupported = match backend.engine() {
        // Accelerator kernels quantize s8 weights through an f16 path
        // that cannot produce a bf16 destination.
        EngineKind::Accel => prb.cfg.wei.dt == DType::S8 && prb.cfg.dst.dt == DType::BF16,
        // The host library resolves output scales at build time only.
        EngineKind::Host => prb.attr.oscale.is_runtime(),
    };
    if unsupported {
        tracing::debug!(problem = %prb, "case not supported on this engine");
        res.skip(SkipReason::CaseNotSupported);
        return false;
    }
    true
}

/// Memory budget rule: device buffers, wide shadows, and the built
/// primitive's scratchpad together must fit the budget.
pub fn memory_gate(
    prb: &Problem,
    scratchpad_bytes: usize,
    max_mem_bytes: usize,
    res: &mut CaseResult,
) -> bool {
    let need = estimate_case_bytes(prb) + scratchpad_bytes;
    if need > max_mem_bytes {
        tracing::debug!(problem = %prb, need, max_mem_bytes, "over memory budget");
        res.skip(SkipReason::NotEnoughRam);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcb_core::attr::OutputScale;
    use dcb_core::cfg::CfgSet;
    use dcb_core::problem::{Alg, Direction};
    use dcb_core::CaseState;
    use dcb_cpu::CpuBackend;

    fn prb(cfg: CfgSet) -> Problem {
        Problem::new_2d(
            Direction::FwdInference,
            Alg::Direct,
            cfg,
            2,
            1,
            4,
            4,
            (5, 5),
            (3, 3),
            (1, 1),
            (0, 0),
        )
    }

    #[test]
    fn test_unsupported_dtypes_are_unimplemented() {
        let mut p = prb(CfgSet::all_f32());
        p.cfg.wei.dt = DType::S8;
        let mut res = CaseResult::default();
        assert!(!pre_build_gate(&p, &CpuBackend, &mut res));
        assert_eq!(res.state, CaseState::Unimplemented);
    }

    #[test]
    fn test_runtime_oscale_skipped_on_host() {
        let mut p = prb(CfgSet::all_f32());
        p.attr.oscale = OutputScale::Runtime(2.0);
        let mut res = CaseResult::default();
        assert!(!pre_build_gate(&p, &CpuBackend, &mut res));
        assert_eq!(res.state, CaseState::Skipped);
        assert_eq!(res.reason, Some(SkipReason::CaseNotSupported));
    }

    #[test]
    fn test_supported_case_passes() {
        let mut res = CaseResult::default();
        assert!(pre_build_gate(&prb(CfgSet::all_f32()), &CpuBackend, &mut res));
        assert_eq!(res.state, CaseState::Initialized);
    }

    #[test]
    fn test_memory_budget() {
        let p = prb(CfgSet::all_f32());
        let mut res = CaseResult::default();
        assert!(memory_gate(&p, 0, usize::MAX, &mut res));
        let mut res = CaseResult::default();
        assert!(!memory_gate(&p, 0, 16, &mut res));
        assert_eq!(res.state, CaseState::Skipped);
        assert_eq!(res.reason, Some(SkipReason::NotEnoughRam));
    }
}
