//! Differential correctness and performance harness for deconvolution
//! primitives.
//!
//! A case runs through a fixed pipeline: gate → build → fill → execute →
//! reference → compare → perf. Each stage mutates a [`CaseResult`]; gated
//! cases never reach the filler, and a fatal pipeline error kills one
//! case only.

pub mod compare;
pub mod fill;
pub mod gate;
pub mod orchestrate;
pub mod perf;
pub mod ref_compute;
pub mod reference;

pub use orchestrate::CaseBuffers;
pub use perf::PerfConfig;

use dcb_core::backend::Backend;
use dcb_core::problem::{DataKind, Problem};
use dcb_core::{CaseResult, CaseState, HarnessError, Result, TestBuffer};

/// What the driver does with each case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Print/collect the case without touching the backend.
    List,
    Correctness,
    Performance,
    /// Correctness followed by a perf pass on passing cases.
    Both,
}

impl RunMode {
    pub fn is_corr(self) -> bool {
        matches!(self, RunMode::Correctness | RunMode::Both)
    }

    pub fn is_perf(self) -> bool {
        matches!(self, RunMode::Performance | RunMode::Both)
    }
}

/// Driver knobs shared across cases.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub mode: RunMode,
    /// Prefer a host-backend primitive over the wide computation as the
    /// oracle for accelerator devices.
    pub fast_ref: bool,
    /// Working-set budget per case, device buffers plus shadows plus
    /// scratchpad.
    pub max_mem_bytes: usize,
    pub perf: PerfConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Correctness,
            fast_ref: true,
            max_mem_bytes: 8 << 30,
            perf: PerfConfig::default(),
        }
    }
}

/// Run one case end to end. Never panics and never propagates errors:
/// every outcome, including fatal pipeline errors, lands in the result.
pub fn run_case(backend: &dyn Backend, prb: &Problem, cfg: &RunConfig) -> CaseResult {
    let mut res = CaseResult::default();
    if cfg.mode == RunMode::List {
        res.state = CaseState::Listed;
        return res;
    }
    if let Err(e) = prb.validate() {
        res.fail_fatal(e);
        return res;
    }
    if !gate::pre_build_gate(prb, backend, &mut res) {
        return res;
    }
    if let Err(e) = drive(backend, prb, cfg, &mut res) {
        match e {
            HarnessError::Unimplemented(msg) if res.state == CaseState::Initialized => {
                tracing::debug!(problem = %prb, msg, "unimplemented");
                res.unimplemented();
            }
            other => {
                tracing::warn!(problem = %prb, error = %other, "case failed fatally");
                res.fail_fatal(other);
            }
        }
    }
    res
}

fn drive(
    backend: &dyn Backend,
    prb: &Problem,
    cfg: &RunConfig,
    res: &mut CaseResult,
) -> Result<()> {
    let prim = backend.build(prb)?;
    res.impl_name = prim.impl_name().to_string();
    if prim.acc_dtype() != prb.acc_dt() {
        return Err(HarnessError::Unimplemented(format!(
            "implementation accumulates in {} but the case configures {}",
            prim.acc_dtype(),
            prb.acc_dt()
        )));
    }
    if !gate::memory_gate(prb, prim.scratchpad_bytes(), cfg.max_mem_bytes, res) {
        return Ok(());
    }

    let mut bufs = CaseBuffers::allocate(prb, backend.engine());
    fill::fill_all(
        prb,
        &mut bufs,
        backend.signed_input_dot_product(),
        backend.engine(),
        cfg.mode,
    )?;

    if cfg.mode.is_corr() {
        let runner = reference::init_reference(prb, backend.engine(), cfg);
        orchestrate::execute_case(prim.as_ref(), prb, &mut bufs)?;
        res.state = CaseState::Executed;
        reference::run_reference(&runner, prb, &mut bufs)?;

        let mut checks: Vec<(DataKind, &TestBuffer, &TestBuffer)> = Vec::new();
        if prb.dir.is_fwd() {
            checks.push((DataKind::Dst, &bufs.dst_fp, &bufs.dst_dt));
        } else if prb.dir.is_bwd_d() {
            checks.push((DataKind::Src, &bufs.src_fp, &bufs.src_dt));
        } else {
            checks.push((DataKind::Wei, &bufs.wei_fp, &bufs.wei_dt));
            if prb.dir.with_bias() {
                checks.push((DataKind::Bia, &bufs.bia_fp, &bufs.bia_dt));
            }
        }
        for (kind, ref_buf, got_buf) in checks {
            let policy = compare::setup_compare(prb, kind);
            compare::compare(&policy, kind, ref_buf, got_buf, res)?;
        }
    }

    if cfg.mode.is_perf() && (!cfg.mode.is_corr() || res.state == CaseState::Passed) {
        res.perf = Some(perf::measure(prim.as_ref(), prb, &mut bufs, &cfg.perf)?);
        if res.state == CaseState::Initialized {
            res.state = CaseState::Executed;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcb_core::cfg::CfgSet;
    use dcb_core::problem::{Alg, Direction};
    use dcb_cpu::CpuBackend;

    fn prb(dir: Direction) -> Problem {
        Problem::new_2d(
            dir,
            Alg::Direct,
            CfgSet::all_f32(),
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
    fn test_run_case_passes_for_every_direction() {
        for dir in [
            Direction::FwdInference,
            Direction::FwdBias,
            Direction::BwdData,
            Direction::BwdWeightsBias,
        ] {
            let res = run_case(&CpuBackend, &prb(dir), &RunConfig::default());
            assert_eq!(res.state, CaseState::Passed, "{dir:?}: {:?}", res.error);
            assert_eq!(res.impl_name, "direct:f64");
        }
    }

    #[test]
    fn test_list_mode_short_circuits() {
        let cfg = RunConfig {
            mode: RunMode::List,
            ..RunConfig::default()
        };
        let res = run_case(&CpuBackend, &prb(Direction::FwdBias), &cfg);
        assert_eq!(res.state, CaseState::Listed);
        assert!(res.impl_name.is_empty());
    }

    #[test]
    fn test_wino_case_is_unimplemented() {
        let mut p = prb(Direction::FwdInference);
        p.alg = Alg::Wino;
        let res = run_case(&CpuBackend, &p, &RunConfig::default());
        assert_eq!(res.state, CaseState::Unimplemented);
    }

    #[test]
    fn test_invalid_problem_fails_fatally() {
        let mut p = prb(Direction::FwdInference);
        p.oh = 1;
        let res = run_case(&CpuBackend, &p, &RunConfig::default());
        assert_eq!(res.state, CaseState::Failed);
        assert!(res.error.is_some());
    }

    #[test]
    fn test_both_mode_records_perf_on_pass() {
        let cfg = RunConfig {
            mode: RunMode::Both,
            perf: PerfConfig {
                max_iters: 3,
                min_iters: 1,
                max_total: std::time::Duration::from_secs(10),
            },
            ..RunConfig::default()
        };
        let res = run_case(&CpuBackend, &prb(Direction::FwdInference), &cfg);
        assert_eq!(res.state, CaseState::Passed);
        let perf = res.perf.unwrap();
        assert_eq!(perf.iters, 3);
    }

    #[test]
    fn test_memory_budget_skips() {
        let cfg = RunConfig {
            max_mem_bytes: 64,
            ..RunConfig::default()
        };
        let res = run_case(&CpuBackend, &prb(Direction::FwdInference), &cfg);
        assert_eq!(res.state, CaseState::Skipped);
    }
}
