//! Reference runner selection.
//!
//! The oracle for a case is either the harness's own wide-precision
//! computation or, when the device under test sits on an accelerator and
//! the fast-reference knob is on, a reduced copy of the problem built
//! against the trusted host backend. The reduced build is only accepted
//! when the host backend offers a real implementation; its generic
//! fallback would be no faster than computing wide directly.

use std::mem;

use dcb_core::backend::{EngineKind, ExecArg, ExecArgs, Primitive};
use dcb_core::problem::Problem;
use dcb_core::types::DType;
use dcb_core::{Backend, Result, TestBuffer};
use dcb_cpu::CpuBackend;

use crate::orchestrate::{bind_attr_args, CaseBuffers};
use crate::{ref_compute, RunConfig};

pub enum RefRunner {
    /// Wide f64 computation over the f32 shadows.
    Wide,
    /// Reduced problem executed by the host backend over the shadows.
    Host {
        prim: Box<dyn Primitive>,
        reduced: Problem,
    },
}

pub fn init_reference(prb: &Problem, dut_engine: EngineKind, cfg: &RunConfig) -> RefRunner {
    if cfg.mode.is_corr() && dut_engine == EngineKind::Accel && cfg.fast_ref {
        let reduced = prb.for_reference();
        if let Ok(prim) = CpuBackend.build(&reduced) {
            if !prim.impl_name().starts_with("ref") {
                tracing::debug!(impl_name = prim.impl_name(), "host reference primitive");
                return RefRunner::Host { prim, reduced };
            }
        }
    }
    RefRunner::Wide
}

/// Produce the reference outputs into the `*_fp` shadow buffers, rounded
/// onto the device output dtype's grid so the comparator sees both sides
/// through the same quantization.
pub fn run_reference(runner: &RefRunner, prb: &Problem, bufs: &mut CaseBuffers) -> Result<()> {
    match runner {
        RefRunner::Wide => ref_compute::compute_ref(prb, bufs),
        RefRunner::Host { prim, reduced } => {
            execute_on_shadows(prim.as_ref(), reduced, bufs)?;
            round_outputs(prb, bufs);
            Ok(())
        }
    }
}

/// Run a host primitive over the wide shadow buffers. Same binding table
/// as the device execution, minus the dtype conversion.
fn execute_on_shadows(
    prim: &dyn Primitive,
    prb: &Problem,
    bufs: &mut CaseBuffers,
) -> Result<()> {
    let mut args = ExecArgs::new();
    let empty = || TestBuffer::new(&[0], DType::F32, EngineKind::Host);

    let src = mem::replace(&mut bufs.src_fp, empty());
    let wei = mem::replace(&mut bufs.wei_fp, empty());
    let bia = mem::replace(&mut bufs.bia_fp, empty());
    let dst = mem::replace(&mut bufs.dst_fp, empty());

    if prb.dir.is_fwd() {
        args.set(ExecArg::Src, src);
        args.set(ExecArg::Wei, wei);
        if prb.dir.with_bias() {
            args.set(ExecArg::Bia, bia);
        }
        args.set(ExecArg::Dst, dst);
    } else if prb.dir.is_bwd_d() {
        args.set(ExecArg::DiffDst, dst);
        args.set(ExecArg::Wei, wei);
        args.set(ExecArg::DiffSrc, src);
    } else {
        args.set(ExecArg::Src, src);
        args.set(ExecArg::DiffDst, dst);
        args.set(ExecArg::DiffWei, wei);
        if prb.dir.with_bias() {
            args.set(ExecArg::DiffBia, bia);
        }
    }
    bind_attr_args(prb, EngineKind::Host, &mut args);

    let status = prim.execute(&mut args);

    if let Some(buf) = args.take(ExecArg::Src).or_else(|| args.take(ExecArg::DiffSrc)) {
        bufs.src_fp = buf;
    }
    if let Some(buf) = args.take(ExecArg::Wei).or_else(|| args.take(ExecArg::DiffWei)) {
        bufs.wei_fp = buf;
    }
    if let Some(buf) = args.take(ExecArg::Bia).or_else(|| args.take(ExecArg::DiffBia)) {
        bufs.bia_fp = buf;
    }
    if let Some(buf) = args.take(ExecArg::Dst).or_else(|| args.take(ExecArg::DiffDst)) {
        bufs.dst_fp = buf;
    }
    status
}

/// Round the checked output shadows onto the device dtypes' grids.
fn round_outputs(prb: &Problem, bufs: &mut CaseBuffers) {
    let round = |buf: &mut TestBuffer, dt: DType| {
        for v in buf.as_mut_slice() {
            *v = dt.round(*v);
        }
    };
    if prb.dir.is_fwd() {
        round(&mut bufs.dst_fp, prb.cfg.dst.dt);
    } else if prb.dir.is_bwd_d() {
        round(&mut bufs.src_fp, prb.cfg.src.dt);
    } else {
        round(&mut bufs.wei_fp, prb.cfg.wei.dt);
        if prb.dir.with_bias() {
            round(&mut bufs.bia_fp, prb.cfg.bia.dt);
        }
    }
}
