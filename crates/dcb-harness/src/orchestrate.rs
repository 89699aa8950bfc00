//! Buffer ownership and execution plumbing for one case.
//!
//! The harness owns every tensor twice: a device buffer in the problem's
//! configured dtypes and a wide f32 host shadow the reference computes
//! in. Weights additionally get a transposed shadow in convolution
//! channel order, which is what the reference maths actually indexes.

use std::mem;

use dcb_core::backend::{EngineKind, ExecArg, ExecArgs, Primitive};
use dcb_core::problem::Problem;
use dcb_core::types::DType;
use dcb_core::{HarnessError, Result, TestBuffer};

/// All buffers of one test case.
///
/// `*_dt` live in the device dtypes on the backend's engine; `*_fp` are
/// the wide f32 host shadows. `wei_tr_fp` holds the weights remapped to
/// convolution channel order (per-group input channel outermost).
#[derive(Debug)]
pub struct CaseBuffers {
    pub src_dt: TestBuffer,
    pub wei_dt: TestBuffer,
    pub bia_dt: TestBuffer,
    pub dst_dt: TestBuffer,
    pub src_fp: TestBuffer,
    pub wei_fp: TestBuffer,
    pub wei_tr_fp: TestBuffer,
    pub bia_fp: TestBuffer,
    pub dst_fp: TestBuffer,
}

impl CaseBuffers {
    /// Allocate zero-filled buffers for the problem on the given engine.
    /// The bias pair is empty when the direction carries no bias.
    pub fn allocate(prb: &Problem, engine: EngineKind) -> Self {
        let bia_dims: &[i64] = if prb.dir.with_bias() { &[prb.oc] } else { &[0] };
        CaseBuffers {
            src_dt: TestBuffer::new(&prb.src_dims(), prb.cfg.src.dt, engine),
            wei_dt: TestBuffer::new(&prb.wei_dims(), prb.cfg.wei.dt, engine),
            bia_dt: TestBuffer::new(bia_dims, prb.cfg.bia.dt, engine),
            dst_dt: TestBuffer::new(&prb.dst_dims(), prb.cfg.dst.dt, engine),
            src_fp: TestBuffer::new(&prb.src_dims(), DType::F32, EngineKind::Host),
            wei_fp: TestBuffer::new(&prb.wei_dims(), DType::F32, EngineKind::Host),
            wei_tr_fp: TestBuffer::new(&wei_tr_dims(prb), DType::F32, EngineKind::Host),
            bia_fp: TestBuffer::new(bia_dims, DType::F32, EngineKind::Host),
            dst_fp: TestBuffer::new(&prb.dst_dims(), DType::F32, EngineKind::Host),
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.src_dt.size_bytes()
            + self.wei_dt.size_bytes()
            + self.bia_dt.size_bytes()
            + self.dst_dt.size_bytes()
            + self.src_fp.size_bytes()
            + self.wei_fp.size_bytes()
            + self.wei_tr_fp.size_bytes()
            + self.bia_fp.size_bytes()
            + self.dst_fp.size_bytes()
    }
}

/// Working-set estimate before any allocation happens, for the memory
/// gate. Counts both the device buffers and the wide host shadows.
pub fn estimate_case_bytes(prb: &Problem) -> usize {
    let nelems = |dims: &[i64]| dims.iter().product::<i64>().max(0) as usize;
    let src = nelems(&prb.src_dims());
    let wei = nelems(&prb.wei_dims());
    let bia = if prb.dir.with_bias() { prb.oc as usize } else { 0 };
    let dst = nelems(&prb.dst_dims());

    let f32s = DType::F32.size_bytes();
    src * (prb.cfg.src.dt.size_bytes() + f32s)
        + wei * (prb.cfg.wei.dt.size_bytes() + 2 * f32s)
        + bia * (prb.cfg.bia.dt.size_bytes() + f32s)
        + dst * (prb.cfg.dst.dt.size_bytes() + f32s)
}

// ── Weight transposition ────────────────────────────────────────────────

/// Dims of the transposed weights: per-group oc/ic axes swapped.
pub fn wei_tr_dims(prb: &Problem) -> Vec<i64> {
    let (ocg, icg) = (prb.oc / prb.g, prb.ic / prb.g);
    if prb.has_groups() {
        vec![prb.g, icg, ocg, prb.kd, prb.kh, prb.kw]
    } else {
        vec![icg, ocg, prb.kd, prb.kh, prb.kw]
    }
}

/// Offset into the transposed weights (convolution channel order:
/// per-group input channel outermost).
pub fn wei_tr_off(prb: &Problem, g: i64, ic: i64, oc: i64, kd: i64, kh: i64, kw: i64) -> usize {
    let (ocg, icg) = (prb.oc / prb.g, prb.ic / prb.g);
    let ch = (g * icg + ic) * ocg + oc;
    (((ch * prb.kd + kd) * prb.kh + kh) * prb.kw + kw) as usize
}

/// Remap deconvolution-order weights into convolution channel order.
///
/// A pure index permutation; values are untouched, so the remapped
/// buffer is bitwise-faithful to the original.
pub fn transpose_weights(prb: &Problem, wei: &TestBuffer, wei_tr: &mut TestBuffer) -> Result<()> {
    if wei.nelems() != wei_tr.nelems() {
        return Err(HarnessError::Reorder(format!(
            "weight transpose size mismatch: {} vs {}",
            wei.nelems(),
            wei_tr.nelems()
        )));
    }
    let (ocg, icg) = (prb.oc / prb.g, prb.ic / prb.g);
    for g in 0..prb.g {
        for oc in 0..ocg {
            for ic in 0..icg {
                for kd in 0..prb.kd {
                    for kh in 0..prb.kh {
                        for kw in 0..prb.kw {
                            let v = wei.get(prb.wei_off(g, oc, ic, kd, kh, kw));
                            wei_tr.set(wei_tr_off(prb, g, ic, oc, kd, kh, kw), v);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Remap a convolution-order gradient back into deconvolution order.
pub fn transpose_weights_back(
    prb: &Problem,
    wei_tr: &TestBuffer,
    wei: &mut TestBuffer,
) -> Result<()> {
    if wei.nelems() != wei_tr.nelems() {
        return Err(HarnessError::Reorder(format!(
            "weight transpose size mismatch: {} vs {}",
            wei_tr.nelems(),
            wei.nelems()
        )));
    }
    let (ocg, icg) = (prb.oc / prb.g, prb.ic / prb.g);
    for g in 0..prb.g {
        for oc in 0..ocg {
            for ic in 0..icg {
                for kd in 0..prb.kd {
                    for kh in 0..prb.kh {
                        for kw in 0..prb.kw {
                            let v = wei_tr.get(wei_tr_off(prb, g, ic, oc, kd, kh, kw));
                            wei.set(prb.wei_off(g, oc, ic, kd, kh, kw), v);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

// ── Execution ───────────────────────────────────────────────────────────

fn empty(dt: DType, engine: EngineKind) -> TestBuffer {
    TestBuffer::new(&[0], dt, engine)
}

/// Run the primitive once against the device buffers.
///
/// Buffers move into the argument slots for the call and are taken back
/// afterwards, so a sum post-op reading its own destination observes
/// exactly one generation of data.
pub fn execute_case(prim: &dyn Primitive, prb: &Problem, bufs: &mut CaseBuffers) -> Result<()> {
    let engine = bufs.src_dt.engine();
    let mut args = ExecArgs::new();

    let src = mem::replace(&mut bufs.src_dt, empty(prb.cfg.src.dt, engine));
    let wei = mem::replace(&mut bufs.wei_dt, empty(prb.cfg.wei.dt, engine));
    let bia = mem::replace(&mut bufs.bia_dt, empty(prb.cfg.bia.dt, engine));
    let dst = mem::replace(&mut bufs.dst_dt, empty(prb.cfg.dst.dt, engine));

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

    bind_attr_args(prb, engine, &mut args);
    let scratch_bytes = prim.scratchpad_bytes();
    if scratch_bytes > 0 {
        args.set(
            ExecArg::Scratchpad,
            TestBuffer::new(&[scratch_bytes as i64], DType::U8, engine),
        );
    }

    let status = prim.execute(&mut args);

    // Recover ownership on both the success and the error path. Each
    // tensor sits in exactly one of its two slots.
    if let Some(buf) = args.take(ExecArg::Src).or_else(|| args.take(ExecArg::DiffSrc)) {
        bufs.src_dt = buf;
    }
    if let Some(buf) = args.take(ExecArg::Wei).or_else(|| args.take(ExecArg::DiffWei)) {
        bufs.wei_dt = buf;
    }
    if let Some(buf) = args.take(ExecArg::Bia).or_else(|| args.take(ExecArg::DiffBia)) {
        bufs.bia_dt = buf;
    }
    if let Some(buf) = args.take(ExecArg::Dst).or_else(|| args.take(ExecArg::DiffDst)) {
        bufs.dst_dt = buf;
    }

    status
}

/// Bind the quantization argument slots the attributes call for.
pub fn bind_attr_args(prb: &Problem, engine: EngineKind, args: &mut ExecArgs) {
    if let Some(zp) = prb.attr.src_zp {
        let mut b = TestBuffer::new(&[1], DType::S32, engine);
        b.set(0, zp as f32);
        args.set(ExecArg::SrcZeroPoints, b);
    }
    if let Some(zp) = prb.attr.dst_zp {
        let mut b = TestBuffer::new(&[1], DType::S32, engine);
        b.set(0, zp as f32);
        args.set(ExecArg::DstZeroPoints, b);
    }
    if let Some(v) = prb.attr.oscale.runtime_value() {
        let mut b = TestBuffer::new(&[1], DType::F32, engine);
        b.set(0, v);
        args.set(ExecArg::OutputScales, b);
    }
}
