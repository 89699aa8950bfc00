//! Deterministic tensor synthesis.
//!
//! Values are a pure function of the element's coordinates: a fixed
//! linear combination with per-axis prime multipliers feeds a bounded
//! coin flip (sparsity) and a perturbed-value formula. This arithmetic is
//! a reproducibility contract — identical coordinates always produce
//! identical bytes, on any thread schedule, so the fan-out below may
//! partition the coordinate space however it likes.

use rayon::prelude::*;

use dcb_core::backend::EngineKind;
use dcb_core::problem::Problem;
use dcb_core::types::DType;
use dcb_core::{Alg, HarnessError, Result, TestBuffer};

use crate::RunMode;

// ── Role requirements per direction ─────────────────────────────────────

pub fn need_src_init(prb: &Problem) -> bool {
    !prb.dir.is_bwd_d()
}

pub fn need_wei_init(prb: &Problem) -> bool {
    !prb.dir.is_bwd_w()
}

pub fn need_bia_init(prb: &Problem) -> bool {
    need_wei_init(prb)
}

pub fn need_dst_init(prb: &Problem) -> bool {
    !prb.dir.is_fwd() || prb.attr.find_sum().is_some()
}

// ── Generator primitives ────────────────────────────────────────────────

/// Bounded pseudo-random coin flip keyed by the element seed.
///
/// Exact arithmetic preserved across implementations: multiply by 753737
/// in wrapping u64, reduce mod 1000003, compare against the sparsity
/// fraction of the modulus.
pub fn flip_coin(gen: i64, sparsity: f32) -> bool {
    const BIG_PRIME: u64 = 1_000_003;
    const PRIME: u64 = 753_737;
    let s = (gen as u64).wrapping_mul(PRIME) % BIG_PRIME;
    (s as f32) < (BIG_PRIME as f32) * sparsity
}

#[inline]
fn gen_value(gen: i64, min: i32, step: i32, range: i64, base: i32, non_base: bool) -> f32 {
    if non_base {
        (min as i64 + (gen * step as i64) % range) as f32
    } else {
        base as f32
    }
}

// ── Per-role fills ──────────────────────────────────────────────────────

/// Fill the source role.
///
/// Writes the wide reference buffer and the device buffer; when their
/// dtypes differ the conversion is validated by a reorder round trip and
/// any byte difference is a fatal pipeline error.
pub fn fill_src(
    prb: &Problem,
    mem_dt: &mut TestBuffer,
    mem_fp: &mut TestBuffer,
    mode: RunMode,
) -> Result<()> {
    let check_reorder = mode.is_corr() && mem_dt.dt() != mem_fp.dt();
    let mut extra = check_reorder
        .then(|| TestBuffer::new(mem_fp.dims(), DType::F32, EngineKind::Host));

    let c = &prb.cfg.src;
    let range = c.range();

    // Dense filling for small problems; minibatch and groups are
    // independent dimensions and do not count toward the size.
    let mut src_nelems = prb.ic * prb.id * prb.ih * prb.iw;
    if prb.has_groups() {
        src_nelems /= prb.g;
    }
    let sparsity = if src_nelems < 100 { 1.0 } else { c.sparsity };

    let dev_dt = mem_dt.dt();
    let src_zp = prb.attr.src_zp;
    let (ic, id, ih, iw) = (prb.ic, prb.id, prb.ih, prb.iw);
    {
        let mem_00 = match extra.as_mut() {
            Some(b) => b,
            None => &mut *mem_fp,
        };
        mem_00
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(off, slot)| {
                let off = off as i64;
                let w = off % iw;
                let t = off / iw;
                let h = t % ih;
                let t = t / ih;
                let d = t % id;
                let t = t / id;
                let c_ = t % ic;
                let mb = t / ic;

                let gen = 101 * d + 103 * h + 107 * w + 109 * mb + 113 * c_;
                let non_base = flip_coin(gen, sparsity);
                let mut value = gen_value(gen, c.min, c.step, range, c.base, non_base);
                if let Some(zp) = src_zp {
                    value += zp as f32;
                }
                *slot = dev_dt.round(value);
            });
    }

    let staged: &TestBuffer = extra.as_ref().unwrap_or(mem_fp);
    mem_dt.reorder(staged)?;
    if check_reorder {
        mem_fp.reorder(mem_dt)?;
        let staged = extra.as_ref().ok_or_else(|| {
            HarnessError::FillMismatch("missing staging buffer".into())
        })?;
        if !mem_fp.bytes_eq(staged) {
            return Err(HarnessError::FillMismatch(
                "src device/reference round trip diverged".into(),
            ));
        }
    }
    Ok(())
}

/// Fill the weights role.
///
/// For int8 kernels on hardware whose fused dot product shifts one
/// operand into a different signedness domain, additionally verify that
/// already-quantized s8 data reorders to byte-identical device contents
/// as quantize-on-the-fly from the wide data. Backends with symmetric
/// signed dot products skip that check.
pub fn fill_wei(
    prb: &Problem,
    mem_dt: &mut TestBuffer,
    mem_fp: &mut TestBuffer,
    signed_dot: bool,
    engine: EngineKind,
    mode: RunMode,
) -> Result<()> {
    let wino_s8 = prb.alg == Alg::Wino && prb.cfg.wei.dt == DType::S8;
    let is_def_zp = prb.attr.src_zp.is_none();
    let diff_data_type = mem_dt.dt() != mem_fp.dt();

    let dt_check = if signed_dot { DType::U8 } else { DType::S8 };
    let wei_x8x8 = prb.cfg.wei.dt == DType::S8 && prb.cfg.src.dt == dt_check;
    let check_reorder =
        mode.is_corr() && diff_data_type && !wino_s8 && !wei_x8x8 && is_def_zp;

    let mut extra = check_reorder
        .then(|| TestBuffer::new(mem_fp.dims(), DType::F32, EngineKind::Host));

    let c = &prb.cfg.wei;
    let range = c.range();
    let (ocg, icg) = (prb.oc / prb.g, prb.ic / prb.g);
    let (kd, kh, kw) = (prb.kd, prb.kh, prb.kw);
    {
        let mem_00 = match extra.as_mut() {
            Some(b) => b,
            None => &mut *mem_fp,
        };
        mem_00
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(off, slot)| {
                let off = off as i64;
                let w = off % kw;
                let t = off / kw;
                let h = t % kh;
                let t = t / kh;
                let d = t % kd;
                let ch = t / kd;
                let ic = ch % icg;
                let t = ch / icg;
                let oc = t % ocg;
                let g = t / ocg;

                let gen = 113 * g + 127 * d + 131 * h + 137 * w + 139 * oc + 149 * ic + 151;
                let non_base = flip_coin(gen, c.sparsity);
                *slot = gen_value(gen, c.min, c.step, range, c.base, non_base);
            });
    }

    let staged: &TestBuffer = extra.as_ref().unwrap_or(mem_fp);
    mem_dt.reorder(staged)?;
    if check_reorder {
        mem_fp.reorder(mem_dt)?;
        let staged = extra.as_ref().ok_or_else(|| {
            HarnessError::FillMismatch("missing staging buffer".into())
        })?;
        if !mem_fp.bytes_eq(staged) {
            return Err(HarnessError::FillMismatch(
                "wei device/reference round trip diverged".into(),
            ));
        }
    }

    if (wei_x8x8 || !is_def_zp) && engine == EngineKind::Host {
        // Users may hand the library pre-quantized weights; the s8 → s8
        // (compensated) conversion must produce the same device bytes as
        // quantizing the wide data directly.
        let mut mem_fp_s8 = TestBuffer::new(mem_fp.dims(), DType::S8, EngineKind::Host);
        let mut mem_dt_s8 = TestBuffer::new(mem_dt.dims(), DType::S8, engine);
        mem_fp_s8.reorder(mem_fp)?;
        mem_dt_s8.reorder(&mem_fp_s8)?;
        if mem_dt.nelems() != mem_dt_s8.nelems() || !mem_dt.bytes_eq(&mem_dt_s8) {
            return Err(HarnessError::FillMismatch(
                "pre-quantized s8 weights diverged from on-the-fly quantization".into(),
            ));
        }
    }
    Ok(())
}

/// Fill the bias role (rank-1, small — filled serially).
pub fn fill_bia(
    prb: &Problem,
    mem_dt: &mut TestBuffer,
    mem_fp: &mut TestBuffer,
    mode: RunMode,
) -> Result<()> {
    let check_reorder = mode.is_corr() && mem_dt.dt() != mem_fp.dt();
    let mut extra = check_reorder
        .then(|| TestBuffer::new(mem_fp.dims(), DType::F32, EngineKind::Host));

    let c = &prb.cfg.bia;
    let range = c.range();
    {
        let mem_00 = match extra.as_mut() {
            Some(b) => b,
            None => &mut *mem_fp,
        };
        for i in 0..mem_00.nelems() {
            let gen = 151 * i as i64;
            let non_base = flip_coin(gen, c.sparsity);
            let v = gen_value(gen, c.min, c.step, range, c.base, non_base);
            mem_00.set(i, v);
        }
    }

    let staged: &TestBuffer = extra.as_ref().unwrap_or(mem_fp);
    mem_dt.reorder(staged)?;
    if check_reorder {
        mem_fp.reorder(mem_dt)?;
        let staged = extra.as_ref().ok_or_else(|| {
            HarnessError::FillMismatch("missing staging buffer".into())
        })?;
        if !mem_fp.bytes_eq(staged) {
            return Err(HarnessError::FillMismatch(
                "bia device/reference round trip diverged".into(),
            ));
        }
    }
    Ok(())
}

/// Restores a buffer's logical dtype on every exit path.
struct DtGuard<'a> {
    buf: &'a mut TestBuffer,
    restore: Option<DType>,
}

impl<'a> DtGuard<'a> {
    fn retag(buf: &'a mut TestBuffer, dt: Option<DType>) -> Self {
        let restore = dt.map(|d| {
            let orig = buf.dt();
            buf.set_dt(d);
            orig
        });
        Self { buf, restore }
    }
}

impl Drop for DtGuard<'_> {
    fn drop(&mut self) {
        if let Some(dt) = self.restore {
            self.buf.set_dt(dt);
        }
    }
}

/// Fill the destination role.
///
/// When a sum post-op declares its own dtype, generate in that dtype's
/// range with the device buffer temporarily retagged, so the accumulated
/// values are stored exactly as the primitive will read them back.
pub fn fill_dst(
    prb: &Problem,
    mem_dt: &mut TestBuffer,
    mem_fp: &mut TestBuffer,
    mode: RunMode,
) -> Result<()> {
    let dst_dt = mem_dt.dt();
    let sum_dt = prb.attr.find_sum().and_then(|s| s.dt);
    let retag = sum_dt.filter(|&dt| dt != dst_dt);

    let c = &prb.cfg.dst;
    let (mut min, mut max) = (c.min, c.max);
    if let Some(dt) = retag {
        if matches!(dt, DType::S8 | DType::U8) {
            min = dt.lowest() as i32;
            max = dt.max_value() as i32;
        }
    }

    let mut guard = DtGuard::retag(mem_dt, retag);
    fill_dst_with_params(
        prb,
        &mut *guard.buf,
        mem_fp,
        c.sparsity,
        min,
        max,
        c.base,
        c.step,
        mode,
    )
}

#[allow(clippy::too_many_arguments)]
fn fill_dst_with_params(
    prb: &Problem,
    mem_dt: &mut TestBuffer,
    mem_fp: &mut TestBuffer,
    sparsity: f32,
    min: i32,
    max: i32,
    base: i32,
    step: i32,
    mode: RunMode,
) -> Result<()> {
    let check_reorder = mode.is_corr() && mem_dt.dt() != mem_fp.dt();
    let mut extra = check_reorder
        .then(|| TestBuffer::new(mem_fp.dims(), DType::F32, EngineKind::Host));

    let range = (max - min + 1) as i64;
    let (oc, od, oh, ow) = (prb.oc, prb.od, prb.oh, prb.ow);
    {
        let mem_00 = match extra.as_mut() {
            Some(b) => b,
            None => &mut *mem_fp,
        };
        mem_00
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(off, slot)| {
                let off = off as i64;
                let w = off % ow;
                let t = off / ow;
                let h = t % oh;
                let t = t / oh;
                let d = t % od;
                let t = t / od;
                let c_ = t % oc;
                let mb = t / oc;

                let gen = 157 * d + 163 * h + 167 * w + 173 * mb + 179 * c_;
                let non_base = flip_coin(gen, sparsity);
                *slot = gen_value(gen, min, step, range, base, non_base);
            });
    }

    let staged: &TestBuffer = extra.as_ref().unwrap_or(mem_fp);
    mem_dt.reorder(staged)?;
    if check_reorder {
        mem_fp.reorder(mem_dt)?;
        let staged = extra.as_ref().ok_or_else(|| {
            HarnessError::FillMismatch("missing staging buffer".into())
        })?;
        if !mem_fp.bytes_eq(staged) {
            return Err(HarnessError::FillMismatch(
                "dst device/reference round trip diverged".into(),
            ));
        }
    }
    Ok(())
}

/// Fill every role the direction requires, validating round trips.
pub fn fill_all(
    prb: &Problem,
    bufs: &mut crate::orchestrate::CaseBuffers,
    signed_dot: bool,
    engine: EngineKind,
    mode: RunMode,
) -> Result<()> {
    if need_dst_init(prb) {
        fill_dst(prb, &mut bufs.dst_dt, &mut bufs.dst_fp, mode)?;
    }
    if need_src_init(prb) {
        fill_src(prb, &mut bufs.src_dt, &mut bufs.src_fp, mode)?;
    }
    if need_wei_init(prb) {
        fill_wei(prb, &mut bufs.wei_dt, &mut bufs.wei_fp, signed_dot, engine, mode)?;
        crate::orchestrate::transpose_weights(prb, &bufs.wei_fp, &mut bufs.wei_tr_fp)?;
    }
    if need_bia_init(prb) {
        fill_bia(prb, &mut bufs.bia_dt, &mut bufs.bia_fp, mode)?;
    }
    tracing::debug!(problem = %prb, "fills complete");
    Ok(())
}
