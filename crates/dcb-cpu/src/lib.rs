//! Naive host deconvolution backend — the trusted correctness oracle.
//!
//! An intentionally simple, safe implementation of every direction of the
//! deconvolution family with f64 accumulation. It prioritizes correctness
//! and readability over performance; the harness uses it both as the
//! trusted host backend for cross-backend reference runs and as a
//! device-under-test stand-in in its own tests.

use dcb_core::attr::PostOp;
use dcb_core::backend::{Backend, EngineKind, ExecArg, ExecArgs, Primitive};
use dcb_core::problem::{Alg, Direction, Problem};
use dcb_core::types::DType;
use dcb_core::{HarnessError, Result, SumPostOp};

/// Host backend constructing [`CpuDeconv`] primitives.
pub struct CpuBackend;

impl Backend for CpuBackend {
    fn engine(&self) -> EngineKind {
        EngineKind::Host
    }

    fn supports_dtypes(&self, prb: &Problem) -> bool {
        let (s, w, d) = (prb.cfg.src.dt, prb.cfg.wei.dt, prb.cfg.dst.dt);
        match (s, w) {
            (DType::F32, DType::F32) => matches!(d, DType::F32),
            (DType::F16, DType::F16) => matches!(d, DType::F16 | DType::F32),
            (DType::BF16, DType::BF16) => matches!(d, DType::BF16 | DType::F32),
            (DType::S8 | DType::U8, DType::S8) => {
                matches!(d, DType::S8 | DType::U8 | DType::S32 | DType::F32 | DType::BF16)
            }
            _ => false,
        }
    }

    fn supports_sum(&self, sum: &SumPostOp) -> bool {
        match sum.dt {
            None => true,
            Some(dt) => matches!(dt, DType::F32 | DType::S8 | DType::U8 | DType::S32),
        }
    }

    fn signed_input_dot_product(&self) -> bool {
        // f64 scalar math, no widening dot-product instruction involved.
        true
    }

    fn build(&self, prb: &Problem) -> Result<Box<dyn Primitive>> {
        prb.validate()?;
        if prb.alg != Alg::Direct {
            return Err(HarnessError::Unimplemented(
                "cpu backend implements the direct algorithm only".into(),
            ));
        }
        if !self.supports_dtypes(prb) {
            return Err(HarnessError::Unimplemented(format!(
                "dtype combination {}/{}/{} not implemented",
                prb.cfg.src.dt, prb.cfg.wei.dt, prb.cfg.dst.dt
            )));
        }
        Ok(Box::new(CpuDeconv { prb: prb.clone() }))
    }
}

/// A built deconvolution primitive for one problem.
pub struct CpuDeconv {
    prb: Problem,
}

impl Primitive for CpuDeconv {
    fn impl_name(&self) -> &str {
        "direct:f64"
    }

    fn acc_dtype(&self) -> DType {
        if self.prb.cfg.src.dt.is_int() {
            DType::S32
        } else {
            DType::F32
        }
    }

    fn scratchpad_bytes(&self) -> usize {
        0
    }

    fn execute(&self, args: &mut ExecArgs) -> Result<()> {
        match self.prb.dir {
            d if d.is_fwd() => forward(&self.prb, args),
            Direction::BwdData => backward_data(&self.prb, args),
            _ => backward_weights(&self.prb, args),
        }
    }
}

fn forward(p: &Problem, args: &mut ExecArgs) -> Result<()> {
    let src = args.require(ExecArg::Src)?.clone();
    let wei = args.require(ExecArg::Wei)?.clone();
    let bia = if p.dir.with_bias() {
        Some(args.require(ExecArg::Bia)?.clone())
    } else {
        None
    };
    let mut dst = args
        .take(ExecArg::Dst)
        .ok_or(HarnessError::MissingArg(ExecArg::Dst))?;

    let (ocg, icg) = (p.oc / p.g, p.ic / p.g);
    let src_zp = p.attr.src_zp.unwrap_or(0) as f64;
    // Runtime scales arrive through the argument slot, not the descriptor.
    let runtime_scale = if p.attr.oscale.is_runtime() {
        Some(args.require(ExecArg::OutputScales)?.get(0))
    } else {
        None
    };

    for mb in 0..p.mb {
        for g in 0..p.g {
            for oc in 0..ocg {
                for od in 0..p.od {
                    for oh in 0..p.oh {
                        for ow in 0..p.ow {
                            let mut acc = 0.0f64;
                            for ic in 0..icg {
                                for kd in 0..p.kd {
                                    let Some(id) = deconv_src_pos(od, p.pd, kd, p.dd, p.sd, p.id)
                                    else {
                                        continue;
                                    };
                                    for kh in 0..p.kh {
                                        let Some(ih) =
                                            deconv_src_pos(oh, p.ph, kh, p.dh, p.sh, p.ih)
                                        else {
                                            continue;
                                        };
                                        for kw in 0..p.kw {
                                            let Some(iw) =
                                                deconv_src_pos(ow, p.pw, kw, p.dw, p.sw, p.iw)
                                            else {
                                                continue;
                                            };
                                            let s = src.get(p.src_off(mb, g * icg + ic, id, ih, iw))
                                                as f64
                                                - src_zp;
                                            let w =
                                                wei.get(p.wei_off(g, oc, ic, kd, kh, kw)) as f64;
                                            acc += s * w;
                                        }
                                    }
                                }
                            }

                            let oc_abs = g * ocg + oc;
                            let mut v = acc;
                            if let Some(b) = &bia {
                                v += b.get(oc_abs as usize) as f64;
                            }
                            v *= runtime_scale.unwrap_or_else(|| p.attr.oscale.at(oc_abs as usize))
                                as f64;

                            let off = p.dst_off(mb, oc_abs, od, oh, ow);
                            let mut vf = v as f32;
                            for po in &p.attr.post_ops {
                                match po {
                                    PostOp::Eltwise(e) => vf = e.apply(vf),
                                    PostOp::Sum(s) => vf += s.scale * dst.get(off),
                                }
                            }
                            if let Some(zp) = p.attr.dst_zp {
                                vf += zp as f32;
                            }
                            dst.set(off, dst.dt().round(vf));
                        }
                    }
                }
            }
        }
    }

    args.set(ExecArg::Dst, dst);
    Ok(())
}

fn backward_data(p: &Problem, args: &mut ExecArgs) -> Result<()> {
    let ddst = args.require(ExecArg::DiffDst)?.clone();
    let wei = args.require(ExecArg::Wei)?.clone();
    let mut dsrc = args
        .take(ExecArg::DiffSrc)
        .ok_or(HarnessError::MissingArg(ExecArg::DiffSrc))?;

    let (ocg, icg) = (p.oc / p.g, p.ic / p.g);

    for mb in 0..p.mb {
        for g in 0..p.g {
            for ic in 0..icg {
                for id in 0..p.id {
                    for ih in 0..p.ih {
                        for iw in 0..p.iw {
                            let mut acc = 0.0f64;
                            for oc in 0..ocg {
                                for kd in 0..p.kd {
                                    let Some(od) = deconv_dst_pos(id, p.pd, kd, p.dd, p.sd, p.od)
                                    else {
                                        continue;
                                    };
                                    for kh in 0..p.kh {
                                        let Some(oh) =
                                            deconv_dst_pos(ih, p.ph, kh, p.dh, p.sh, p.oh)
                                        else {
                                            continue;
                                        };
                                        for kw in 0..p.kw {
                                            let Some(ow) =
                                                deconv_dst_pos(iw, p.pw, kw, p.dw, p.sw, p.ow)
                                            else {
                                                continue;
                                            };
                                            acc += ddst.get(p.dst_off(mb, g * ocg + oc, od, oh, ow))
                                                as f64
                                                * wei.get(p.wei_off(g, oc, ic, kd, kh, kw)) as f64;
                                        }
                                    }
                                }
                            }
                            let off = p.src_off(mb, g * icg + ic, id, ih, iw);
                            dsrc.set(off, dsrc.dt().round(acc as f32));
                        }
                    }
                }
            }
        }
    }

    args.set(ExecArg::DiffSrc, dsrc);
    Ok(())
}

fn backward_weights(p: &Problem, args: &mut ExecArgs) -> Result<()> {
    let src = args.require(ExecArg::Src)?.clone();
    let ddst = args.require(ExecArg::DiffDst)?.clone();
    let mut dwei = args
        .take(ExecArg::DiffWei)
        .ok_or(HarnessError::MissingArg(ExecArg::DiffWei))?;

    let (ocg, icg) = (p.oc / p.g, p.ic / p.g);

    for g in 0..p.g {
        for oc in 0..ocg {
            for ic in 0..icg {
                for kd in 0..p.kd {
                    for kh in 0..p.kh {
                        for kw in 0..p.kw {
                            let mut acc = 0.0f64;
                            for mb in 0..p.mb {
                                for id in 0..p.id {
                                    let Some(od) = deconv_dst_pos(id, p.pd, kd, p.dd, p.sd, p.od)
                                    else {
                                        continue;
                                    };
                                    for ih in 0..p.ih {
                                        let Some(oh) =
                                            deconv_dst_pos(ih, p.ph, kh, p.dh, p.sh, p.oh)
                                        else {
                                            continue;
                                        };
                                        for iw in 0..p.iw {
                                            let Some(ow) =
                                                deconv_dst_pos(iw, p.pw, kw, p.dw, p.sw, p.ow)
                                            else {
                                                continue;
                                            };
                                            acc += src.get(p.src_off(mb, g * icg + ic, id, ih, iw))
                                                as f64
                                                * ddst.get(p.dst_off(mb, g * ocg + oc, od, oh, ow))
                                                    as f64;
                                        }
                                    }
                                }
                            }
                            let off = p.wei_off(g, oc, ic, kd, kh, kw);
                            dwei.set(off, dwei.dt().round(acc as f32));
                        }
                    }
                }
            }
        }
    }
    args.set(ExecArg::DiffWei, dwei);

    if p.dir.with_bias() {
        let mut dbia = args
            .take(ExecArg::DiffBia)
            .ok_or(HarnessError::MissingArg(ExecArg::DiffBia))?;
        for oc in 0..p.oc {
            let mut acc = 0.0f64;
            for mb in 0..p.mb {
                for od in 0..p.od {
                    for oh in 0..p.oh {
                        for ow in 0..p.ow {
                            acc += ddst.get(p.dst_off(mb, oc, od, oh, ow)) as f64;
                        }
                    }
                }
            }
            let v = dbia.dt().round(acc as f32);
            dbia.set(oc as usize, v);
        }
        args.set(ExecArg::DiffBia, dbia);
    }

    Ok(())
}

/// Source position contributing to destination position `o` through kernel
/// tap `k`, or None when the stride does not divide or it falls outside.
#[inline]
fn deconv_src_pos(o: i64, p: i64, k: i64, d: i64, s: i64, extent: i64) -> Option<i64> {
    let num = o + p - k * (d + 1);
    if num < 0 || num % s != 0 {
        return None;
    }
    let i = num / s;
    (i < extent).then_some(i)
}

/// Destination position a source position `i` contributes to through
/// kernel tap `k`, or None when it falls outside the output.
#[inline]
fn deconv_dst_pos(i: i64, p: i64, k: i64, d: i64, s: i64, extent: i64) -> Option<i64> {
    let o = i * s + k * (d + 1) - p;
    (0..extent).contains(&o).then_some(o)
}
