//! Wide-precision reference computation.
//!
//! Computes every direction of the deconvolution family over the f32
//! shadow buffers with f64 accumulation. The maths index the transposed
//! weight view (convolution channel order); the backward-weights pass
//! produces its gradient in that order and the result is remapped back,
//! so the layout-bridging convention is exercised end to end.

use rayon::prelude::*;

use dcb_core::attr::PostOp;
use dcb_core::problem::Problem;
use dcb_core::Result;

use crate::orchestrate::{transpose_weights_back, wei_tr_off, CaseBuffers};

pub fn compute_ref(prb: &Problem, bufs: &mut CaseBuffers) -> Result<()> {
    if prb.dir.is_fwd() {
        ref_fwd(prb, bufs)
    } else if prb.dir.is_bwd_d() {
        ref_bwd_data(prb, bufs)
    } else {
        ref_bwd_weights(prb, bufs)
    }
}

fn ref_fwd(prb: &Problem, bufs: &mut CaseBuffers) -> Result<()> {
    let (ocg, icg) = (prb.oc / prb.g, prb.ic / prb.g);
    let src = bufs.src_fp.as_slice();
    let wei = bufs.wei_tr_fp.as_slice();
    let bia = bufs.bia_fp.as_slice();
    let with_bias = prb.dir.with_bias();
    let src_zp = prb.attr.src_zp.unwrap_or(0) as f64;
    let runtime_scale = prb.attr.oscale.runtime_value();
    let dst_dt = prb.cfg.dst.dt;
    let (oc_t, od_t, oh_t, ow_t) = (prb.oc, prb.od, prb.oh, prb.ow);

    bufs.dst_fp
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(off, slot)| {
            let off = off as i64;
            let ow = off % ow_t;
            let t = off / ow_t;
            let oh = t % oh_t;
            let t = t / oh_t;
            let od = t % od_t;
            let t = t / od_t;
            let oc_abs = t % oc_t;
            let mb = t / oc_t;
            let (g, oc) = (oc_abs / ocg, oc_abs % ocg);

            let mut acc = 0.0f64;
            for ic in 0..icg {
                for kd in 0..prb.kd {
                    let Some(id) = src_pos(od, prb.pd, kd, prb.dd, prb.sd, prb.id) else {
                        continue;
                    };
                    for kh in 0..prb.kh {
                        let Some(ih) = src_pos(oh, prb.ph, kh, prb.dh, prb.sh, prb.ih) else {
                            continue;
                        };
                        for kw in 0..prb.kw {
                            let Some(iw) = src_pos(ow, prb.pw, kw, prb.dw, prb.sw, prb.iw)
                            else {
                                continue;
                            };
                            let s =
                                src[prb.src_off(mb, g * icg + ic, id, ih, iw)] as f64 - src_zp;
                            let w = wei[wei_tr_off(prb, g, ic, oc, kd, kh, kw)] as f64;
                            acc += s * w;
                        }
                    }
                }
            }

            let mut v = acc;
            if with_bias {
                v += bia[oc_abs as usize] as f64;
            }
            v *= runtime_scale.unwrap_or_else(|| prb.attr.oscale.at(oc_abs as usize)) as f64;

            let mut vf = v as f32;
            for po in &prb.attr.post_ops {
                match po {
                    PostOp::Eltwise(e) => vf = e.apply(vf),
                    PostOp::Sum(s) => vf += s.scale * *slot,
                }
            }
            if let Some(zp) = prb.attr.dst_zp {
                vf += zp as f32;
            }
            *slot = dst_dt.round(vf);
        });
    Ok(())
}

fn ref_bwd_data(prb: &Problem, bufs: &mut CaseBuffers) -> Result<()> {
    let (ocg, icg) = (prb.oc / prb.g, prb.ic / prb.g);
    let ddst = bufs.dst_fp.as_slice();
    let wei = bufs.wei_tr_fp.as_slice();
    let src_dt = prb.cfg.src.dt;
    let (ic_t, id_t, ih_t, iw_t) = (prb.ic, prb.id, prb.ih, prb.iw);

    bufs.src_fp
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(off, slot)| {
            let off = off as i64;
            let iw = off % iw_t;
            let t = off / iw_t;
            let ih = t % ih_t;
            let t = t / ih_t;
            let id = t % id_t;
            let t = t / id_t;
            let ic_abs = t % ic_t;
            let mb = t / ic_t;
            let (g, ic) = (ic_abs / icg, ic_abs % icg);

            let mut acc = 0.0f64;
            for oc in 0..ocg {
                for kd in 0..prb.kd {
                    let Some(od) = dst_pos(id, prb.pd, kd, prb.dd, prb.sd, prb.od) else {
                        continue;
                    };
                    for kh in 0..prb.kh {
                        let Some(oh) = dst_pos(ih, prb.ph, kh, prb.dh, prb.sh, prb.oh) else {
                            continue;
                        };
                        for kw in 0..prb.kw {
                            let Some(ow) = dst_pos(iw, prb.pw, kw, prb.dw, prb.sw, prb.ow)
                            else {
                                continue;
                            };
                            acc += ddst[prb.dst_off(mb, g * ocg + oc, od, oh, ow)] as f64
                                * wei[wei_tr_off(prb, g, ic, oc, kd, kh, kw)] as f64;
                        }
                    }
                }
            }
            *slot = src_dt.round(acc as f32);
        });
    Ok(())
}

fn ref_bwd_weights(prb: &Problem, bufs: &mut CaseBuffers) -> Result<()> {
    let (ocg, icg) = (prb.oc / prb.g, prb.ic / prb.g);
    let src = bufs.src_fp.as_slice();
    let ddst = bufs.dst_fp.as_slice();
    let wei_dt = prb.cfg.wei.dt;
    let (kd_t, kh_t, kw_t) = (prb.kd, prb.kh, prb.kw);

    // Gradient lands in convolution channel order, like a backend that
    // shares its backward-weights kernel with convolution would produce.
    bufs.wei_tr_fp
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(off, slot)| {
            let off = off as i64;
            let kw = off % kw_t;
            let t = off / kw_t;
            let kh = t % kh_t;
            let t = t / kh_t;
            let kd = t % kd_t;
            let ch = t / kd_t;
            let oc = ch % ocg;
            let t = ch / ocg;
            let ic = t % icg;
            let g = t / icg;

            let mut acc = 0.0f64;
            for mb in 0..prb.mb {
                for id in 0..prb.id {
                    let Some(od) = dst_pos(id, prb.pd, kd, prb.dd, prb.sd, prb.od) else {
                        continue;
                    };
                    for ih in 0..prb.ih {
                        let Some(oh) = dst_pos(ih, prb.ph, kh, prb.dh, prb.sh, prb.oh) else {
                            continue;
                        };
                        for iw in 0..prb.iw {
                            let Some(ow) = dst_pos(iw, prb.pw, kw, prb.dw, prb.sw, prb.ow)
                            else {
                                continue;
                            };
                            acc += src[prb.src_off(mb, g * icg + ic, id, ih, iw)] as f64
                                * ddst[prb.dst_off(mb, g * ocg + oc, od, oh, ow)] as f64;
                        }
                    }
                }
            }
            *slot = wei_dt.round(acc as f32);
        });

    transpose_weights_back(prb, &bufs.wei_tr_fp, &mut bufs.wei_fp)?;

    if prb.dir.with_bias() {
        let bia_dt = prb.cfg.bia.dt;
        for oc in 0..prb.oc {
            let mut acc = 0.0f64;
            for mb in 0..prb.mb {
                for od in 0..prb.od {
                    for oh in 0..prb.oh {
                        for ow in 0..prb.ow {
                            acc += ddst[prb.dst_off(mb, oc, od, oh, ow)] as f64;
                        }
                    }
                }
            }
            let v = bia_dt.round(acc as f32);
            bufs.bia_fp.set(oc as usize, v);
        }
    }
    Ok(())
}

/// Source position contributing to destination position `o` through
/// kernel tap `k`, if the stride divides and it lies inside the input.
#[inline]
fn src_pos(o: i64, p: i64, k: i64, d: i64, s: i64, extent: i64) -> Option<i64> {
    let num = o + p - k * (d + 1);
    if num < 0 || num % s != 0 {
        return None;
    }
    let i = num / s;
    (i < extent).then_some(i)
}

/// Destination position source position `i` feeds through kernel tap `k`.
#[inline]
fn dst_pos(i: i64, p: i64, k: i64, d: i64, s: i64, extent: i64) -> Option<i64> {
    let o = i * s + k * (d + 1) - p;
    (0..extent).contains(&o).then_some(o)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill;
    use crate::orchestrate::{execute_case, CaseBuffers};
    use crate::RunMode;
    use dcb_core::backend::EngineKind;
    use dcb_core::cfg::CfgSet;
    use dcb_core::problem::{Alg, Direction};
    use dcb_core::Backend;
    use dcb_cpu::CpuBackend;

    /// The wide reference and the host backend must agree bit-for-bit on
    /// all-f32 problems: identical accumulation order-independence is
    /// guaranteed by f64 accumulators on both sides.
    fn assert_ref_matches_cpu(prb: &Problem) {
        let prim = CpuBackend.build(prb).unwrap();
        let mut bufs = CaseBuffers::allocate(prb, EngineKind::Host);
        fill::fill_all(prb, &mut bufs, true, EngineKind::Host, RunMode::Correctness).unwrap();
        execute_case(prim.as_ref(), prb, &mut bufs).unwrap();
        compute_ref(prb, &mut bufs).unwrap();

        if prb.dir.is_fwd() {
            assert!(bufs.dst_fp.bytes_eq(&bufs.dst_dt), "dst diverged: {prb}");
        } else if prb.dir.is_bwd_d() {
            assert!(bufs.src_fp.bytes_eq(&bufs.src_dt), "diff src diverged: {prb}");
        } else {
            assert!(bufs.wei_fp.bytes_eq(&bufs.wei_dt), "diff wei diverged: {prb}");
            if prb.dir.with_bias() {
                assert!(bufs.bia_fp.bytes_eq(&bufs.bia_dt), "diff bia diverged: {prb}");
            }
        }
    }

    #[test]
    fn test_all_directions_agree_with_cpu_backend() {
        for dir in [
            Direction::FwdInference,
            Direction::FwdBias,
            Direction::BwdData,
            Direction::BwdWeights,
            Direction::BwdWeightsBias,
        ] {
            let p = Problem::new_2d(
                dir,
                Alg::Direct,
                CfgSet::all_f32(),
                2,
                1,
                4,
                6,
                (5, 5),
                (3, 3),
                (2, 2),
                (1, 1),
            );
            assert_ref_matches_cpu(&p);
        }
    }

    #[test]
    fn test_grouped_problem_agrees() {
        let p = Problem::new_2d(
            Direction::FwdBias,
            Alg::Direct,
            CfgSet::all_f32(),
            2,
            2,
            4,
            6,
            (4, 4),
            (3, 3),
            (1, 1),
            (0, 0),
        );
        assert_ref_matches_cpu(&p);
    }

    #[test]
    fn test_dilated_problem_agrees() {
        let mut p = Problem::new_2d(
            Direction::BwdData,
            Alg::Direct,
            CfgSet::all_f32(),
            1,
            1,
            2,
            2,
            (6, 6),
            (3, 3),
            (1, 1),
            (0, 0),
        );
        p.dh = 1;
        p.dw = 1;
        p.oh = dcb_core::problem::deconv_out_extent(p.ih, p.kh, p.sh, p.ph, p.dh);
        p.ow = dcb_core::problem::deconv_out_extent(p.iw, p.kw, p.sw, p.pw, p.dw);
        assert_ref_matches_cpu(&p);
    }

    #[test]
    fn test_fwd_with_post_ops_agrees() {
        use dcb_core::attr::{Attr, Eltwise, EltwiseKind, OutputScale, PostOp, SumPostOp};
        let attr = Attr {
            post_ops: vec![
                PostOp::Sum(SumPostOp { scale: 0.5, dt: None }),
                PostOp::Eltwise(Eltwise::new(EltwiseKind::Relu, 0.0, 0.0)),
            ],
            src_zp: None,
            dst_zp: None,
            oscale: OutputScale::Common(0.25),
        };
        let p = Problem::new_2d(
            Direction::FwdInference,
            Alg::Direct,
            CfgSet::all_f32(),
            2,
            1,
            3,
            3,
            (5, 5),
            (3, 3),
            (1, 1),
            (1, 1),
        )
        .with_attr(attr);
        assert_ref_matches_cpu(&p);
    }
}
