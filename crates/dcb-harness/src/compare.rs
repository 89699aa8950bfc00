//! Tolerance model and output comparison.

use dcb_core::problem::{Alg, DataKind, Problem};
use dcb_core::types::DType;
use dcb_core::{CaseResult, CompareDiag, HarnessError, Result, TestBuffer};

/// Per-kind comparison policy derived from the problem context.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompareConfig {
    pub threshold: f32,
    /// Fraction of elements allowed to be exactly zero in the reference,
    /// in percent.
    pub zero_trust_percent: f32,
    /// Aggregate relative-norm validation instead of elementwise.
    pub norm_mode: bool,
}

/// Derive the comparison policy for one checked data kind.
pub fn setup_compare(prb: &Problem, kind: DataKind) -> CompareConfig {
    let norm_mode = prb.alg == Alg::Wino;

    let mut threshold = prb.cfg.get(kind).eps;
    if prb.alg == Alg::Wino && prb.dir.is_bwd_w() {
        // Empirical equation modelling error growth with the contraction
        // dimension of the transform's internal gemm. Preserved exactly;
        // it has no derivation and must not be extended to other
        // algorithms.
        let log_const = (0.125 * prb.mb as f32 * prb.oh as f32 * prb.ow as f32).log10();
        threshold *= 1.0f32.max(10.0f32.powf(0.4 * log_const));
    }

    let zero_trust_percent =
        ((1.0 - non_zero_trust(prb, kind)) * 100.0).clamp(0.0, 100.0);

    CompareConfig {
        threshold,
        zero_trust_percent,
        norm_mode,
    }
}

/// Expected fraction of non-zero elements for a data kind.
pub fn non_zero_trust(prb: &Problem, kind: DataKind) -> f32 {
    let trust = 0.3f32;
    match kind {
        DataKind::Src => trust / (prb.sd * prb.sh * prb.sw) as f32,
        DataKind::Wei => {
            let kvol = prb.kd * prb.kh * prb.kw;
            let ivol = prb.id * prb.ih * prb.iw;
            let ovol = prb.od * prb.oh * prb.ow;
            let overlap = kvol as f32 / kvol.min(ivol).min(ovol) as f32;
            trust / overlap
        }
        DataKind::Bia => 0.8 * prb.cfg.dst.sparsity,
        DataKind::Dst => trust / (1.0 + zeroing_condition_count(prb) as f32),
        DataKind::Acc => {
            debug_assert!(false, "accumulator outputs are never compared");
            trust
        }
    }
}

/// How many independent conditions can legitimately zero destination
/// elements: zero-clamping post-ops, an unsigned 8-bit destination, and
/// physically padded output area beyond the input extent.
fn zeroing_condition_count(prb: &Problem) -> usize {
    let mut count = prb.attr.zeroing_post_op_count();
    count += usize::from(prb.cfg.dst.dt == DType::U8);
    count += usize::from(prb.od > prb.id || prb.oh > prb.ih || prb.ow > prb.iw);
    count
}

/// Judge device output against the reference for one kind.
///
/// The verdict lands in `res` (pass cannot overwrite an earlier fail);
/// an `Err` is reserved for shape disagreements, which are pipeline
/// errors rather than mismatches.
pub fn compare(
    cfg: &CompareConfig,
    kind: DataKind,
    ref_buf: &TestBuffer,
    got_buf: &TestBuffer,
    res: &mut CaseResult,
) -> Result<()> {
    if ref_buf.nelems() != got_buf.nelems() {
        return Err(HarnessError::Execute(format!(
            "{kind:?}: reference has {} elements, output has {}",
            ref_buf.nelems(),
            got_buf.nelems()
        )));
    }
    let n = ref_buf.nelems();
    if n == 0 {
        return Ok(());
    }

    let mut zeros = 0usize;
    for &r in ref_buf.as_slice() {
        if r == 0.0 {
            zeros += 1;
        }
    }
    let zero_percent = 100.0 * zeros as f32 / n as f32;
    // Tiny tensors are all noise for this statistic.
    let zeros_ok = n < 10 || zero_percent <= cfg.zero_trust_percent;

    let (value_ok, max_rel_err, mismatches) = if cfg.norm_mode {
        let mut diff2 = 0.0f64;
        let mut ref2 = 0.0f64;
        for (&r, &g) in ref_buf.as_slice().iter().zip(got_buf.as_slice()) {
            let d = (r - g) as f64;
            diff2 += d * d;
            ref2 += (r as f64) * (r as f64);
        }
        let rel = if ref2 == 0.0 {
            if diff2 == 0.0 {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            diff2.sqrt() / ref2.sqrt()
        };
        (rel <= cfg.threshold as f64, rel as f32, 0)
    } else {
        let mut mismatches = 0usize;
        let mut max_rel = 0.0f32;
        for (&r, &g) in ref_buf.as_slice().iter().zip(got_buf.as_slice()) {
            let diff = (r - g).abs();
            let err = if r.abs() > 1e-5 { diff / r.abs() } else { diff };
            max_rel = max_rel.max(err);
            if err > cfg.threshold {
                mismatches += 1;
            }
        }
        (mismatches == 0, max_rel, mismatches)
    };

    let passed = value_ok && zeros_ok;
    let diag = CompareDiag {
        threshold: cfg.threshold,
        max_rel_err,
        mismatches,
        zero_percent,
        norm_mode: cfg.norm_mode,
    };
    if !passed {
        tracing::debug!(
            ?kind,
            threshold = cfg.threshold,
            max_rel_err,
            mismatches,
            zero_percent,
            zero_trust_percent = cfg.zero_trust_percent,
            "comparison failed"
        );
    }
    res.conclude(passed, diag);
    Ok(())
}
