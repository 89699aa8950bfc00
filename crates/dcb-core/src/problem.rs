//! The immutable description of one test case.

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::attr::Attr;
use crate::cfg::CfgSet;
use crate::types::{DType, Tag};

pub type Dims = SmallVec<[i64; 8]>;

/// Which mathematical pass is under test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    FwdInference,
    FwdTraining,
    /// Forward training with a bias operand.
    FwdBias,
    BwdData,
    BwdWeights,
    BwdWeightsBias,
}

impl Direction {
    pub fn is_fwd(self) -> bool {
        matches!(
            self,
            Direction::FwdInference | Direction::FwdTraining | Direction::FwdBias
        )
    }

    pub fn is_bwd_d(self) -> bool {
        self == Direction::BwdData
    }

    pub fn is_bwd_w(self) -> bool {
        matches!(self, Direction::BwdWeights | Direction::BwdWeightsBias)
    }

    pub fn with_bias(self) -> bool {
        matches!(self, Direction::FwdBias | Direction::BwdWeightsBias)
    }
}

/// Algorithmic variant of the deconvolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alg {
    Direct,
    Wino,
}

/// Tensor role within a problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Src,
    Wei,
    Bia,
    Dst,
    Acc,
}

/// A single deconvolution test case.
///
/// Spatial parameters are always stored in 3D form; lower-rank problems
/// set the leading depth parameters to their neutral values (extent 1,
/// stride 1, dilation 0, padding 0).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub mb: i64,
    pub g: i64,
    pub ic: i64,
    pub oc: i64,

    pub id: i64,
    pub ih: i64,
    pub iw: i64,
    pub od: i64,
    pub oh: i64,
    pub ow: i64,

    pub kd: i64,
    pub kh: i64,
    pub kw: i64,
    pub sd: i64,
    pub sh: i64,
    pub sw: i64,
    pub pd: i64,
    pub ph: i64,
    pub pw: i64,
    pub dd: i64,
    pub dh: i64,
    pub dw: i64,

    pub dir: Direction,
    pub alg: Alg,
    pub cfg: CfgSet,
    pub attr: Attr,

    pub stag: Tag,
    pub wtag: Tag,
    pub dtag: Tag,
}

impl Problem {
    /// A 2D problem with computed output extents (right padding equal to
    /// left padding) and default tags.
    #[allow(clippy::too_many_arguments)]
    pub fn new_2d(
        dir: Direction,
        alg: Alg,
        cfg: CfgSet,
        mb: i64,
        g: i64,
        ic: i64,
        oc: i64,
        (ih, iw): (i64, i64),
        (kh, kw): (i64, i64),
        (sh, sw): (i64, i64),
        (ph, pw): (i64, i64),
    ) -> Self {
        let mut p = Problem {
            mb,
            g,
            ic,
            oc,
            id: 1,
            ih,
            iw,
            od: 1,
            oh: 0,
            ow: 0,
            kd: 1,
            kh,
            kw,
            sd: 1,
            sh,
            sw,
            pd: 0,
            ph,
            pw,
            dd: 0,
            dh: 0,
            dw: 0,
            dir,
            alg,
            cfg,
            attr: Attr::default(),
            stag: Tag::Abx,
            wtag: Tag::Abx,
            dtag: Tag::Abx,
        };
        p.oh = deconv_out_extent(p.ih, p.kh, p.sh, p.ph, p.dh);
        p.ow = deconv_out_extent(p.iw, p.kw, p.sw, p.pw, p.dw);
        p
    }

    pub fn with_attr(mut self, attr: Attr) -> Self {
        self.attr = attr;
        self
    }

    pub fn has_groups(&self) -> bool {
        self.g > 1
    }

    pub fn acc_dt(&self) -> DType {
        self.cfg.acc.dt
    }

    // ── Dimension vectors ───────────────────────────────────────────────

    pub fn src_dims(&self) -> Dims {
        smallvec![self.mb, self.ic, self.id, self.ih, self.iw]
    }

    /// Weight dims carry a leading groups axis when grouped.
    pub fn wei_dims(&self) -> Dims {
        let (ocg, icg) = (self.oc / self.g, self.ic / self.g);
        if self.has_groups() {
            smallvec![self.g, ocg, icg, self.kd, self.kh, self.kw]
        } else {
            smallvec![ocg, icg, self.kd, self.kh, self.kw]
        }
    }

    pub fn bia_dims(&self) -> Dims {
        smallvec![self.oc]
    }

    pub fn dst_dims(&self) -> Dims {
        smallvec![self.mb, self.oc, self.od, self.oh, self.ow]
    }

    pub fn strides(&self) -> Dims {
        smallvec![self.sd, self.sh, self.sw]
    }

    pub fn dilations(&self) -> Dims {
        smallvec![self.dd, self.dh, self.dw]
    }

    pub fn padding(&self) -> Dims {
        smallvec![self.pd, self.ph, self.pw]
    }

    // ── Dense offsets (canonical layout) ────────────────────────────────

    pub fn src_off(&self, mb: i64, ic: i64, id: i64, ih: i64, iw: i64) -> usize {
        ((((mb * self.ic + ic) * self.id + id) * self.ih + ih) * self.iw + iw) as usize
    }

    /// Offset into the weights with deconvolution channel order
    /// (per-group output channel outermost).
    pub fn wei_off(&self, g: i64, oc: i64, ic: i64, kd: i64, kh: i64, kw: i64) -> usize {
        let (ocg, icg) = (self.oc / self.g, self.ic / self.g);
        let ch = (g * ocg + oc) * icg + ic;
        (((ch * self.kd + kd) * self.kh + kh) * self.kw + kw) as usize
    }

    pub fn dst_off(&self, mb: i64, oc: i64, od: i64, oh: i64, ow: i64) -> usize {
        ((((mb * self.oc + oc) * self.od + od) * self.oh + oh) * self.ow + ow) as usize
    }

    // ── Validation and reduction ────────────────────────────────────────

    pub fn validate(&self) -> crate::Result<()> {
        let positive = [
            self.mb, self.g, self.ic, self.oc, self.id, self.ih, self.iw, self.od, self.oh,
            self.ow, self.kd, self.kh, self.kw, self.sd, self.sh, self.sw,
        ];
        if positive.iter().any(|&d| d <= 0) {
            return Err(crate::HarnessError::InvalidProblem(
                "all extents and strides must be positive".into(),
            ));
        }
        if self.ic % self.g != 0 || self.oc % self.g != 0 {
            return Err(crate::HarnessError::InvalidProblem(format!(
                "channels (ic={}, oc={}) not divisible by groups {}",
                self.ic, self.oc, self.g
            )));
        }
        for ((i, k, s, p, d), o) in [
            ((self.id, self.kd, self.sd, self.pd, self.dd), self.od),
            ((self.ih, self.kh, self.sh, self.ph, self.dh), self.oh),
            ((self.iw, self.kw, self.sw, self.pw, self.dw), self.ow),
        ] {
            if deconv_out_extent(i, k, s, p, d) != o {
                return Err(crate::HarnessError::InvalidProblem(format!(
                    "output extent {o} inconsistent with input {i}, kernel {k}, \
                     stride {s}, pad {p}, dilation {d}"
                )));
            }
        }
        self.cfg
            .validate()
            .map_err(crate::HarnessError::InvalidProblem)
    }

    /// The reduced copy the reference runner instantiates: direct
    /// algorithm, wide float configs, plain layouts, sum accumulation
    /// widened to f32. Shapes, direction, and quantization offsets are
    /// preserved.
    pub fn for_reference(&self) -> Problem {
        let mut p = self.clone();
        p.alg = Alg::Direct;
        p.cfg = CfgSet::all_f32();
        p.attr = self.attr.for_reference();
        p.stag = Tag::Abx;
        p.wtag = Tag::Abx;
        p.dtag = Tag::Abx;
        p
    }
}

/// Deconvolution output extent with symmetric padding.
pub fn deconv_out_extent(i: i64, k: i64, s: i64, p: i64, d: i64) -> i64 {
    s * (i - 1) + (k - 1) * (d + 1) + 1 - 2 * p
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mb{}g{}ic{}ih{}iw{}oc{}oh{}ow{}kh{}kw{}sh{}sw{}ph{}pw{} {:?} {:?}",
            self.mb,
            self.g,
            self.ic,
            self.ih,
            self.iw,
            self.oc,
            self.oh,
            self.ow,
            self.kh,
            self.kw,
            self.sh,
            self.sw,
            self.ph,
            self.pw,
            self.alg,
            self.dir
        )
    }
}
