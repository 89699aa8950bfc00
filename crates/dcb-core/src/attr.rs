//! Attribute bundle: fused post-ops, zero points, output scales.
//!
//! The harness only inspects attributes to pick fill and comparison
//! policy; applying them is the primitive's job.

use serde::{Deserialize, Serialize};

use crate::types::DType;

/// Elementwise activation kinds that may be fused after the main compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EltwiseKind {
    Relu,
    Elu,
    Clip,
    ClipV2,
    Abs,
    BoundedRelu,
    Linear,
    Tanh,
}

impl EltwiseKind {
    /// Kinds that never produce negative output regardless of parameters.
    pub fn is_non_negative(self) -> bool {
        matches!(self, EltwiseKind::Abs | EltwiseKind::BoundedRelu)
    }

    /// Kinds that clamp negatives to zero when alpha is zero.
    pub fn zeroes_negatives_at_alpha_zero(self) -> bool {
        matches!(
            self,
            EltwiseKind::Clip | EltwiseKind::ClipV2 | EltwiseKind::Elu | EltwiseKind::Relu
        )
    }
}

/// A fused elementwise post-op.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Eltwise {
    pub kind: EltwiseKind,
    pub alpha: f32,
    pub beta: f32,
    pub scale: f32,
}

impl Eltwise {
    pub fn new(kind: EltwiseKind, alpha: f32, beta: f32) -> Self {
        Self {
            kind,
            alpha,
            beta,
            scale: 1.0,
        }
    }

    pub fn apply(&self, v: f32) -> f32 {
        let r = match self.kind {
            EltwiseKind::Relu => {
                if v >= 0.0 {
                    v
                } else {
                    self.alpha * v
                }
            }
            EltwiseKind::Elu => {
                if v >= 0.0 {
                    v
                } else {
                    self.alpha * (v.exp() - 1.0)
                }
            }
            EltwiseKind::Clip | EltwiseKind::ClipV2 => v.clamp(self.alpha, self.beta),
            EltwiseKind::Abs => v.abs(),
            EltwiseKind::BoundedRelu => v.clamp(0.0, self.alpha),
            EltwiseKind::Linear => self.alpha * v + self.beta,
            EltwiseKind::Tanh => v.tanh(),
        };
        self.scale * r
    }
}

/// A fused sum (accumulate into the previous destination contents).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SumPostOp {
    pub scale: f32,
    /// Accumulation dtype when it differs from the destination dtype.
    pub dt: Option<DType>,
}

/// One entry of the ordered post-op chain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PostOp {
    Eltwise(Eltwise),
    Sum(SumPostOp),
}

/// Output scaling policy.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub enum OutputScale {
    #[default]
    None,
    /// One scale for every output channel.
    Common(f32),
    /// One scale per output channel.
    PerChannel(Vec<f32>),
    /// Scale supplied at execution time rather than build time. The value
    /// here is what the harness will bind to the runtime argument slot;
    /// the descriptor itself only declares "runtime".
    Runtime(f32),
}

impl OutputScale {
    pub fn is_runtime(&self) -> bool {
        matches!(self, OutputScale::Runtime(_))
    }

    /// The value to bind at execution time, when declared runtime.
    pub fn runtime_value(&self) -> Option<f32> {
        match self {
            OutputScale::Runtime(v) => Some(*v),
            _ => None,
        }
    }

    /// Build-time scale for output channel `oc`; 1.0 when the scale is
    /// unknown until execution or absent.
    pub fn at(&self, oc: usize) -> f32 {
        match self {
            OutputScale::None | OutputScale::Runtime(_) => 1.0,
            OutputScale::Common(s) => *s,
            OutputScale::PerChannel(v) => v.get(oc).copied().unwrap_or(1.0),
        }
    }
}

/// The full attribute bundle attached to a problem.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attr {
    pub post_ops: Vec<PostOp>,
    /// Common zero point applied to quantized source values.
    pub src_zp: Option<i32>,
    /// Common zero point applied to quantized destination values.
    pub dst_zp: Option<i32>,
    pub oscale: OutputScale,
}

impl Attr {
    pub fn is_default(&self) -> bool {
        self.post_ops.is_empty()
            && self.src_zp.is_none()
            && self.dst_zp.is_none()
            && self.oscale == OutputScale::None
    }

    /// First sum post-op in the chain, if any.
    pub fn find_sum(&self) -> Option<&SumPostOp> {
        self.post_ops.iter().find_map(|po| match po {
            PostOp::Sum(s) => Some(s),
            PostOp::Eltwise(_) => None,
        })
    }

    /// Number of independent post-op conditions that provably map negative
    /// values to zero. Feeds the destination zero-trust policy.
    pub fn zeroing_post_op_count(&self) -> usize {
        self.post_ops
            .iter()
            .filter(|po| match po {
                PostOp::Eltwise(e) => {
                    e.kind.is_non_negative()
                        || (e.kind.zeroes_negatives_at_alpha_zero() && e.alpha == 0.0)
                }
                PostOp::Sum(_) => false,
            })
            .count()
    }

    /// Copy suitable for the wide-type reference problem: the sum post-op
    /// accumulates in the reference dtype instead of its declared narrow
    /// one. Zero points and scales are kept — the wide fill data is
    /// generated with them applied, so the reference must honor them too.
    pub fn for_reference(&self) -> Attr {
        Attr {
            post_ops: self
                .post_ops
                .iter()
                .map(|po| match po {
                    PostOp::Sum(s) => PostOp::Sum(SumPostOp {
                        scale: s.scale,
                        dt: None,
                    }),
                    other => *other,
                })
                .collect(),
            src_zp: self.src_zp,
            dst_zp: self.dst_zp,
            oscale: self.oscale.clone(),
        }
    }
}
