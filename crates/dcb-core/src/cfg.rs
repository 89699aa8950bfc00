//! Per-role fill configurations and the built-in dtype config table.

use serde::{Deserialize, Serialize};

use crate::problem::DataKind;
use crate::types::DType;

/// Statistical controls for one role's synthesized data.
///
/// Every generated value, after rounding to `dt`, lies in `[min, max]`.
/// `sparsity` is the fraction of elements that take a perturbed value;
/// the rest are pinned to `base`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FillConfig {
    pub dt: DType,
    pub min: i32,
    pub max: i32,
    pub base: i32,
    pub step: i32,
    pub sparsity: f32,
    /// Base comparison epsilon for this role.
    pub eps: f32,
}

impl FillConfig {
    pub fn new(kind: DataKind, dt: DType) -> Self {
        let (min, max) = match (kind, dt) {
            (_, DType::S8) => (-4, 4),
            (_, DType::U8) => (0, 8),
            (DataKind::Bia, _) => (-8, 8),
            (_, DType::F16 | DType::BF16) => (-4, 4),
            _ => (-32, 32),
        };
        let sparsity = match kind {
            DataKind::Wei => 0.5,
            _ => 0.25,
        };
        Self {
            dt,
            min,
            max,
            base: 0,
            step: 1,
            sparsity,
            eps: dt.epsilon(),
        }
    }

    pub fn range(&self) -> i64 {
        (self.max - self.min + 1) as i64
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max < self.min {
            return Err(format!("max {} < min {}", self.max, self.min));
        }
        if !(0.0..=1.0).contains(&self.sparsity) {
            return Err(format!("sparsity {} outside [0,1]", self.sparsity));
        }
        let lo = self.dt.round(self.min as f32);
        let hi = self.dt.round(self.max as f32);
        if lo < self.dt.lowest() || hi > self.dt.max_value() {
            return Err(format!("[{},{}] not representable in {}", self.min, self.max, self.dt));
        }
        Ok(())
    }
}

/// The full per-role configuration of a problem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CfgSet {
    pub src: FillConfig,
    pub wei: FillConfig,
    pub bia: FillConfig,
    pub dst: FillConfig,
    /// Only the dtype of the accumulator entry is meaningful.
    pub acc: FillConfig,
}

impl CfgSet {
    pub fn from_dts(src: DType, wei: DType, dst: DType, acc: DType) -> Self {
        Self {
            src: FillConfig::new(DataKind::Src, src),
            wei: FillConfig::new(DataKind::Wei, wei),
            bia: FillConfig::new(DataKind::Bia, if acc.is_int() { DType::F32 } else { acc }),
            dst: FillConfig::new(DataKind::Dst, dst),
            acc: FillConfig::new(DataKind::Dst, acc),
        }
    }

    /// All-f32 configuration, the reference-friendly reduction.
    pub fn all_f32() -> Self {
        Self::from_dts(DType::F32, DType::F32, DType::F32, DType::F32)
    }

    pub fn f16() -> Self {
        Self::from_dts(DType::F16, DType::F16, DType::F16, DType::F32)
    }

    pub fn bf16() -> Self {
        Self::from_dts(DType::BF16, DType::BF16, DType::BF16, DType::F32)
    }

    /// Quantized u8 source, s8 weights, s8 destination.
    pub fn u8s8s8() -> Self {
        Self::from_dts(DType::U8, DType::S8, DType::S8, DType::S32)
    }

    /// Quantized u8 source, s8 weights, u8 destination.
    pub fn u8s8u8() -> Self {
        Self::from_dts(DType::U8, DType::S8, DType::U8, DType::S32)
    }

    /// Symmetric s8 source and weights, f32 destination.
    pub fn s8s8f32() -> Self {
        Self::from_dts(DType::S8, DType::S8, DType::F32, DType::S32)
    }

    pub fn get(&self, kind: DataKind) -> &FillConfig {
        match kind {
            DataKind::Src => &self.src,
            DataKind::Wei => &self.wei,
            DataKind::Bia => &self.bia,
            DataKind::Dst => &self.dst,
            DataKind::Acc => &self.acc,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, c) in [
            ("src", &self.src),
            ("wei", &self.wei),
            ("bia", &self.bia),
            ("dst", &self.dst),
        ] {
            c.validate().map_err(|e| format!("{name}: {e}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_fit_dtype() {
        for cfg in [
            CfgSet::all_f32(),
            CfgSet::f16(),
            CfgSet::bf16(),
            CfgSet::u8s8s8(),
            CfgSet::u8s8u8(),
            CfgSet::s8s8f32(),
        ] {
            cfg.validate().unwrap();
            for kind in [DataKind::Src, DataKind::Wei, DataKind::Dst] {
                let c = cfg.get(kind);
                assert_eq!(c.dt.round(c.min as f32), c.min as f32);
                assert_eq!(c.dt.round(c.max as f32), c.max as f32);
            }
        }
    }

    #[test]
    fn test_invalid_sparsity_rejected() {
        let mut c = FillConfig::new(DataKind::Src, DType::F32);
        c.sparsity = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_u8_range_non_negative() {
        let c = CfgSet::u8s8u8();
        assert!(c.dst.min >= 0);
        assert_eq!(c.acc.dt, DType::S32);
    }
}
