//! Numeric type enumeration and representable-value rounding.

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// Supported tensor element types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F16,
    BF16,
    S32,
    S8,
    U8,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 | DType::S32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::S8 | DType::U8 => 1,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(self, DType::S32 | DType::S8 | DType::U8)
    }

    /// Smallest representable value (used for saturation on reorder).
    pub fn lowest(self) -> f32 {
        match self {
            DType::F32 => f32::MIN,
            DType::F16 => f16::MIN.to_f32(),
            DType::BF16 => bf16::MIN.to_f32(),
            DType::S32 => i32::MIN as f32,
            DType::S8 => i8::MIN as f32,
            DType::U8 => 0.0,
        }
    }

    /// Largest representable value.
    pub fn max_value(self) -> f32 {
        match self {
            DType::F32 => f32::MAX,
            DType::F16 => f16::MAX.to_f32(),
            DType::BF16 => bf16::MAX.to_f32(),
            DType::S32 => i32::MAX as f32,
            DType::S8 => i8::MAX as f32,
            DType::U8 => u8::MAX as f32,
        }
    }

    /// Base comparison epsilon for outputs of this type.
    ///
    /// Integer outputs must match exactly once rounded; float thresholds
    /// track the mantissa width.
    pub fn epsilon(self) -> f32 {
        match self {
            DType::F32 => 1e-6,
            DType::F16 => 1e-3,
            DType::BF16 => 1e-2,
            DType::S32 | DType::S8 | DType::U8 => 0.0,
        }
    }

    /// Round a wide value to the nearest representable value of this type,
    /// saturating integers at their bounds.
    pub fn round(self, v: f32) -> f32 {
        match self {
            DType::F32 => v,
            DType::F16 => f16::from_f32(v).to_f32(),
            DType::BF16 => bf16::from_f32(v).to_f32(),
            DType::S32 | DType::S8 | DType::U8 => {
                // round-to-nearest-even, then saturate
                let r = v.round_ties_even();
                r.clamp(self.lowest(), self.max_value())
            }
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
            DType::S32 => write!(f, "s32"),
            DType::S8 => write!(f, "s8"),
            DType::U8 => write!(f, "u8"),
        }
    }
}

/// Logical memory layout tag.
///
/// Layout conversion is an external collaborator's concern; buffers in this
/// harness are canonically dense. The tag is carried for descriptor
/// fidelity (the reference runner forces plain tags on its copy).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    /// Plain dense layout, batch/channels outermost.
    Abx,
    /// Channels-last layout.
    Axb,
    /// Let the backend choose.
    Any,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_f16_collapses_low_bits() {
        let v = 1.0009765f32; // between f16 grid points
        let r = DType::F16.round(v);
        assert_eq!(r, f16::from_f32(v).to_f32());
        assert_ne!(r, v);
    }

    #[test]
    fn test_round_int_saturates() {
        assert_eq!(DType::S8.round(300.0), 127.0);
        assert_eq!(DType::S8.round(-300.0), -128.0);
        assert_eq!(DType::U8.round(-3.0), 0.0);
        assert_eq!(DType::U8.round(255.4), 255.0);
    }

    #[test]
    fn test_round_int_ties_even() {
        assert_eq!(DType::S32.round(2.5), 2.0);
        assert_eq!(DType::S32.round(3.5), 4.0);
    }

    #[test]
    fn test_f32_round_is_identity() {
        for v in [0.0f32, -1.5, 1e-30, f32::MAX] {
            assert_eq!(DType::F32.round(v).to_bits(), v.to_bits());
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_round_is_idempotent(v in -1e7f32..1e7f32) {
            for dt in [
                DType::F32,
                DType::F16,
                DType::BF16,
                DType::S32,
                DType::S8,
                DType::U8,
            ] {
                let r = dt.round(v);
                proptest::prop_assert_eq!(dt.round(r).to_bits(), r.to_bits());
            }
        }

        #[test]
        fn prop_int_round_stays_in_bounds(v in -1e9f32..1e9f32) {
            for dt in [DType::S32, DType::S8, DType::U8] {
                let r = dt.round(v);
                proptest::prop_assert!(r >= dt.lowest() && r <= dt.max_value());
                proptest::prop_assert_eq!(r.fract(), 0.0);
            }
        }
    }
}
