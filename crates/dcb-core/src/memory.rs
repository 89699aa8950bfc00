//! Canonical test buffers and dtype reorder.
//!
//! Buffers carry a dense f32 payload whose values are always on the
//! representable grid of the buffer's dtype. Reordering between buffers
//! is therefore a pure per-element rounding/saturation, which is exactly
//! what the round-trip validation in the filler needs to observe.

use smallvec::SmallVec;

use crate::backend::EngineKind;
use crate::types::DType;
use crate::{HarnessError, Result};

/// A logical tensor buffer owned by the harness.
#[derive(Clone, Debug)]
pub struct TestBuffer {
    dims: SmallVec<[i64; 8]>,
    dt: DType,
    engine: EngineKind,
    data: Vec<f32>,
}

impl TestBuffer {
    /// Allocate a zero-filled buffer.
    pub fn new(dims: &[i64], dt: DType, engine: EngineKind) -> Self {
        let nelems: i64 = dims.iter().product();
        Self {
            dims: SmallVec::from_slice(dims),
            dt,
            engine,
            data: vec![0.0; nelems.max(0) as usize],
        }
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn dt(&self) -> DType {
        self.dt
    }

    /// Retag the buffer's dtype without touching the payload.
    ///
    /// Used by the destination fill when a sum post-op declares its own
    /// accumulation dtype; the caller restores the logical dtype after.
    pub fn set_dt(&mut self, dt: DType) {
        self.dt = dt;
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn nelems(&self) -> usize {
        self.data.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len() * self.dt.size_bytes()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn get(&self, off: usize) -> f32 {
        self.data[off]
    }

    pub fn set(&mut self, off: usize, v: f32) {
        self.data[off] = v;
    }

    /// Convert `src` into this buffer's dtype.
    ///
    /// Dims must agree; values are rounded/saturated onto this buffer's
    /// representable grid.
    pub fn reorder(&mut self, src: &TestBuffer) -> Result<()> {
        if self.dims != src.dims {
            return Err(HarnessError::Reorder(format!(
                "dims mismatch: {:?} vs {:?}",
                self.dims, src.dims
            )));
        }
        let dt = self.dt;
        for (d, s) in self.data.iter_mut().zip(src.data.iter()) {
            *d = dt.round(*s);
        }
        Ok(())
    }

    /// Bitwise payload comparison (the round-trip validation contract).
    pub fn bytes_eq(&self, other: &TestBuffer) -> bool {
        self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}
