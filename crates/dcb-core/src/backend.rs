//! Backend traits — the seam between the harness and the primitive
//! implementation under test.
//!
//! A `Backend` constructs a `Primitive` for a problem; the harness binds
//! buffers to named argument slots and calls `execute`, which blocks
//! until completion. The harness itself never allocates inside these
//! traits: it only binds buffers it already owns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attr::SumPostOp;
use crate::memory::TestBuffer;
use crate::problem::Problem;
use crate::types::DType;
use crate::Result;

/// Which engine a backend (or buffer) lives on. Drives fill, skip, and
/// tolerance policy branches only; there is no real device in this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineKind {
    Host,
    Accel,
}

/// Named argument slots for primitive execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecArg {
    Src,
    Wei,
    Bia,
    Dst,
    DiffSrc,
    DiffWei,
    DiffBia,
    DiffDst,
    Scratchpad,
    SrcZeroPoints,
    DstZeroPoints,
    OutputScales,
}

/// Argument bindings for one execution. Owns nothing permanently — the
/// orchestrator inserts buffers for the call and takes them back after.
#[derive(Debug, Default)]
pub struct ExecArgs {
    slots: HashMap<ExecArg, TestBuffer>,
}

impl ExecArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, arg: ExecArg, buf: TestBuffer) {
        self.slots.insert(arg, buf);
    }

    pub fn get(&self, arg: ExecArg) -> Option<&TestBuffer> {
        self.slots.get(&arg)
    }

    pub fn get_mut(&mut self, arg: ExecArg) -> Option<&mut TestBuffer> {
        self.slots.get_mut(&arg)
    }

    pub fn require(&self, arg: ExecArg) -> Result<&TestBuffer> {
        self.slots
            .get(&arg)
            .ok_or(crate::HarnessError::MissingArg(arg))
    }

    pub fn take(&mut self, arg: ExecArg) -> Option<TestBuffer> {
        self.slots.remove(&arg)
    }

    pub fn contains(&self, arg: ExecArg) -> bool {
        self.slots.contains_key(&arg)
    }
}

/// A constructed primitive, ready to execute.
pub trait Primitive {
    /// Implementation name, e.g. `"direct:f64"`. Names starting with
    /// `"ref"` denote the generic fallback implementation.
    fn impl_name(&self) -> &str;

    /// The accumulation dtype the implementation will actually use.
    fn acc_dtype(&self) -> DType;

    /// Scratch working-set size the implementation requires.
    fn scratchpad_bytes(&self) -> usize;

    /// Execute synchronously; returns once the outputs are written.
    fn execute(&self, args: &mut ExecArgs) -> Result<()>;
}

/// A primitive construction interface plus capability introspection.
pub trait Backend: Send + Sync {
    fn engine(&self) -> EngineKind;

    /// Whether the dtype combination of the problem is implemented.
    fn supports_dtypes(&self, prb: &Problem) -> bool;

    /// Whether a sum post-op with the given declaration is implemented.
    fn supports_sum(&self, sum: &SumPostOp) -> bool;

    /// True when the fused dot-product path accepts signed inputs on both
    /// operands (no sign-compensation transform needed for s8×s8).
    fn signed_input_dot_product(&self) -> bool;

    /// Build a primitive. `HarnessError::Unimplemented` is a policy
    /// outcome, not a failure.
    fn build(&self, prb: &Problem) -> Result<Box<dyn Primitive>>;
}
