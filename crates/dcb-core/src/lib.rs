//! Core problem model for the deconvolution differential test harness.
//!
//! `dcb-core` provides the immutable case description (`Problem`), the
//! attribute bundle (post-ops, zero points, output scales), per-role fill
//! configurations, the case result state machine, canonical test buffers
//! with dtype reorder, and the backend traits that the primitive under
//! test plugs into.

pub mod attr;
pub mod backend;
pub mod cfg;
pub mod memory;
pub mod problem;
pub mod result;
pub mod types;

pub use attr::{Attr, Eltwise, EltwiseKind, OutputScale, PostOp, SumPostOp};
pub use backend::{Backend, EngineKind, ExecArg, ExecArgs, Primitive};
pub use cfg::{CfgSet, FillConfig};
pub use memory::TestBuffer;
pub use problem::{Alg, DataKind, Direction, Problem};
pub use result::{CaseResult, CaseState, CompareDiag, SkipReason};
pub use types::DType;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(thiserror::Error, Debug)]
pub enum HarnessError {
    /// The backend has no implementation for this case. Not a failure:
    /// the driver records the case as unimplemented and moves on.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Data pipeline failure during fill/reorder. Fatal for the case and
    /// distinct from a correctness mismatch of the primitive under test.
    #[error("fill pipeline failure: {0}")]
    FillMismatch(String),

    #[error("reorder failed: {0}")]
    Reorder(String),

    #[error("primitive construction failed: {0}")]
    Build(String),

    #[error("execution failed: {0}")]
    Execute(String),

    #[error("invalid problem: {0}")]
    InvalidProblem(String),

    #[error("missing argument binding: {0:?}")]
    MissingArg(backend::ExecArg),
}
