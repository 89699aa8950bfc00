//! Shared test doubles.

// not every suite uses every helper
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dcb_core::backend::{Backend, EngineKind, ExecArgs, Primitive};
use dcb_core::problem::Problem;
use dcb_core::types::DType;
use dcb_core::{HarnessError, Result, SumPostOp};
use dcb_cpu::CpuBackend;

/// Accelerator stand-in: host maths behind an accelerator engine tag,
/// with build and execute counters so tests can prove which pipeline
/// stages ran.
pub struct AccelDouble {
    pub fail_builds: bool,
    pub builds: AtomicUsize,
    pub executes: Arc<AtomicUsize>,
}

impl AccelDouble {
    pub fn new() -> Self {
        Self {
            fail_builds: false,
            builds: AtomicUsize::new(0),
            executes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unbuildable() -> Self {
        Self {
            fail_builds: true,
            ..Self::new()
        }
    }
}

impl Backend for AccelDouble {
    fn engine(&self) -> EngineKind {
        EngineKind::Accel
    }

    fn supports_dtypes(&self, prb: &Problem) -> bool {
        CpuBackend.supports_dtypes(prb)
    }

    fn supports_sum(&self, sum: &SumPostOp) -> bool {
        CpuBackend.supports_sum(sum)
    }

    fn signed_input_dot_product(&self) -> bool {
        false
    }

    fn build(&self, prb: &Problem) -> Result<Box<dyn Primitive>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_builds {
            return Err(HarnessError::Unimplemented(
                "no accelerator kernel for this case".into(),
            ));
        }
        let inner = CpuBackend.build(prb)?;
        Ok(Box::new(CountedPrim {
            inner,
            executes: Arc::clone(&self.executes),
        }))
    }
}

struct CountedPrim {
    inner: Box<dyn Primitive>,
    executes: Arc<AtomicUsize>,
}

impl Primitive for CountedPrim {
    fn impl_name(&self) -> &str {
        "accel:double"
    }

    fn acc_dtype(&self) -> DType {
        self.inner.acc_dtype()
    }

    fn scratchpad_bytes(&self) -> usize {
        self.inner.scratchpad_bytes()
    }

    fn execute(&self, args: &mut ExecArgs) -> Result<()> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(args)
    }
}
