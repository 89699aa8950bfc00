//! Performance measurement pass.
//!
//! Re-executes an already-validated primitive against the same bindings
//! and records per-iteration wall time. Stops at whichever comes first
//! of the iteration cap and the time budget, after a minimum number of
//! iterations so the minimum is not a single cold-start sample.

use std::time::{Duration, Instant};

use dcb_core::backend::Primitive;
use dcb_core::problem::Problem;
use dcb_core::result::PerfReport;
use dcb_core::Result;

use crate::orchestrate::{execute_case, CaseBuffers};

#[derive(Clone, Copy, Debug)]
pub struct PerfConfig {
    pub max_iters: u32,
    pub min_iters: u32,
    pub max_total: Duration,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            max_iters: 100,
            min_iters: 5,
            max_total: Duration::from_secs(3),
        }
    }
}

pub fn measure(
    prim: &dyn Primitive,
    prb: &Problem,
    bufs: &mut CaseBuffers,
    cfg: &PerfConfig,
) -> Result<PerfReport> {
    let mut iters = 0u32;
    let mut min_ns = u64::MAX;
    let mut total_ns = 0u64;
    let started = Instant::now();

    while iters < cfg.max_iters {
        let t0 = Instant::now();
        execute_case(prim, prb, bufs)?;
        let ns = t0.elapsed().as_nanos() as u64;
        iters += 1;
        min_ns = min_ns.min(ns);
        total_ns += ns;
        if iters >= cfg.min_iters && started.elapsed() >= cfg.max_total {
            break;
        }
    }

    let report = PerfReport {
        iters,
        min_ns,
        avg_ns: total_ns / u64::from(iters.max(1)),
    };
    tracing::debug!(problem = %prb, iters, min_ns, avg_ns = report.avg_ns, "perf");
    Ok(report)
}
