//! Case result state machine and comparator diagnostics.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single case.
///
/// Created as `Initialized`; mutated once by the gate (to `Skipped` /
/// `Unimplemented`) or advanced through `Executed` to a terminal verdict
/// by the comparator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseState {
    Initialized,
    Listed,
    Skipped,
    Unimplemented,
    Executed,
    Passed,
    Failed,
}

/// Why a case was skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    CaseNotSupported,
    NotEnoughRam,
}

/// Comparator diagnostics attached to a terminal verdict.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CompareDiag {
    pub threshold: f32,
    pub max_rel_err: f32,
    pub mismatches: usize,
    /// Fraction of exactly-zero reference elements, in percent.
    pub zero_percent: f32,
    pub norm_mode: bool,
}

/// Per-case perf numbers from the timing pass.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PerfReport {
    pub iters: u32,
    pub min_ns: u64,
    pub avg_ns: u64,
}

/// The mutable record carried through one case's pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseResult {
    pub state: CaseState,
    pub reason: Option<SkipReason>,
    pub impl_name: String,
    pub diag: Option<CompareDiag>,
    pub perf: Option<PerfReport>,
    /// Human-readable failure detail for fatal pipeline errors.
    pub error: Option<String>,
}

impl Default for CaseResult {
    fn default() -> Self {
        Self {
            state: CaseState::Initialized,
            reason: None,
            impl_name: String::new(),
            diag: None,
            perf: None,
            error: None,
        }
    }
}

impl CaseResult {
    pub fn is_gated(&self) -> bool {
        matches!(self.state, CaseState::Skipped | CaseState::Unimplemented)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            CaseState::Skipped | CaseState::Unimplemented | CaseState::Passed | CaseState::Failed
        )
    }

    /// Gate decision. Only valid before any execution happened.
    pub fn skip(&mut self, reason: SkipReason) {
        debug_assert_eq!(self.state, CaseState::Initialized);
        self.state = CaseState::Skipped;
        self.reason = Some(reason);
    }

    /// Gate decision for a missing implementation.
    pub fn unimplemented(&mut self) {
        debug_assert_eq!(self.state, CaseState::Initialized);
        self.state = CaseState::Unimplemented;
    }

    /// Comparator verdict. Once failed, a later kind's pass cannot undo it.
    pub fn conclude(&mut self, passed: bool, diag: CompareDiag) {
        debug_assert!(matches!(
            self.state,
            CaseState::Executed | CaseState::Passed | CaseState::Failed
        ));
        if self.state != CaseState::Failed {
            self.state = if passed {
                CaseState::Passed
            } else {
                CaseState::Failed
            };
        }
        if !passed || self.diag.is_none() {
            self.diag = Some(diag);
        }
    }

    /// Fatal pipeline error: fill/reorder/build/execute failure.
    pub fn fail_fatal(&mut self, err: impl std::fmt::Display) {
        self.state = CaseState::Failed;
        self.error = Some(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(passed_thr: f32) -> CompareDiag {
        CompareDiag {
            threshold: passed_thr,
            max_rel_err: 0.0,
            mismatches: 0,
            zero_percent: 0.0,
            norm_mode: false,
        }
    }

    #[test]
    fn test_skip_is_terminal() {
        let mut r = CaseResult::default();
        r.skip(SkipReason::NotEnoughRam);
        assert!(r.is_terminal());
        assert_eq!(r.reason, Some(SkipReason::NotEnoughRam));
    }

    #[test]
    fn test_failed_sticks_across_kinds() {
        let mut r = CaseResult::default();
        r.state = CaseState::Executed;
        r.conclude(false, diag(1e-6));
        r.conclude(true, diag(1e-6));
        assert_eq!(r.state, CaseState::Failed);
    }

    #[test]
    fn test_pass_then_pass() {
        let mut r = CaseResult::default();
        r.state = CaseState::Executed;
        r.conclude(true, diag(1e-6));
        r.conclude(true, diag(1e-3));
        assert_eq!(r.state, CaseState::Passed);
    }
}
