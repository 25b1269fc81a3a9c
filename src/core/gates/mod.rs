//! Gate subsystem: scope, verify, review, e2e, ready (spec.md §4.3, §4.4).
//!
//! Per the "exception-for-control-flow" redesign flag (spec.md §9), each
//! gate returns a typed [`ProofOutcome`] instead of throwing; the slice
//! pipeline in `core::task` is a fold over an ordered list of gates that
//! short-circuits on the first non-pass. Unexpected I/O errors remain
//! exceptional (`Result::Err`) and surface as `internal_error`.

pub mod e2e;
pub mod review;
pub mod ready;
pub mod scope;
pub mod verify;

use crate::core::error::CskError;
use crate::core::model::{GateKind, Proof};

/// Result of running one gate: always produces a proof, pass or fail.
pub struct ProofOutcome {
    pub proof: Proof,
    pub passed: bool,
}

/// Shape every gate implements. `run` must always succeed in writing a
/// proof file even when `passed = false`; only genuine I/O/internal
/// failures return `Err`.
pub trait Gate {
    fn kind(&self) -> GateKind;
    fn run(&self) -> Result<ProofOutcome, CskError>;
}
