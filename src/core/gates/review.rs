//! Review gate (spec.md §4.3 "Review gate").
//!
//! The P0–P3 counters are recorded by the executor (a human or an
//! assistant), not computed by the kernel; the gate's only job is to
//! apply the pass rule and persist the proof.

use crate::core::error::CskError;
use crate::core::gates::{Gate, ProofOutcome};
use crate::core::model::{GateKind, Proof};
use crate::core::path::write_json_atomic;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInput {
    pub p0: u32,
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
    pub summary: String,
}

pub struct ReviewGate {
    pub task_id: String,
    pub slice_id: String,
    pub input: ReviewInput,
    pub proof_path: PathBuf,
}

impl Gate for ReviewGate {
    fn kind(&self) -> GateKind {
        GateKind::Review
    }

    fn run(&self) -> Result<ProofOutcome, CskError> {
        let passed = self.input.p0 == 0 && self.input.p1 == 0;
        let proof = Proof {
            task_id: self.task_id.clone(),
            slice_id: Some(self.slice_id.clone()),
            gate: GateKind::Review,
            passed,
            checked_at: time::now_epoch_z(),
            details: serde_json::to_value(&self.input)?,
        };
        write_json_atomic(&self.proof_path, &proof)?;
        Ok(ProofOutcome { proof, passed })
    }
}

pub fn review_proof_path(run_dir: &std::path::Path, slice_id: &str) -> PathBuf {
    run_dir.join("proofs").join(slice_id).join("review.json")
}
