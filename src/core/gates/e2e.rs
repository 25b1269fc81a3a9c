//! E2E gate (spec.md §4.3 "E2E gate"): same argv discipline as verify,
//! runs only when the slice or merged profile marks it required.

use crate::core::error::CskError;
use crate::core::gates::verify::VerifyGate;
use crate::core::gates::{Gate, ProofOutcome};
use crate::core::model::{GateKind, VerifyCommand};
use std::path::{Path, PathBuf};

pub struct E2eGate<'a> {
    pub inner: VerifyGate<'a>,
}

impl<'a> E2eGate<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: String,
        slice_id: String,
        commands: &'a [VerifyCommand],
        worktree: &'a Path,
        repo: &'a Path,
        logs_dir: PathBuf,
        allowlist: &'a [String],
        denylist: &'a [String],
        proof_path: PathBuf,
    ) -> Self {
        E2eGate {
            inner: VerifyGate {
                task_id,
                slice_id,
                commands,
                required: true,
                worktree,
                repo,
                logs_dir,
                allowlist,
                denylist,
                proof_path,
            },
        }
    }
}

impl<'a> Gate for E2eGate<'a> {
    fn kind(&self) -> GateKind {
        GateKind::E2e
    }

    fn run(&self) -> Result<ProofOutcome, CskError> {
        let mut outcome = self.inner.run()?;
        outcome.proof.gate = GateKind::E2e;
        Ok(outcome)
    }
}

pub fn e2e_proof_path(run_dir: &Path, slice_id: &str) -> PathBuf {
    run_dir.join("proofs").join(slice_id).join("e2e.json")
}
