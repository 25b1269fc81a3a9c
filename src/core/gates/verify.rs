//! Verify gate (spec.md §4.3 "Verify gate").

use crate::core::error::{CskError, ContractKind};
use crate::core::gates::{Gate, ProofOutcome};
use crate::core::model::{GateKind, Proof, VerifyCommand};
use crate::core::path::write_json_atomic;
use crate::core::runner::{self, CommandOutcome};
use crate::core::time;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct VerifyGate<'a> {
    pub task_id: String,
    pub slice_id: String,
    pub commands: &'a [VerifyCommand],
    pub required: bool,
    pub worktree: &'a Path,
    pub repo: &'a Path,
    pub logs_dir: PathBuf,
    pub allowlist: &'a [String],
    pub denylist: &'a [String],
    pub proof_path: PathBuf,
}

impl<'a> Gate for VerifyGate<'a> {
    fn kind(&self) -> GateKind {
        GateKind::Verify
    }

    fn run(&self) -> Result<ProofOutcome, CskError> {
        let checked_at = time::now_epoch_z();

        if self.required && self.commands.is_empty() {
            let proof = Proof {
                task_id: self.task_id.clone(),
                slice_id: Some(self.slice_id.clone()),
                gate: GateKind::Verify,
                passed: false,
                checked_at,
                details: serde_json::json!({ "reason": "verify_config_missing" }),
            };
            write_json_atomic(&self.proof_path, &proof)?;
            return Err(CskError::contract(
                ContractKind::VerifyConfigMissing,
                format!("slice {} requires verify but no commands are configured", self.slice_id),
            ));
        }

        let mut outcomes: Vec<CommandOutcome> = Vec::new();
        for (i, cmd) in self.commands.iter().enumerate() {
            runner::check_policy(&cmd.argv, self.allowlist, self.denylist)?;
            let cwd = match cmd.cwd {
                crate::core::model::CommandCwd::Worktree => self.worktree,
                crate::core::model::CommandCwd::Repo => self.repo,
            };
            let log_path = self.logs_dir.join(format!("verify-{}-{}.log", i, cmd.name));
            let outcome = runner::run_command(
                &cmd.argv,
                cwd,
                Duration::from_secs(cmd.timeout_sec),
                &log_path,
            )?;
            outcomes.push(outcome);
        }

        let executed_count = outcomes.len();
        let passed = executed_count > 0 && outcomes.iter().all(|o| o.exit_code == 0);

        let proof = Proof {
            task_id: self.task_id.clone(),
            slice_id: Some(self.slice_id.clone()),
            gate: GateKind::Verify,
            passed,
            checked_at,
            details: serde_json::json!({
                "commands": outcomes,
                "executed_count": executed_count,
            }),
        };
        write_json_atomic(&self.proof_path, &proof)?;
        Ok(ProofOutcome { proof, passed })
    }
}

pub fn verify_proof_path(run_dir: &Path, slice_id: &str) -> PathBuf {
    run_dir.join("proofs").join(slice_id).join("verify.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::CommandCwd;
    use tempfile::tempdir;

    fn cmd(argv: &[&str]) -> VerifyCommand {
        VerifyCommand {
            name: "t".into(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            cwd: CommandCwd::Worktree,
            timeout_sec: 5,
        }
    }

    #[test]
    fn passes_when_all_commands_succeed() {
        let dir = tempdir().unwrap();
        let gate = VerifyGate {
            task_id: "T-0001".into(),
            slice_id: "S-0001".into(),
            commands: &[cmd(&["true"])],
            required: true,
            worktree: dir.path(),
            repo: dir.path(),
            logs_dir: dir.path().join("logs"),
            allowlist: &[],
            denylist: &[],
            proof_path: dir.path().join("verify.json"),
        };
        let outcome = gate.run().unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn fails_when_a_command_exits_nonzero() {
        let dir = tempdir().unwrap();
        let gate = VerifyGate {
            task_id: "T-0001".into(),
            slice_id: "S-0001".into(),
            commands: &[cmd(&["true"]), cmd(&["false"])],
            required: true,
            worktree: dir.path(),
            repo: dir.path(),
            logs_dir: dir.path().join("logs"),
            allowlist: &[],
            denylist: &[],
            proof_path: dir.path().join("verify.json"),
        };
        let outcome = gate.run().unwrap();
        assert!(!outcome.passed);
    }

    #[test]
    fn zero_executed_commands_with_verify_required_is_config_missing() {
        let dir = tempdir().unwrap();
        let gate = VerifyGate {
            task_id: "T-0001".into(),
            slice_id: "S-0001".into(),
            commands: &[],
            required: true,
            worktree: dir.path(),
            repo: dir.path(),
            logs_dir: dir.path().join("logs"),
            allowlist: &[],
            denylist: &[],
            proof_path: dir.path().join("verify.json"),
        };
        let err = gate.run().unwrap_err();
        match err {
            CskError::Contract { kind, .. } => assert_eq!(kind, ContractKind::VerifyConfigMissing),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn denylisted_command_is_denied_before_spawning() {
        let dir = tempdir().unwrap();
        let gate = VerifyGate {
            task_id: "T-0001".into(),
            slice_id: "S-0001".into(),
            commands: &[cmd(&["rm", "-rf", "/"])],
            required: true,
            worktree: dir.path(),
            repo: dir.path(),
            logs_dir: dir.path().join("logs"),
            allowlist: &[],
            denylist: &["rm".to_string()],
            proof_path: dir.path().join("verify.json"),
        };
        assert!(gate.run().is_err());
    }
}
