//! Scope gate (spec.md §4.3 "Scope gate").

use crate::core::error::{CskError, ContractKind};
use crate::core::gates::{Gate, ProofOutcome};
use crate::core::model::{GateKind, Proof};
use crate::core::path::write_json_atomic;
use crate::core::time;
use globset::{Glob, GlobSetBuilder};
use std::path::{Path, PathBuf};

/// Build a `GlobSet` from doublestar-style patterns (spec.md: "Path
/// matching uses doublestar-style globs").
fn build_globset(patterns: &[String]) -> Result<globset::GlobSet, CskError> {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        let glob = Glob::new(p)
            .map_err(|e| CskError::Internal(format!("invalid glob pattern '{}': {}", p, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| CskError::Internal(format!("failed to build globset: {}", e)))
}

pub struct ScopeGate<'a> {
    pub task_id: String,
    pub slice_id: String,
    pub allowed_paths: &'a [String],
    pub forbidden_paths: &'a [String],
    pub changed_files: &'a [PathBuf],
    pub scope_required: bool,
    pub proof_path: PathBuf,
}

impl<'a> Gate for ScopeGate<'a> {
    fn kind(&self) -> GateKind {
        GateKind::Scope
    }

    fn run(&self) -> Result<ProofOutcome, CskError> {
        let checked_at = time::now_epoch_z();

        if self.scope_required && self.allowed_paths.is_empty() {
            let proof = Proof {
                task_id: self.task_id.clone(),
                slice_id: Some(self.slice_id.clone()),
                gate: GateKind::Scope,
                passed: false,
                checked_at,
                details: serde_json::json!({
                    "reason": "scope_config_missing",
                    "changed_files": self.changed_files,
                }),
            };
            write_json_atomic(&self.proof_path, &proof)?;
            return Err(CskError::contract(
                ContractKind::ScopeConfigMissing,
                format!("slice {} requires scope but allowed_paths is empty", self.slice_id),
            ));
        }

        let allowed = build_globset(self.allowed_paths)?;
        let forbidden = build_globset(self.forbidden_paths)?;

        let mut violations = Vec::new();
        for path in self.changed_files {
            let is_forbidden = forbidden.is_match(path);
            let is_allowed = allowed.is_match(path);
            if is_forbidden || !is_allowed {
                violations.push(path.to_string_lossy().to_string());
            }
        }

        let passed = violations.is_empty();
        let proof = Proof {
            task_id: self.task_id.clone(),
            slice_id: Some(self.slice_id.clone()),
            gate: GateKind::Scope,
            passed,
            checked_at,
            details: serde_json::json!({ "violations": violations }),
        };
        write_json_atomic(&self.proof_path, &proof)?;
        Ok(ProofOutcome { proof, passed })
    }
}

/// List changed files relative to `workdir`, matched against the slice's
/// globs. Spec.md §4.3: obtained from the VCS wrapper when available,
/// else a snapshot diff captured before `implement` — both are external
/// to the kernel, so this function takes the already-resolved list.
pub fn changed_files_from_list(paths: &[String]) -> Vec<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}

pub fn scope_proof_path(run_dir: &Path, slice_id: &str) -> PathBuf {
    run_dir.join("proofs").join(slice_id).join("scope.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn passes_when_all_changes_within_allowed_paths() {
        let dir = tempdir().unwrap();
        let gate = ScopeGate {
            task_id: "T-0001".into(),
            slice_id: "S-0001".into(),
            allowed_paths: &["src/**".to_string()],
            forbidden_paths: &[],
            changed_files: &[PathBuf::from("src/lib.rs")],
            scope_required: true,
            proof_path: dir.path().join("scope.json"),
        };
        let outcome = gate.run().unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn fails_when_change_outside_allowed_paths() {
        let dir = tempdir().unwrap();
        let gate = ScopeGate {
            task_id: "T-0001".into(),
            slice_id: "S-0001".into(),
            allowed_paths: &["src/**".to_string()],
            forbidden_paths: &[],
            changed_files: &[PathBuf::from("docs/readme.md")],
            scope_required: true,
            proof_path: dir.path().join("scope.json"),
        };
        let outcome = gate.run().unwrap();
        assert!(!outcome.passed);
    }

    #[test]
    fn forbidden_takes_precedence_over_allowed() {
        let dir = tempdir().unwrap();
        let gate = ScopeGate {
            task_id: "T-0001".into(),
            slice_id: "S-0001".into(),
            allowed_paths: &["src/**".to_string()],
            forbidden_paths: &["src/secrets/**".to_string()],
            changed_files: &[PathBuf::from("src/secrets/keys.rs")],
            scope_required: true,
            proof_path: dir.path().join("scope.json"),
        };
        let outcome = gate.run().unwrap();
        assert!(!outcome.passed);
    }

    #[test]
    fn empty_allowed_paths_with_scope_required_fails_config_missing() {
        let dir = tempdir().unwrap();
        let gate = ScopeGate {
            task_id: "T-0001".into(),
            slice_id: "S-0001".into(),
            allowed_paths: &[],
            forbidden_paths: &[],
            changed_files: &[],
            scope_required: true,
            proof_path: dir.path().join("scope.json"),
        };
        let err = gate.run().unwrap_err();
        match err {
            CskError::Contract { kind, .. } => assert_eq!(kind, ContractKind::ScopeConfigMissing),
            other => panic!("expected contract error, got {:?}", other),
        }
        assert!(dir.path().join("scope.json").is_file());
    }
}
