//! Domain records and enums shared across the kernel (spec.md §3).
//!
//! Every durable record here implements canonical hashing via
//! `core::canonical` so that freeze hashes and replay's artifact checks
//! are stable. Field order is fixed and documented; open-ended maps use
//! `BTreeMap` so canonicalisation never depends on insertion order.

use crate::core::canonical;
use crate::core::error::CskError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Task lifecycle, a total ordering with two side branches (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    CriticPassed,
    Frozen,
    PlanApproved,
    Executing,
    Blocked,
    ReadyValidated,
    ReadyApproved,
    RetroDone,
    Closed,
}

impl TaskStatus {
    /// The allowed transition graph. Any edge not listed here fails with
    /// `InvalidTransition`.
    pub fn allowed_transitions(self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Draft => &[CriticPassed],
            CriticPassed => &[Frozen],
            Frozen => &[PlanApproved, CriticPassed, Draft],
            PlanApproved => &[Executing, CriticPassed, ReadyValidated, Draft],
            Executing => &[Blocked, CriticPassed, ReadyValidated, Executing, Draft],
            Blocked => &[RetroDone],
            ReadyValidated => &[ReadyApproved, Blocked, CriticPassed],
            ReadyApproved => &[RetroDone],
            RetroDone => &[Closed],
            Closed => &[],
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        self == next || self.allowed_transitions().contains(&next)
    }
}

/// Subset of gates a slice requires, closed enum per spec.md §9's
/// "deep configuration dictionaries" redesign flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Scope,
    Verify,
    Review,
    E2e,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// `slices.json` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slice {
    pub slice_id: String,
    pub goal: String,
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    pub required_gates: Vec<GateKind>,
    #[serde(default)]
    pub deps: Vec<String>,
    pub status: SliceStatus,
    #[serde(default)]
    pub verify_commands: Option<Vec<VerifyCommand>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub acceptance: Option<String>,
}

/// An argv-only verify/e2e command (spec.md §4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyCommand {
    pub name: String,
    pub argv: Vec<String>,
    pub cwd: CommandCwd,
    pub timeout_sec: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCwd {
    Worktree,
    Repo,
}

/// `slices.json` document: ordered slices plus the default required-gate
/// set new slices are stamped with at `task_new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlicesDocument {
    pub task_id: String,
    pub slices: Vec<Slice>,
}

impl SlicesDocument {
    pub fn canonical_hash_hex(&self) -> Result<String, CskError> {
        canonical::canonical_hash_hex(self)
    }

    /// Dependency-respecting topological order; ties broken lexically by
    /// slice id (spec.md §4.2 "Slice ordering").
    pub fn topological_order(&self) -> Result<Vec<String>, CskError> {
        let mut remaining: BTreeMap<String, Vec<String>> = self
            .slices
            .iter()
            .map(|s| (s.slice_id.clone(), s.deps.clone()))
            .collect();
        let mut order = Vec::new();
        while !remaining.is_empty() {
            let mut ready: Vec<String> = remaining
                .iter()
                .filter(|(_, deps)| deps.iter().all(|d| !remaining.contains_key(d)))
                .map(|(id, _)| id.clone())
                .collect();
            ready.sort();
            if ready.is_empty() {
                return Err(CskError::contract(
                    crate::core::error::ContractKind::SchemaViolation,
                    "cyclic or undefined slice dependency",
                ));
            }
            for id in ready {
                remaining.remove(&id);
                order.push(id);
            }
        }
        Ok(order)
    }

    /// The first slice (in topological order) whose status is not `Done`
    /// and whose dependencies are all `Done`.
    pub fn active_slice(&self) -> Result<Option<&Slice>, CskError> {
        let order = self.topological_order()?;
        let by_id: BTreeMap<&str, &Slice> = self
            .slices
            .iter()
            .map(|s| (s.slice_id.as_str(), s))
            .collect();
        for id in &order {
            let slice = by_id[id.as_str()];
            if slice.status == SliceStatus::Done {
                continue;
            }
            let deps_done = slice
                .deps
                .iter()
                .all(|d| by_id.get(d.as_str()).map(|s| s.status == SliceStatus::Done).unwrap_or(false));
            if deps_done {
                return Ok(Some(slice));
            }
        }
        Ok(None)
    }
}

/// `task.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub module_id: String,
    pub status: TaskStatus,
    pub profile_name: String,
    pub max_attempts: u32,
    pub slices: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// `freeze.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Freeze {
    pub task_id: String,
    pub plan_sha256: String,
    pub slices_sha256: String,
    pub frozen_at: String,
    pub engine_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Plan,
    Ready,
    UserCheck,
}

/// `approvals/{plan,ready,user_check}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub kind: ApprovalKind,
    pub approved_by: String,
    pub approved_at: String,
}

/// A single gate's outcome, common shape for `scope.json`/`verify.json`/
/// `review.json`/`e2e.json`/`ready.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub task_id: String,
    #[serde(default)]
    pub slice_id: Option<String>,
    pub gate: GateKind,
    pub passed: bool,
    pub checked_at: String,
    pub details: serde_json::Value,
}

/// Per-slice `manifest.json`: the sibling proofs, referenced by absolute
/// path, plus when the manifest was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub task_id: String,
    pub slice_id: String,
    pub proof_paths: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    ScopeViolation,
    ScopeConfigMissing,
    VerifyConfigMissing,
    VerifyFail,
    ReviewFail,
    E2eFail,
    ImplementFail,
    TokenWaste,
    PlanDrift,
    WorktreeCreateFailed,
}

/// Append-only incident record (spec.md §3, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub kind: IncidentKind,
    pub phase: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub slice_id: Option<String>,
    pub details: String,
    pub remediation_hint: String,
    pub ts: String,
}

/// Closed set of event types (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CommandStarted,
    CommandCompleted,
    BootstrapCompleted,
    ModuleAdded,
    ModuleInitialized,
    RegistryDetected,
    MissionCreated,
    MilestoneActivated,
    WorktreeCreated,
    WorktreeFailed,
    TaskCreated,
    SliceCreated,
    TaskCriticPassed,
    TaskCriticFailed,
    TaskFrozen,
    TaskPlanApproved,
    ProofPackWritten,
    SliceCompleted,
    ReadyValidated,
    ReadyApproved,
    RetroCompleted,
    IncidentLogged,
    ReplayChecked,
}

/// Event envelope persisted in the indexed append-only log (spec.md §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub actor: String,
    #[serde(default)]
    pub mission_id: Option<String>,
    #[serde(default)]
    pub module_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub slice_id: Option<String>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub artifact_refs: Vec<String>,
    #[serde(default)]
    pub repo_git_head: Option<String>,
    pub engine_version: String,
}

/// Registry entry for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub module_id: String,
    pub path: String,
    pub registered: bool,
    pub initialized: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// `registry.json`: module_id -> entry, kept as a sorted map for stable
/// canonical hashing and deterministic iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    pub modules: BTreeMap<String, RegistryEntry>,
}

/// One mission milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub modules: Vec<String>,
    pub status: String,
}

/// `missions/M-####/*.json` aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: String,
    pub spec_text: String,
    pub routing: Vec<String>,
    pub milestones: Vec<Milestone>,
    pub worktrees: BTreeMap<String, String>,
}
