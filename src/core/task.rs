//! Task & slice engine (spec.md §4.2): lifecycle transitions, freeze
//! hashing, drift detection, the slice gate pipeline fold, retry budget,
//! and proof-pack manifest writing.

use crate::core::canonical;
use crate::core::error::{ContractKind, CskError};
use crate::core::eventlog::EventLog;
use crate::core::gates::e2e::E2eGate;
use crate::core::gates::ready;
use crate::core::gates::review::{ReviewGate, ReviewInput};
use crate::core::gates::scope::ScopeGate;
use crate::core::gates::verify::VerifyGate;
use crate::core::gates::Gate;
use crate::core::incident;
use crate::core::model::{
    Approval, ApprovalKind, Event, EventType, Freeze, GateKind, IncidentKind, Manifest, Proof,
    Slice, SliceStatus, SlicesDocument, Task, TaskStatus,
};
use crate::core::path::{self, read_json_opt, write_json_atomic, StateRoot};
use crate::core::profile::Profile;
use crate::core::runner;
use crate::core::time;

/// Everything a task/slice operation needs that isn't part of the task's
/// own durable state: where it lives, who's asking, and the shared event
/// log handle (spec.md §9 "no ambient sinks" — the log is passed explicitly).
pub struct TaskContext<'a> {
    pub state_root: &'a StateRoot,
    pub event_log: &'a EventLog,
    pub module_path: String,
    pub module_id: String,
    pub actor: String,
    pub engine_version: String,
}

impl<'a> TaskContext<'a> {
    /// Append one event stamped with this context's actor/module/engine
    /// version. `pub(crate)` so sibling modules (`retro`, `mission`) that
    /// share a `TaskContext` can emit without duplicating the envelope.
    pub(crate) fn emit_event(
        &self,
        event_type: EventType,
        task_id: Option<&str>,
        slice_id: Option<&str>,
        payload: serde_json::Value,
        artifact_refs: Vec<String>,
    ) -> Result<(), CskError> {
        let event = Event {
            id: time::new_id(),
            ts: time::now_epoch_z(),
            event_type,
            actor: self.actor.clone(),
            mission_id: None,
            module_id: Some(self.module_id.clone()),
            task_id: task_id.map(|s| s.to_string()),
            slice_id: slice_id.map(|s| s.to_string()),
            payload,
            artifact_refs,
            repo_git_head: None,
            engine_version: self.engine_version.clone(),
        };
        self.event_log.append(&event)
    }

    pub(crate) fn incident(
        &self,
        kind: IncidentKind,
        phase: &str,
        task_id: Option<&str>,
        slice_id: Option<&str>,
        details: impl Into<String>,
        remediation_hint: impl Into<String>,
    ) -> Result<(), CskError> {
        incident::record(
            self.state_root,
            self.event_log,
            Some(&self.module_path),
            kind,
            phase,
            task_id,
            slice_id,
            details,
            remediation_hint,
            &self.actor,
            &self.engine_version,
        )?;
        Ok(())
    }

    pub(crate) fn load_task(&self, task_id: &str) -> Result<Task, CskError> {
        read_json_opt(&self.state_root.task_json_path(&self.module_path, task_id))?
            .ok_or_else(|| CskError::NotFound(format!("task {}", task_id)))
    }

    pub(crate) fn save_task(&self, task: &Task) -> Result<(), CskError> {
        write_json_atomic(&self.state_root.task_json_path(&self.module_path, &task.task_id), task)
    }

    pub(crate) fn load_slices(&self, task_id: &str) -> Result<SlicesDocument, CskError> {
        read_json_opt(&self.state_root.slices_path(&self.module_path, task_id))?
            .ok_or_else(|| CskError::NotFound(format!("slices.json for {}", task_id)))
    }

    pub(crate) fn save_slices(&self, doc: &SlicesDocument) -> Result<(), CskError> {
        write_json_atomic(&self.state_root.slices_path(&self.module_path, &doc.task_id), doc)
    }

    pub(crate) fn load_plan(&self, task_id: &str) -> Result<Vec<u8>, CskError> {
        std::fs::read(self.state_root.plan_path(&self.module_path, task_id)).map_err(CskError::from)
    }
}

fn require_status(task: &Task, allowed: &[TaskStatus]) -> Result<(), CskError> {
    if allowed.contains(&task.status) {
        Ok(())
    } else {
        Err(CskError::contract(
            ContractKind::InvalidTransition,
            format!(
                "task {} is in status {:?}, expected one of {:?}",
                task.task_id, task.status, allowed
            ),
        ))
    }
}

/// `task_new(module_id, slice_count)` (spec.md §4.2).
pub fn task_new(ctx: &TaskContext, slice_count: u32, profile_name: &str, max_attempts: u32) -> Result<Task, CskError> {
    let task_id = path::next_sequential_id(&ctx.state_root.module_tasks_dir(&ctx.module_path), "T-")?;
    let now = time::now_epoch_z();

    let mut slices = Vec::with_capacity(slice_count as usize);
    let mut slice_ids = Vec::with_capacity(slice_count as usize);
    for i in 1..=slice_count {
        let slice_id = format!("S-{:04}", i);
        slice_ids.push(slice_id.clone());
        slices.push(Slice {
            slice_id,
            goal: String::new(),
            allowed_paths: vec![],
            forbidden_paths: vec![],
            required_gates: vec![GateKind::Scope, GateKind::Verify, GateKind::Review],
            deps: vec![],
            status: SliceStatus::Pending,
            verify_commands: None,
            attempts: 0,
            acceptance: None,
        });
    }

    let plan_md = format!(
        "# Task {}\n\n## Goal\n\n\n## Acceptance\n\n",
        task_id
    );
    std::fs::create_dir_all(ctx.state_root.task_dir(&ctx.module_path, &task_id))?;
    std::fs::write(ctx.state_root.plan_path(&ctx.module_path, &task_id), plan_md.as_bytes())?;

    let slices_doc = SlicesDocument { task_id: task_id.clone(), slices };
    ctx.save_slices(&slices_doc)?;

    let task = Task {
        task_id: task_id.clone(),
        module_id: ctx.module_id.clone(),
        status: TaskStatus::Draft,
        profile_name: profile_name.to_string(),
        max_attempts,
        slices: slice_ids.clone(),
        created_at: now.clone(),
        updated_at: now,
    };
    ctx.save_task(&task)?;

    ctx.emit_event(
        EventType::TaskCreated,
        Some(&task_id),
        None,
        serde_json::json!({ "module_id": ctx.module_id, "slice_count": slice_count }),
        vec![],
    )?;
    for slice_id in &slice_ids {
        ctx.emit_event(EventType::SliceCreated, Some(&task_id), Some(slice_id), serde_json::json!({}), vec![])?;
    }

    Ok(task)
}

/// `{p0,p1,p2,p3,passed}` plus human-readable findings (spec.md §4.2
/// "Structural critic").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CriticReport {
    pub p0: u32,
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
    pub passed: bool,
    pub findings: Vec<String>,
}

fn run_structural_critic(plan_md: &str, slices: &SlicesDocument) -> CriticReport {
    let mut p0 = 0u32;
    let mut p1 = 0u32;
    let mut findings = Vec::new();

    let goal_section = plan_md.split("## Goal").nth(1).unwrap_or("");
    let goal_body = goal_section.split("##").next().unwrap_or("").trim();
    if goal_body.is_empty() {
        p0 += 1;
        findings.push("P0: plan.md is missing a non-empty ## Goal section".to_string());
    }

    let known_ids: std::collections::BTreeSet<&str> =
        slices.slices.iter().map(|s| s.slice_id.as_str()).collect();
    let mut seen_ids = std::collections::BTreeSet::new();

    for slice in &slices.slices {
        if !seen_ids.insert(slice.slice_id.as_str()) {
            p1 += 1;
            findings.push(format!("P1: duplicate slice id {}", slice.slice_id));
        }
        if slice.required_gates.contains(&GateKind::Scope) && slice.allowed_paths.is_empty() {
            p0 += 1;
            findings.push(format!("P0: {} requires scope but allowed_paths is empty", slice.slice_id));
        }
        if slice.required_gates.contains(&GateKind::Verify)
            && slice.verify_commands.as_ref().map(|c| c.is_empty()).unwrap_or(true)
        {
            p0 += 1;
            findings.push(format!("P0: {} requires verify but verify_commands is empty", slice.slice_id));
        }
        if slice.acceptance.as_deref().map(str::trim).unwrap_or("").is_empty() {
            p0 += 1;
            findings.push(format!("P0: {} has no acceptance criteria", slice.slice_id));
        }
        for dep in &slice.deps {
            if !known_ids.contains(dep.as_str()) {
                p0 += 1;
                findings.push(format!("P0: {} depends on undefined slice {}", slice.slice_id, dep));
            }
        }
        if slice.allowed_paths.iter().any(|p| p == "**" || p == "." || p == "./**") {
            p1 += 1;
            findings.push(format!("P1: {} allowed_paths is the module root (too broad)", slice.slice_id));
        }
    }

    if slices.topological_order().is_err() {
        p0 += 1;
        findings.push("P0: slices.json has a cyclic dependency".to_string());
    }

    CriticReport {
        p0,
        p1,
        p2: 0,
        p3: 0,
        passed: p0 == 0 && p1 == 0,
        findings,
    }
}

/// `task_critic(task_id)` (spec.md §4.2).
pub fn task_critic(ctx: &TaskContext, task_id: &str) -> Result<CriticReport, CskError> {
    let mut task = ctx.load_task(task_id)?;
    require_status(&task, &[TaskStatus::Draft, TaskStatus::Frozen, TaskStatus::PlanApproved, TaskStatus::Executing])?;

    let plan_bytes = ctx.load_plan(task_id)?;
    let plan_md = String::from_utf8_lossy(&plan_bytes).into_owned();
    let slices = ctx.load_slices(task_id)?;

    let report = run_structural_critic(&plan_md, &slices);
    write_json_atomic(&ctx.state_root.critic_report_path(&ctx.module_path, task_id), &report)?;

    task.status = if report.passed { TaskStatus::CriticPassed } else { TaskStatus::Draft };
    task.updated_at = time::now_epoch_z();
    ctx.save_task(&task)?;

    if report.passed {
        ctx.emit_event(EventType::TaskCriticPassed, Some(task_id), None, serde_json::to_value(&report)?, vec![])?;
    } else {
        ctx.emit_event(EventType::TaskCriticFailed, Some(task_id), None, serde_json::to_value(&report)?, vec![])?;
    }

    Ok(report)
}

/// `task_freeze(task_id)` (spec.md §4.2, §6 "Freeze canonicalisation").
pub fn task_freeze(ctx: &TaskContext, task_id: &str) -> Result<Freeze, CskError> {
    let mut task = ctx.load_task(task_id)?;
    require_status(&task, &[TaskStatus::CriticPassed])?;

    let plan_bytes = ctx.load_plan(task_id)?;
    let slices = ctx.load_slices(task_id)?;

    let freeze = Freeze {
        task_id: task_id.to_string(),
        plan_sha256: canonical::sha256_hex(&plan_bytes),
        slices_sha256: slices.canonical_hash_hex()?,
        frozen_at: time::now_epoch_z(),
        engine_version: ctx.engine_version.clone(),
    };
    write_json_atomic(&ctx.state_root.freeze_path(&ctx.module_path, task_id), &freeze)?;

    task.status = TaskStatus::Frozen;
    task.updated_at = time::now_epoch_z();
    ctx.save_task(&task)?;

    ctx.emit_event(EventType::TaskFrozen, Some(task_id), None, serde_json::to_value(&freeze)?, vec![])?;
    Ok(freeze)
}

/// `task_approve_plan(task_id, approved_by)` (spec.md §4.2).
pub fn task_approve_plan(ctx: &TaskContext, task_id: &str, approved_by: &str) -> Result<Approval, CskError> {
    let mut task = ctx.load_task(task_id)?;
    require_status(&task, &[TaskStatus::Frozen])?;

    let approval = Approval {
        kind: ApprovalKind::Plan,
        approved_by: approved_by.to_string(),
        approved_at: time::now_epoch_z(),
    };
    write_json_atomic(&ctx.state_root.approval_path(&ctx.module_path, task_id, "plan"), &approval)?;

    task.status = TaskStatus::PlanApproved;
    task.updated_at = time::now_epoch_z();
    ctx.save_task(&task)?;

    ctx.emit_event(EventType::TaskPlanApproved, Some(task_id), None, serde_json::to_value(&approval)?, vec![])?;
    Ok(approval)
}

/// Recompute plan/slices hashes and compare to `freeze.json`; `Err` on
/// mismatch or missing freeze (spec.md §4.2 "Drift detection").
fn check_drift(ctx: &TaskContext, task_id: &str) -> Result<(), CskError> {
    let freeze: Option<Freeze> = read_json_opt(&ctx.state_root.freeze_path(&ctx.module_path, task_id))?;
    let freeze = freeze.ok_or_else(|| CskError::contract(ContractKind::PlanDrift, "freeze.json is missing"))?;

    let plan_bytes = ctx.load_plan(task_id)?;
    let slices = ctx.load_slices(task_id)?;
    let plan_hash = canonical::sha256_hex(&plan_bytes);
    let slices_hash = slices.canonical_hash_hex()?;

    if freeze.plan_sha256 != plan_hash || freeze.slices_sha256 != slices_hash {
        return Err(CskError::contract(
            ContractKind::PlanDrift,
            "plan.md or slices.json changed since freeze; re-freeze and re-approve required",
        ));
    }
    Ok(())
}

/// Outcome of one `slice_run` invocation. Gate failures are not Rust
/// errors (spec.md §9 "exception-for-control-flow"): only genuine
/// precondition violations (bad status, drift, missing task/slice) and
/// I/O failures surface as `Err`.
#[derive(Debug, Clone)]
pub struct SliceOutcome {
    pub slice_id: String,
    pub passed: bool,
    pub blocked: bool,
    pub failed_gate: Option<GateKind>,
    pub failure_kind: Option<ContractKind>,
}

/// Inputs an external executor supplies for one slice attempt.
pub struct SliceRunInput<'a> {
    pub implement_argv: Option<Vec<String>>,
    pub changed_files: Vec<String>,
    pub review: ReviewInput,
    pub worktree: &'a std::path::Path,
    pub repo: &'a std::path::Path,
}

/// `slice_run(task_id, slice_id, implement_argv?)` (spec.md §4.2, §4.3).
pub fn slice_run(
    ctx: &TaskContext,
    task_id: &str,
    slice_id: &str,
    profile: &Profile,
    input: SliceRunInput,
) -> Result<SliceOutcome, CskError> {
    let mut task = ctx.load_task(task_id)?;
    require_status(&task, &[TaskStatus::PlanApproved, TaskStatus::Executing])?;

    if let Err(e) = check_drift(ctx, task_id) {
        task.status = TaskStatus::CriticPassed;
        task.updated_at = time::now_epoch_z();
        ctx.save_task(&task)?;
        ctx.incident(
            IncidentKind::PlanDrift,
            "slice_run",
            Some(task_id),
            Some(slice_id),
            "plan.md or slices.json changed since freeze",
            format!("task freeze --task-id {}; task approve-plan --task-id {}", task_id, task_id),
        )?;
        return Err(e);
    }

    let mut slices_doc = ctx.load_slices(task_id)?;
    let slice_index = slices_doc
        .slices
        .iter()
        .position(|s| s.slice_id == slice_id)
        .ok_or_else(|| CskError::NotFound(format!("slice {}", slice_id)))?;

    if task.status == TaskStatus::PlanApproved {
        task.status = TaskStatus::Executing;
    }

    let logs_dir = ctx.state_root.logs_dir(&ctx.module_path, task_id, slice_id);
    let proofs_dir = ctx.state_root.slice_proofs_dir(&ctx.module_path, task_id, slice_id);

    let mut failure: Option<(GateKind, ContractKind, IncidentKind, String)> = None;
    let mut proof_paths: Vec<String> = Vec::new();

    if let Some(argv) = &input.implement_argv {
        let outcome = runner::run_command(argv, input.worktree, std::time::Duration::from_secs(600), &logs_dir.join("implement.log"));
        match outcome {
            Ok(o) if o.exit_code != 0 => {
                failure = Some((
                    GateKind::Verify,
                    ContractKind::ImplementFail,
                    IncidentKind::ImplementFail,
                    format!("implement command exited {}", o.exit_code),
                ));
            }
            Err(e) => return Err(e),
            _ => {}
        }
    }

    {
        let slice = &slices_doc.slices[slice_index];

        if failure.is_none() && slice.required_gates.contains(&GateKind::Scope) {
            let changed = crate::core::gates::scope::changed_files_from_list(&input.changed_files);
            let gate = ScopeGate {
                task_id: task_id.to_string(),
                slice_id: slice_id.to_string(),
                allowed_paths: &slice.allowed_paths,
                forbidden_paths: &slice.forbidden_paths,
                changed_files: &changed,
                scope_required: true,
                proof_path: proofs_dir.join("scope.json"),
            };
            match gate.run() {
                Ok(outcome) => {
                    proof_paths.push(gate.proof_path.to_string_lossy().into_owned());
                    if !outcome.passed {
                        failure = Some((GateKind::Scope, ContractKind::ScopeViolation, IncidentKind::ScopeViolation, "changed files outside allowed scope".to_string()));
                    }
                }
                Err(CskError::Contract { kind, message, .. }) => {
                    proof_paths.push(gate.proof_path.to_string_lossy().into_owned());
                    failure = Some((GateKind::Scope, kind, IncidentKind::ScopeConfigMissing, message));
                }
                Err(e) => return Err(e),
            }
        }

        if failure.is_none() && slice.required_gates.contains(&GateKind::Verify) {
            let commands = profile.effective_verify_commands(slice);
            let gate = VerifyGate {
                task_id: task_id.to_string(),
                slice_id: slice_id.to_string(),
                commands: &commands,
                required: true,
                worktree: input.worktree,
                repo: input.repo,
                logs_dir: logs_dir.clone(),
                allowlist: &profile.allowlist,
                denylist: &profile.denylist,
                proof_path: proofs_dir.join("verify.json"),
            };
            match gate.run() {
                Ok(outcome) => {
                    proof_paths.push(gate.proof_path.to_string_lossy().into_owned());
                    if !outcome.passed {
                        failure = Some((GateKind::Verify, ContractKind::VerifyFail, IncidentKind::VerifyFail, "one or more verify commands failed".to_string()));
                    }
                }
                Err(CskError::Contract { kind, message, .. }) => {
                    proof_paths.push(gate.proof_path.to_string_lossy().into_owned());
                    failure = Some((GateKind::Verify, kind, IncidentKind::VerifyConfigMissing, message));
                }
                Err(e) => return Err(e),
            }
        }

        if failure.is_none() && slice.required_gates.contains(&GateKind::Review) {
            let gate = ReviewGate {
                task_id: task_id.to_string(),
                slice_id: slice_id.to_string(),
                input: ReviewInput {
                    p0: input.review.p0,
                    p1: input.review.p1,
                    p2: input.review.p2,
                    p3: input.review.p3,
                    summary: input.review.summary.clone(),
                },
                proof_path: proofs_dir.join("review.json"),
            };
            match gate.run() {
                Ok(outcome) => {
                    proof_paths.push(gate.proof_path.to_string_lossy().into_owned());
                    if !outcome.passed {
                        failure = Some((GateKind::Review, ContractKind::ReviewFail, IncidentKind::ReviewFail, "review found P0/P1 issues".to_string()));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let e2e_required = slice.required_gates.contains(&GateKind::E2e) || profile.e2e_required_default;
        if failure.is_none() && e2e_required {
            let commands = profile.effective_verify_commands(slice);
            let gate = E2eGate::new(
                task_id.to_string(),
                slice_id.to_string(),
                &commands,
                input.worktree,
                input.repo,
                logs_dir.clone(),
                &profile.allowlist,
                &profile.denylist,
                proofs_dir.join("e2e.json"),
            );
            match gate.run() {
                Ok(outcome) => {
                    proof_paths.push(gate.inner.proof_path.to_string_lossy().into_owned());
                    if !outcome.passed {
                        failure = Some((GateKind::E2e, ContractKind::E2eFail, IncidentKind::E2eFail, "e2e command(s) failed".to_string()));
                    }
                }
                Err(CskError::Contract { kind, message, .. }) => {
                    proof_paths.push(gate.inner.proof_path.to_string_lossy().into_owned());
                    failure = Some((GateKind::E2e, kind, IncidentKind::E2eFail, message));
                }
                Err(e) => return Err(e),
            }
        }
    }

    let outcome = if let Some((failed_gate, contract_kind, incident_kind, details)) = failure {
        let slice = &mut slices_doc.slices[slice_index];
        slice.status = SliceStatus::Failed;
        slice.attempts += 1;
        let blocked = slice.attempts >= task.max_attempts;

        ctx.incident(
            incident_kind,
            "slice_run",
            Some(task_id),
            Some(slice_id),
            details.clone(),
            format!("slice run --task-id {} --slice-id {}", task_id, slice_id),
        )?;

        if blocked {
            task.status = TaskStatus::Blocked;
            ctx.incident(
                IncidentKind::TokenWaste,
                "slice_run",
                Some(task_id),
                Some(slice_id),
                format!("slice {} exhausted {} attempts", slice_id, task.max_attempts),
                format!("retro run --task-id {}", task_id),
            )?;
        }

        SliceOutcome {
            slice_id: slice_id.to_string(),
            passed: false,
            blocked,
            failed_gate: Some(failed_gate),
            failure_kind: Some(contract_kind),
        }
    } else {
        let manifest = Manifest {
            task_id: task_id.to_string(),
            slice_id: slice_id.to_string(),
            proof_paths: proof_paths.clone(),
            created_at: time::now_epoch_z(),
        };
        let manifest_path = ctx.state_root.manifest_path(&ctx.module_path, task_id, slice_id);
        write_json_atomic(&manifest_path, &manifest)?;
        let manifest_ref = manifest_path.to_string_lossy().into_owned();

        ctx.emit_event(
            EventType::ProofPackWritten,
            Some(task_id),
            Some(slice_id),
            serde_json::json!({}),
            vec![manifest_ref.clone()],
        )?;

        slices_doc.slices[slice_index].status = SliceStatus::Done;

        ctx.emit_event(
            EventType::SliceCompleted,
            Some(task_id),
            Some(slice_id),
            serde_json::json!({}),
            vec![manifest_ref],
        )?;

        SliceOutcome {
            slice_id: slice_id.to_string(),
            passed: true,
            blocked: false,
            failed_gate: None,
            failure_kind: None,
        }
    };

    task.updated_at = time::now_epoch_z();
    ctx.save_task(&task)?;
    ctx.save_slices(&slices_doc)?;

    Ok(outcome)
}

/// `gate validate-ready --task-id` (spec.md §4.4). Gathers every slice's
/// recorded proofs, checks the task-level prerequisites, and on success
/// writes `ready.json` plus `READY/handoff.md`. `changed_files` is the
/// caller-aggregated union of every slice run's changed-files list —
/// the kernel never re-derives it from a VCS itself (spec.md §4.3).
pub fn gate_validate_ready(
    ctx: &TaskContext,
    task_id: &str,
    profile: &Profile,
    changed_files: &[String],
    user_check_required: bool,
) -> Result<(Proof, String), CskError> {
    let mut task = ctx.load_task(task_id)?;
    require_status(&task, &[TaskStatus::PlanApproved, TaskStatus::Executing])?;

    let freeze: Option<Freeze> = read_json_opt(&ctx.state_root.freeze_path(&ctx.module_path, task_id))?;
    let plan_bytes = ctx.load_plan(task_id)?;
    let plan_md = String::from_utf8_lossy(&plan_bytes).into_owned();
    let slices_doc = ctx.load_slices(task_id)?;
    let plan_approved = ctx.state_root.approval_path(&ctx.module_path, task_id, "plan").is_file();
    let user_check_present = ctx.state_root.approval_path(&ctx.module_path, task_id, "user_check").is_file();

    let mut slice_proofs: Vec<(String, GateKind, bool)> = Vec::new();
    let mut ran_commands: Vec<String> = Vec::new();
    let mut e2e_required_any = profile.e2e_required_default;

    for slice in &slices_doc.slices {
        if slice.required_gates.contains(&GateKind::E2e) {
            e2e_required_any = true;
        }
        let proofs_dir = ctx.state_root.slice_proofs_dir(&ctx.module_path, task_id, &slice.slice_id);
        for (file_name, gate) in [
            ("scope.json", GateKind::Scope),
            ("verify.json", GateKind::Verify),
            ("review.json", GateKind::Review),
            ("e2e.json", GateKind::E2e),
        ] {
            let proof: Option<Proof> = read_json_opt(&proofs_dir.join(file_name))?;
            if let Some(proof) = proof {
                slice_proofs.push((slice.slice_id.clone(), gate, proof.passed));
                if matches!(gate, GateKind::Verify | GateKind::E2e) {
                    if let Some(cmds) = proof.details.get("commands").and_then(|v| v.as_array()) {
                        for c in cmds {
                            if let Some(argv) = c.get("argv").and_then(|v| v.as_array()) {
                                let parts: Vec<String> = argv
                                    .iter()
                                    .filter_map(|a| a.as_str().map(|s| s.to_string()))
                                    .collect();
                                if !parts.is_empty() {
                                    ran_commands.push(parts.join(" "));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    let plan_headings: Vec<String> = plan_md
        .lines()
        .filter(|l| l.starts_with("## "))
        .map(|l| l.trim_start_matches("## ").trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();

    ready::evaluate(&ready::ReadyCheckInputs {
        task_id,
        freeze: freeze.as_ref(),
        plan_bytes: &plan_bytes,
        slices_doc: &slices_doc,
        plan_approved,
        slice_proofs: &slice_proofs,
        user_check_required,
        user_check_present,
        e2e_required_any,
    })?;

    let proof_path = ctx.state_root.ready_proof_path(&ctx.module_path, task_id);
    let proof = ready::write_ready_proof(&proof_path, task_id)?;

    let handoff_md = ready::render_handoff(task_id, changed_files, &ran_commands, &plan_headings);
    let handoff_path = ctx.state_root.handoff_path(&ctx.module_path, task_id);
    ready::write_handoff(&handoff_path, &handoff_md)?;

    task.status = TaskStatus::ReadyValidated;
    task.updated_at = time::now_epoch_z();
    ctx.save_task(&task)?;

    let handoff_ref = handoff_path.to_string_lossy().into_owned();
    ctx.emit_event(
        EventType::ReadyValidated,
        Some(task_id),
        None,
        serde_json::to_value(&proof)?,
        vec![proof_path.to_string_lossy().into_owned(), handoff_ref.clone()],
    )?;

    Ok((proof, handoff_ref))
}

pub fn gate_approve_ready(ctx: &TaskContext, task_id: &str, approved_by: &str) -> Result<Approval, CskError> {
    let mut task = ctx.load_task(task_id)?;
    require_status(&task, &[TaskStatus::ReadyValidated])?;

    let approval = Approval {
        kind: ApprovalKind::Ready,
        approved_by: approved_by.to_string(),
        approved_at: time::now_epoch_z(),
    };
    write_json_atomic(&ctx.state_root.approval_path(&ctx.module_path, task_id, "ready"), &approval)?;

    task.status = TaskStatus::ReadyApproved;
    task.updated_at = time::now_epoch_z();
    ctx.save_task(&task)?;

    ctx.emit_event(EventType::ReadyApproved, Some(task_id), None, serde_json::to_value(&approval)?, vec![])?;
    Ok(approval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::CommandCwd;
    use crate::core::profile;
    use tempfile::tempdir;

    fn ctx<'a>(state_root: &'a StateRoot, event_log: &'a EventLog) -> TaskContext<'a> {
        TaskContext {
            state_root,
            event_log,
            module_path: ".".to_string(),
            module_id: "root".to_string(),
            actor: "test".to_string(),
            engine_version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn task_new_creates_dense_slices_with_default_gates() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);

        let task = task_new(&c, 2, "default", 2).unwrap();
        assert_eq!(task.status, TaskStatus::Draft);
        let slices = c.load_slices(&task.task_id).unwrap();
        assert_eq!(slices.slices.len(), 2);
        assert_eq!(slices.slices[0].slice_id, "S-0001");
        assert_eq!(slices.slices[0].required_gates, vec![GateKind::Scope, GateKind::Verify, GateKind::Review]);

        let events = event_log.iter_chronological().unwrap();
        assert_eq!(events.len(), 3);
    }

    fn frozen_and_approved_task(c: &TaskContext) -> Task {
        let task = task_new(c, 1, "default", 2).unwrap();
        let mut slices = c.load_slices(&task.task_id).unwrap();
        slices.slices[0].allowed_paths = vec!["src/**".to_string()];
        slices.slices[0].verify_commands = Some(vec![crate::core::model::VerifyCommand {
            name: "smoke".into(),
            argv: vec!["true".into()],
            cwd: CommandCwd::Worktree,
            timeout_sec: 5,
        }]);
        slices.slices[0].acceptance = Some("works".to_string());
        c.save_slices(&slices).unwrap();
        std::fs::write(
            c.state_root.plan_path(&c.module_path, &task.task_id),
            format!("# Task {}\n\n## Goal\n\ndo the thing\n\n## Acceptance\n\ndone\n", task.task_id),
        )
        .unwrap();

        task_critic(c, &task.task_id).unwrap();
        task_freeze(c, &task.task_id).unwrap();
        task_approve_plan(c, &task.task_id, "alice").unwrap();
        c.load_task(&task.task_id).unwrap()
    }

    #[test]
    fn critic_passes_then_freeze_then_approve_chain() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);
        let task = frozen_and_approved_task(&c);
        assert_eq!(task.status, TaskStatus::PlanApproved);
        assert!(state_root.freeze_path(&c.module_path, &task.task_id).is_file());
        assert!(state_root.approval_path(&c.module_path, &task.task_id, "plan").is_file());
    }

    #[test]
    fn slice_run_passes_and_completes_slice() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);
        let task = frozen_and_approved_task(&c);
        let profile = profile::engine_default_profile();

        let outcome = slice_run(
            &c,
            &task.task_id,
            "S-0001",
            &profile,
            SliceRunInput {
                implement_argv: None,
                changed_files: vec!["src/lib.rs".to_string()],
                review: ReviewInput { p0: 0, p1: 0, p2: 0, p3: 0, summary: "ok".into() },
                worktree: dir.path(),
                repo: dir.path(),
            },
        )
        .unwrap();

        assert!(outcome.passed);
        let slices = c.load_slices(&task.task_id).unwrap();
        assert_eq!(slices.slices[0].status, SliceStatus::Done);
        assert!(state_root.manifest_path(&c.module_path, &task.task_id, "S-0001").is_file());
    }

    #[test]
    fn slice_run_fails_scope_and_logs_incident() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);
        let task = frozen_and_approved_task(&c);
        let profile = profile::engine_default_profile();

        let outcome = slice_run(
            &c,
            &task.task_id,
            "S-0001",
            &profile,
            SliceRunInput {
                implement_argv: None,
                changed_files: vec!["docs/readme.md".to_string()],
                review: ReviewInput { p0: 0, p1: 0, p2: 0, p3: 0, summary: "ok".into() },
                worktree: dir.path(),
                repo: dir.path(),
            },
        )
        .unwrap();

        assert!(!outcome.passed);
        assert_eq!(outcome.failed_gate, Some(GateKind::Scope));
        let incidents = incident::read_task_incidents(&state_root, ".", &task.task_id).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].kind, IncidentKind::ScopeViolation);
    }

    #[test]
    fn retry_ceiling_blocks_task_after_max_attempts() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);
        let task = frozen_and_approved_task(&c);
        let mut profile = profile::engine_default_profile();
        profile.verify_commands = Some(vec![crate::core::model::VerifyCommand {
            name: "fail".into(),
            argv: vec!["false".into()],
            cwd: CommandCwd::Worktree,
            timeout_sec: 5,
        }]);
        let mut slices = c.load_slices(&task.task_id).unwrap();
        slices.slices[0].verify_commands = None;
        c.save_slices(&slices).unwrap();

        for _ in 0..2 {
            slice_run(
                &c,
                &task.task_id,
                "S-0001",
                &profile,
                SliceRunInput {
                    implement_argv: None,
                    changed_files: vec!["src/lib.rs".to_string()],
                    review: ReviewInput { p0: 0, p1: 0, p2: 0, p3: 0, summary: "ok".into() },
                    worktree: dir.path(),
                    repo: dir.path(),
                },
            )
            .unwrap();
        }

        let task = c.load_task(&task.task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        let incidents = incident::read_task_incidents(&state_root, ".", &task.task_id).unwrap();
        assert!(incidents.iter().any(|i| i.kind == IncidentKind::TokenWaste));
    }

    #[test]
    fn slice_run_rejects_drift_and_reverts_to_critic_passed() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);
        let task = frozen_and_approved_task(&c);
        let profile = profile::engine_default_profile();

        let plan_path = state_root.plan_path(&c.module_path, &task.task_id);
        let mut contents = std::fs::read_to_string(&plan_path).unwrap();
        contents.push('x');
        std::fs::write(&plan_path, contents).unwrap();

        let err = slice_run(
            &c,
            &task.task_id,
            "S-0001",
            &profile,
            SliceRunInput {
                implement_argv: None,
                changed_files: vec!["src/lib.rs".to_string()],
                review: ReviewInput { p0: 0, p1: 0, p2: 0, p3: 0, summary: "ok".into() },
                worktree: dir.path(),
                repo: dir.path(),
            },
        )
        .unwrap_err();

        match err {
            CskError::Contract { kind, .. } => assert_eq!(kind, ContractKind::PlanDrift),
            other => panic!("expected PlanDrift, got {:?}", other),
        }
        let task = c.load_task(&task.task_id).unwrap();
        assert_eq!(task.status, TaskStatus::CriticPassed);
    }

    #[test]
    fn gate_validate_ready_passes_after_slice_completes_and_writes_handoff() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);
        let task = frozen_and_approved_task(&c);
        let profile = profile::engine_default_profile();

        slice_run(
            &c,
            &task.task_id,
            "S-0001",
            &profile,
            SliceRunInput {
                implement_argv: None,
                changed_files: vec!["src/lib.rs".to_string()],
                review: ReviewInput { p0: 0, p1: 0, p2: 0, p3: 0, summary: "ok".into() },
                worktree: dir.path(),
                repo: dir.path(),
            },
        )
        .unwrap();

        let (proof, handoff_ref) = gate_validate_ready(&c, &task.task_id, &profile, &["src/lib.rs".to_string()], false).unwrap();
        assert!(proof.passed);
        assert!(std::path::Path::new(&handoff_ref).is_file());

        let task = c.load_task(&task.task_id).unwrap();
        assert_eq!(task.status, TaskStatus::ReadyValidated);
    }

    #[test]
    fn gate_validate_ready_fails_when_slice_not_yet_run() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);
        let task = frozen_and_approved_task(&c);
        let profile = profile::engine_default_profile();

        let err = gate_validate_ready(&c, &task.task_id, &profile, &[], false).unwrap_err();
        match err {
            CskError::Contract { kind, .. } => assert_eq!(kind, ContractKind::ReadyPrerequisitesMissing),
            other => panic!("expected ReadyPrerequisitesMissing, got {:?}", other),
        }
    }
}
