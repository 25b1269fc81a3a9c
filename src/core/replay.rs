//! Replay checker (spec.md §4.8): iterates events in insertion order,
//! maintaining a small projected "have we seen X for this task/slice"
//! state, and cross-checks every invariant against the artifacts that
//! should still exist on disk. A violation never panics or repairs
//! anything — it is collected and returned for the caller to report.

use crate::core::error::{ContractKind, CskError};
use crate::core::eventlog::EventLog;
use crate::core::model::{Event, EventType, Freeze, IncidentKind, Manifest, Proof};
use crate::core::path::{read_json_opt, StateRoot};
use crate::core::registry;
use std::collections::HashSet;

/// One broken invariant (spec.md §4.8 "emits `{kind, refs, next}`").
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplayViolation {
    pub kind: String,
    pub refs: Vec<String>,
    pub next: String,
}

fn module_path_for(registry: &crate::core::model::Registry, event: &Event) -> Option<String> {
    event
        .module_id
        .as_ref()
        .and_then(|id| registry.modules.get(id))
        .map(|e| e.path.clone())
}

/// Replay the full event log and return every violated invariant, in the
/// order the violating event was encountered. `Ok(vec![])` means the log
/// is consistent with what's on disk.
pub fn check(state_root: &StateRoot, event_log: &EventLog) -> Result<Vec<ReplayViolation>, CskError> {
    let registry = registry::load(state_root)?;
    let events = event_log.iter_chronological()?;

    let mut violations = Vec::new();
    let mut frozen_seen: HashSet<String> = HashSet::new();
    let mut ready_validated_seen: HashSet<String> = HashSet::new();
    let mut ready_approved_seen: HashSet<String> = HashSet::new();
    let mut blocked_seen: HashSet<String> = HashSet::new();
    let mut proof_pack_seen: HashSet<(String, String)> = HashSet::new();

    for event in &events {
        let Some(module_path) = module_path_for(&registry, event) else {
            continue;
        };
        let task_id = match &event.task_id {
            Some(t) => t.clone(),
            None => continue,
        };

        match event.event_type {
            EventType::TaskFrozen => {
                let freeze_path = state_root.freeze_path(&module_path, &task_id);
                let on_disk: Option<Freeze> = read_json_opt(&freeze_path)?;
                let from_event: Option<Freeze> = serde_json::from_value(event.payload.clone()).ok();
                let matches = match (&on_disk, &from_event) {
                    (Some(a), Some(b)) => a.plan_sha256 == b.plan_sha256 && a.slices_sha256 == b.slices_sha256,
                    _ => false,
                };
                if !matches {
                    violations.push(ReplayViolation {
                        kind: "task.frozen: freeze.json missing or does not match the frozen event".to_string(),
                        refs: vec![freeze_path.to_string_lossy().into_owned()],
                        next: format!("task freeze --task-id {}", task_id),
                    });
                } else {
                    frozen_seen.insert(task_id.clone());
                }
            }

            EventType::TaskPlanApproved => {
                let approval_path = state_root.approval_path(&module_path, &task_id, "plan");
                if !frozen_seen.contains(&task_id) || !approval_path.is_file() {
                    violations.push(ReplayViolation {
                        kind: "task.plan_approved: not preceded by task.frozen, or approvals/plan.json missing".to_string(),
                        refs: vec![approval_path.to_string_lossy().into_owned()],
                        next: format!("task approve-plan --task-id {}", task_id),
                    });
                }
            }

            EventType::ProofPackWritten => {
                let slice_id = event.slice_id.clone().unwrap_or_default();
                let manifest_ref = event.artifact_refs.first().cloned();
                let manifest: Option<Manifest> = manifest_ref
                    .as_ref()
                    .map(std::path::PathBuf::from)
                    .and_then(|p| read_json_opt(&p).ok().flatten());

                let ok = match &manifest {
                    Some(m) => m.proof_paths.iter().all(|p| {
                        read_json_opt::<Proof>(std::path::Path::new(p))
                            .ok()
                            .flatten()
                            .map(|proof| proof.passed)
                            .unwrap_or(false)
                    }),
                    None => false,
                };

                if !ok {
                    violations.push(ReplayViolation {
                        kind: "proof.pack.written: manifest or a referenced proof is missing or failing".to_string(),
                        refs: manifest_ref.into_iter().collect(),
                        next: format!("slice run --task-id {} --slice-id {}", task_id, slice_id),
                    });
                } else {
                    proof_pack_seen.insert((task_id.clone(), slice_id));
                }
            }

            EventType::SliceCompleted => {
                let slice_id = event.slice_id.clone().unwrap_or_default();
                let carries_manifest = event
                    .artifact_refs
                    .first()
                    .map(|p| std::path::Path::new(p).is_file())
                    .unwrap_or(false);
                if !proof_pack_seen.contains(&(task_id.clone(), slice_id.clone())) && !carries_manifest {
                    violations.push(ReplayViolation {
                        kind: "slice.completed: not preceded by proof.pack.written and carries no existing manifest ref".to_string(),
                        refs: event.artifact_refs.clone(),
                        next: format!("slice run --task-id {} --slice-id {}", task_id, slice_id),
                    });
                }
            }

            EventType::ReadyValidated => {
                let ready_path = state_root.ready_proof_path(&module_path, &task_id);
                let handoff_path = state_root.handoff_path(&module_path, &task_id);
                if !ready_path.is_file() || !handoff_path.is_file() {
                    violations.push(ReplayViolation {
                        kind: "ready.validated: ready.json or handoff.md missing".to_string(),
                        refs: vec![
                            ready_path.to_string_lossy().into_owned(),
                            handoff_path.to_string_lossy().into_owned(),
                        ],
                        next: format!("gate validate-ready --task-id {}", task_id),
                    });
                } else {
                    ready_validated_seen.insert(task_id.clone());
                }
            }

            EventType::ReadyApproved => {
                let approval_path = state_root.approval_path(&module_path, &task_id, "ready");
                if !ready_validated_seen.contains(&task_id) || !approval_path.is_file() {
                    violations.push(ReplayViolation {
                        kind: "ready.approved: not preceded by ready.validated, or approvals/ready.json missing".to_string(),
                        refs: vec![approval_path.to_string_lossy().into_owned()],
                        next: format!("gate approve-ready --task-id {}", task_id),
                    });
                } else {
                    ready_approved_seen.insert(task_id.clone());
                }
            }

            EventType::IncidentLogged => {
                if let Ok(kind) = serde_json::from_value::<IncidentKind>(
                    event.payload.get("kind").cloned().unwrap_or_default(),
                ) {
                    if kind == IncidentKind::TokenWaste {
                        blocked_seen.insert(task_id.clone());
                    }
                }
            }

            EventType::RetroCompleted => {
                let retro_path = state_root.retro_path(&module_path, &task_id);
                let has_patch = std::fs::read_dir(state_root.patches_dir())
                    .map(|entries| {
                        entries
                            .filter_map(|e| e.ok())
                            .any(|e| e.file_name().to_string_lossy().starts_with(&format!("{}-", task_id)))
                    })
                    .unwrap_or(false);
                let preceded = ready_approved_seen.contains(&task_id) || blocked_seen.contains(&task_id);
                if !preceded || !retro_path.is_file() || !has_patch {
                    violations.push(ReplayViolation {
                        kind: "retro.completed: not preceded by ready.approved/blocked, or retro.md/patch file missing".to_string(),
                        refs: vec![retro_path.to_string_lossy().into_owned()],
                        next: format!("retro run --task-id {}", task_id),
                    });
                }
            }

            _ => {}
        }
    }

    emit_checked(event_log, violations.is_empty(), events.len())?;

    Ok(violations)
}

fn emit_checked(event_log: &EventLog, ok: bool, events_checked: usize) -> Result<(), CskError> {
    let event = Event {
        id: crate::core::time::new_id(),
        ts: crate::core::time::now_epoch_z(),
        event_type: EventType::ReplayChecked,
        actor: "replay".to_string(),
        mission_id: None,
        module_id: None,
        task_id: None,
        slice_id: None,
        payload: serde_json::json!({ "ok": ok, "events_checked": events_checked }),
        artifact_refs: vec![],
        repo_git_head: None,
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    event_log.append(&event)
}

/// Convenience wrapper for callers that want a single `Result`: `Err`
/// with the first violation's details when any invariant fails.
pub fn check_strict(state_root: &StateRoot, event_log: &EventLog) -> Result<(), CskError> {
    let violations = check(state_root, event_log)?;
    if let Some(first) = violations.first() {
        return Err(CskError::contract_with_remediation(
            ContractKind::ReplayInvariantViolation,
            format!("{} violation(s), first: {}", violations.len(), first.kind),
            first.next.clone(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gates::review::ReviewInput;
    use crate::core::model::{CommandCwd, TaskStatus, VerifyCommand};
    use crate::core::profile;
    use crate::core::registry;
    use crate::core::task::{gate_approve_ready, gate_validate_ready, slice_run, task_approve_plan, task_critic, task_freeze, task_new, SliceRunInput, TaskContext};
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path) -> (StateRoot, EventLog) {
        let state_root = StateRoot::resolve(Some(dir), dir).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        std::fs::create_dir_all(state_root.engine_dir()).unwrap();
        std::fs::write(state_root.engine_dir().join("VERSION"), "0.1.0").unwrap();
        registry::module_add(&state_root, &event_log, "test", "0.1.0", "root", ".").unwrap();
        registry::module_init(&state_root, &event_log, "test", "0.1.0", "root").unwrap();
        (state_root, event_log)
    }

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

    fn run_s1(c: &TaskContext, dir: &std::path::Path) -> String {
        let task = task_new(c, 1, "default", 2).unwrap();
        let mut slices = c.load_slices(&task.task_id).unwrap();
        slices.slices[0].allowed_paths = vec!["src/**".to_string()];
        slices.slices[0].verify_commands = Some(vec![VerifyCommand {
            name: "smoke".into(),
            argv: vec!["true".into()],
            cwd: CommandCwd::Worktree,
            timeout_sec: 5,
        }]);
        slices.slices[0].acceptance = Some("works".to_string());
        c.save_slices(&slices).unwrap();
        std::fs::write(
            c.state_root.plan_path(&c.module_path, &task.task_id),
            format!("# Task {}\n\n## Goal\n\ndo it\n\n## Acceptance\n\ndone\n", task.task_id),
        )
        .unwrap();

        task_critic(c, &task.task_id).unwrap();
        task_freeze(c, &task.task_id).unwrap();
        task_approve_plan(c, &task.task_id, "alice").unwrap();

        let profile = profile::engine_default_profile();
        slice_run(
            c,
            &task.task_id,
            "S-0001",
            &profile,
            SliceRunInput {
                implement_argv: None,
                changed_files: vec!["src/lib.rs".to_string()],
                review: ReviewInput { p0: 0, p1: 0, p2: 0, p3: 0, summary: "ok".into() },
                worktree: dir,
                repo: dir,
            },
        )
        .unwrap();

        gate_validate_ready(c, &task.task_id, &profile, &["src/lib.rs".to_string()], false).unwrap();
        gate_approve_ready(c, &task.task_id, "alice").unwrap();
        task.task_id
    }

    #[test]
    fn clean_happy_path_replays_with_no_violations() {
        let dir = tempdir().unwrap();
        let (state_root, event_log) = setup(dir.path());
        let c = ctx(&state_root, &event_log);
        run_s1(&c, dir.path());

        let violations = check(&state_root, &event_log).unwrap();
        assert!(violations.is_empty(), "unexpected violations: {:?}", violations);
    }

    #[test]
    fn deleting_handoff_is_caught_as_ready_validated_violation() {
        let dir = tempdir().unwrap();
        let (state_root, event_log) = setup(dir.path());
        let c = ctx(&state_root, &event_log);
        let task_id = run_s1(&c, dir.path());

        std::fs::remove_file(state_root.handoff_path(&c.module_path, &task_id)).unwrap();

        let violations = check(&state_root, &event_log).unwrap();
        assert!(violations.iter().any(|v| v.kind.starts_with("ready.validated")));
        assert!(violations.iter().any(|v| v.refs.iter().any(|r| r.ends_with("handoff.md"))));
    }

    #[test]
    fn retro_without_ready_approved_or_blocked_is_a_violation() {
        let dir = tempdir().unwrap();
        let (state_root, event_log) = setup(dir.path());
        let c = ctx(&state_root, &event_log);

        let task = task_new(&c, 1, "default", 2).unwrap();
        let mut task = task;
        task.status = TaskStatus::Blocked;
        c.save_task(&task).unwrap();
        crate::core::retro::retro_run(&c, &task.task_id).unwrap();

        let violations = check(&state_root, &event_log).unwrap();
        assert!(violations.iter().any(|v| v.kind.starts_with("retro.completed")));
    }
}
