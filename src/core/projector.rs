//! Status projector (spec.md §4.7): derives a read-only view of the
//! project from disk state plus the event log. Never mutates anything —
//! `gate_validate_ready`/`slice_run`/etc. are the only writers.

use crate::core::error::CskError;
use crate::core::eventlog::EventLog;
use crate::core::model::{EventType, Task, TaskStatus};
use crate::core::path::{read_json_opt, StateRoot};
use crate::core::registry;
use std::collections::BTreeMap;

/// Overall/per-module phase. Declaration order is priority order (later
/// variants win ties) — `Blocked` and `RetroRequired` need attention
/// first, `Idle` last (spec.md §4.7 "Active-module selection").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectPhase {
    NotBootstrapped,
    Idle,
    Planning,
    PlanFrozen,
    Executing,
    ReadyValidated,
    RetroRequired,
    Blocked,
}

fn phase_of_status(status: TaskStatus) -> ProjectPhase {
    match status {
        TaskStatus::Draft | TaskStatus::CriticPassed => ProjectPhase::Planning,
        TaskStatus::Frozen => ProjectPhase::PlanFrozen,
        TaskStatus::PlanApproved | TaskStatus::Executing => ProjectPhase::Executing,
        TaskStatus::ReadyValidated => ProjectPhase::ReadyValidated,
        TaskStatus::ReadyApproved => ProjectPhase::RetroRequired,
        TaskStatus::Blocked => ProjectPhase::Blocked,
        // `retro_done`/`closed` need no further kernel action (spec.md §9
        // open question: closing past `retro_done` is an administrative
        // action outside kernel scope, decided in DESIGN.md).
        TaskStatus::RetroDone | TaskStatus::Closed => ProjectPhase::Idle,
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ModuleStatus {
    pub module_id: String,
    pub phase: ProjectPhase,
    pub active_task_id: Option<String>,
    pub active_slice_id: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Counters {
    pub tasks_by_status: BTreeMap<String, u32>,
    pub total_proofs: u32,
    pub total_retros: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct NextAction {
    pub recommended: String,
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusView {
    pub project_phase: ProjectPhase,
    pub modules: Vec<ModuleStatus>,
    pub counters: Counters,
    pub next: NextAction,
}

fn status_key(status: TaskStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Every task belonging to `module_path`, read from its task directory.
/// `pub(crate)` so `validator` can reuse the same directory walk.
pub(crate) fn tasks_for_module(state_root: &StateRoot, module_path: &str) -> Result<Vec<Task>, CskError> {
    let dir = state_root.module_tasks_dir(module_path);
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let task_id = entry.file_name().to_string_lossy().into_owned();
        if let Some(task) = read_json_opt::<Task>(&state_root.task_json_path(module_path, &task_id))? {
            out.push(task);
        }
    }
    Ok(out)
}

/// Pick the active task in a module: highest phase priority, then most
/// recent `updated_at`, then lexical `task_id` (spec.md §4.7).
fn pick_active(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().max_by(|a, b| {
        phase_of_status(a.status)
            .cmp(&phase_of_status(b.status))
            .then_with(|| a.updated_at.cmp(&b.updated_at))
            .then_with(|| a.task_id.cmp(&b.task_id))
    })
}

fn active_slice_id(state_root: &StateRoot, module_path: &str, task: &Task) -> Result<Option<String>, CskError> {
    let doc = read_json_opt::<crate::core::model::SlicesDocument>(&state_root.slices_path(module_path, &task.task_id))?;
    match doc {
        Some(doc) => Ok(doc.active_slice()?.map(|s| s.slice_id.clone())),
        None => Ok(None),
    }
}

/// Build the full status view (spec.md §4.7). `modules` is the list of
/// `(module_id, module_path)` pairs from the registry.
pub fn build(state_root: &StateRoot, event_log: &EventLog) -> Result<StatusView, CskError> {
    if !state_root.is_bootstrapped() {
        return Ok(StatusView {
            project_phase: ProjectPhase::NotBootstrapped,
            modules: vec![],
            counters: Counters::default(),
            next: NextAction {
                recommended: "bootstrap".to_string(),
                alternatives: vec![],
            },
        });
    }

    let registry = registry::load(state_root)?;
    let mut modules = Vec::new();
    let mut tasks_by_status: BTreeMap<String, u32> = BTreeMap::new();
    let mut all_tasks: Vec<(String, Task)> = Vec::new();

    for entry in registry.modules.values() {
        if !entry.initialized {
            continue;
        }
        let tasks = tasks_for_module(state_root, &entry.path)?;
        for t in &tasks {
            *tasks_by_status.entry(status_key(t.status)).or_insert(0) += 1;
        }
        let active = pick_active(&tasks).cloned();
        let (active_task_id, active_slice_id_val, phase) = match &active {
            Some(t) => (
                Some(t.task_id.clone()),
                active_slice_id(state_root, &entry.path, t)?,
                phase_of_status(t.status),
            ),
            None => (None, None, ProjectPhase::Idle),
        };
        for t in tasks {
            all_tasks.push((entry.module_id.clone(), t));
        }
        modules.push(ModuleStatus {
            module_id: entry.module_id.clone(),
            phase,
            active_task_id,
            active_slice_id: active_slice_id_val,
        });
    }

    let project_phase = modules
        .iter()
        .map(|m| m.phase)
        .max()
        .unwrap_or(ProjectPhase::Idle);

    let events = event_log.iter_chronological()?;
    let total_proofs = events
        .iter()
        .filter(|e| matches!(e.event_type, EventType::ProofPackWritten | EventType::ReadyValidated))
        .count() as u32;
    let total_retros = events
        .iter()
        .filter(|e| e.event_type == EventType::RetroCompleted)
        .count() as u32;

    let next = route_next(&modules);

    Ok(StatusView {
        project_phase,
        modules,
        counters: Counters {
            tasks_by_status,
            total_proofs,
            total_retros,
        },
        next,
    })
}

/// Routing table (spec.md §4.7), top match wins. A module with a frozen,
/// not-yet-plan-approved task routes to `task approve-plan` ahead of the
/// slice-run row — `slice_run` requires `plan_approved`/`executing` and
/// would reject a frozen task outright. The "skills out of sync" row from
/// the original table is dropped: this kernel has no skill-template
/// rendering (spec.md Non-goals).
fn route_next(modules: &[ModuleStatus]) -> NextAction {
    let has = |phase: ProjectPhase| modules.iter().any(|m| m.phase == phase);

    if has(ProjectPhase::ReadyValidated) {
        return NextAction {
            recommended: "gate approve-ready".to_string(),
            alternatives: vec!["status".to_string()],
        };
    }
    if has(ProjectPhase::RetroRequired) || has(ProjectPhase::Blocked) {
        return NextAction {
            recommended: "retro run".to_string(),
            alternatives: vec!["status".to_string()],
        };
    }
    if has(ProjectPhase::PlanFrozen) {
        return NextAction {
            recommended: "task approve-plan".to_string(),
            alternatives: vec!["status".to_string()],
        };
    }
    if has(ProjectPhase::Executing) || has(ProjectPhase::Planning) {
        return NextAction {
            recommended: "slice run".to_string(),
            alternatives: vec!["status".to_string(), "gate validate-ready".to_string()],
        };
    }
    NextAction {
        recommended: "task new".to_string(),
        alternatives: vec!["status".to_string()],
    }
}
