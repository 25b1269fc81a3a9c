//! Validator (spec.md §4.9): a structural pass independent of the event
//! log. Schema-validates every JSON artifact, cross-checks `task.status`
//! against the artifacts it implies, and checks that every `module_id`
//! referenced by a mission or task is actually registered.

use crate::core::error::CskError;
use crate::core::model::{Mission, Task, TaskStatus};
use crate::core::path::StateRoot;
use crate::core::projector::tasks_for_module;
use crate::core::registry;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub message: String,
    pub refs: Vec<String>,
}

fn finding(findings: &mut Vec<ValidationFinding>, severity: Severity, message: impl Into<String>, refs: Vec<String>) {
    findings.push(ValidationFinding {
        severity,
        message: message.into(),
        refs,
    });
}

/// Read and parse `path` as `T`; a missing file is silently `None`, a
/// present-but-unparseable file becomes an `Error` finding rather than
/// aborting the whole pass.
fn read_or_finding<T: serde::de::DeserializeOwned>(
    path: &Path,
    findings: &mut Vec<ValidationFinding>,
    what: &str,
) -> Option<T> {
    if !path.is_file() {
        return None;
    }
    match std::fs::read(path).ok().and_then(|bytes| serde_json::from_slice::<T>(&bytes).ok()) {
        Some(value) => Some(value),
        None => {
            finding(
                findings,
                Severity::Error,
                format!("{} is not valid JSON matching its schema", what),
                vec![path.to_string_lossy().into_owned()],
            );
            None
        }
    }
}

fn validate_task(state_root: &StateRoot, module_path: &str, task: &Task, registry_module_id: &str, findings: &mut Vec<ValidationFinding>) {
    if task.module_id != registry_module_id {
        finding(
            findings,
            Severity::Warning,
            format!("task {} has module_id {} but lives under registry module {}", task.task_id, task.module_id, registry_module_id),
            vec![],
        );
    }

    let slices_path = state_root.slices_path(module_path, &task.task_id);
    let slices: Option<crate::core::model::SlicesDocument> = read_or_finding(&slices_path, findings, "slices.json");
    if let Some(slices) = &slices {
        if slices.slices.is_empty() {
            finding(findings, Severity::Error, format!("task {} has an empty slices.json", task.task_id), vec![slices_path.to_string_lossy().into_owned()]);
        }
        for slice in &slices.slices {
            if slice.deps.contains(&slice.slice_id) {
                finding(
                    findings,
                    Severity::Error,
                    format!("slice {} in task {} depends on itself", slice.slice_id, task.task_id),
                    vec![slices_path.to_string_lossy().into_owned()],
                );
            }
        }
        if slices.topological_order().is_err() {
            finding(
                findings,
                Severity::Error,
                format!("task {} has a cyclic or undefined slice dependency", task.task_id),
                vec![slices_path.to_string_lossy().into_owned()],
            );
        }
    } else {
        finding(findings, Severity::Error, format!("task {} has no slices.json", task.task_id), vec![slices_path.to_string_lossy().into_owned()]);
    }

    let expect = |findings: &mut Vec<ValidationFinding>, path: std::path::PathBuf, what: &str| {
        if !path.is_file() {
            finding(
                findings,
                Severity::Error,
                format!("task {} is {:?} but {} is missing", task.task_id, task.status, what),
                vec![path.to_string_lossy().into_owned()],
            );
        }
    };

    match task.status {
        TaskStatus::Draft => {}
        TaskStatus::CriticPassed => {
            expect(findings, state_root.critic_report_path(module_path, &task.task_id), "critic_report.json");
        }
        TaskStatus::Frozen => {
            expect(findings, state_root.freeze_path(module_path, &task.task_id), "freeze.json");
        }
        TaskStatus::PlanApproved | TaskStatus::Executing => {
            expect(findings, state_root.freeze_path(module_path, &task.task_id), "freeze.json");
            expect(findings, state_root.approval_path(module_path, &task.task_id, "plan"), "approvals/plan.json");
        }
        TaskStatus::Blocked => {}
        TaskStatus::ReadyValidated => {
            expect(findings, state_root.ready_proof_path(module_path, &task.task_id), "ready.json");
            expect(findings, state_root.handoff_path(module_path, &task.task_id), "READY/handoff.md");
        }
        TaskStatus::ReadyApproved => {
            expect(findings, state_root.approval_path(module_path, &task.task_id, "ready"), "approvals/ready.json");
        }
        TaskStatus::RetroDone => {
            expect(findings, state_root.retro_path(module_path, &task.task_id), "retro.md");
        }
        TaskStatus::Closed => {}
    }
}

fn validate_missions(state_root: &StateRoot, registry: &crate::core::model::Registry, findings: &mut Vec<ValidationFinding>) -> Result<(), CskError> {
    let dir = state_root.missions_dir();
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let mission_id = entry.file_name().to_string_lossy().into_owned();
        let path = dir.join(&mission_id).join("mission.json");
        let mission: Option<Mission> = read_or_finding(&path, findings, "mission.json");
        let Some(mission) = mission else { continue };

        for module_id in mission.routing.iter().chain(mission.milestones.iter().flat_map(|m| m.modules.iter())) {
            if !registry.modules.contains_key(module_id) {
                finding(
                    findings,
                    Severity::Error,
                    format!("mission {} references unknown module_id {}", mission.mission_id, module_id),
                    vec![path.to_string_lossy().into_owned()],
                );
            }
        }
    }
    Ok(())
}

/// Run the full structural pass. In `strict` mode, any `Warning` finding
/// also fails the call (spec.md §4.9 "strict mode promotes warnings to
/// failures").
pub fn validate(state_root: &StateRoot, strict: bool) -> Result<Vec<ValidationFinding>, CskError> {
    let registry = registry::load(state_root)?;
    let mut findings = Vec::new();

    for entry in registry.modules.values() {
        if !entry.initialized {
            continue;
        }
        for task in tasks_for_module(state_root, &entry.path)? {
            validate_task(state_root, &entry.path, &task, &entry.module_id, &mut findings);
        }
    }

    validate_missions(state_root, &registry, &mut findings)?;

    if strict {
        Ok(findings)
    } else {
        Ok(findings.into_iter().filter(|f| f.severity == Severity::Error).collect())
    }
}

/// `true` if `validate` would report nothing.
pub fn is_clean(state_root: &StateRoot, strict: bool) -> Result<bool, CskError> {
    Ok(validate(state_root, strict)?.is_empty())
}
