//! Incident recorder (spec.md §4 row 9, §3 Incident entity).
//!
//! Every incident is appended to two JSONL streams — per-task and
//! per-project — then mirrored into the event log as `incident.logged`
//! so replay sees it without re-reading the streams.

use crate::core::error::CskError;
use crate::core::eventlog::EventLog;
use crate::core::model::{Event, EventType, Incident, IncidentKind};
use crate::core::path::StateRoot;
use crate::core::time;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

fn append_jsonl(path: &Path, incident: &Incident) -> Result<(), CskError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(incident)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Record a structured incident: append to the per-task stream (if a
/// task is named), the per-project stream, and the event log.
#[allow(clippy::too_many_arguments)]
pub fn record(
    state_root: &StateRoot,
    event_log: &EventLog,
    module_path: Option<&str>,
    kind: IncidentKind,
    phase: &str,
    task_id: Option<&str>,
    slice_id: Option<&str>,
    details: impl Into<String>,
    remediation_hint: impl Into<String>,
    actor: &str,
    engine_version: &str,
) -> Result<Incident, CskError> {
    let incident = Incident {
        id: time::new_id(),
        kind,
        phase: phase.to_string(),
        task_id: task_id.map(|s| s.to_string()),
        slice_id: slice_id.map(|s| s.to_string()),
        details: details.into(),
        remediation_hint: remediation_hint.into(),
        ts: time::now_epoch_z(),
    };

    if let (Some(module_path), Some(task_id)) = (module_path, task_id) {
        append_jsonl(&state_root.incidents_path(module_path, task_id), &incident)?;
    }
    append_jsonl(&state_root.project_incidents_path(), &incident)?;

    let event = Event {
        id: time::new_id(),
        ts: time::now_epoch_z(),
        event_type: EventType::IncidentLogged,
        actor: actor.to_string(),
        mission_id: None,
        module_id: module_path.map(|s| s.to_string()),
        task_id: task_id.map(|s| s.to_string()),
        slice_id: slice_id.map(|s| s.to_string()),
        payload: serde_json::to_value(&incident)?,
        artifact_refs: vec![],
        repo_git_head: None,
        engine_version: engine_version.to_string(),
    };
    event_log.append(&event)?;

    Ok(incident)
}

/// Read every incident recorded for one task, in append order.
pub fn read_task_incidents(state_root: &StateRoot, module_path: &str, task_id: &str) -> Result<Vec<Incident>, CskError> {
    let path = state_root.incidents_path(module_path, task_id);
    if !path.is_file() {
        return Ok(vec![]);
    }
    let contents = std::fs::read_to_string(&path)?;
    let mut out = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(line)?);
    }
    Ok(out)
}
