//! Mission orchestrator (spec.md §4 row 8, §3 Mission entity).
//!
//! `csk` never runs the interactive wizard/intake flow itself (spec.md
//! §1 out-of-scope list): [`MissionIntake`] is the plain struct an
//! external collaborator hands in once it has a final answer bundle.
//! Worktree creation is likewise external — [`record_worktree`] only
//! consumes an already-created `workdir` path (spec.md §1, §9).

use crate::core::error::{ContractKind, CskError};
use crate::core::eventlog::EventLog;
use crate::core::model::{Event, EventType, Milestone, Mission};
use crate::core::path::{next_sequential_id, read_json_opt, write_json_atomic, StateRoot};
use crate::core::time;
use std::collections::BTreeMap;
use std::path::Path;

/// The final answer bundle an external wizard/intake flow produces.
/// Only milestone 1 is detailed at creation time (spec.md §3 "only
/// milestone-1 is detailed").
pub struct MissionIntake {
    pub spec_text: String,
    pub routing: Vec<String>,
    pub milestone_modules: Vec<String>,
}

fn mission_path(state_root: &StateRoot, mission_id: &str) -> std::path::PathBuf {
    state_root.mission_dir(mission_id).join("mission.json")
}

pub fn load(state_root: &StateRoot, mission_id: &str) -> Result<Mission, CskError> {
    read_json_opt(&mission_path(state_root, mission_id))?
        .ok_or_else(|| CskError::NotFound(format!("mission {}", mission_id)))
}

fn save(state_root: &StateRoot, mission: &Mission) -> Result<(), CskError> {
    write_json_atomic(&mission_path(state_root, &mission.mission_id), mission)
}

/// `mission create` — consume an intake answer bundle, persist the
/// mission aggregate, activate milestone 1.
pub fn mission_create(
    state_root: &StateRoot,
    event_log: &EventLog,
    actor: &str,
    engine_version: &str,
    intake: MissionIntake,
) -> Result<Mission, CskError> {
    let mission_id = next_sequential_id(&state_root.missions_dir(), "M-")?;

    let milestone = Milestone {
        id: "MS-1".to_string(),
        modules: intake.milestone_modules,
        status: "active".to_string(),
    };

    let mission = Mission {
        mission_id: mission_id.clone(),
        spec_text: intake.spec_text,
        routing: intake.routing,
        milestones: vec![milestone.clone()],
        worktrees: BTreeMap::new(),
    };
    save(state_root, &mission)?;

    let event = Event {
        id: time::new_id(),
        ts: time::now_epoch_z(),
        event_type: EventType::MissionCreated,
        actor: actor.to_string(),
        mission_id: Some(mission_id.clone()),
        module_id: None,
        task_id: None,
        slice_id: None,
        payload: serde_json::to_value(&mission)?,
        artifact_refs: vec![],
        repo_git_head: None,
        engine_version: engine_version.to_string(),
    };
    event_log.append(&event)?;

    let milestone_event = Event {
        id: time::new_id(),
        ts: time::now_epoch_z(),
        event_type: EventType::MilestoneActivated,
        actor: actor.to_string(),
        mission_id: Some(mission_id),
        module_id: None,
        task_id: None,
        slice_id: None,
        payload: serde_json::to_value(&milestone)?,
        artifact_refs: vec![],
        repo_git_head: None,
        engine_version: engine_version.to_string(),
    };
    event_log.append(&milestone_event)?;

    Ok(mission)
}

/// Record an externally created worktree's `workdir` for `module_id`
/// under `mission_id`. The kernel never creates the worktree; it only
/// verifies the path exists and persists the mapping (spec.md §9).
pub fn record_worktree(
    state_root: &StateRoot,
    event_log: &EventLog,
    actor: &str,
    engine_version: &str,
    mission_id: &str,
    module_id: &str,
    workdir: &Path,
) -> Result<(), CskError> {
    let mut mission = load(state_root, mission_id)?;

    if !workdir.is_dir() {
        let event = Event {
            id: time::new_id(),
            ts: time::now_epoch_z(),
            event_type: EventType::WorktreeFailed,
            actor: actor.to_string(),
            mission_id: Some(mission_id.to_string()),
            module_id: Some(module_id.to_string()),
            task_id: None,
            slice_id: None,
            payload: serde_json::json!({ "workdir": workdir.to_string_lossy() }),
            artifact_refs: vec![],
            repo_git_head: None,
            engine_version: engine_version.to_string(),
        };
        event_log.append(&event)?;
        return Err(CskError::contract(
            ContractKind::WorktreeCreateFailed,
            format!("workdir {} does not exist", workdir.display()),
        ));
    }

    mission
        .worktrees
        .insert(module_id.to_string(), workdir.to_string_lossy().into_owned());
    save(state_root, &mission)?;

    std::fs::create_dir_all(state_root.worktree_path(mission_id, module_id))?;

    let event = Event {
        id: time::new_id(),
        ts: time::now_epoch_z(),
        event_type: EventType::WorktreeCreated,
        actor: actor.to_string(),
        mission_id: Some(mission_id.to_string()),
        module_id: Some(module_id.to_string()),
        task_id: None,
        slice_id: None,
        payload: serde_json::json!({ "workdir": workdir.to_string_lossy() }),
        artifact_refs: vec![],
        repo_git_head: None,
        engine_version: engine_version.to_string(),
    };
    event_log.append(&event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mission_create_activates_milestone_one() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();

        let mission = mission_create(
            &state_root,
            &event_log,
            "test",
            "0.1.0",
            MissionIntake {
                spec_text: "build the thing".to_string(),
                routing: vec!["root".to_string()],
                milestone_modules: vec!["root".to_string()],
            },
        )
        .unwrap();

        assert_eq!(mission.milestones.len(), 1);
        assert_eq!(mission.milestones[0].status, "active");
        let events = event_log.iter_chronological().unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn record_worktree_rejects_nonexistent_workdir() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let mission = mission_create(
            &state_root,
            &event_log,
            "test",
            "0.1.0",
            MissionIntake { spec_text: "s".into(), routing: vec![], milestone_modules: vec![] },
        )
        .unwrap();

        let missing = dir.path().join("nope");
        let err = record_worktree(&state_root, &event_log, "test", "0.1.0", &mission.mission_id, "root", &missing);
        assert!(err.is_err());
    }

    #[test]
    fn record_worktree_persists_mapping_for_existing_dir() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let mission = mission_create(
            &state_root,
            &event_log,
            "test",
            "0.1.0",
            MissionIntake { spec_text: "s".into(), routing: vec![], milestone_modules: vec![] },
        )
        .unwrap();

        let workdir = dir.path().join("existing");
        std::fs::create_dir_all(&workdir).unwrap();
        record_worktree(&state_root, &event_log, "test", "0.1.0", &mission.mission_id, "root", &workdir).unwrap();

        let mission = load(&state_root, &mission.mission_id).unwrap();
        assert_eq!(mission.worktrees.get("root").unwrap(), &workdir.to_string_lossy().into_owned());
    }
}
