//! Bootstrap: materialise the `.csk/` layout and stamp the engine version
//! (spec.md §4 row 1). Idempotent — re-running on an already-bootstrapped
//! root just confirms the layout and returns the existing version.

use crate::core::error::CskError;
use crate::core::eventlog::EventLog;
use crate::core::model::{Event, EventType};
use crate::core::path::{write_atomic, StateRoot};
use crate::core::time;

/// `bootstrap` (spec.md §4.1): create `.csk/{engine,local,app}` plus the
/// event log and a `VERSION` stamp, then emit `bootstrap.completed`.
pub fn bootstrap(state_root: &StateRoot, event_log: &EventLog, actor: &str, engine_version: &str) -> Result<bool, CskError> {
    let already = state_root.is_bootstrapped();

    std::fs::create_dir_all(state_root.engine_dir())?;
    std::fs::create_dir_all(state_root.local_dir().join("profiles"))?;
    std::fs::create_dir_all(state_root.patches_dir())?;
    std::fs::create_dir_all(state_root.app_dir())?;
    std::fs::create_dir_all(state_root.missions_dir())?;
    std::fs::create_dir_all(state_root.modules_dir())?;

    if !already {
        write_atomic(&state_root.engine_dir().join("VERSION"), engine_version.as_bytes())?;

        let event = Event {
            id: time::new_id(),
            ts: time::now_epoch_z(),
            event_type: EventType::BootstrapCompleted,
            actor: actor.to_string(),
            mission_id: None,
            module_id: None,
            task_id: None,
            slice_id: None,
            payload: serde_json::json!({ "engine_version": engine_version }),
            artifact_refs: vec![],
            repo_git_head: None,
            engine_version: engine_version.to_string(),
        };
        event_log.append(&event)?;
    }

    Ok(!already)
}
