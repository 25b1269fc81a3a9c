//! Registry: the shared `module_id -> {path, registered, initialized}`
//! lookup surface (spec.md §3 "Registry", §9 "auto-magical registry /
//! module discovery" redesign flag — the kernel accepts only explicit
//! `(module_id, path)` pairs, never runs discovery itself).

use crate::core::error::CskError;
use crate::core::eventlog::EventLog;
use crate::core::model::{Event, EventType, Registry, RegistryEntry};
use crate::core::path::{read_json_opt, write_json_atomic, StateRoot};
use crate::core::time;

pub fn load(state_root: &StateRoot) -> Result<Registry, CskError> {
    Ok(read_json_opt(&state_root.registry_path())?.unwrap_or_default())
}

fn save(state_root: &StateRoot, registry: &Registry) -> Result<(), CskError> {
    write_json_atomic(&state_root.registry_path(), registry)
}

/// `module add` — register an explicit `(module_id, path)` pair. The
/// candidate map that proposed this pair came from an external
/// discovery helper; the kernel never runs discovery itself.
pub fn module_add(
    state_root: &StateRoot,
    event_log: &EventLog,
    actor: &str,
    engine_version: &str,
    module_id: &str,
    path: &str,
) -> Result<RegistryEntry, CskError> {
    let mut registry = load(state_root)?;
    if registry.modules.contains_key(module_id) {
        return Err(CskError::contract(
            crate::core::error::ContractKind::SchemaViolation,
            format!("module {} is already registered", module_id),
        ));
    }
    let now = time::now_epoch_z();
    let entry = RegistryEntry {
        module_id: module_id.to_string(),
        path: path.to_string(),
        registered: true,
        initialized: false,
        created_at: now.clone(),
        updated_at: now,
    };
    registry.modules.insert(module_id.to_string(), entry.clone());
    save(state_root, &registry)?;

    let event = Event {
        id: time::new_id(),
        ts: time::now_epoch_z(),
        event_type: EventType::ModuleAdded,
        actor: actor.to_string(),
        mission_id: None,
        module_id: Some(module_id.to_string()),
        task_id: None,
        slice_id: None,
        payload: serde_json::to_value(&entry)?,
        artifact_refs: vec![],
        repo_git_head: None,
        engine_version: engine_version.to_string(),
    };
    event_log.append(&event)?;
    Ok(entry)
}

/// `module init` — materialise the per-module scaffold (task root
/// directory) and flip `initialized`. Initialisation is observable per
/// spec.md §3: a module is `initialized` once its scaffold exists on disk.
pub fn module_init(
    state_root: &StateRoot,
    event_log: &EventLog,
    actor: &str,
    engine_version: &str,
    module_id: &str,
) -> Result<RegistryEntry, CskError> {
    let mut registry = load(state_root)?;
    let entry = registry
        .modules
        .get_mut(module_id)
        .ok_or_else(|| CskError::NotFound(format!("module {}", module_id)))?;

    let module_path = entry.path.clone();
    std::fs::create_dir_all(state_root.module_tasks_dir(&module_path))?;
    std::fs::create_dir_all(state_root.module_run_dir(&module_path))?;

    entry.initialized = true;
    entry.updated_at = time::now_epoch_z();
    let entry = entry.clone();
    save(state_root, &registry)?;

    let event = Event {
        id: time::new_id(),
        ts: time::now_epoch_z(),
        event_type: EventType::ModuleInitialized,
        actor: actor.to_string(),
        mission_id: None,
        module_id: Some(module_id.to_string()),
        task_id: None,
        slice_id: None,
        payload: serde_json::to_value(&entry)?,
        artifact_refs: vec![],
        repo_git_head: None,
        engine_version: engine_version.to_string(),
    };
    event_log.append(&event)?;
    Ok(entry)
}
