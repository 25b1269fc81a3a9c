//! Retro stage (spec.md §4.5): cluster incidents, write a retro report
//! and at least one patch proposal, close out the task.

use crate::core::error::{ContractKind, CskError};
use crate::core::incident;
use crate::core::model::{EventType, TaskStatus};
use crate::core::path::write_atomic;
use crate::core::task::TaskContext;
use crate::core::time;
use std::collections::BTreeMap;

/// `retro_run(task_id)` (spec.md §4.5). Permitted only from
/// `ready_approved` or `blocked`.
pub fn retro_run(ctx: &TaskContext, task_id: &str) -> Result<(String, String), CskError> {
    let mut task = ctx.load_task(task_id)?;
    if !matches!(task.status, TaskStatus::ReadyApproved | TaskStatus::Blocked) {
        return Err(CskError::contract(
            ContractKind::RetroPreconditionMissing,
            format!(
                "task {} is in status {:?}; retro requires ready_approved or blocked",
                task_id, task.status
            ),
        ));
    }

    let incidents = incident::read_task_incidents(ctx.state_root, &ctx.module_path, task_id)?;

    let mut clusters: BTreeMap<String, u32> = BTreeMap::new();
    for inc in &incidents {
        let key = serde_json::to_value(inc.kind)?
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        *clusters.entry(key).or_insert(0) += 1;
    }

    let mut retro_md = format!("# Retro for {}\n\n", task_id);
    retro_md.push_str("| kind | count |\n|---|---|\n");
    if clusters.is_empty() {
        retro_md.push_str("| (none) | 0 |\n");
    } else {
        for (kind, count) in &clusters {
            retro_md.push_str(&format!("| {} | {} |\n", kind, count));
        }
    }
    let retro_path = ctx.state_root.retro_path(&ctx.module_path, task_id);
    write_atomic(&retro_path, retro_md.as_bytes())?;

    let stamp = time::now_epoch_z().replace([':', '.'], "-");
    let patch_path = ctx.state_root.patches_dir().join(format!("{}-{}.md", task_id, stamp));
    let patch_body = if clusters.is_empty() {
        format!("# Patch proposal for {}\n\nNo incidents were recorded; no-op proposal.\n", task_id)
    } else {
        let mut body = format!("# Patch proposal for {}\n\n", task_id);
        for (kind, count) in &clusters {
            body.push_str(&format!("- address {} occurrences of `{}`\n", count, kind));
        }
        body
    };
    write_atomic(&patch_path, patch_body.as_bytes())?;

    task.status = TaskStatus::RetroDone;
    task.updated_at = time::now_epoch_z();
    ctx.save_task(&task)?;

    let retro_ref = retro_path.to_string_lossy().into_owned();
    let patch_ref = patch_path.to_string_lossy().into_owned();
    ctx.emit_event(
        EventType::RetroCompleted,
        Some(task_id),
        None,
        serde_json::json!({ "clusters": clusters }),
        vec![retro_ref.clone(), patch_ref.clone()],
    )?;

    Ok((retro_ref, patch_ref))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::eventlog::EventLog;
    use crate::core::incident::record;
    use crate::core::model::IncidentKind;
    use crate::core::path::StateRoot;
    use crate::core::task::task_new;
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
    fn retro_run_rejects_wrong_status() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);
        let task = task_new(&c, 1, "default", 2).unwrap();
        assert!(retro_run(&c, &task.task_id).is_err());
    }

    #[test]
    fn retro_run_from_blocked_writes_retro_and_patch() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        let event_log = EventLog::open(&state_root.event_log_path()).unwrap();
        let c = ctx(&state_root, &event_log);
        let mut task = task_new(&c, 1, "default", 2).unwrap();
        task.status = TaskStatus::Blocked;
        c.save_task(&task).unwrap();

        record(
            &state_root,
            &event_log,
            Some("."),
            IncidentKind::TokenWaste,
            "slice_run",
            Some(&task.task_id),
            None,
            "exhausted attempts",
            "retro run",
            "test",
            "0.1.0",
        )
        .unwrap();

        let (retro_ref, patch_ref) = retro_run(&c, &task.task_id).unwrap();
        assert!(std::path::Path::new(&retro_ref).is_file());
        assert!(std::path::Path::new(&patch_ref).is_file());

        let task = c.load_task(&task.task_id).unwrap();
        assert_eq!(task.status, TaskStatus::RetroDone);
    }
}
