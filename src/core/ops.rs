//! Typed operation dispatch (spec.md §9 "Design Notes" redesign flag;
//! SPEC_FULL.md [OPS]). One closed `Operation` enum, one exhaustive
//! `match` in [`dispatch`] — no open-ended string-keyed routing table.
//! The CLI front-end (`src/cli.rs`) is the only intended caller; nothing
//! in here knows about argv parsing or stdout formatting.

use crate::core::bootstrap;
use crate::core::error::CskError;
use crate::core::eventlog::EventLog;
use crate::core::gates::review::ReviewInput;
use crate::core::mission::{self, MissionIntake};
use crate::core::model::{Approval, Freeze, Mission, Proof, RegistryEntry, Task};
use crate::core::path::StateRoot;
use crate::core::profile;
use crate::core::projector::{self, StatusView};
use crate::core::registry;
use crate::core::replay::{self, ReplayViolation};
use crate::core::retro;
use crate::core::task::{self, CriticReport, SliceOutcome, SliceRunInput, TaskContext};
use crate::core::validator::{self, ValidationFinding};
use std::path::PathBuf;

/// Inputs one slice attempt needs that an external executor supplies —
/// the owned counterpart of [`task::SliceRunInput`], which borrows its
/// worktree/repo paths and can't live inside a dispatchable enum.
pub struct SliceRunParams {
    pub implement_argv: Option<Vec<String>>,
    pub changed_files: Vec<String>,
    pub review: ReviewInput,
    pub worktree: PathBuf,
    pub repo: PathBuf,
}

/// One variant per user-facing command (SPEC_FULL.md [OPS]). Dispatch is
/// an exhaustive `match`; adding a command means adding a variant here.
pub enum Operation {
    Bootstrap,
    ModuleAdd { module_id: String, path: String },
    ModuleInit { module_id: String },
    MissionCreate { intake: MissionIntake },
    TaskNew { module_id: String, slice_count: u32, profile_name: String, max_attempts: u32 },
    TaskCritic { module_id: String, task_id: String },
    TaskFreeze { module_id: String, task_id: String },
    TaskApprovePlan { module_id: String, task_id: String, approved_by: String },
    SliceRun { module_id: String, task_id: String, slice_id: String, profile_name: String, params: SliceRunParams },
    GateValidateReady { module_id: String, task_id: String, profile_name: String, changed_files: Vec<String>, user_check_required: bool },
    GateApproveReady { module_id: String, task_id: String, approved_by: String },
    RetroRun { module_id: String, task_id: String },
    Status,
    Replay,
    Validate { strict: bool },
}

/// The result of a successfully dispatched [`Operation`]. `envelope.rs`
/// turns one of these into the `summary/status/next/refs/errors/data`
/// decision envelope (spec.md §6); nothing here formats output itself.
pub enum OperationOutcome {
    Bootstrapped { first_run: bool },
    ModuleAdded(RegistryEntry),
    ModuleInitialized(RegistryEntry),
    MissionCreated(Mission),
    TaskCreated(Task),
    TaskCritiqued(CriticReport),
    TaskFrozen(Freeze),
    PlanApproved(Approval),
    SliceRan(SliceOutcome),
    ReadyValidated { proof: Proof, handoff_path: String },
    ReadyApproved(Approval),
    RetroCompleted { retro_md_path: String, patch_path: String },
    Status(StatusView),
    Replayed(Vec<ReplayViolation>),
    Validated(Vec<ValidationFinding>),
}

/// Build the [`TaskContext`] for `module_id` by resolving its registered
/// path. Every module-scoped operation needs this first.
fn module_context<'a>(
    state_root: &'a StateRoot,
    event_log: &'a EventLog,
    actor: &str,
    engine_version: &str,
    module_id: &str,
) -> Result<TaskContext<'a>, CskError> {
    let reg = registry::load(state_root)?;
    let entry = reg
        .modules
        .get(module_id)
        .ok_or_else(|| CskError::NotFound(format!("module {}", module_id)))?;
    Ok(TaskContext {
        state_root,
        event_log,
        module_path: entry.path.clone(),
        module_id: module_id.to_string(),
        actor: actor.to_string(),
        engine_version: engine_version.to_string(),
    })
}

/// The single entry point every command funnels through (SPEC_FULL.md
/// [OPS]). `actor`/`engine_version` are threaded explicitly rather than
/// read from ambient globals (spec.md §9 "no ambient sinks").
pub fn dispatch(
    op: Operation,
    state_root: &StateRoot,
    event_log: &EventLog,
    actor: &str,
    engine_version: &str,
) -> Result<OperationOutcome, CskError> {
    match op {
        Operation::Bootstrap => {
            let first_run = bootstrap::bootstrap(state_root, event_log, actor, engine_version)?;
            Ok(OperationOutcome::Bootstrapped { first_run })
        }

        Operation::ModuleAdd { module_id, path } => {
            let entry = registry::module_add(state_root, event_log, actor, engine_version, &module_id, &path)?;
            Ok(OperationOutcome::ModuleAdded(entry))
        }

        Operation::ModuleInit { module_id } => {
            let entry = registry::module_init(state_root, event_log, actor, engine_version, &module_id)?;
            Ok(OperationOutcome::ModuleInitialized(entry))
        }

        Operation::MissionCreate { intake } => {
            let created = mission::mission_create(state_root, event_log, actor, engine_version, intake)?;
            Ok(OperationOutcome::MissionCreated(created))
        }

        Operation::TaskNew { module_id, slice_count, profile_name, max_attempts } => {
            let ctx = module_context(state_root, event_log, actor, engine_version, &module_id)?;
            let created = task::task_new(&ctx, slice_count, &profile_name, max_attempts)?;
            Ok(OperationOutcome::TaskCreated(created))
        }

        Operation::TaskCritic { module_id, task_id } => {
            let ctx = module_context(state_root, event_log, actor, engine_version, &module_id)?;
            let report = task::task_critic(&ctx, &task_id)?;
            Ok(OperationOutcome::TaskCritiqued(report))
        }

        Operation::TaskFreeze { module_id, task_id } => {
            let ctx = module_context(state_root, event_log, actor, engine_version, &module_id)?;
            let freeze = task::task_freeze(&ctx, &task_id)?;
            Ok(OperationOutcome::TaskFrozen(freeze))
        }

        Operation::TaskApprovePlan { module_id, task_id, approved_by } => {
            let ctx = module_context(state_root, event_log, actor, engine_version, &module_id)?;
            let approval = task::task_approve_plan(&ctx, &task_id, &approved_by)?;
            Ok(OperationOutcome::PlanApproved(approval))
        }

        Operation::SliceRun { module_id, task_id, slice_id, profile_name, params } => {
            let ctx = module_context(state_root, event_log, actor, engine_version, &module_id)?;
            let resolved = profile::resolve_profile(state_root, &profile_name)?;
            let input = SliceRunInput {
                implement_argv: params.implement_argv,
                changed_files: params.changed_files,
                review: params.review,
                worktree: &params.worktree,
                repo: &params.repo,
            };
            let outcome = task::slice_run(&ctx, &task_id, &slice_id, &resolved, input)?;
            Ok(OperationOutcome::SliceRan(outcome))
        }

        Operation::GateValidateReady { module_id, task_id, profile_name, changed_files, user_check_required } => {
            let ctx = module_context(state_root, event_log, actor, engine_version, &module_id)?;
            let resolved = profile::resolve_profile(state_root, &profile_name)?;
            let (proof, handoff_path) =
                task::gate_validate_ready(&ctx, &task_id, &resolved, &changed_files, user_check_required)?;
            Ok(OperationOutcome::ReadyValidated { proof, handoff_path })
        }

        Operation::GateApproveReady { module_id, task_id, approved_by } => {
            let ctx = module_context(state_root, event_log, actor, engine_version, &module_id)?;
            let approval = task::gate_approve_ready(&ctx, &task_id, &approved_by)?;
            Ok(OperationOutcome::ReadyApproved(approval))
        }

        Operation::RetroRun { module_id, task_id } => {
            let ctx = module_context(state_root, event_log, actor, engine_version, &module_id)?;
            let (retro_md_path, patch_path) = retro::retro_run(&ctx, &task_id)?;
            Ok(OperationOutcome::RetroCompleted { retro_md_path, patch_path })
        }

        Operation::Status => {
            let view = projector::build(state_root, event_log)?;
            Ok(OperationOutcome::Status(view))
        }

        Operation::Replay => {
            let violations = replay::check(state_root, event_log)?;
            Ok(OperationOutcome::Replayed(violations))
        }

        Operation::Validate { strict } => {
            let findings = validator::validate(state_root, strict)?;
            Ok(OperationOutcome::Validated(findings))
        }
    }
}
