//! CLI struct definitions. All clap-derived types live here; dispatch
//! (turning a parsed [`Command`] into a [`crate::core::ops::Operation`]
//! and rendering the resulting envelope) lives in `main.rs`. This file
//! contains no gate or lifecycle logic (SPEC_FULL.md [CLI]).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "csk",
    version = env!("CARGO_PKG_VERSION"),
    about = "csk drives a software-delivery task through a chain of machine-enforced gates, producing append-only, replayable proof of every transition.",
    disable_version_flag = true
)]
pub struct Cli {
    /// Output format: 'json' (the decision envelope) or 'text' (three labelled blocks).
    #[clap(long, global = true, default_value = "json")]
    pub format: String,
    /// Identity recorded on every event this invocation appends.
    #[clap(long, global = true, default_value = "cli")]
    pub actor: String,
    /// State root (defaults to searching upward for `.csk/`).
    #[clap(long, global = true)]
    pub state_root: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Materialise the `.csk/` layout and stamp the engine version.
    Bootstrap,

    /// Register and scaffold modules in the project registry.
    Module(ModuleCli),

    /// Create missions and record worktrees.
    Mission(MissionCli),

    /// Task lifecycle: new, critic, freeze, approve-plan.
    Task(TaskCli),

    /// Run one slice through the gate pipeline.
    Slice(SliceCli),

    /// Ready-gate validation and approval.
    Gate(GateCli),

    /// Cluster incidents and close out a task.
    Retro(RetroCli),

    /// Print the current status projection.
    Status,

    /// Replay the event log and report invariant violations.
    Replay,

    /// Run the structural validator.
    Validate {
        /// Include warning-severity findings, not just errors.
        #[clap(long)]
        strict: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct ModuleCli {
    #[clap(subcommand)]
    pub command: ModuleCommand,
}

#[derive(Subcommand, Debug)]
pub enum ModuleCommand {
    /// Register an explicit (module_id, path) pair.
    Add {
        #[clap(long)]
        module_id: String,
        #[clap(long)]
        path: String,
    },
    /// Materialise a registered module's task scaffold.
    Init {
        #[clap(long)]
        module_id: String,
    },
}

#[derive(clap::Args, Debug)]
pub struct MissionCli {
    #[clap(subcommand)]
    pub command: MissionCommand,
}

#[derive(Subcommand, Debug)]
pub enum MissionCommand {
    /// Create a mission from an already-finalised intake answer bundle.
    Create {
        #[clap(long)]
        spec_file: PathBuf,
        #[clap(long = "route")]
        routing: Vec<String>,
        #[clap(long = "module")]
        milestone_modules: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
pub struct TaskCli {
    #[clap(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Create a new task under a module.
    New {
        #[clap(long)]
        module_id: String,
        #[clap(long, default_value_t = 1)]
        slice_count: u32,
        #[clap(long, default_value = "default")]
        profile: String,
        #[clap(long, default_value_t = 2)]
        max_attempts: u32,
    },
    /// Run the structural critic over a task's plan/slices.
    Critic {
        #[clap(long)]
        module_id: String,
        #[clap(long)]
        task_id: String,
    },
    /// Pin the freeze hash of plan.md + slices.json.
    Freeze {
        #[clap(long)]
        module_id: String,
        #[clap(long)]
        task_id: String,
    },
    /// Record plan approval.
    ApprovePlan {
        #[clap(long)]
        module_id: String,
        #[clap(long)]
        task_id: String,
        #[clap(long)]
        approved_by: String,
    },
}

#[derive(clap::Args, Debug)]
pub struct SliceCli {
    #[clap(subcommand)]
    pub command: SliceCommand,
}

#[derive(Subcommand, Debug)]
pub enum SliceCommand {
    /// Run one slice's gate pipeline (scope, verify, review, optional e2e).
    Run {
        #[clap(long)]
        module_id: String,
        #[clap(long)]
        task_id: String,
        #[clap(long)]
        slice_id: String,
        #[clap(long, default_value = "default")]
        profile: String,
        #[clap(long)]
        worktree: PathBuf,
        #[clap(long)]
        repo: PathBuf,
        #[clap(long = "changed-file")]
        changed_files: Vec<String>,
        /// p0/p1/p2/p3 issue counts recorded by the external reviewer.
        #[clap(long, default_value_t = 0)]
        review_p0: u32,
        #[clap(long, default_value_t = 0)]
        review_p1: u32,
        #[clap(long, default_value_t = 0)]
        review_p2: u32,
        #[clap(long, default_value_t = 0)]
        review_p3: u32,
        #[clap(long, default_value = "")]
        review_summary: String,
        /// Implement command argv, e.g. `-- cargo build`.
        #[clap(last = true)]
        implement_argv: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
pub struct GateCli {
    #[clap(subcommand)]
    pub command: GateCommand,
}

#[derive(Subcommand, Debug)]
pub enum GateCommand {
    /// Validate a task is ready: writes `ready.json` + `READY/handoff.md`.
    ValidateReady {
        #[clap(long)]
        module_id: String,
        #[clap(long)]
        task_id: String,
        #[clap(long, default_value = "default")]
        profile: String,
        #[clap(long = "changed-file")]
        changed_files: Vec<String>,
        #[clap(long)]
        user_check_required: bool,
    },
    /// Record human approval of a validated-ready task.
    ApproveReady {
        #[clap(long)]
        module_id: String,
        #[clap(long)]
        task_id: String,
        #[clap(long)]
        approved_by: String,
    },
}

#[derive(clap::Args, Debug)]
pub struct RetroCli {
    #[clap(subcommand)]
    pub command: RetroCommand,
}

#[derive(Subcommand, Debug)]
pub enum RetroCommand {
    /// Cluster incidents and close out the task.
    Run {
        #[clap(long)]
        module_id: String,
        #[clap(long)]
        task_id: String,
    },
}
