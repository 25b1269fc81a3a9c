//! Binary entry point. Parses argv into a [`csk::cli::Command`], builds
//! the matching [`csk::core::ops::Operation`], dispatches it, and prints
//! the decision envelope (spec.md §6). Contains no gate or lifecycle
//! logic itself — that all lives in `core`.

use clap::Parser;
use csk::cli::{Cli, Command, GateCommand, MissionCommand, ModuleCommand, RetroCommand, SliceCommand, TaskCommand};
use csk::core::envelope;
use csk::core::eventlog::EventLog;
use csk::core::gates::review::ReviewInput;
use csk::core::mission::MissionIntake;
use csk::core::ops::{self, Operation, SliceRunParams};
use csk::core::path::StateRoot;
use csk::core::projector;
use std::process::ExitCode;

fn to_operation(command: Command) -> Operation {
    match command {
        Command::Bootstrap => Operation::Bootstrap,

        Command::Module(module) => match module.command {
            ModuleCommand::Add { module_id, path } => Operation::ModuleAdd { module_id, path },
            ModuleCommand::Init { module_id } => Operation::ModuleInit { module_id },
        },

        Command::Mission(mission) => match mission.command {
            MissionCommand::Create { spec_file, routing, milestone_modules } => {
                let spec_text = std::fs::read_to_string(&spec_file).unwrap_or_default();
                Operation::MissionCreate {
                    intake: MissionIntake { spec_text, routing, milestone_modules },
                }
            }
        },

        Command::Task(task) => match task.command {
            TaskCommand::New { module_id, slice_count, profile, max_attempts } => Operation::TaskNew {
                module_id,
                slice_count,
                profile_name: profile,
                max_attempts,
            },
            TaskCommand::Critic { module_id, task_id } => Operation::TaskCritic { module_id, task_id },
            TaskCommand::Freeze { module_id, task_id } => Operation::TaskFreeze { module_id, task_id },
            TaskCommand::ApprovePlan { module_id, task_id, approved_by } => {
                Operation::TaskApprovePlan { module_id, task_id, approved_by }
            }
        },

        Command::Slice(slice) => match slice.command {
            SliceCommand::Run {
                module_id,
                task_id,
                slice_id,
                profile,
                worktree,
                repo,
                changed_files,
                review_p0,
                review_p1,
                review_p2,
                review_p3,
                review_summary,
                implement_argv,
            } => Operation::SliceRun {
                module_id,
                task_id,
                slice_id,
                profile_name: profile,
                params: SliceRunParams {
                    implement_argv: if implement_argv.is_empty() { None } else { Some(implement_argv) },
                    changed_files,
                    review: ReviewInput { p0: review_p0, p1: review_p1, p2: review_p2, p3: review_p3, summary: review_summary },
                    worktree,
                    repo,
                },
            },
        },

        Command::Gate(gate) => match gate.command {
            GateCommand::ValidateReady { module_id, task_id, profile, changed_files, user_check_required } => {
                Operation::GateValidateReady {
                    module_id,
                    task_id,
                    profile_name: profile,
                    changed_files,
                    user_check_required,
                }
            }
            GateCommand::ApproveReady { module_id, task_id, approved_by } => {
                Operation::GateApproveReady { module_id, task_id, approved_by }
            }
        },

        Command::Retro(retro) => match retro.command {
            RetroCommand::Run { module_id, task_id } => Operation::RetroRun { module_id, task_id },
        },

        Command::Status => Operation::Status,
        Command::Replay => Operation::Replay,
        Command::Validate { strict } => Operation::Validate { strict },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("csk: cannot read current directory: {}", e);
            return ExitCode::from(20);
        }
    };

    let state_root = match StateRoot::resolve(cli.state_root.as_deref(), &cwd) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("csk: {}", e);
            return ExitCode::from(20);
        }
    };

    let event_log = match EventLog::open(&state_root.event_log_path()) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("csk: {}", e);
            return ExitCode::from(20);
        }
    };

    let operation = to_operation(cli.command);
    let result = ops::dispatch(operation, &state_root, &event_log, &cli.actor, env!("CARGO_PKG_VERSION"));
    let next = projector::build(&state_root, &event_log)
        .map(|view| view.next)
        .unwrap_or(projector::NextAction { recommended: "bootstrap".to_string(), alternatives: vec![] });

    let envelope = envelope::render(result, next);
    if cli.format == "text" {
        print!("{}", envelope::render_text(&envelope));
    } else {
        match serde_json::to_string_pretty(&envelope) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("csk: failed to serialise envelope: {}", e),
        }
    }

    ExitCode::from(envelope.exit_code as u8)
}
