//! Decision envelope (spec.md §6): every operation renders as
//! `{summary, status, next, refs, errors, data}` plus a process exit
//! code, so an external agent always has exactly one safe continuation.
//! This is the only place in the kernel that knows the propagation
//! policy from spec.md §6 (line 223) — gate failures, contract
//! violations, schema corruption, and replay violations each land on a
//! different `status`/exit-code pair. `next` is always supplied by the
//! caller from a fresh [`crate::core::projector::build`] call: the
//! recommended continuation is a property of overall project state, not
//! of whichever operation just ran.

use crate::core::error::{ContractKind, CskError};
use crate::core::ops::OperationOutcome;
use crate::core::projector::NextAction;
use crate::core::task::SliceOutcome;
use serde::Serialize;

/// Closed envelope status vocabulary (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Ok,
    GateFailed,
    Error,
    ReplayFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub summary: String,
    pub status: EnvelopeStatus,
    pub next: NextAction,
    pub refs: Vec<String>,
    pub errors: Vec<String>,
    pub data: serde_json::Value,
    /// Process exit code (spec.md §6). Not part of the JSON envelope
    /// body itself — the CLI front-end reads this to set `exit()`.
    #[serde(skip)]
    pub exit_code: i32,
}

/// Gate-pipeline failures (spec.md §6 policy item 1): recoverable
/// command failures captured in proofs/incidents, not structural
/// violations. Everything else in `ContractKind` is a contract
/// violation (policy item 2) unless it's schema/replay (items 3-4).
fn is_gate_failure(kind: ContractKind) -> bool {
    matches!(
        kind,
        ContractKind::ScopeViolation
            | ContractKind::VerifyFail
            | ContractKind::ReviewFail
            | ContractKind::E2eFail
            | ContractKind::ImplementFail
    )
}

fn slice_outcome_json(o: &SliceOutcome) -> serde_json::Value {
    serde_json::json!({
        "slice_id": o.slice_id,
        "passed": o.passed,
        "blocked": o.blocked,
        "failed_gate": o.failed_gate,
        "failure_kind": o.failure_kind.map(|k| k.as_str()),
    })
}

fn outcome_summary_refs_data(outcome: &OperationOutcome) -> (String, Vec<String>, serde_json::Value) {
    match outcome {
        OperationOutcome::Bootstrapped { first_run } => (
            if *first_run { "bootstrap complete".to_string() } else { "already bootstrapped".to_string() },
            vec![],
            serde_json::json!({ "first_run": first_run }),
        ),
        OperationOutcome::ModuleAdded(entry) => (
            format!("module {} registered", entry.module_id),
            vec![entry.path.clone()],
            serde_json::to_value(entry).unwrap_or_default(),
        ),
        OperationOutcome::ModuleInitialized(entry) => (
            format!("module {} initialized", entry.module_id),
            vec![entry.path.clone()],
            serde_json::to_value(entry).unwrap_or_default(),
        ),
        OperationOutcome::MissionCreated(mission) => (
            format!("mission {} created", mission.mission_id),
            vec![],
            serde_json::to_value(mission).unwrap_or_default(),
        ),
        OperationOutcome::TaskCreated(task) => (
            format!("task {} created", task.task_id),
            vec![],
            serde_json::to_value(task).unwrap_or_default(),
        ),
        OperationOutcome::TaskCritiqued(report) => (
            format!(
                "critic: {} (p0={} p1={} p2={} p3={})",
                if report.passed { "passed" } else { "failed" },
                report.p0,
                report.p1,
                report.p2,
                report.p3
            ),
            vec![],
            serde_json::to_value(report).unwrap_or_default(),
        ),
        OperationOutcome::TaskFrozen(freeze) => (
            format!("task {} frozen", freeze.task_id),
            vec![],
            serde_json::to_value(freeze).unwrap_or_default(),
        ),
        OperationOutcome::PlanApproved(approval) => (
            format!("plan approved by {}", approval.approved_by),
            vec![],
            serde_json::to_value(approval).unwrap_or_default(),
        ),
        OperationOutcome::SliceRan(outcome) => (
            format!(
                "slice {} {}",
                outcome.slice_id,
                if outcome.blocked { "blocked" } else if outcome.passed { "passed" } else { "failed" }
            ),
            vec![],
            slice_outcome_json(outcome),
        ),
        OperationOutcome::ReadyValidated { proof, handoff_path } => (
            "task validated ready".to_string(),
            vec![handoff_path.clone()],
            serde_json::to_value(proof).unwrap_or_default(),
        ),
        OperationOutcome::ReadyApproved(approval) => (
            format!("ready approved by {}", approval.approved_by),
            vec![],
            serde_json::to_value(approval).unwrap_or_default(),
        ),
        OperationOutcome::RetroCompleted { retro_md_path, patch_path } => (
            "retro complete".to_string(),
            vec![retro_md_path.clone(), patch_path.clone()],
            serde_json::json!({ "retro": retro_md_path, "patch": patch_path }),
        ),
        OperationOutcome::Status(view) => (
            format!("project phase: {:?}", view.project_phase),
            vec![],
            serde_json::to_value(view).unwrap_or_default(),
        ),
        OperationOutcome::Replayed(violations) => (
            if violations.is_empty() {
                "replay clean".to_string()
            } else {
                format!("replay found {} violation(s)", violations.len())
            },
            violations.iter().flat_map(|v| v.refs.clone()).collect(),
            serde_json::to_value(violations).unwrap_or_default(),
        ),
        OperationOutcome::Validated(findings) => (
            if findings.is_empty() {
                "validation clean".to_string()
            } else {
                format!("validation found {} finding(s)", findings.len())
            },
            vec![],
            serde_json::to_value(findings).unwrap_or_default(),
        ),
    }
}

fn ok(outcome: OperationOutcome, next: NextAction) -> Envelope {
    let (summary, refs, data) = outcome_summary_refs_data(&outcome);

    let (status, exit_code, errors) = match &outcome {
        OperationOutcome::Replayed(violations) if !violations.is_empty() => (
            EnvelopeStatus::ReplayFailed,
            30,
            violations.iter().map(|v| v.kind.clone()).collect(),
        ),
        OperationOutcome::Validated(findings)
            if findings.iter().any(|f| f.severity == crate::core::validator::Severity::Error) =>
        {
            (EnvelopeStatus::Error, 10, findings.iter().map(|f| f.message.clone()).collect())
        }
        OperationOutcome::SliceRan(o) if o.blocked => (
            EnvelopeStatus::GateFailed,
            10,
            vec![format!("slice {} exhausted its retry budget", o.slice_id)],
        ),
        OperationOutcome::SliceRan(o) if !o.passed => (
            EnvelopeStatus::GateFailed,
            10,
            vec![format!(
                "slice {} failed gate {:?}",
                o.slice_id,
                o.failed_gate.unwrap_or(crate::core::model::GateKind::Scope)
            )],
        ),
        _ => (EnvelopeStatus::Ok, 0, vec![]),
    };

    Envelope { summary, status, next, refs, errors, data, exit_code }
}

fn from_error(err: &CskError, next: NextAction) -> Envelope {
    let message = err.to_string();
    match err {
        CskError::Contract { kind, remediation, .. } => {
            let refs = remediation.clone().into_iter().collect();
            if is_gate_failure(*kind) {
                Envelope {
                    summary: format!("gate failed: {}", kind.as_str()),
                    status: EnvelopeStatus::GateFailed,
                    next,
                    refs,
                    errors: vec![message],
                    data: serde_json::json!({ "kind": kind.as_str() }),
                    exit_code: 10,
                }
            } else if *kind == ContractKind::SchemaViolation {
                Envelope {
                    summary: "schema violation".to_string(),
                    status: EnvelopeStatus::Error,
                    next,
                    refs,
                    errors: vec![message],
                    data: serde_json::json!({ "kind": kind.as_str() }),
                    exit_code: 20,
                }
            } else if *kind == ContractKind::ReplayInvariantViolation {
                Envelope {
                    summary: "replay invariant violated".to_string(),
                    status: EnvelopeStatus::ReplayFailed,
                    next,
                    refs,
                    errors: vec![message],
                    data: serde_json::json!({ "kind": kind.as_str() }),
                    exit_code: 30,
                }
            } else {
                Envelope {
                    summary: format!("contract violated: {}", kind.as_str()),
                    status: EnvelopeStatus::Error,
                    next,
                    refs,
                    errors: vec![message],
                    data: serde_json::json!({ "kind": kind.as_str() }),
                    exit_code: 10,
                }
            }
        }
        CskError::NotFound(_) | CskError::OutOfScope(_) => Envelope {
            summary: "bad input".to_string(),
            status: EnvelopeStatus::Error,
            next,
            refs: vec![],
            errors: vec![message],
            data: serde_json::Value::Null,
            exit_code: 2,
        },
        CskError::Internal(_) | CskError::Sqlite(_) | CskError::Io(_) | CskError::Json(_) | CskError::Toml(_) | CskError::Path(_) => {
            Envelope {
                summary: "internal error".to_string(),
                status: EnvelopeStatus::Error,
                next,
                refs: vec![],
                errors: vec![message],
                data: serde_json::Value::Null,
                exit_code: 20,
            }
        }
    }
}

/// Render a dispatched operation's result into a decision envelope.
/// `next` comes from a fresh status projection, not from the operation
/// itself (spec.md §6: "always contains a single `next.recommended`").
pub fn render(result: Result<OperationOutcome, CskError>, next: NextAction) -> Envelope {
    match result {
        Ok(outcome) => ok(outcome, next),
        Err(err) => from_error(&err, next),
    }
}

/// Render the three labelled text blocks for non-JSON output
/// (spec.md §6 "Text mode additionally renders three labelled blocks").
pub fn render_text(envelope: &Envelope) -> String {
    format!(
        "SUMMARY: {}\nSTATUS: {:?}\nNEXT: {}\n",
        envelope.summary, envelope.status, envelope.next.recommended
    )
}
