//! Canonical error type for csk kernel operations.
//!
//! All kernel subsystems return `Result<T, CskError>`. Every non-ok path
//! carries one of the closed error kinds from the taxonomy; contract
//! violations and recoverable gate failures are distinguished so the
//! dispatcher can pick the right exit code and envelope status.

use std::io;
use thiserror::Error;

/// Closed taxonomy of kernel-level error kinds (spec.md §7).
///
/// Distinct from `CskError` variants that wrap lower-level failures
/// (I/O, SQLite, schema parsing): a `ContractKind` is always something the
/// kernel itself detected while enforcing an invariant, and always maps to
/// a concrete `next` recovery action in the projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    InvalidTransition,
    PlanDrift,
    ScopeConfigMissing,
    ScopeViolation,
    VerifyConfigMissing,
    VerifyFail,
    ReviewFail,
    E2eMissing,
    E2eFail,
    ImplementFail,
    TokenWaste,
    ReadyPrerequisitesMissing,
    RetroPreconditionMissing,
    WorktreeCreateFailed,
    CommandNotFound,
    CommandDenied,
    SchemaViolation,
    ReplayInvariantViolation,
}

impl ContractKind {
    /// Exit code bucket per spec.md §6/§7: gate failures and contract
    /// violations both surface as exit 10; schema corruption is 20;
    /// replay violations are 30.
    pub fn exit_code(self) -> i32 {
        match self {
            ContractKind::SchemaViolation => 20,
            ContractKind::ReplayInvariantViolation => 30,
            _ => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContractKind::InvalidTransition => "InvalidTransition",
            ContractKind::PlanDrift => "PlanDrift",
            ContractKind::ScopeConfigMissing => "scope_config_missing",
            ContractKind::ScopeViolation => "scope_violation",
            ContractKind::VerifyConfigMissing => "verify_config_missing",
            ContractKind::VerifyFail => "verify_fail",
            ContractKind::ReviewFail => "review_fail",
            ContractKind::E2eMissing => "e2e_missing",
            ContractKind::E2eFail => "e2e_fail",
            ContractKind::ImplementFail => "implement_fail",
            ContractKind::TokenWaste => "token_waste",
            ContractKind::ReadyPrerequisitesMissing => "ready_prerequisites_missing",
            ContractKind::RetroPreconditionMissing => "retro_precondition_missing",
            ContractKind::WorktreeCreateFailed => "worktree_create_failed",
            ContractKind::CommandNotFound => "command_not_found",
            ContractKind::CommandDenied => "command_denied",
            ContractKind::SchemaViolation => "schema_violation",
            ContractKind::ReplayInvariantViolation => "replay_invariant_violation",
        }
    }
}

/// Canonical error type for all csk kernel operations.
#[derive(Error, Debug)]
pub enum CskError {
    /// SQLite error (auto-converts from `rusqlite::Error`).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error (auto-converts from `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("toml error: {0}")]
    Toml(String),

    /// Path resolution or validation error.
    #[error("path error: {0}")]
    Path(String),

    /// A named contract/invariant violation with a human remediation hint.
    #[error("{kind:?}: {message}")]
    Contract {
        kind: ContractKind,
        message: String,
        /// Concrete recovery operation, e.g. "gate validate-ready --task-id T-0001".
        remediation: Option<String>,
    },

    /// Resource not found (missing file, task, slice, etc.)
    #[error("not found: {0}")]
    NotFound(String),

    /// Feature deliberately left to an external collaborator (spec.md §1).
    #[error("out of kernel scope: {0}")]
    OutOfScope(String),

    /// Internal invariant failure that is not one of the named contract
    /// kinds (corrupt state, impossible branch reached).
    #[error("internal error: {0}")]
    Internal(String),
}

impl CskError {
    pub fn contract(kind: ContractKind, message: impl Into<String>) -> Self {
        CskError::Contract {
            kind,
            message: message.into(),
            remediation: None,
        }
    }

    pub fn contract_with_remediation(
        kind: ContractKind,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        CskError::Contract {
            kind,
            message: message.into(),
            remediation: Some(remediation.into()),
        }
    }

    /// Process exit code this error should produce (spec.md §6).
    pub fn exit_code(&self) -> i32 {
        match self {
            CskError::Contract { kind, .. } => kind.exit_code(),
            CskError::NotFound(_) | CskError::OutOfScope(_) => 2,
            CskError::Internal(_)
            | CskError::Sqlite(_)
            | CskError::Io(_)
            | CskError::Json(_)
            | CskError::Toml(_)
            | CskError::Path(_) => 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_display_includes_message() {
        let err = CskError::contract(ContractKind::PlanDrift, "plan.md changed since freeze");
        assert!(format!("{}", err).contains("plan.md changed since freeze"));
    }

    #[test]
    fn replay_violation_is_exit_30() {
        assert_eq!(ContractKind::ReplayInvariantViolation.exit_code(), 30);
    }

    #[test]
    fn schema_violation_is_exit_20() {
        assert_eq!(ContractKind::SchemaViolation.exit_code(), 20);
    }

    #[test]
    fn scope_violation_is_exit_10() {
        assert_eq!(ContractKind::ScopeViolation.exit_code(), 10);
    }
}
