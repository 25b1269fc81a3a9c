//! Profile manager: merge engine-default and local-override profiles
//! (spec.md §4 row 4, §6 "Profile file format").

use crate::core::error::CskError;
use crate::core::model::{Slice, VerifyCommand};
use crate::core::path::{read_json_opt, StateRoot};
use serde::{Deserialize, Serialize};

/// `{verify_commands, allowlist, denylist, user_check_required, e2e_required_default}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Profile {
    #[serde(default)]
    pub verify_commands: Option<Vec<VerifyCommand>>,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub user_check_required: bool,
    #[serde(default)]
    pub e2e_required_default: bool,
}

/// Engine defaults, embedded so that a fresh state root always has a
/// working profile before any local override exists.
pub fn engine_default_profile() -> Profile {
    Profile {
        verify_commands: None,
        allowlist: vec![],
        denylist: vec![
            "rm".to_string(),
            "sudo".to_string(),
            "curl".to_string(),
            "wget".to_string(),
        ],
        user_check_required: false,
        e2e_required_default: false,
    }
}

/// Merge `local` over `engine`: `verify_commands` is replaced wholesale
/// when `local` defines the list, otherwise inherited; every other field
/// is overridden field-by-field when present (spec.md §6).
pub fn merge(engine: &Profile, local: &Profile) -> Profile {
    Profile {
        verify_commands: local
            .verify_commands
            .clone()
            .or_else(|| engine.verify_commands.clone()),
        allowlist: if local.allowlist.is_empty() {
            engine.allowlist.clone()
        } else {
            local.allowlist.clone()
        },
        denylist: if local.denylist.is_empty() {
            engine.denylist.clone()
        } else {
            local.denylist.clone()
        },
        user_check_required: local.user_check_required || engine.user_check_required,
        e2e_required_default: local.e2e_required_default || engine.e2e_required_default,
    }
}

/// Load and merge the profile named `name` for this state root.
pub fn resolve_profile(state_root: &StateRoot, name: &str) -> Result<Profile, CskError> {
    let engine = engine_default_profile();
    let local_path = state_root.local_dir().join("profiles").join(format!("{}.json", name));
    let local: Profile = read_json_opt(&local_path)?.unwrap_or_default();
    Ok(merge(&engine, &local))
}

impl Profile {
    /// Verify commands to run for `slice`: the slice's own `verify_commands`
    /// win over the merged profile's (spec.md §4.2 `slice_run`).
    pub fn effective_verify_commands(&self, slice: &Slice) -> Vec<VerifyCommand> {
        slice
            .verify_commands
            .clone()
            .or_else(|| self.verify_commands.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_inherits_verify_commands_when_local_is_absent() {
        let engine = Profile {
            verify_commands: Some(vec![VerifyCommand {
                name: "lint".into(),
                argv: vec!["true".into()],
                cwd: crate::core::model::CommandCwd::Worktree,
                timeout_sec: 30,
            }]),
            ..Default::default()
        };
        let local = Profile::default();
        let merged = merge(&engine, &local);
        assert_eq!(merged.verify_commands.unwrap().len(), 1);
    }

    #[test]
    fn merge_replaces_verify_commands_wholesale_when_local_defines_list() {
        let engine = Profile {
            verify_commands: Some(vec![VerifyCommand {
                name: "lint".into(),
                argv: vec!["true".into()],
                cwd: crate::core::model::CommandCwd::Worktree,
                timeout_sec: 30,
            }]),
            ..Default::default()
        };
        let local = Profile {
            verify_commands: Some(vec![]),
            ..Default::default()
        };
        let merged = merge(&engine, &local);
        assert_eq!(merged.verify_commands.unwrap().len(), 0);
    }

    #[test]
    fn denylist_defaults_block_dangerous_commands() {
        let profile = engine_default_profile();
        assert!(profile.denylist.contains(&"rm".to_string()));
        assert!(profile.denylist.contains(&"sudo".to_string()));
    }
}
