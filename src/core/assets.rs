//! Embedded default assets, the teacher's `rust_embed` pattern applied to
//! `csk`'s one ambient asset: the engine-default profile. Bootstrap writes
//! a copy of this out under `.csk/local/profiles/default.json` so a fresh
//! project has something to edit; `profile::engine_default_profile()`
//! remains the in-memory fallback and does not itself read this file.

use crate::core::error::CskError;
use crate::core::path::{write_atomic, StateRoot};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets"]
pub struct Assets;

/// The embedded default profile's raw bytes.
pub fn default_profile_bytes() -> Result<std::borrow::Cow<'static, [u8]>, CskError> {
    Assets::get("default_profile.json")
        .map(|f| f.data)
        .ok_or_else(|| CskError::Internal("default_profile.json missing from embedded assets".into()))
}

/// Materialise the embedded default profile under `.csk/local/profiles/`
/// if no local override already exists there (bootstrap-time only; never
/// overwrites a profile a user has started editing).
pub fn scaffold_default_profile(state_root: &StateRoot) -> Result<(), CskError> {
    let dest = state_root.local_dir().join("profiles").join("default.json");
    if dest.is_file() {
        return Ok(());
    }
    write_atomic(&dest, &default_profile_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_profile_asset_is_embedded() {
        let bytes = default_profile_bytes().unwrap();
        let profile: crate::core::profile::Profile = serde_json::from_slice(&bytes).unwrap();
        assert!(profile.denylist.contains(&"rm".to_string()));
    }

    #[test]
    fn scaffold_writes_once_and_never_overwrites() {
        let dir = tempdir().unwrap();
        let state_root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        scaffold_default_profile(&state_root).unwrap();
        let dest = state_root.local_dir().join("profiles").join("default.json");
        assert!(dest.is_file());

        std::fs::write(&dest, b"{\"user_check_required\":true}").unwrap();
        scaffold_default_profile(&state_root).unwrap();
        let contents = std::fs::read_to_string(&dest).unwrap();
        assert!(contents.contains("user_check_required"));
    }
}
