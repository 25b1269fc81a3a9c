//! Path & I/O layer: state root resolution and atomic durable writes.
//!
//! Every durable write in the kernel goes through [`write_atomic`]: write to
//! a sibling temporary file, then rename over the destination. A reader
//! that observes a missing file must treat it as "not yet produced" — there
//! is no best-effort repair anywhere in this crate (spec.md §4.1).

use crate::core::error::CskError;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_ROOT_ENV: &str = "CSK_STATE_ROOT";
const STATE_DIR_NAME: &str = ".csk";

/// How the state root was resolved, kept for diagnostics (`csk status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateRootSource {
    Explicit,
    EnvVar,
    RepoInference,
}

/// A resolved handle to the on-disk kernel state root.
#[derive(Debug, Clone)]
pub struct StateRoot {
    pub root: PathBuf,
    pub source: StateRootSource,
}

impl StateRoot {
    /// Resolve the state root per spec.md §4.1: explicit argument, then
    /// `CSK_STATE_ROOT`, then a repository root inferred from `cwd` (the
    /// nearest ancestor containing `.csk/`, falling back to `cwd` itself).
    pub fn resolve(explicit: Option<&Path>, cwd: &Path) -> Result<Self, CskError> {
        if let Some(p) = explicit {
            return Ok(StateRoot {
                root: absolute(p, cwd)?,
                source: StateRootSource::Explicit,
            });
        }
        if let Ok(env_root) = env::var(STATE_ROOT_ENV) {
            if !env_root.is_empty() {
                return Ok(StateRoot {
                    root: absolute(Path::new(&env_root), cwd)?,
                    source: StateRootSource::EnvVar,
                });
            }
        }
        let mut dir = cwd.to_path_buf();
        loop {
            if dir.join(STATE_DIR_NAME).is_dir() {
                return Ok(StateRoot {
                    root: dir,
                    source: StateRootSource::RepoInference,
                });
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(StateRoot {
            root: cwd.to_path_buf(),
            source: StateRootSource::RepoInference,
        })
    }

    pub fn dot_csk(&self) -> PathBuf {
        self.root.join(STATE_DIR_NAME)
    }

    pub fn engine_dir(&self) -> PathBuf {
        self.dot_csk().join("engine")
    }

    pub fn local_dir(&self) -> PathBuf {
        self.dot_csk().join("local")
    }

    pub fn app_dir(&self) -> PathBuf {
        self.dot_csk().join("app")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.app_dir().join("registry.json")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.app_dir().join("eventlog")
    }

    pub fn missions_dir(&self) -> PathBuf {
        self.app_dir().join("missions")
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.dot_csk().join("modules")
    }

    pub fn module_tasks_dir(&self, module_path: &str) -> PathBuf {
        self.modules_dir().join(module_path).join("tasks")
    }

    pub fn module_run_dir(&self, module_path: &str) -> PathBuf {
        self.modules_dir().join(module_path).join("run").join("tasks")
    }

    pub fn task_dir(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.module_tasks_dir(module_path).join(task_id)
    }

    pub fn task_run_dir(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.module_run_dir(module_path).join(task_id)
    }

    pub fn plan_path(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.task_dir(module_path, task_id).join("plan.md")
    }

    pub fn slices_path(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.task_dir(module_path, task_id).join("slices.json")
    }

    pub fn task_json_path(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.task_dir(module_path, task_id).join("task.json")
    }

    pub fn freeze_path(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.task_dir(module_path, task_id).join("freeze.json")
    }

    pub fn critic_report_path(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.task_dir(module_path, task_id).join("critic_report.json")
    }

    pub fn approvals_dir(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.task_dir(module_path, task_id).join("approvals")
    }

    pub fn approval_path(&self, module_path: &str, task_id: &str, kind: &str) -> PathBuf {
        self.approvals_dir(module_path, task_id).join(format!("{}.json", kind))
    }

    pub fn retro_path(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.task_dir(module_path, task_id).join("retro.md")
    }

    pub fn incidents_path(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.task_dir(module_path, task_id).join("incidents.jsonl")
    }

    pub fn project_incidents_path(&self) -> PathBuf {
        self.app_dir().join("incidents.jsonl")
    }

    pub fn proofs_dir(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.task_run_dir(module_path, task_id).join("proofs")
    }

    pub fn slice_proofs_dir(&self, module_path: &str, task_id: &str, slice_id: &str) -> PathBuf {
        self.proofs_dir(module_path, task_id).join(slice_id)
    }

    pub fn manifest_path(&self, module_path: &str, task_id: &str, slice_id: &str) -> PathBuf {
        self.slice_proofs_dir(module_path, task_id, slice_id).join("manifest.json")
    }

    pub fn ready_proof_path(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.proofs_dir(module_path, task_id).join("ready.json")
    }

    pub fn handoff_path(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.proofs_dir(module_path, task_id).join("READY").join("handoff.md")
    }

    pub fn logs_dir(&self, module_path: &str, task_id: &str, slice_id: &str) -> PathBuf {
        self.task_run_dir(module_path, task_id).join("logs").join(slice_id)
    }

    pub fn patches_dir(&self) -> PathBuf {
        self.local_dir().join("patches")
    }

    pub fn mission_dir(&self, mission_id: &str) -> PathBuf {
        self.missions_dir().join(mission_id)
    }

    pub fn worktree_path(&self, mission_id: &str, module_id: &str) -> PathBuf {
        self.dot_csk().join("worktrees").join(mission_id).join(module_id)
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.engine_dir().join("VERSION").is_file()
    }
}

/// Next dense sequential id under `dir` with the given `prefix` (e.g.
/// `T-` or `S-`), zero-padded to 4 digits (spec.md §3 "slice ids are
/// dense").
pub fn next_sequential_id(dir: &Path, prefix: &str) -> Result<String, CskError> {
    let mut max = 0u32;
    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(num) = name.strip_prefix(prefix) {
                    if let Ok(n) = num.parse::<u32>() {
                        max = max.max(n);
                    }
                }
            }
        }
    }
    Ok(format!("{}{:04}", prefix, max + 1))
}

fn absolute(p: &Path, cwd: &Path) -> Result<PathBuf, CskError> {
    if p.is_absolute() {
        Ok(p.to_path_buf())
    } else {
        Ok(cwd.join(p))
    }
}

/// Write `contents` to `path` atomically: write to a sibling `.tmp-<pid>`
/// file and rename over the destination. A crash between write and rename
/// leaves the previous file intact; callers never observe a half-written
/// file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CskError> {
    let parent = path
        .parent()
        .ok_or_else(|| CskError::Path(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)?;
    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact"),
        std::process::id()
    );
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Write a JSON-serialisable value atomically using pretty formatting.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), CskError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Read and parse a JSON file, returning `Ok(None)` when it does not exist
/// (the "not yet produced" contract — never attempt repair).
pub fn read_json_opt<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, CskError> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let value = serde_json::from_slice(&bytes)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_prefers_explicit_over_env() {
        let dir = tempdir().unwrap();
        let root = StateRoot::resolve(Some(dir.path()), dir.path()).unwrap();
        assert_eq!(root.source, StateRootSource::Explicit);
        assert_eq!(root.root, dir.path());
    }

    #[test]
    fn resolve_falls_back_to_cwd_when_nothing_found() {
        let dir = tempdir().unwrap();
        let root = StateRoot::resolve(None, dir.path()).unwrap();
        assert_eq!(root.source, StateRootSource::RepoInference);
        assert_eq!(root.root, dir.path());
    }

    #[test]
    fn write_atomic_never_leaves_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a/b/c.json");
        write_atomic(&target, b"{}").unwrap();
        assert!(target.is_file());
        let leftover = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .contains(".tmp-")
            })
            .count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn read_json_opt_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let result: Option<serde_json::Value> = read_json_opt(&missing).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn json_round_trip_through_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("task.json");
        let value = serde_json::json!({"task_id": "T-0001", "status": "draft"});
        write_json_atomic(&path, &value).unwrap();
        let read_back: serde_json::Value = read_json_opt(&path).unwrap().unwrap();
        assert_eq!(read_back, value);
    }

    #[test]
    fn next_sequential_id_is_dense_and_zero_padded() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("T-0001")).unwrap();
        std::fs::create_dir_all(dir.path().join("T-0002")).unwrap();
        assert_eq!(next_sequential_id(dir.path(), "T-").unwrap(), "T-0003");
    }

    #[test]
    fn next_sequential_id_starts_at_one_for_empty_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(next_sequential_id(dir.path(), "S-").unwrap(), "S-0001");
    }
}
