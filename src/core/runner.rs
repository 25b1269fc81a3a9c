//! Command runner: execute verify/implement/e2e commands with argv only
//! (no shell), a timeout, an allow/deny policy, and captured logs
//! (spec.md §4.1 row 5, §4.3, §5).

use crate::core::error::{CskError, ContractKind};
use crate::core::path::write_atomic;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Outcome of one spawned command, as recorded in a gate proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub argv: Vec<String>,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub log_path: String,
    pub timed_out: bool,
}

/// Sentinel exit code recorded when a command is killed for exceeding its
/// timeout — chosen to be distinguishable from any real process exit code.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Reject shell metacharacters/pipelines at parse time: argv arrays are
/// the only accepted shape (spec.md §4.3 "Commands are argv arrays").
pub fn reject_shell_syntax(argv: &[String]) -> Result<(), CskError> {
    for token in argv {
        if token.contains('|') || token.contains(';') || token.contains("&&") {
            return Err(CskError::contract(
                ContractKind::CommandDenied,
                format!("shell metacharacters are not permitted in argv: {:?}", token),
            ));
        }
    }
    Ok(())
}

/// Apply the allowlist/denylist to the head of `argv` (spec.md §4.3).
/// An empty allowlist means "no additional restriction beyond denylist".
pub fn check_policy(argv: &[String], allowlist: &[String], denylist: &[String]) -> Result<(), CskError> {
    let head = argv.first().ok_or_else(|| {
        CskError::contract(ContractKind::CommandNotFound, "empty command argv")
    })?;
    if denylist.iter().any(|d| d == head) {
        return Err(CskError::contract(
            ContractKind::CommandDenied,
            format!("command '{}' is denylisted", head),
        ));
    }
    if !allowlist.is_empty() && !allowlist.iter().any(|a| a == head) {
        return Err(CskError::contract(
            ContractKind::CommandDenied,
            format!("command '{}' is not in the allowlist", head),
        ));
    }
    Ok(())
}

/// Spawn `argv` in `cwd`, drain stdout+stderr concurrently to `log_path`,
/// enforce `timeout`. On timeout the child is killed and the outcome
/// records [`TIMEOUT_EXIT_CODE`].
pub fn run_command(
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
    log_path: &Path,
) -> Result<CommandOutcome, CskError> {
    reject_shell_syntax(argv)?;
    let program = argv.first().ok_or_else(|| {
        CskError::contract(ContractKind::CommandNotFound, "empty command argv")
    })?;

    let start = Instant::now();
    let mut child = Command::new(program)
        .args(&argv[1..])
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            CskError::contract(
                ContractKind::CommandNotFound,
                format!("failed to spawn '{}': {}", program, e),
            )
        })?;

    let mut stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");
    let (tx, rx) = mpsc::channel::<(String, Vec<u8>)>();
    let tx_out = tx.clone();
    let out_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        let _ = tx_out.send(("stdout".to_string(), buf));
    });
    let err_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        let _ = tx.send(("stderr".to_string(), buf));
    });

    let mut timed_out = false;
    let exit_code = loop {
        match child.try_wait()? {
            Some(status) => break status.code().unwrap_or(-2),
            None => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    timed_out = true;
                    break TIMEOUT_EXIT_CODE;
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    };

    let _ = out_handle.join();
    let _ = err_handle.join();
    let mut captured = Vec::new();
    while let Ok((stream, bytes)) = rx.try_recv() {
        captured.push(format!("--- {} ---\n", stream));
        captured.extend_from_slice(&bytes);
        captured.push(b'\n');
    }

    write_atomic(log_path, &captured)?;

    Ok(CommandOutcome {
        argv: argv.to_vec(),
        exit_code,
        duration_ms: start.elapsed().as_millis() as u64,
        log_path: log_path.to_string_lossy().to_string(),
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_pipeline_syntax() {
        let argv = vec!["ls".to_string(), "|".to_string(), "grep".to_string()];
        assert!(reject_shell_syntax(&argv).is_err());
    }

    #[test]
    fn denylist_blocks_rm() {
        let argv = vec!["rm".to_string(), "-rf".to_string(), "/".to_string()];
        let result = check_policy(&argv, &[], &["rm".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn allowlist_permits_only_listed_commands() {
        let argv = vec!["python".to_string()];
        assert!(check_policy(&argv, &["python".to_string()], &[]).is_ok());
        let other = vec!["node".to_string()];
        assert!(check_policy(&other, &["python".to_string()], &[]).is_err());
    }

    #[test]
    fn run_command_captures_exit_code_and_log() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("logs/s1.log");
        let outcome = run_command(
            &["true".to_string()],
            dir.path(),
            Duration::from_secs(5),
            &log_path,
        )
        .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.timed_out);
        assert!(log_path.is_file());
    }

    #[test]
    fn run_command_reports_nonzero_exit() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("logs/s2.log");
        let outcome = run_command(
            &["false".to_string()],
            dir.path(),
            Duration::from_secs(5),
            &log_path,
        )
        .unwrap();
        assert_ne!(outcome.exit_code, 0);
    }

    #[test]
    fn run_command_times_out() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("logs/s3.log");
        let outcome = run_command(
            &["sleep".to_string(), "5".to_string()],
            dir.path(),
            Duration::from_millis(100),
            &log_path,
        )
        .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
    }
}
