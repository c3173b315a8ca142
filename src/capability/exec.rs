// src/capability/exec.rs

//! Command execution capability for post-install actions
//!
//! Post-actions never go through a shell. [`ProcessExec`] spawns the command
//! directly with stdin nulled and enforces the step timeout.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// One command invocation
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs post-action commands
pub trait Exec: Send + Sync {
    /// Run `request` to completion; `Error::Timeout` when it overruns
    fn run(&self, request: &ExecRequest) -> Result<ExecOutput>;
}

/// Spawns real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExec;

impl Exec for ProcessExec {
    fn run(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let step = format!("post-action:{}", request.command);
        debug!(
            "Executing {} {:?} in {}",
            request.command,
            request.args,
            request.cwd.display()
        );

        let mut child = Command::new(&request.command)
            .args(&request.args)
            .current_dir(&request.cwd)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Exec(format!("failed to spawn {}: {}", request.command, e)))?;

        let waited = child
            .wait_timeout(request.timeout)
            .map_err(|e| Error::Exec(format!("failed waiting for {}: {}", request.command, e)))?;

        match waited {
            Some(status) => {
                let output = child
                    .wait_with_output()
                    .map_err(|e| Error::Exec(format!("failed to collect output: {}", e)))?;
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                for line in stdout.lines() {
                    info!("[{}] {}", request.command, line);
                }
                for line in stderr.lines() {
                    warn!("[{}] {}", request.command, line);
                }

                Ok(ExecOutput {
                    status: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                })
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Err(Error::Timeout {
                    step,
                    seconds: request.timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(command: &str, args: &[&str], dir: &TempDir, timeout: Duration) -> ExecRequest {
        ExecRequest {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: dir.path().to_path_buf(),
            env: BTreeMap::new(),
            timeout,
        }
    }

    #[test]
    fn test_process_exec_captures_output() {
        let temp_dir = TempDir::new().unwrap();
        let out = ProcessExec
            .run(&request("echo", &["hello"], &temp_dir, Duration::from_secs(10)))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_process_exec_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let err = ProcessExec
            .run(&request("sleep", &["5"], &temp_dir, Duration::from_millis(100)))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_process_exec_missing_binary() {
        let temp_dir = TempDir::new().unwrap();
        let err = ProcessExec
            .run(&request(
                "definitely-not-a-real-binary-xyz",
                &[],
                &temp_dir,
                Duration::from_secs(1),
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Exec(_)));
    }
}
