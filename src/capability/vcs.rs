// src/capability/vcs.rs

//! Version control capability: commit lookup and note attachment
//!
//! Receipts are attached as notes to a commit under a dedicated notes ref.
//! Note bodies are always passed through a file so receipt JSON never has
//! to survive shell argument escaping.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::debug;

/// Version control operations the engine relies on
pub trait Vcs: Send + Sync {
    /// Whether the VCS tooling can be used at all
    fn is_available(&self) -> bool;

    /// Whether `worktree` is inside a repository
    fn is_repository(&self, worktree: &Path) -> bool;

    /// Current `HEAD` commit, `None` for unborn branches or non-repositories
    fn head_commit(&self, worktree: &Path) -> Result<Option<String>>;

    /// Whether `commit` names an existing commit
    fn commit_exists(&self, worktree: &Path, commit: &str) -> Result<bool>;

    /// Append the contents of `body_file` to the note on `commit`
    fn append_note(
        &self,
        worktree: &Path,
        notes_ref: &str,
        commit: &str,
        body_file: &Path,
    ) -> Result<()>;

    /// Bodies of every note object under `notes_ref`
    fn read_notes(&self, worktree: &Path, notes_ref: &str) -> Result<Vec<String>>;
}

/// `git` command-line client
#[derive(Debug, Clone)]
pub struct GitCli {
    git: Option<PathBuf>,
}

impl GitCli {
    /// Locate `git` on PATH
    pub fn detect() -> Self {
        let git = which::which("git").ok();
        if git.is_none() {
            debug!("git not found on PATH; VCS capability disabled");
        }
        Self { git }
    }

    /// Use a specific git binary
    pub fn with_binary(path: PathBuf) -> Self {
        Self { git: Some(path) }
    }

    fn command(&self, worktree: &Path) -> Result<Command> {
        let git = self
            .git
            .as_ref()
            .ok_or_else(|| Error::Vcs("git is not available".to_string()))?;
        let mut cmd = Command::new(git);
        cmd.arg("-C")
            .arg(worktree)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }

    fn run(&self, worktree: &Path, args: &[&str]) -> Result<std::process::Output> {
        let mut cmd = self.command(worktree)?;
        cmd.args(args);
        debug!("git -C {} {}", worktree.display(), args.join(" "));
        cmd.output()
            .map_err(|e| Error::Vcs(format!("failed to run git {}: {}", args.join(" "), e)))
    }

    fn run_ok(&self, worktree: &Path, args: &[&str]) -> Result<String> {
        let output = self.run(worktree, args)?;
        if !output.status.success() {
            return Err(Error::Vcs(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Vcs for GitCli {
    fn is_available(&self) -> bool {
        self.git.is_some()
    }

    fn is_repository(&self, worktree: &Path) -> bool {
        self.run(worktree, &["rev-parse", "--is-inside-work-tree"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn head_commit(&self, worktree: &Path) -> Result<Option<String>> {
        let output = self.run(worktree, &["rev-parse", "--verify", "--quiet", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!commit.is_empty()).then_some(commit))
    }

    fn commit_exists(&self, worktree: &Path, commit: &str) -> Result<bool> {
        let spec = format!("{}^{{commit}}", commit);
        let output = self.run(worktree, &["cat-file", "-e", &spec])?;
        Ok(output.status.success())
    }

    fn append_note(
        &self,
        worktree: &Path,
        notes_ref: &str,
        commit: &str,
        body_file: &Path,
    ) -> Result<()> {
        let body = body_file.to_string_lossy();
        self.run_ok(
            worktree,
            &["notes", "--ref", notes_ref, "append", "-F", &body, commit],
        )?;
        Ok(())
    }

    fn read_notes(&self, worktree: &Path, notes_ref: &str) -> Result<Vec<String>> {
        let output = self.run(worktree, &["notes", "--ref", notes_ref, "list"])?;
        if !output.status.success() {
            // Ref not created yet
            return Ok(Vec::new());
        }

        let listing = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut bodies = Vec::new();
        for line in listing.lines() {
            let Some(note_object) = line.split_whitespace().next() else {
                continue;
            };
            bodies.push(self.run_ok(worktree, &["cat-file", "-p", note_object])?);
        }
        Ok(bodies)
    }
}

/// No version control: no commits, notes are never written
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVcs;

impl Vcs for NoVcs {
    fn is_available(&self) -> bool {
        false
    }

    fn is_repository(&self, _worktree: &Path) -> bool {
        false
    }

    fn head_commit(&self, _worktree: &Path) -> Result<Option<String>> {
        Ok(None)
    }

    fn commit_exists(&self, _worktree: &Path, _commit: &str) -> Result<bool> {
        Ok(false)
    }

    fn append_note(&self, _: &Path, _: &str, _: &str, _: &Path) -> Result<()> {
        Err(Error::Vcs("no VCS configured".to_string()))
    }

    fn read_notes(&self, _worktree: &Path, _notes_ref: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    head: Option<String>,
    commits: HashSet<String>,
    /// (notes ref, commit) -> body
    notes: BTreeMap<(String, String), String>,
}

/// In-process repository: one `HEAD`, a commit set and a notes map
#[derive(Debug, Default)]
pub struct MemoryVcs {
    state: Mutex<MemoryState>,
}

impl MemoryVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository whose `HEAD` points at `commit`
    pub fn with_head(commit: &str) -> Self {
        let vcs = Self::new();
        vcs.commit(commit);
        vcs
    }

    /// Record a new commit and move `HEAD` to it
    pub fn commit(&self, commit: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.commits.insert(commit.to_string());
            state.head = Some(commit.to_string());
        }
    }

    /// Raw note body attached to `commit`
    pub fn note(&self, notes_ref: &str, commit: &str) -> Option<String> {
        self.state
            .lock()
            .ok()?
            .notes
            .get(&(notes_ref.to_string(), commit.to_string()))
            .cloned()
    }

    /// Replace a note body outright (for tamper tests)
    pub fn set_note(&self, notes_ref: &str, commit: &str, body: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .notes
                .insert((notes_ref.to_string(), commit.to_string()), body.to_string());
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Vcs("memory VCS lock poisoned".to_string()))
    }
}

impl Vcs for MemoryVcs {
    fn is_available(&self) -> bool {
        true
    }

    fn is_repository(&self, _worktree: &Path) -> bool {
        true
    }

    fn head_commit(&self, _worktree: &Path) -> Result<Option<String>> {
        Ok(self.lock()?.head.clone())
    }

    fn commit_exists(&self, _worktree: &Path, commit: &str) -> Result<bool> {
        Ok(self.lock()?.commits.contains(commit))
    }

    fn append_note(
        &self,
        _worktree: &Path,
        notes_ref: &str,
        commit: &str,
        body_file: &Path,
    ) -> Result<()> {
        let body = fs::read_to_string(body_file).map_err(|e| Error::io(body_file, e))?;
        let mut state = self.lock()?;
        let commit = if commit == "HEAD" {
            state
                .head
                .clone()
                .ok_or_else(|| Error::Vcs("HEAD does not point at a commit".to_string()))?
        } else {
            commit.to_string()
        };
        let entry = state
            .notes
            .entry((notes_ref.to_string(), commit))
            .or_default();
        if !entry.is_empty() {
            entry.push_str("\n\n");
        }
        entry.push_str(&body);
        Ok(())
    }

    fn read_notes(&self, _worktree: &Path, notes_ref: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .notes
            .iter()
            .filter(|((r, _), _)| r == notes_ref)
            .map(|(_, body)| body.clone())
            .collect())
    }
}
