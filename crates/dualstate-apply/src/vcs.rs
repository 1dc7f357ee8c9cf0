//! Version-control seam and its git CLI implementation.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::CommitError;

pub trait VersionControl: Send + Sync {
    /// Stage `files` (relative to the repository root) and commit them and
    /// nothing else. Returns the new commit id.
    fn commit(&self, files: &[String], message: &str) -> Result<String, CommitError>;
}

/// Shells out to `git` in `root`.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn git(&self, args: &[&str]) -> Result<String, CommitError> {
        let command = format!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|source| CommitError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(CommitError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl VersionControl for GitCli {
    fn commit(&self, files: &[String], message: &str) -> Result<String, CommitError> {
        // `-A` also stages files the apply removed.
        let mut add = vec!["add", "-A", "--"];
        add.extend(files.iter().map(String::as_str));
        self.git(&add)?;

        // Paths limit the commit to `files`; other staged work stays staged.
        let mut commit = vec!["commit", "-q", "-m", message, "--"];
        commit.extend(files.iter().map(String::as_str));
        if let Err(err) = self.git(&commit) {
            let mut reset = vec!["reset", "-q", "--"];
            reset.extend(files.iter().map(String::as_str));
            if let Err(reset_err) = self.git(&reset) {
                tracing::warn!(error = %reset_err, "could not unstage files after failed commit");
            }
            return Err(err);
        }
        let sha = self.git(&["rev-parse", "HEAD"])?;
        tracing::info!(commit = %sha, files = files.len(), "committed applied proposal");
        Ok(sha)
    }
}

pub fn commit_message(prefix: &str, proposal_id: &str, interfaces: usize) -> String {
    format!("{prefix} apply proposal {proposal_id} ({interfaces} interfaces)")
}
