//! Git adapter.
//!
//! The orchestrator sizes diffs, stages plan rewrites, and commits
//! administrative changes deterministically, so we keep a small explicit
//! wrapper around `git` subprocess calls. Version control is the one shared
//! external resource; queries are always run fresh, never cached.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

/// Aggregate size of the uncommitted change, used by the change-size guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeStats {
    pub files_changed: usize,
    pub files_deleted: usize,
    pub files_added: usize,
    pub insertions: usize,
    pub deletions: usize,
    /// `git diff --stat` text for human-facing checklists.
    pub summary: String,
}

/// Thresholds for the change-size guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MassiveChangeLimits {
    /// Deletions below this never trip the guard on their own.
    pub deletion_lines: usize,
    /// Deletions must also exceed insertions by this factor.
    pub deletion_ratio: usize,
    /// Whole-file deletions above this trip the guard regardless of lines.
    pub files_deleted: usize,
}

impl Default for MassiveChangeLimits {
    fn default() -> Self {
        Self {
            deletion_lines: 2000,
            deletion_ratio: 10,
            files_deleted: 20,
        }
    }
}

impl ChangeStats {
    /// Large additions and balanced refactors pass; the dangerous shape is
    /// heavy deletion with little addition (accidental code loss), or many
    /// whole files gone.
    pub fn is_massive(&self, limits: &MassiveChangeLimits) -> bool {
        let insertions = self.insertions.max(1);
        let mass_deletion = self.deletions > limits.deletion_lines
            && self.deletions > limits.deletion_ratio * insertions;
        mass_deletion || self.files_deleted > limits.files_deleted
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

static INSERTIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) insertion").unwrap());
static DELETIONS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) deletion").unwrap());

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        Ok(name)
    }

    /// Merge target for the final review: `main` when it exists, else
    /// `master`.
    pub fn base_branch(&self) -> Result<String> {
        let listed = self.run_capture(&["branch", "--list", "main", "master"])?;
        if listed.lines().any(|b| b.trim_start_matches("* ").trim() == "main") {
            Ok("main".to_string())
        } else {
            Ok("master".to_string())
        }
    }

    /// Raw `git status --porcelain` output.
    pub fn status_porcelain(&self) -> Result<String> {
        self.run_capture(&["status", "--porcelain"])
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Stage specific paths.
    pub fn add_paths(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run_checked(&args)?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes. Returns Ok(false) when nothing is staged.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Measure the uncommitted change against HEAD.
    #[instrument(skip_all)]
    pub fn change_stats(&self) -> Result<ChangeStats> {
        let mut stats = ChangeStats::default();

        for line in self.status_porcelain()?.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let code = line.get(..2).unwrap_or("").trim();
            if code == "D" {
                stats.files_deleted += 1;
            } else if code == "??" {
                stats.files_added += 1;
            }
            stats.files_changed += 1;
        }

        stats.summary = self.run_capture(&["diff", "--stat", "HEAD"])?;
        if let Some(last) = stats.summary.trim().lines().last() {
            stats.insertions = capture_count(&INSERTIONS_RE, last);
            stats.deletions = capture_count(&DELETIONS_RE, last);
        }

        debug!(
            files = stats.files_changed,
            insertions = stats.insertions,
            deletions = stats.deletions,
            "measured uncommitted change"
        );
        Ok(stats)
    }

    /// Diff material for the reviewer prompt. Oversized diffs degrade to the
    /// stat summary so the reviewer's context is never silently truncated
    /// mid-hunk.
    #[instrument(skip_all, fields(max_bytes))]
    pub fn review_diff(&self, max_bytes: usize) -> Result<String> {
        let stat = self.run_capture(&["diff", "--stat", "HEAD"])?;
        let full = self.run_capture(&["diff", "HEAD"])?;
        let status = self.status_porcelain()?;

        let diff = if full.len() > max_bytes {
            info!(bytes = full.len(), "diff too large, degrading to stat summary");
            format!(
                "[Diff too large ({} chars) - showing summary only]\n\n{stat}\n\
                 [Reviewer: Focus on verifying build/tests pass. Use `git diff HEAD` for details if needed.]",
                full.len()
            )
        } else {
            format!("Summary:\n{stat}\n\nFull diff:\n{full}")
        };

        Ok(format!("Git Status:\n{status}\n\nGit Diff:\n{diff}"))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn capture_count(re: &Regex, line: &str) -> usize {
    re.captures(line)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mass_deletion_is_massive() {
        let stats = ChangeStats {
            deletions: 5000,
            insertions: 100,
            files_deleted: 3,
            ..ChangeStats::default()
        };
        assert!(stats.is_massive(&MassiveChangeLimits::default()));
    }

    #[test]
    fn balanced_refactor_is_not_massive() {
        let stats = ChangeStats {
            deletions: 5000,
            insertions: 6000,
            files_deleted: 3,
            ..ChangeStats::default()
        };
        assert!(!stats.is_massive(&MassiveChangeLimits::default()));
    }

    #[test]
    fn many_deleted_files_is_massive_regardless_of_lines() {
        let stats = ChangeStats {
            files_deleted: 21,
            ..ChangeStats::default()
        };
        assert!(stats.is_massive(&MassiveChangeLimits::default()));
    }

    #[test]
    fn small_change_passes() {
        let stats = ChangeStats {
            deletions: 30,
            insertions: 2,
            files_changed: 1,
            ..ChangeStats::default()
        };
        assert!(!stats.is_massive(&MassiveChangeLimits::default()));
    }

    #[test]
    fn parses_stat_summary_line() {
        let line = "52 files changed, 124 insertions(+), 19810 deletions(-)";
        assert_eq!(capture_count(&INSERTIONS_RE, line), 124);
        assert_eq!(capture_count(&DELETIONS_RE, line), 19810);
    }

    #[test]
    fn missing_counts_default_to_zero() {
        let line = "1 file changed, 3 insertions(+)";
        assert_eq!(capture_count(&DELETIONS_RE, line), 0);
    }
}
