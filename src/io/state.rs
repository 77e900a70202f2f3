//! Durable orchestration state under `.dvx/`.
//!
//! Each plan gets its own namespace directory holding the state record, the
//! blocked-context artifact, append-only decision logs, and the task-status
//! override map. Writes are atomic (temp file + rename) and happen before
//! the side effect they describe, so a crash mid-action is recoverable by
//! re-reading the last durable phase. Nothing here is ever deleted
//! automatically except via the explicit `clean` command.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::interpret::DecisionRecord;
use crate::io::plan::TaskStatus;

pub const DVX_DIR: &str = ".dvx";
const STATE_FILE: &str = "state.json";
const BLOCKED_FILE: &str = "blocked-context.md";
const STATUS_FILE: &str = "task-status.json";

/// Orchestration phase, persisted across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Implementing,
    Reviewing,
    Fixing,
    Testing,
    Committing,
    Finalizing,
    Paused,
    Blocked,
    Complete,
}

/// Per-plan orchestrator state (`.dvx/<plan>/state.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestrationState {
    pub plan_file: String,
    pub current_task_id: Option<String>,
    pub current_task_title: Option<String>,
    pub phase: Phase,
    /// Reviewer session token; the reviewer accumulates project context
    /// across tasks, unlike the implementer which always starts fresh.
    pub reviewer_session: Option<String>,
    pub iteration_count: u32,
    /// Pause after each completed task and wait for re-invocation.
    #[serde(default)]
    pub step_mode: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationState {
    pub fn new(plan_file: &str) -> Self {
        let now = Utc::now();
        Self {
            plan_file: plan_file.to_string(),
            current_task_id: None,
            current_task_title: None,
            phase: Phase::Idle,
            reviewer_session: None,
            iteration_count: 0,
            step_mode: false,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Handle to one plan's durable state namespace.
#[derive(Debug, Clone)]
pub struct StateStore {
    dvx_root: PathBuf,
    dir: PathBuf,
}

impl StateStore {
    /// Namespace is keyed by the plan's file stem, so separate plans in the
    /// same working tree never share state.
    pub fn for_plan(project_dir: &Path, plan_file: &Path) -> Self {
        let stem = plan_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plan".to_string());
        let dvx_root = project_dir.join(DVX_DIR);
        let dir = dvx_root.join(stem);
        Self { dvx_root, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create state dir {}", self.dir.display()))?;
        let gitignore = self.dvx_root.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "# Ignore all dvx working files\n*\n!.gitignore\n")
                .with_context(|| format!("write {}", gitignore.display()))?;
        }
        Ok(())
    }

    /// Load the state record, or None when no run has started.
    pub fn load(&self) -> Result<Option<OrchestrationState>> {
        let path = self.dir.join(STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read state {}", path.display()))?;
        let state = serde_json::from_str(&contents)
            .with_context(|| format!("parse state {}", path.display()))?;
        Ok(Some(state))
    }

    /// Persist the state record, stamping `updated_at`.
    pub fn save(&self, state: &mut OrchestrationState) -> Result<()> {
        self.ensure()?;
        state.updated_at = Utc::now();
        let mut buf = serde_json::to_string_pretty(state)?;
        buf.push('\n');
        let path = self.dir.join(STATE_FILE);
        debug!(path = %path.display(), phase = ?state.phase, "writing state");
        write_atomic(&path, &buf)
    }

    /// Remove the state record and override map (used by `run --force`).
    /// Decision logs are kept; they are an audit trail.
    pub fn reset(&self) -> Result<()> {
        for file in [STATE_FILE, STATUS_FILE, BLOCKED_FILE] {
            let path = self.dir.join(file);
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("remove {}", path.display()))?;
            }
        }
        info!(dir = %self.dir.display(), "state reset");
        Ok(())
    }

    /// Delete the whole namespace (the `clean` command).
    pub fn remove_all(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("remove {}", self.dir.display()))?;
        }
        Ok(())
    }

    pub fn blocked_context_path(&self) -> PathBuf {
        self.dir.join(BLOCKED_FILE)
    }

    /// Write the human-facing blocked artifact.
    pub fn write_blocked_context(&self, reason: &str, context: &str) -> Result<PathBuf> {
        self.ensure()?;
        let path = self.blocked_context_path();
        let content = format!(
            "# Blocked: {reason}\n\n\
             **Time**: {}\n\n\
             ## Context\n\n{context}\n\n\
             ## Instructions\n\n\
             1. Review the context above\n\
             2. Resolve the issue (edit the plan, fix the environment, or intervene manually)\n\
             3. Run `dvx run <plan>` to resume; it will offer an interactive session first\n",
            Utc::now().to_rfc3339()
        );
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), "wrote blocked context");
        Ok(path)
    }

    /// Remove the blocked artifact and drop a Blocked phase back to Idle.
    pub fn clear_blocked(&self) -> Result<()> {
        let path = self.blocked_context_path();
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
        if let Some(mut state) = self.load()?
            && state.phase == Phase::Blocked
        {
            state.phase = Phase::Idle;
            self.save(&mut state)?;
        }
        Ok(())
    }

    /// Append a decision to its per-topic log, creating it on first use.
    /// The topic comes verbatim from agent text, so it is slugified before
    /// it becomes part of a filename; `/` or `..` must not leave the
    /// namespace.
    pub fn log_decision(&self, record: &DecisionRecord) -> Result<()> {
        self.ensure()?;
        let path = self
            .dir
            .join(format!("DECISIONS-{}.md", topic_slug(&record.topic)));
        let mut entry = format!(
            "\n## Decision at {}\n\n\
             **Decision**: {}\n\n\
             **Reasoning**: {}\n\n\
             **Alternatives considered**:\n",
            Utc::now().to_rfc3339(),
            record.decision,
            record.reasoning
        );
        for alt in &record.alternatives {
            entry.push_str(&format!("- {alt}\n"));
        }
        entry.push_str("\n---\n");

        let body = if path.exists() {
            let current = fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            current + &entry
        } else {
            format!(
                "# Decisions: {}\n\nDecisions made during automated development.\n\n---\n{entry}",
                record.topic
            )
        };
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        info!(topic = %record.topic, "logged decision");
        Ok(())
    }

    /// All decision logs in this namespace.
    pub fn decision_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("read dir {}", self.dir.display()))?
        {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && name.starts_with("DECISIONS-")
                && name.ends_with(".md")
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Task-status override map. This is the authoritative source of task
    /// completion; statuses parsed out of the plan document never win over
    /// it.
    pub fn load_status_overrides(&self) -> Result<BTreeMap<String, TaskStatus>> {
        let path = self.dir.join(STATUS_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read status overrides {}", path.display()))?;
        let map = serde_json::from_str(&contents)
            .with_context(|| format!("parse status overrides {}", path.display()))?;
        Ok(map)
    }

    pub fn set_status_override(&self, id: &str, status: TaskStatus) -> Result<()> {
        let mut map = self.load_status_overrides()?;
        map.insert(id.to_string(), status);
        self.replace_status_overrides(&map)
    }

    /// Rewrite the whole override map (used by plan-state sync).
    pub fn replace_status_overrides(&self, map: &BTreeMap<String, TaskStatus>) -> Result<()> {
        self.ensure()?;
        let mut buf = serde_json::to_string_pretty(map)?;
        buf.push('\n');
        write_atomic(&self.dir.join(STATUS_FILE), &buf)
    }
}

fn topic_slug(topic: &str) -> String {
    let slug: String = topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "general".to_string()
    } else {
        slug.to_string()
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}
