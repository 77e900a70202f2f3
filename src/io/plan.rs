//! Plan document accessor.
//!
//! Plans are markdown files whose tasks are `###` headings of the form
//! `### <dotted-id> [<marker>] <title>`, with the body up to the next
//! heading as the task description. Markers: `[ ]` pending, `[~]` in
//! progress, `[x]` done, `[!]` blocked. Declaration order is preserved;
//! tasks are never sorted by id.
//!
//! Parsed statuses are only a hint. The durable override map is the source
//! of truth for completion: tasks without an override are treated as
//! pending no matter what marker the document carries, so an optimistic
//! `[x]` cannot skip unimplemented work.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::io::state::StateStore;

/// Estimated tokens per plan character, for the size guard.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    fn from_marker(marker: char) -> Self {
        match marker {
            'x' | 'X' => TaskStatus::Done,
            '~' => TaskStatus::InProgress,
            '!' => TaskStatus::Blocked,
            _ => TaskStatus::Pending,
        }
    }

    fn marker(self) -> char {
        match self {
            TaskStatus::Pending => ' ',
            TaskStatus::InProgress => '~',
            TaskStatus::Done => 'x',
            TaskStatus::Blocked => '!',
        }
    }
}

/// A unit of work from the plan document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Hierarchical dotted id ("3", "3.2", "3.2.1").
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
}

/// Plan status rollup for the `status` command and the final report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub total: usize,
    pub done: usize,
    pub in_progress: usize,
    pub pending: usize,
    pub blocked: usize,
}

static TASK_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^###\s+(\d+(?:\.\d+)*)\.?\s+\[([ xX~!])\]\s+(.+?)\s*$").unwrap()
});

/// Accessor for one plan document.
#[derive(Debug, Clone)]
pub struct Plan {
    path: PathBuf,
}

impl Plan {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("read plan {}", self.path.display()))
    }

    /// Parse tasks in declaration order and apply the override map.
    pub fn tasks(&self, overrides: &BTreeMap<String, TaskStatus>) -> Result<Vec<Task>> {
        let content = self.read()?;
        let mut tasks = parse_tasks(&content);
        apply_overrides(&mut tasks, overrides);
        Ok(tasks)
    }

    /// First in-progress task if any (resuming interrupted work beats
    /// starting new work), else the first pending task.
    pub fn next_pending(&self, overrides: &BTreeMap<String, TaskStatus>) -> Result<Option<Task>> {
        let tasks = self.tasks(overrides)?;
        Ok(tasks
            .iter()
            .find(|t| t.status == TaskStatus::InProgress)
            .or_else(|| tasks.iter().find(|t| t.status == TaskStatus::Pending))
            .cloned())
    }

    pub fn summary(&self, overrides: &BTreeMap<String, TaskStatus>) -> Result<PlanSummary> {
        let tasks = self.tasks(overrides)?;
        let mut summary = PlanSummary {
            total: tasks.len(),
            ..PlanSummary::default()
        };
        for task in &tasks {
            match task.status {
                TaskStatus::Done => summary.done += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Blocked => summary.blocked += 1,
            }
        }
        Ok(summary)
    }

    pub fn estimated_tokens(&self) -> Result<usize> {
        Ok(self.read()?.len() / CHARS_PER_TOKEN)
    }

    /// Compress the document when it outgrows the token budget: done tasks
    /// collapse to a bare `id [x] title` heading, pending and in-progress
    /// tasks keep their full bodies. The original is backed up into
    /// `backup_dir` first (the state namespace, so the backup never shows up
    /// in git status). The caller commits the rewrite separately so the next
    /// task's diff is not polluted by this administrative change.
    #[instrument(skip_all, fields(max_tokens))]
    pub fn compress(
        &self,
        overrides: &BTreeMap<String, TaskStatus>,
        max_tokens: usize,
        backup_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let content = self.read()?;
        if content.len() / CHARS_PER_TOKEN <= max_tokens {
            return Ok(None);
        }
        info!(
            tokens = content.len() / CHARS_PER_TOKEN,
            max_tokens, "plan over budget, compressing"
        );

        fs::create_dir_all(backup_dir)
            .with_context(|| format!("create backup dir {}", backup_dir.display()))?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plan.md".to_string());
        let backup = backup_dir.join(format!("{name}.backup"));
        fs::write(&backup, &content)
            .with_context(|| format!("write backup {}", backup.display()))?;

        let compressed = compress_content(&content, overrides);
        if compressed.len() >= content.len() {
            debug!("compression did not shrink the plan, keeping original");
            return Ok(None);
        }
        fs::write(&self.path, &compressed)
            .with_context(|| format!("write plan {}", self.path.display()))?;
        info!(
            before = content.len(),
            after = compressed.len(),
            "plan compressed"
        );
        Ok(Some(backup))
    }

    /// Replace a task with subtasks `id.1`, `id.2`, ... parsed from the
    /// splitter's subtask list. Returns the number of subtasks written.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn apply_split(&self, task: &Task, subtasks_text: &str) -> Result<usize> {
        let content = self.read()?;
        let spans = task_spans(&content);
        let span = spans
            .iter()
            .find(|s| s.id == task.id)
            .ok_or_else(|| anyhow!("task {} not found in {}", task.id, self.path.display()))?;

        let subtasks = parse_subtask_list(subtasks_text);
        if subtasks.is_empty() {
            return Err(anyhow!("splitter produced no parseable subtasks"));
        }

        let mut replacement = String::new();
        for (i, (title, description)) in subtasks.iter().enumerate() {
            replacement.push_str(&format!("### {}.{} [ ] {}\n", task.id, i + 1, title));
            if !description.is_empty() {
                replacement.push_str(description);
                replacement.push('\n');
            }
            replacement.push('\n');
        }

        let mut updated = String::with_capacity(content.len() + replacement.len());
        updated.push_str(&content[..span.start]);
        updated.push_str(&replacement);
        updated.push_str(&content[span.end..]);
        fs::write(&self.path, updated)
            .with_context(|| format!("write plan {}", self.path.display()))?;
        info!(count = subtasks.len(), "task split applied");
        Ok(subtasks.len())
    }

    /// Reconcile the override map with the document's markers at run start.
    /// A `[x]` in the document records done, a `[ ]` un-does a stale done
    /// entry, in-progress overrides are left alone, and overrides for tasks
    /// no longer in the document are dropped. Handles plans edited by hand
    /// or advanced during an interactive unblock session.
    #[instrument(skip_all)]
    pub fn sync_overrides(&self, store: &StateStore) -> Result<()> {
        let content = self.read()?;
        let tasks = parse_tasks(&content);
        let mut overrides = store.load_status_overrides()?;

        for task in &tasks {
            let current = overrides.get(&task.id).copied();
            match task.status {
                TaskStatus::Done if current != Some(TaskStatus::Done) => {
                    debug!(id = %task.id, "marker says done, recording");
                    overrides.insert(task.id.clone(), TaskStatus::Done);
                }
                TaskStatus::Pending if current == Some(TaskStatus::Done) => {
                    debug!(id = %task.id, "marker says pending, un-recording done");
                    overrides.insert(task.id.clone(), TaskStatus::Pending);
                }
                _ => {}
            }
        }
        overrides.retain(|id, _| tasks.iter().any(|t| &t.id == id));

        store.replace_status_overrides(&overrides)?;
        Ok(())
    }
}

struct TaskSpan {
    id: String,
    status: TaskStatus,
    title: String,
    /// Byte range of heading plus body.
    start: usize,
    end: usize,
    body_start: usize,
}

fn task_spans(content: &str) -> Vec<TaskSpan> {
    let matches: Vec<_> = TASK_HEADING.captures_iter(content).collect();
    let mut spans = Vec::with_capacity(matches.len());
    for (i, caps) in matches.iter().enumerate() {
        let whole = caps.get(0).unwrap();
        let end = matches
            .get(i + 1)
            .map(|next| next.get(0).unwrap().start())
            .unwrap_or(content.len());
        let body_start = content[whole.end()..]
            .find('\n')
            .map(|n| whole.end() + n + 1)
            .unwrap_or(content.len());
        spans.push(TaskSpan {
            id: caps[1].to_string(),
            status: TaskStatus::from_marker(caps[2].chars().next().unwrap_or(' ')),
            title: caps[3].to_string(),
            start: whole.start(),
            end,
            body_start,
        });
    }
    spans
}

fn parse_tasks(content: &str) -> Vec<Task> {
    task_spans(content)
        .into_iter()
        .map(|span| Task {
            description: content[span.body_start.min(span.end)..span.end]
                .trim()
                .to_string(),
            id: span.id,
            title: span.title,
            status: span.status,
        })
        .collect()
}

fn apply_overrides(tasks: &mut [Task], overrides: &BTreeMap<String, TaskStatus>) {
    for task in tasks {
        task.status = overrides
            .get(&task.id)
            .copied()
            .unwrap_or(TaskStatus::Pending);
    }
}

fn compress_content(content: &str, overrides: &BTreeMap<String, TaskStatus>) -> String {
    let spans = task_spans(content);
    let Some(first) = spans.first() else {
        return content.to_string();
    };

    let mut out = String::with_capacity(content.len() / 2);
    out.push_str(&content[..first.start]);
    for span in &spans {
        let done = overrides.get(&span.id) == Some(&TaskStatus::Done);
        if done {
            out.push_str(&format!("### {} [x] {}\n\n", span.id, span.title));
        } else {
            out.push_str(&format!(
                "### {} [{}] {}\n",
                span.id,
                span.status.marker(),
                span.title
            ));
            let body = content[span.body_start.min(span.end)..span.end].trim_end();
            if !body.trim().is_empty() {
                out.push_str(body);
                out.push('\n');
            }
            out.push('\n');
        }
    }
    out
}

/// Parse a splitter subtask list: each top-level bullet or numbered line
/// starts a subtask, indented continuation lines form its description.
fn parse_subtask_list(text: &str) -> Vec<(String, String)> {
    static ITEM: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(?:[-*]|\d+[.)])\s+(.+)$").unwrap());

    let mut subtasks: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = ITEM.captures(line.trim_end()) {
            subtasks.push((caps[1].trim().to_string(), String::new()));
        } else if let Some((_, description)) = subtasks.last_mut() {
            let continuation = line.trim();
            if !continuation.is_empty() {
                if !description.is_empty() {
                    description.push('\n');
                }
                description.push_str(continuation);
            }
        }
    }
    subtasks
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = "\
# Feature rollout

Context paragraph.

### 1 [x] Set up scaffolding
Already merged.

### 2 [ ] Implement the parser
Build the tokenizer and the tree builder.
Cover edge cases.

### 2.1 [~] Tokenizer
In flight.

### 3 [!] Deploy notes
Blocked by ops.
";

    fn write_plan(dir: &Path, content: &str) -> Plan {
        let path = dir.join("feature.md");
        fs::write(&path, content).expect("write plan");
        Plan::new(path)
    }

    #[test]
    fn parses_tasks_in_declaration_order() {
        let tasks = parse_tasks(PLAN);
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "2.1", "3"]);
        assert_eq!(tasks[1].title, "Implement the parser");
        assert!(tasks[1].description.contains("tokenizer"));
        assert!(tasks[1].description.contains("edge cases"));
        assert_eq!(tasks[0].status, TaskStatus::Done);
        assert_eq!(tasks[2].status, TaskStatus::InProgress);
        assert_eq!(tasks[3].status, TaskStatus::Blocked);
    }

    #[test]
    fn overrides_are_the_source_of_truth() {
        let mut tasks = parse_tasks(PLAN);
        let mut overrides = BTreeMap::new();
        overrides.insert("1".to_string(), TaskStatus::Done);
        apply_overrides(&mut tasks, &overrides);

        assert_eq!(tasks[0].status, TaskStatus::Done);
        // Everything without an override resets to pending, markers or not.
        assert_eq!(tasks[1].status, TaskStatus::Pending);
        assert_eq!(tasks[2].status, TaskStatus::Pending);
        assert_eq!(tasks[3].status, TaskStatus::Pending);
    }

    #[test]
    fn next_pending_prefers_in_progress() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = write_plan(temp.path(), PLAN);
        let mut overrides = BTreeMap::new();
        overrides.insert("1".to_string(), TaskStatus::Done);
        overrides.insert("2.1".to_string(), TaskStatus::InProgress);

        let next = plan.next_pending(&overrides).expect("parse").expect("some");
        assert_eq!(next.id, "2.1");
    }

    #[test]
    fn next_pending_falls_back_to_first_pending() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = write_plan(temp.path(), PLAN);
        let mut overrides = BTreeMap::new();
        overrides.insert("1".to_string(), TaskStatus::Done);

        let next = plan.next_pending(&overrides).expect("parse").expect("some");
        assert_eq!(next.id, "2");
    }

    #[test]
    fn summary_counts_by_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = write_plan(temp.path(), PLAN);
        let mut overrides = BTreeMap::new();
        overrides.insert("1".to_string(), TaskStatus::Done);
        overrides.insert("3".to_string(), TaskStatus::Blocked);

        let summary = plan.summary(&overrides).expect("summary");
        assert_eq!(summary.total, 4);
        assert_eq!(summary.done, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.pending, 2);
    }

    #[test]
    fn compression_collapses_done_tasks_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = write_plan(temp.path(), PLAN);
        let backup_dir = temp.path().join(".dvx").join("feature");
        let mut overrides = BTreeMap::new();
        overrides.insert("1".to_string(), TaskStatus::Done);

        let backup = plan.compress(&overrides, 0, &backup_dir).expect("compress");
        let backup = backup.expect("backup path");
        assert!(backup.exists());
        // The backup lands in the state namespace, not beside the plan.
        assert!(backup.starts_with(&backup_dir));
        assert!(!temp.path().join("feature.md.backup").exists());

        let compressed = plan.read().expect("read");
        assert!(compressed.contains("### 1 [x] Set up scaffolding"));
        assert!(!compressed.contains("Already merged."));
        assert!(compressed.contains("Build the tokenizer"));
        assert!(compressed.contains("Context paragraph."));
    }

    #[test]
    fn compression_skips_plans_under_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = write_plan(temp.path(), PLAN);
        let backup = plan
            .compress(&BTreeMap::new(), 1_000_000, &temp.path().join(".dvx"))
            .expect("compress");
        assert!(backup.is_none());
    }

    #[test]
    fn split_replaces_task_with_numbered_subtasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = write_plan(
            temp.path(),
            "# Plan\n\n### 1 [x] Done thing\nNotes.\n\n### 2 [ ] Implement the parser\nBig.\n\n### 3 [ ] Wire it up\nLater.\n",
        );
        let task = Task {
            id: "2".to_string(),
            title: "Implement the parser".to_string(),
            description: String::new(),
            status: TaskStatus::Pending,
        };

        let count = plan
            .apply_split(&task, "- Build the tokenizer\n  Lexing only.\n- Build the tree builder\n")
            .expect("split");
        assert_eq!(count, 2);

        let content = plan.read().expect("read");
        assert!(content.contains("### 2.1 [ ] Build the tokenizer"));
        assert!(content.contains("Lexing only."));
        assert!(content.contains("### 2.2 [ ] Build the tree builder"));
        assert!(!content.contains("Implement the parser"));
        // Neighbors untouched.
        assert!(content.contains("### 1 [x] Done thing"));
        assert!(content.contains("### 3 [ ] Wire it up"));
    }

    #[test]
    fn sync_records_marker_done_and_drops_stale_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = write_plan(temp.path(), PLAN);
        let store = StateStore::for_plan(temp.path(), plan.path());
        store
            .set_status_override("99", TaskStatus::Done)
            .expect("seed stale");
        store
            .set_status_override("2", TaskStatus::Done)
            .expect("seed done");

        plan.sync_overrides(&store).expect("sync");
        let overrides = store.load_status_overrides().expect("load");
        // Marker [x] on task 1 recorded.
        assert_eq!(overrides.get("1"), Some(&TaskStatus::Done));
        // Task 2 marker is [ ], stale done entry reverted.
        assert_eq!(overrides.get("2"), Some(&TaskStatus::Pending));
        // Task gone from the plan dropped.
        assert_eq!(overrides.get("99"), None);
    }

    #[test]
    fn estimates_tokens_from_length() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = write_plan(temp.path(), PLAN);
        let expected = PLAN.len() / 4;
        assert_eq!(plan.estimated_tokens().expect("estimate"), expected);
    }
}
