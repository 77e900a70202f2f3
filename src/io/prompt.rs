//! Role prompt rendering.
//!
//! Templates ship inside the binary; the orchestrator never depends on
//! prompt files being present in the target project.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::io::plan::Task;

const IMPLEMENTER: &str = include_str!("prompts/implementer.md");
const IMPLEMENTER_FIX: &str = include_str!("prompts/implementer-fix.md");
const REVIEWER: &str = include_str!("prompts/reviewer.md");
const ESCALATER: &str = include_str!("prompts/escalater.md");
const SPLITTER: &str = include_str!("prompts/splitter.md");
const POLISHER: &str = include_str!("prompts/polisher.md");
const POLISH_FIX: &str = include_str!("prompts/polish-fix.md");
const POLISH_COMMIT: &str = include_str!("prompts/polish-commit.md");
const FINALIZER: &str = include_str!("prompts/finalizer.md");
const FINALIZER_FIX: &str = include_str!("prompts/finalizer-fix.md");
const COMMIT: &str = include_str!("prompts/commit.md");
const TEST_GAP: &str = include_str!("prompts/test-gap.md");
const PLANNER: &str = include_str!("prompts/planner.md");

/// Task fields exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct TaskContext {
    id: String,
    title: String,
    description: String,
}

impl From<&Task> for TaskContext {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
        }
    }
}

/// Template engine wrapper around minijinja.
pub struct Prompts {
    env: Environment<'static>,
}

impl Default for Prompts {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompts {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("implementer", IMPLEMENTER),
            ("implementer-fix", IMPLEMENTER_FIX),
            ("reviewer", REVIEWER),
            ("escalater", ESCALATER),
            ("splitter", SPLITTER),
            ("polisher", POLISHER),
            ("polish-fix", POLISH_FIX),
            ("polish-commit", POLISH_COMMIT),
            ("finalizer", FINALIZER),
            ("finalizer-fix", FINALIZER_FIX),
            ("commit", COMMIT),
            ("test-gap", TEST_GAP),
            ("planner", PLANNER),
        ] {
            env.add_template(name, source)
                .expect("bundled template should be valid");
        }
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        Ok(self.env.get_template(name)?.render(ctx)?)
    }

    pub fn implementer(&self, task: &Task, plan_file: &str) -> Result<String> {
        self.render(
            "implementer",
            context! { task => TaskContext::from(task), plan_file },
        )
    }

    pub fn implementer_fix(&self, task: &Task, plan_file: &str, feedback: &str) -> Result<String> {
        self.render(
            "implementer-fix",
            context! { task => TaskContext::from(task), plan_file, feedback },
        )
    }

    pub fn reviewer(&self, task: &Task, plan_file: &str, git_diff: &str) -> Result<String> {
        self.render(
            "reviewer",
            context! { task => TaskContext::from(task), plan_file, git_diff },
        )
    }

    pub fn escalater(
        &self,
        task: &Task,
        trigger_source: &str,
        trigger_reason: &str,
        trigger_context: &str,
    ) -> Result<String> {
        self.render(
            "escalater",
            context! {
                task => TaskContext::from(task),
                trigger_source,
                trigger_reason,
                context => trigger_context,
            },
        )
    }

    pub fn splitter(&self, task: &Task) -> Result<String> {
        self.render("splitter", context! { task => TaskContext::from(task) })
    }

    pub fn polisher(&self, plan_file: &str, git_diff: &str, plan_content: &str) -> Result<String> {
        self.render(
            "polisher",
            context! { plan_file, git_diff, plan_content },
        )
    }

    pub fn polish_fix(&self, suggestions: &str) -> Result<String> {
        self.render("polish-fix", context! { suggestions })
    }

    pub fn polish_commit(&self) -> Result<String> {
        self.render("polish-commit", context! {})
    }

    pub fn finalizer(
        &self,
        plan_file: &str,
        current_branch: &str,
        base_branch: &str,
        plan_content: &str,
    ) -> Result<String> {
        self.render(
            "finalizer",
            context! { plan_file, current_branch, base_branch, plan_content },
        )
    }

    pub fn finalizer_fix(&self, issues: &str, plan_file: &str) -> Result<String> {
        self.render("finalizer-fix", context! { issues, plan_file })
    }

    pub fn commit(&self, task: &Task, plan_file: &str) -> Result<String> {
        self.render(
            "commit",
            context! { task => TaskContext::from(task), plan_file },
        )
    }

    pub fn test_gap(&self, task: &Task, plan_file: &str) -> Result<String> {
        self.render(
            "test-gap",
            context! { task => TaskContext::from(task), plan_file },
        )
    }

    /// Plan generation/update prompt. `existing` is the current plan content
    /// when updating; `plan_file` is the target name when the user chose one.
    pub fn planner(
        &self,
        request: &str,
        existing: Option<&str>,
        plan_file: Option<&str>,
    ) -> Result<String> {
        self.render(
            "planner",
            context! {
                request,
                existing,
                named => plan_file.is_some(),
                plan_file,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::plan::TaskStatus;

    fn task() -> Task {
        Task {
            id: "2.1".to_string(),
            title: "Wire the parser".to_string(),
            description: "Hook the tokenizer into the tree builder.".to_string(),
            status: TaskStatus::Pending,
        }
    }

    #[test]
    fn implementer_prompt_includes_task_and_markers() {
        let prompt = Prompts::new()
            .implementer(&task(), "plans/feature.md")
            .expect("render");
        assert!(prompt.contains("task 2.1"));
        assert!(prompt.contains("Wire the parser"));
        assert!(prompt.contains("plans/feature.md"));
        assert!(prompt.contains("[ALREADY_COMPLETE]"));
        assert!(prompt.contains("[BLOCKED:"));
    }

    #[test]
    fn fix_prompt_embeds_feedback() {
        let prompt = Prompts::new()
            .implementer_fix(&task(), "plans/feature.md", "1. off-by-one in loop")
            .expect("render");
        assert!(prompt.contains("off-by-one in loop"));
    }

    #[test]
    fn reviewer_prompt_embeds_diff_and_verdicts() {
        let prompt = Prompts::new()
            .reviewer(&task(), "plans/feature.md", "diff --git a/x b/x")
            .expect("render");
        assert!(prompt.contains("diff --git"));
        assert!(prompt.contains("[APPROVED]"));
        assert!(prompt.contains("[ISSUES]"));
        assert!(prompt.contains("[CRITICAL]"));
    }

    #[test]
    fn escalater_prompt_names_trigger() {
        let prompt = Prompts::new()
            .escalater(&task(), "reviewer", "loop not converging", "history...")
            .expect("render");
        assert!(prompt.contains("reviewer"));
        assert!(prompt.contains("loop not converging"));
        assert!(prompt.contains("[PROCEED]"));
        assert!(prompt.contains("[ESCALATE]"));
    }

    #[test]
    fn planner_prompt_switches_on_existing() {
        let prompts = Prompts::new();
        let fresh = prompts
            .planner("add pagination", None, None)
            .expect("render");
        assert!(fresh.contains("FILENAME:"));

        let named = prompts
            .planner("add pagination", None, Some("PLAN-pagination.md"))
            .expect("render");
        assert!(named.contains("PLAN-pagination.md"));
        assert!(!named.contains("FILENAME:"));

        let update = prompts
            .planner("add pagination", Some("# Plan: old"), None)
            .expect("render");
        assert!(update.contains("EXISTING PLAN"));
        assert!(update.contains("# Plan: old"));
    }
}
