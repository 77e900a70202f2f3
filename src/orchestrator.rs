//! The orchestration loop.
//!
//! Drives one plan end to end: pick the next pending task, implement it,
//! review it, fix until approved, backfill tests, commit, repeat. When every
//! task is done a finalization pass polishes the implementation and gates the
//! branch for merge. All agent failures funnel through the escalation engine;
//! safety and change-size violations block immediately without consulting it.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::escalation::{TriggerSource, block_run, evaluate_trigger};
use crate::exit_codes;
use crate::interpret::{
    FinalizerVerdict, PolishVerdict, ReviewOutcome, SplitVerdict, classify_finalizer,
    classify_polish, classify_review, classify_split, extract_decisions, is_already_complete,
};
use crate::io::config::DvxConfig;
use crate::io::gateway::{AgentGateway, AgentResult};
use crate::io::git::{ChangeStats, Git};
use crate::io::plan::{Plan, Task, TaskStatus};
use crate::io::state::{OrchestrationState, Phase, StateStore};
use crate::roles::{Roles, build_trigger_context};
use crate::safety::{SafetyCheck, check_task};

/// Terminal condition of one `run` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Plan finished and finalization passed.
    Complete,
    /// Step mode pause after a task; rerun to continue.
    Paused,
    /// Human intervention required; see the blocked-context file.
    Blocked,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Complete | RunOutcome::Paused => exit_codes::OK,
            RunOutcome::Blocked => exit_codes::BLOCKED,
        }
    }
}

pub struct Orchestrator<'a, G> {
    roles: Roles<'a, G>,
    git: Git,
    store: StateStore,
    plan: Plan,
    plan_file: String,
    config: &'a DvxConfig,
}

impl<'a, G: AgentGateway> Orchestrator<'a, G> {
    pub fn new(
        gateway: &'a G,
        config: &'a DvxConfig,
        git: Git,
        store: StateStore,
        plan: Plan,
    ) -> Self {
        let plan_file = plan.path().to_string_lossy().into_owned();
        let workdir = git.workdir().to_path_buf();
        Self {
            roles: Roles::new(gateway, config, workdir),
            git,
            store,
            plan,
            plan_file,
            config,
        }
    }

    /// Run the plan until completion, pause, or block.
    #[instrument(skip_all, fields(plan = %self.plan_file))]
    pub fn run(&self, state: &mut OrchestrationState) -> Result<RunOutcome> {
        self.plan.sync_overrides(&self.store)?;

        loop {
            // Commit-role notes grow the plan between tasks, so the budget
            // check runs on every iteration, not once per invocation.
            self.compress_plan()?;

            let overrides = self.store.load_status_overrides()?;
            let Some(task) = self.plan.next_pending(&overrides)? else {
                let summary = self.plan.summary(&overrides)?;
                if summary.pending == 0 && summary.in_progress == 0 {
                    return self.finalize(state);
                }
                warn!(
                    blocked = summary.blocked,
                    "no pending tasks but plan not complete"
                );
                return Ok(RunOutcome::Blocked);
            };

            println!();
            println!("Task {}: {}", task.id, task.title);
            println!("{}", "-".repeat(60));

            if let SafetyCheck::Forbidden { reason } = check_task(&task) {
                println!("  BLOCKED: {reason}");
                println!("  This task contains forbidden operations (merge/deploy).");
                println!("  Skipping - please remove or modify this task manually.");
                warn!(task_id = %task.id, reason, "task blocked for safety");
                self.store.set_status_override(&task.id, TaskStatus::Blocked)?;
                continue;
            }

            if self.maybe_split(&task)? {
                continue;
            }

            state.current_task_id = Some(task.id.clone());
            state.current_task_title = Some(task.title.clone());
            self.store.set_status_override(&task.id, TaskStatus::InProgress)?;
            self.set_phase(state, Phase::Implementing)?;

            info!(task_id = %task.id, "implementing task");
            let impl_result = self.roles.implementer(&task, &self.plan_file, None)?;
            self.harvest_decisions(&impl_result.text)?;

            if is_already_complete(&impl_result.text) {
                println!("  Task {} already complete - skipping to next task", task.id);
                info!(task_id = %task.id, "task detected as already complete");
                self.store.set_status_override(&task.id, TaskStatus::Done)?;
                state.iteration_count = 0;
                self.store.save(state)?;
                continue;
            }

            if !impl_result.succeeded || impl_result.blocked {
                let reason = impl_result
                    .block_reason
                    .clone()
                    .unwrap_or_else(|| "Implementation failed".to_string());
                let context = build_trigger_context(&impl_result, "");
                let decision = evaluate_trigger(
                    &self.roles,
                    &self.store,
                    state,
                    &task,
                    TriggerSource::Implementer,
                    &reason,
                    &context,
                )?;
                if !decision.proceeds() {
                    return Ok(RunOutcome::Blocked);
                }
            }

            match self.review_and_fix(state, &task)? {
                StepFlow::Continue => {}
                StepFlow::Stop(outcome) => return Ok(outcome),
            }

            self.store.set_status_override(&task.id, TaskStatus::Done)?;
            println!("  Task {} complete!", task.id);
            state.iteration_count = 0;
            state.current_task_id = None;
            state.current_task_title = None;
            self.store.save(state)?;

            if state.step_mode {
                println!();
                println!("{}", "=".repeat(60));
                println!("PAUSED (step mode)");
                println!("{}", "=".repeat(60));
                println!("Task {} ({}) completed and committed.", task.id, task.title);
                println!();
                println!(
                    "Review the changes, then run 'dvx run {}' for next task.",
                    self.plan_file
                );
                println!();
                self.set_phase(state, Phase::Paused)?;
                return Ok(RunOutcome::Paused);
            }
        }
    }

    /// Compress an over-budget plan and commit the rewrite separately from
    /// any task work.
    fn compress_plan(&self) -> Result<()> {
        let overrides = self.store.load_status_overrides()?;
        if let Some(backup) =
            self.plan
                .compress(&overrides, self.config.max_plan_tokens, self.store.dir())?
        {
            info!(backup = %backup.display(), "plan compressed");
            let plan_name = self
                .plan
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.plan_file.clone());
            self.git.add_paths(&[&self.plan_file])?;
            self.git.commit_staged(&format!(
                "plan: compress {plan_name} to remove completed task notes"
            ))?;
        }
        Ok(())
    }

    /// Splitter triage. Returns true when the plan was rewritten and the
    /// loop should restart on the first subtask. Splitter trouble is never
    /// fatal; the original task proceeds as-is.
    fn maybe_split(&self, task: &Task) -> Result<bool> {
        println!("  Analyzing task complexity...");
        let result = self.roles.splitter(task)?;
        if !result.succeeded {
            warn!(reason = ?result.block_reason, "task splitter failed");
            println!("  Skipping complexity analysis - proceeding with task");
            return Ok(false);
        }
        match classify_split(&result.text) {
            SplitVerdict::Split { subtasks } => {
                println!("  Task {} is too complex - splitting into subtasks...", task.id);
                match self.plan.apply_split(task, &subtasks) {
                    Ok(count) => {
                        println!(
                            "  Plan updated with {count} subtasks. Restarting with first subtask..."
                        );
                        Ok(true)
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to apply task split");
                        println!("  Failed to update plan - proceeding with original task");
                        Ok(false)
                    }
                }
            }
            SplitVerdict::Keep => {
                println!("  Task is appropriately scoped");
                Ok(false)
            }
        }
    }

    /// Review, fix until approved or escalated, backfill tests, commit.
    fn review_and_fix(&self, state: &mut OrchestrationState, task: &Task) -> Result<StepFlow> {
        self.set_phase(state, Phase::Reviewing)?;
        info!("reviewing implementation");

        let stats = self.git.change_stats()?;
        if stats.is_massive(&self.config.massive_limits()) {
            return self.block_massive_change(state, task, &stats).map(StepFlow::Stop);
        }

        let mut review_result = self.run_reviewer(state, task)?;

        if !review_result.succeeded {
            let context = build_trigger_context(&review_result, "");
            let decision = evaluate_trigger(
                &self.roles,
                &self.store,
                state,
                task,
                TriggerSource::Reviewer,
                "Review failed",
                &context,
            )?;
            if !decision.proceeds() {
                return Ok(StepFlow::Stop(RunOutcome::Blocked));
            }
        }

        if review_result.text.to_lowercase().contains("prompt is too long") {
            warn!("reviewer hit prompt limit, treating as massive change");
            let stats = self.git.change_stats()?;
            return self
                .block_unreviewable_change(state, task, &stats)
                .map(StepFlow::Stop);
        }

        let mut verdict = classify_review(&review_result.text);
        let mut iteration = 0u32;

        while verdict.has_issues() && !verdict.approved() {
            iteration += 1;
            state.iteration_count += 1;
            self.store.save(state)?;

            if state.iteration_count > self.config.max_iterations {
                let reason = format!(
                    "Max iterations ({}) exceeded - review loop not converging",
                    self.config.max_iterations
                );
                let context = format!("Last review feedback:\n{}", review_result.text.trim());
                let decision = evaluate_trigger(
                    &self.roles,
                    &self.store,
                    state,
                    task,
                    TriggerSource::Orchestrator,
                    &reason,
                    &context,
                )?;
                if !decision.proceeds() {
                    return Ok(StepFlow::Stop(RunOutcome::Blocked));
                }
                // Escalater allowed more iterations.
                state.iteration_count = 0;
                self.store.save(state)?;
            }

            if verdict.critical() {
                let decision = evaluate_trigger(
                    &self.roles,
                    &self.store,
                    state,
                    task,
                    TriggerSource::Reviewer,
                    "Critical issue found in review",
                    review_result.text.trim(),
                )?;
                if !decision.proceeds() {
                    return Ok(StepFlow::Stop(RunOutcome::Blocked));
                }
                // Escalater decided the critical issue is not blocking.
            }

            println!("  Review iteration {iteration}: addressing feedback...");
            self.set_phase(state, Phase::Fixing)?;

            let fix_result =
                self.roles
                    .implementer(task, &self.plan_file, Some(review_result.text.trim()))?;
            self.harvest_decisions(&fix_result.text)?;

            if !fix_result.succeeded || fix_result.blocked {
                let reason = fix_result
                    .block_reason
                    .clone()
                    .unwrap_or_else(|| "Fix implementation failed".to_string());
                let context = build_trigger_context(&fix_result, "");
                let decision = evaluate_trigger(
                    &self.roles,
                    &self.store,
                    state,
                    task,
                    TriggerSource::Implementer,
                    &reason,
                    &context,
                )?;
                if !decision.proceeds() {
                    return Ok(StepFlow::Stop(RunOutcome::Blocked));
                }
            }

            self.set_phase(state, Phase::Reviewing)?;
            review_result = self.run_reviewer(state, task)?;
            verdict = classify_review(&review_result.text);
        }

        if let ReviewOutcome::Unclear = verdict.outcome {
            warn!("review verdict unclear, proceeding to commit");
        }

        if verdict.missing_tests {
            if let Some(outcome) = self.backfill_tests(state, task)? {
                return Ok(StepFlow::Stop(outcome));
            }
        }

        println!("  Committing changes...");
        self.set_phase(state, Phase::Committing)?;
        let commit_result = self.roles.commit(task, &self.plan_file)?;

        if !commit_result.succeeded || commit_result.blocked {
            let reason = commit_result
                .block_reason
                .clone()
                .unwrap_or_else(|| "Commit failed".to_string());
            let context = build_trigger_context(&commit_result, "");
            let decision = evaluate_trigger(
                &self.roles,
                &self.store,
                state,
                task,
                TriggerSource::Implementer,
                &reason,
                &context,
            )?;
            if !decision.proceeds() {
                return Ok(StepFlow::Stop(RunOutcome::Blocked));
            }
            // Escalater decided the commit issue is not blocking; the task
            // is still marked done.
        }

        Ok(StepFlow::Continue)
    }

    fn run_reviewer(&self, state: &mut OrchestrationState, task: &Task) -> Result<AgentResult> {
        let diff = self.git.review_diff(self.config.review_diff_limit_bytes)?;
        let result = self.roles.reviewer(
            task,
            &self.plan_file,
            &diff,
            state.reviewer_session.as_deref(),
        )?;
        if let Some(session) = &result.session {
            state.reviewer_session = Some(session.clone());
            self.store.save(state)?;
        }
        Ok(result)
    }

    fn backfill_tests(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
    ) -> Result<Option<RunOutcome>> {
        println!("  Adding missing tests...");
        self.set_phase(state, Phase::Testing)?;

        let result = self.roles.test_gap(task, &self.plan_file)?;
        if !result.succeeded || result.blocked {
            let reason = result
                .block_reason
                .clone()
                .unwrap_or_else(|| "Test writing failed".to_string());
            let context = build_trigger_context(&result, "");
            let decision = evaluate_trigger(
                &self.roles,
                &self.store,
                state,
                task,
                TriggerSource::Implementer,
                &reason,
                &context,
            )?;
            if !decision.proceeds() {
                return Ok(Some(RunOutcome::Blocked));
            }
            // Escalater decided to proceed without tests.
        }
        Ok(None)
    }

    fn block_massive_change(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
        stats: &ChangeStats,
    ) -> Result<RunOutcome> {
        let ratio = stats.deletions as f64 / stats.insertions.max(1) as f64;
        println!(
            "  Large deletion detected: {} deletions vs {} additions ({ratio:.1}x)",
            stats.deletions, stats.insertions
        );

        let context = format!(
            "## Large Deletion Detected\n\n\
             This task deleted significantly more code than it added, which requires human verification.\n\n\
             ### Why This Was Blocked\n\n\
             | Metric | Value |\n\
             |--------|-------|\n\
             | Files deleted | {files_deleted} |\n\
             | Lines added | {insertions} |\n\
             | Lines deleted | {deletions} |\n\
             | Deletion ratio | {ratio:.1}x |\n\n\
             > **Policy**: Large additions and refactoring (similar add/delete counts) are auto-approved.\n\
             > Large deletions without corresponding additions require human review to prevent accidental code loss.\n\n\
             ### Change Summary\n\n\
             ```\n{summary}\n```\n\n\
             ### Verification Checklist (Must Complete)\n\n\
             1. [ ] **Deletions match task**: Every deleted file/function is mentioned in the task description\n\
             2. [ ] **No collateral damage**: Only files related to this task were modified\n\
             3. [ ] **Build passes**\n\
             4. [ ] **Tests pass**\n\n\
             ### Recommendation\n\n\
             Do NOT commit until you've verified the deletions are intentional. If any deleted code \
             seems unrelated to the task, investigate before proceeding.\n\n\
             ### Next Steps\n\n\
             Once verified, commit and mark complete:\n\
             ```bash\n\
             git add -A\n\
             git commit -m \"Task {task_id}: {task_title}\"\n\
             ```\n\n\
             Then update the status map to mark task {task_id} as \"done\" and exit the session \
             to continue orchestration.\n",
            files_deleted = stats.files_deleted,
            insertions = stats.insertions,
            deletions = stats.deletions,
            summary = stats.summary.trim_end(),
            task_id = task.id,
            task_title = task.title,
        );
        let reason = format!(
            "Large deletion requires human review ({} deletions, {ratio:.1}x ratio)",
            stats.deletions
        );
        block_run(&self.store, state, &reason, &context)?;
        Ok(RunOutcome::Blocked)
    }

    fn block_unreviewable_change(
        &self,
        state: &mut OrchestrationState,
        task: &Task,
        stats: &ChangeStats,
    ) -> Result<RunOutcome> {
        let total_lines = stats.insertions + stats.deletions;
        let context = format!(
            "## Review Failed: Prompt Too Long\n\n\
             The reviewer could not process this task because the changes are too large for automated review.\n\n\
             ### Why This Was Blocked\n\n\
             | Metric | Value |\n\
             |--------|-------|\n\
             | Files changed | {files_changed} |\n\
             | Files deleted | {files_deleted} |\n\
             | Lines changed | {total_lines} |\n\n\
             This exceeded the context limit for automated review. Manual verification is required.\n\n\
             ### Change Summary\n\n\
             ```\n{summary}\n```\n\n\
             ### Verification Checklist (Must Complete)\n\n\
             1. [ ] **Changes match task**: Every modification aligns with the task description\n\
             2. [ ] **No unintended changes**: Only files related to this task were modified\n\
             3. [ ] **Build passes**\n\
             4. [ ] **Tests pass**\n\n\
             ### Recommendation\n\n\
             Review the `git diff --stat` output above. If any files seem unrelated to the task, \
             investigate with `git diff <file>` before committing.\n\n\
             ### Next Steps\n\n\
             Once verified, commit and mark complete:\n\
             ```bash\n\
             git add -A\n\
             git commit -m \"Task {task_id}: {task_title}\"\n\
             ```\n\n\
             Then update the status map to mark task {task_id} as \"done\" and exit the session \
             to continue orchestration.\n",
            files_changed = stats.files_changed,
            files_deleted = stats.files_deleted,
            summary = stats.summary.trim_end(),
            task_id = task.id,
            task_title = task.title,
        );
        let reason = format!(
            "Changes too large for automated review ({} files)",
            stats.files_changed
        );
        block_run(&self.store, state, &reason, &context)?;
        Ok(RunOutcome::Blocked)
    }

    /// Finalization: polish, final review loop, completion commit. The plan
    /// file and decision logs are left in place for post-merge review.
    #[instrument(skip_all)]
    fn finalize(&self, state: &mut OrchestrationState) -> Result<RunOutcome> {
        let overrides = self.store.load_status_overrides()?;
        let summary = self.plan.summary(&overrides)?;

        println!();
        println!("{}", "=".repeat(60));
        println!("FINALIZING");
        println!("{}", "=".repeat(60));
        println!("All {} tasks completed!", summary.total);
        println!();

        self.set_phase(state, Phase::Finalizing)?;

        if let Some(outcome) = self.polish(state)? {
            return Ok(outcome);
        }

        println!();
        println!("Running final review...");

        let max = self.config.max_finalizer_iterations;
        let mut iteration = 0u32;
        let mut converged = false;

        while iteration < max {
            iteration += 1;
            println!("  Finalizer review (attempt {iteration}/{max})...");

            let plan_content = self.plan.read()?;
            let current_branch = self.git.current_branch()?;
            let base_branch = self.git.base_branch()?;
            let result =
                self.roles
                    .finalizer(&self.plan_file, &current_branch, &base_branch, &plan_content)?;

            if !result.succeeded {
                let reason = format!(
                    "Finalizer failed: {}",
                    result.block_reason.as_deref().unwrap_or("unknown error")
                );
                let context = build_trigger_context(&result, "");
                let decision = evaluate_trigger(
                    &self.roles,
                    &self.store,
                    state,
                    &synthetic_task("finalizer", "Final review", TaskStatus::Done),
                    TriggerSource::Finalizer,
                    &reason,
                    &context,
                )?;
                if !decision.proceeds() {
                    return Ok(RunOutcome::Blocked);
                }
                // Escalater decided to proceed; treat as approved.
                converged = true;
                break;
            }

            match classify_finalizer(&result.text) {
                FinalizerVerdict::Approved => {
                    println!("  Finalizer approved all changes!");
                    converged = true;
                    break;
                }
                FinalizerVerdict::Issues(issues) => {
                    println!("  Finalizer found issues - running fixes...");
                    info!(count = issues.len(), "finalizer found issues");

                    let fix_result = self.roles.finalizer_fix(result.text.trim(), &self.plan_file)?;
                    if !fix_result.succeeded || fix_result.blocked {
                        let reason = fix_result
                            .block_reason
                            .clone()
                            .unwrap_or_else(|| "Fix implementation failed".to_string());
                        let context = build_trigger_context(&fix_result, "");
                        let decision = evaluate_trigger(
                            &self.roles,
                            &self.store,
                            state,
                            &synthetic_task(
                                "finalizer-fix",
                                "Fix finalizer issues",
                                TaskStatus::InProgress,
                            ),
                            TriggerSource::Implementer,
                            &reason,
                            &context,
                        )?;
                        if !decision.proceeds() {
                            return Ok(RunOutcome::Blocked);
                        }
                    }
                    self.harvest_decisions(&fix_result.text)?;
                }
            }
        }

        if !converged {
            println!("  Max finalizer iterations ({max}) reached");
            let decision = evaluate_trigger(
                &self.roles,
                &self.store,
                state,
                &synthetic_task("finalizer", "Final review", TaskStatus::Done),
                TriggerSource::Orchestrator,
                &format!("Finalizer fix loop exceeded {max} iterations"),
                "The finalizer and implementer could not converge on an approved state.",
            )?;
            if !decision.proceeds() {
                return Ok(RunOutcome::Blocked);
            }
        }

        println!();
        println!("  Finalizing plan...");
        self.complete(state)?;

        println!();
        println!("{}", "=".repeat(60));
        println!("COMPLETE");
        println!("{}", "=".repeat(60));
        println!("Plan {} successfully completed!", self.plan_file);
        println!();
        println!("Plan file kept for review: {}", self.plan_file);
        println!(
            "State and DECISIONS preserved in: {}",
            self.store.dir().display()
        );
        println!();
        println!("The branch is ready for merge.");
        println!();
        println!("To clean up after merge: dvx clean {}", self.plan_file);
        println!();
        Ok(RunOutcome::Complete)
    }

    /// Polish phase. Returns Some when the run must stop.
    fn polish(&self, state: &mut OrchestrationState) -> Result<Option<RunOutcome>> {
        println!("Running polish review (holistic implementation review)...");

        let plan_content = self.plan.read()?;
        let diff = self.git.review_diff(self.config.review_diff_limit_bytes)?;
        let result = self.roles.polisher(&self.plan_file, &diff, &plan_content)?;

        if !result.succeeded {
            let reason = format!(
                "Polisher failed: {}",
                result.block_reason.as_deref().unwrap_or("unknown error")
            );
            let context = build_trigger_context(&result, "");
            let decision = evaluate_trigger(
                &self.roles,
                &self.store,
                state,
                &synthetic_task("polisher", "Polish review", TaskStatus::InProgress),
                TriggerSource::Polisher,
                &reason,
                &context,
            )?;
            if !decision.proceeds() {
                return Ok(Some(RunOutcome::Blocked));
            }
            // Escalater decided to proceed; skip to the finalizer.
            return Ok(None);
        }

        match classify_polish(&result.text) {
            PolishVerdict::Polished => {
                println!("  Implementation already polished!");
            }
            PolishVerdict::Suggestions(suggestions) => {
                println!("  Polisher has suggestions - implementing improvements...");
                info!("polisher found suggestions to address");

                let fix_result = self.roles.polish_fix(&suggestions)?;
                if !fix_result.succeeded || fix_result.blocked {
                    let reason = fix_result
                        .block_reason
                        .clone()
                        .unwrap_or_else(|| "Polish fix implementation failed".to_string());
                    let context = build_trigger_context(&fix_result, "");
                    let decision = evaluate_trigger(
                        &self.roles,
                        &self.store,
                        state,
                        &synthetic_task(
                            "polisher-fix",
                            "Address polish suggestions",
                            TaskStatus::InProgress,
                        ),
                        TriggerSource::Implementer,
                        &reason,
                        &context,
                    )?;
                    if !decision.proceeds() {
                        return Ok(Some(RunOutcome::Blocked));
                    }
                }
                self.harvest_decisions(&fix_result.text)?;

                println!("  Committing polish improvements...");
                let commit_result = self.roles.polish_commit()?;
                if !commit_result.succeeded || commit_result.blocked {
                    let reason = commit_result
                        .block_reason
                        .clone()
                        .unwrap_or_else(|| "Polish commit failed".to_string());
                    let context = build_trigger_context(&commit_result, "");
                    let decision = evaluate_trigger(
                        &self.roles,
                        &self.store,
                        state,
                        &synthetic_task(
                            "polisher-commit",
                            "Commit polish improvements",
                            TaskStatus::InProgress,
                        ),
                        TriggerSource::Implementer,
                        &reason,
                        &context,
                    )?;
                    if !decision.proceeds() {
                        return Ok(Some(RunOutcome::Blocked));
                    }
                }
                println!("  Polish improvements committed!");
            }
        }
        Ok(None)
    }

    /// Commit anything the finalization fixes left dirty and mark the plan
    /// complete. The plan file stays in the tree.
    fn complete(&self, state: &mut OrchestrationState) -> Result<()> {
        if !self.git.status_porcelain()?.trim().is_empty() {
            info!("committing pending changes from finalization");
            self.git.add_all()?;
            let message = format!(
                "Complete {}\n\nAll tasks in the plan have been implemented, reviewed, and finalized.",
                self.plan_file
            );
            if let Err(err) = self.git.commit_staged(&message) {
                warn!(error = %err, "finalization commit failed");
            }
        }
        self.set_phase(state, Phase::Complete)?;
        Ok(())
    }

    fn harvest_decisions(&self, text: &str) -> Result<()> {
        for record in extract_decisions(text) {
            self.store.log_decision(&record)?;
        }
        Ok(())
    }

    fn set_phase(&self, state: &mut OrchestrationState, phase: Phase) -> Result<()> {
        state.phase = phase;
        self.store
            .save(state)
            .with_context(|| format!("persist phase {phase:?}"))
    }
}

enum StepFlow {
    Continue,
    Stop(RunOutcome),
}

fn synthetic_task(id: &str, title: &str, status: TaskStatus) -> Task {
    Task {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        status,
    }
}
