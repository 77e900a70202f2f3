//! Agent role invocations.
//!
//! Each role is one gateway call with a rendered prompt and the right
//! session/model/timeout policy. Routine roles run on the default model with
//! no session carry-over; the reviewer resumes its own session so it
//! accumulates project context across tasks; escalation, polish, and
//! finalization run on the deep model with an extended-thinking hint.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, instrument};

use crate::io::config::DvxConfig;
use crate::io::gateway::{AgentGateway, AgentResult, InvokeRequest, ModelHint};
use crate::io::plan::Task;
use crate::io::prompt::Prompts;

const ESCALATER_HINT: &str =
    "Use extended thinking to thoroughly analyze this situation before making a decision.";
const POLISHER_HINT: &str = "Use extended thinking to review the entire implementation holistically and identify meaningful improvements.";
const FINALIZER_HINT: &str =
    "Use extended thinking to thoroughly review all changes before approving.";

/// Role dispatcher bound to one gateway and working directory.
pub struct Roles<'a, G> {
    gateway: &'a G,
    prompts: Prompts,
    config: &'a DvxConfig,
    workdir: PathBuf,
}

impl<'a, G: AgentGateway> Roles<'a, G> {
    pub fn new(gateway: &'a G, config: &'a DvxConfig, workdir: PathBuf) -> Self {
        Self {
            gateway,
            prompts: Prompts::new(),
            config,
            workdir,
        }
    }

    fn routine(&self, prompt: String) -> InvokeRequest {
        InvokeRequest::new(self.workdir.clone(), prompt, self.config.agent_timeout())
    }

    fn deep(&self, prompt: String, hint: Option<&str>) -> InvokeRequest {
        let mut request =
            InvokeRequest::new(self.workdir.clone(), prompt, self.config.deep_agent_timeout());
        request.model = ModelHint::Deep;
        request.append_system_prompt = hint.map(str::to_string);
        request
    }

    /// Fresh implementer session; `feedback` switches to the fix prompt.
    #[instrument(skip_all, fields(task_id = %task.id, fixing = feedback.is_some()))]
    pub fn implementer(
        &self,
        task: &Task,
        plan_file: &str,
        feedback: Option<&str>,
    ) -> Result<AgentResult> {
        info!(title = %task.title, "running implementer");
        let prompt = match feedback {
            Some(feedback) => self.prompts.implementer_fix(task, plan_file, feedback)?,
            None => self.prompts.implementer(task, plan_file)?,
        };
        Ok(self.gateway.invoke(&self.routine(prompt)))
    }

    /// Reviewer pass, resuming the standing reviewer session when one exists.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn reviewer(
        &self,
        task: &Task,
        plan_file: &str,
        git_diff: &str,
        session: Option<&str>,
    ) -> Result<AgentResult> {
        info!("running reviewer");
        let mut request = self.routine(self.prompts.reviewer(task, plan_file, git_diff)?);
        request.resume_session = session.map(str::to_string);
        Ok(self.gateway.invoke(&request))
    }

    #[instrument(skip_all, fields(task_id = %task.id, source = trigger_source))]
    pub fn escalater(
        &self,
        task: &Task,
        trigger_source: &str,
        trigger_reason: &str,
        context: &str,
    ) -> Result<AgentResult> {
        info!(reason = trigger_reason, "running escalater");
        let prompt = self
            .prompts
            .escalater(task, trigger_source, trigger_reason, context)?;
        Ok(self.gateway.invoke(&self.deep(prompt, Some(ESCALATER_HINT))))
    }

    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn splitter(&self, task: &Task) -> Result<AgentResult> {
        info!("running task splitter");
        Ok(self.gateway.invoke(&self.routine(self.prompts.splitter(task)?)))
    }

    #[instrument(skip_all)]
    pub fn polisher(&self, plan_file: &str, git_diff: &str, plan_content: &str) -> Result<AgentResult> {
        info!("running polisher");
        let prompt = self.prompts.polisher(plan_file, git_diff, plan_content)?;
        Ok(self.gateway.invoke(&self.deep(prompt, Some(POLISHER_HINT))))
    }

    #[instrument(skip_all)]
    pub fn polish_fix(&self, suggestions: &str) -> Result<AgentResult> {
        info!("running polish fix");
        Ok(self
            .gateway
            .invoke(&self.routine(self.prompts.polish_fix(suggestions)?)))
    }

    #[instrument(skip_all)]
    pub fn polish_commit(&self) -> Result<AgentResult> {
        info!("running polish commit");
        Ok(self
            .gateway
            .invoke(&self.routine(self.prompts.polish_commit()?)))
    }

    #[instrument(skip_all)]
    pub fn finalizer(
        &self,
        plan_file: &str,
        current_branch: &str,
        base_branch: &str,
        plan_content: &str,
    ) -> Result<AgentResult> {
        info!("running finalizer");
        let prompt =
            self.prompts
                .finalizer(plan_file, current_branch, base_branch, plan_content)?;
        Ok(self.gateway.invoke(&self.deep(prompt, Some(FINALIZER_HINT))))
    }

    #[instrument(skip_all)]
    pub fn finalizer_fix(&self, issues: &str, plan_file: &str) -> Result<AgentResult> {
        info!("running finalizer fix");
        Ok(self
            .gateway
            .invoke(&self.routine(self.prompts.finalizer_fix(issues, plan_file)?)))
    }

    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn commit(&self, task: &Task, plan_file: &str) -> Result<AgentResult> {
        info!("running commit role");
        Ok(self
            .gateway
            .invoke(&self.routine(self.prompts.commit(task, plan_file)?)))
    }

    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn test_gap(&self, task: &Task, plan_file: &str) -> Result<AgentResult> {
        info!("running test-gap role");
        Ok(self
            .gateway
            .invoke(&self.routine(self.prompts.test_gap(task, plan_file)?)))
    }

    /// Plan generation on the deep model.
    #[instrument(skip_all)]
    pub fn planner(
        &self,
        request_text: &str,
        existing: Option<&str>,
        plan_file: Option<&str>,
    ) -> Result<AgentResult> {
        info!("running planner");
        let prompt = self.prompts.planner(request_text, existing, plan_file)?;
        Ok(self.gateway.invoke(&self.deep(prompt, None)))
    }
}

/// Merge an agent result's output and error into trigger context, so a
/// failed session's block reason (where "prompt is too long" style errors
/// land) is never lost.
pub fn build_trigger_context(result: &AgentResult, fallback: &str) -> String {
    let mut parts = Vec::new();
    if !result.text.trim().is_empty() {
        parts.push(result.text.trim().to_string());
    }
    if let Some(reason) = &result.block_reason {
        parts.push(format!("\n**Error**: {reason}"));
    }
    if parts.is_empty() {
        if fallback.is_empty() {
            return "(No output or error captured)".to_string();
        }
        return fallback.to_string();
    }
    parts.join("\n")
}
