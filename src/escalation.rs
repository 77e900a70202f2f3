//! Escalation engine.
//!
//! Every recoverable trouble spot in the loop funnels through
//! [`evaluate_trigger`]: an escalater session judges whether the run can
//! proceed, and anything short of an explicit proceed verdict stops the run
//! with a durable blocked-context file for a human to pick up. A failure of
//! the escalater itself is treated the same way; the engine never guesses
//! past its own safety net.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::interpret::{EscalationVerdict, classify_escalation, extract_decisions};
use crate::io::gateway::AgentGateway;
use crate::io::plan::Task;
use crate::io::state::{OrchestrationState, Phase, StateStore};
use crate::roles::Roles;

/// Which part of the loop raised the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Implementer,
    Reviewer,
    Finalizer,
    Polisher,
    Orchestrator,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Implementer => "implementer",
            TriggerSource::Reviewer => "reviewer",
            TriggerSource::Finalizer => "finalizer",
            TriggerSource::Polisher => "polisher",
            TriggerSource::Orchestrator => "orchestrator",
        }
    }
}

/// What the caller should do after an escalation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Escalater judged the run can continue.
    Proceed,
    /// Run is blocked; the caller should stop with the given exit code.
    Stop(i32),
}

impl TriggerDecision {
    pub fn proceeds(self) -> bool {
        matches!(self, TriggerDecision::Proceed)
    }
}

/// Run the escalater over a trigger and apply its verdict.
///
/// Proceed verdicts have their decision records harvested into the decision
/// log. Escalate verdicts, ambiguous output, and escalater failures all write
/// the blocked-context file and flip the run to [`Phase::Blocked`].
#[instrument(skip_all, fields(task_id = %task.id, source = source.as_str()))]
pub fn evaluate_trigger<G: AgentGateway>(
    roles: &Roles<'_, G>,
    store: &StateStore,
    state: &mut OrchestrationState,
    task: &Task,
    source: TriggerSource,
    reason: &str,
    context: &str,
) -> Result<TriggerDecision> {
    let result = roles.escalater(task, source.as_str(), reason, context)?;

    if !result.succeeded {
        warn!(reason = ?result.block_reason, "escalater session failed");
        let detail = result
            .block_reason
            .as_deref()
            .unwrap_or("escalater produced no output");
        let body = format!(
            "## Task\n{} - {}\n\n## Trigger\n**Source**: {}\n**Reason**: {}\n\n\
             ## Original Context\n{}\n\n## Escalater Failure\n{}\n",
            task.id,
            task.title,
            source.as_str(),
            reason,
            context,
            detail,
        );
        block_run(store, state, "Escalation analysis failed", &body)?;
        return Ok(TriggerDecision::Stop(crate::exit_codes::BLOCKED));
    }

    match classify_escalation(&result.text) {
        EscalationVerdict::Proceed => {
            let decisions = extract_decisions(&result.text);
            for record in &decisions {
                store.log_decision(record)?;
            }
            info!(decisions = decisions.len(), "escalater cleared the trigger");
            Ok(TriggerDecision::Proceed)
        }
        EscalationVerdict::Escalate => {
            info!("escalater requested human intervention");
            let body = format!(
                "## Task\n{} - {}\n\n## Trigger\n**Source**: {}\n**Reason**: {}\n\n\
                 ## Original Context\n{}\n\n## Escalater Analysis\n{}\n",
                task.id,
                task.title,
                source.as_str(),
                reason,
                context,
                result.text.trim(),
            );
            block_run(store, state, reason, &body)?;
            Ok(TriggerDecision::Stop(crate::exit_codes::BLOCKED))
        }
    }
}

/// Block the run directly, without consulting the escalater. Used for hard
/// policy stops (massive change sets, context overflow).
pub fn block_run(
    store: &StateStore,
    state: &mut OrchestrationState,
    reason: &str,
    context: &str,
) -> Result<()> {
    state.phase = Phase::Blocked;
    store.save(state)?;
    store.write_blocked_context(reason, context)?;
    Ok(())
}
