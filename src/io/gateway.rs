//! Gateway abstraction for agent invocation.
//!
//! The [`AgentGateway`] trait decouples phase orchestration from the actual
//! agent backend (currently the `claude` CLI). Tests use scripted gateways
//! that return predetermined outputs without spawning processes.
//!
//! Gateway failures are values, not errors: a timeout, spawn failure, or
//! nonzero exit comes back as an [`AgentResult`] with `succeeded = false`
//! and a best-effort block reason, so callers route every failure through
//! the one escalation path instead of unwinding.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_with_timeout;

/// Bytes of agent output retained per stream.
const OUTPUT_LIMIT_BYTES: usize = 4 << 20;

/// Capability hint for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelHint {
    /// Backend default, used for routine implement/review passes.
    #[default]
    Default,
    /// Higher-capability model for escalation, polish, and finalization.
    Deep,
}

impl ModelHint {
    fn cli_name(self) -> Option<&'static str> {
        match self {
            ModelHint::Default => None,
            ModelHint::Deep => Some("opus"),
        }
    }
}

/// Parameters for a gateway invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text.
    pub prompt: String,
    /// Session token to resume, if the role accumulates context.
    pub resume_session: Option<String>,
    pub model: ModelHint,
    /// Extra system-prompt text (extended-thinking hint for deep passes).
    pub append_system_prompt: Option<String>,
    pub timeout: Duration,
}

impl InvokeRequest {
    pub fn new(workdir: PathBuf, prompt: String, timeout: Duration) -> Self {
        Self {
            workdir,
            prompt,
            resume_session: None,
            model: ModelHint::Default,
            append_system_prompt: None,
            timeout,
        }
    }
}

/// Outcome of a gateway invocation.
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Final synthesized answer text (empty on failure).
    pub text: String,
    /// Session token for later resumption, when the backend returned one.
    pub session: Option<String>,
    /// Process-level success. Marker interpretation is the caller's job.
    pub succeeded: bool,
    /// Agent self-reported being blocked, or the invocation itself failed.
    pub blocked: bool,
    pub block_reason: Option<String>,
}

impl AgentResult {
    fn failed(session: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            session,
            succeeded: false,
            blocked: true,
            block_reason: Some(reason.into()),
        }
    }
}

/// Abstraction over agent backends.
pub trait AgentGateway {
    fn invoke(&self, request: &InvokeRequest) -> AgentResult;
}

/// Gateway that spawns the `claude` CLI in non-interactive mode.
pub struct ClaudeGateway;

impl AgentGateway for ClaudeGateway {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), resuming = request.resume_session.is_some()))]
    fn invoke(&self, request: &InvokeRequest) -> AgentResult {
        info!(workdir = %request.workdir.display(), "invoking claude");

        let mut cmd = Command::new("claude");
        cmd.arg("--dangerously-skip-permissions")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");
        if let Some(model) = request.model.cli_name() {
            cmd.arg("--model").arg(model);
        }
        if let Some(extra) = &request.append_system_prompt {
            cmd.arg("--append-system-prompt").arg(extra);
        }
        if let Some(session) = &request.resume_session {
            cmd.arg("--resume").arg(session);
        }
        cmd.arg("-p").arg(&request.prompt);
        cmd.current_dir(&request.workdir);

        let output = match run_with_timeout(cmd, request.timeout, OUTPUT_LIMIT_BYTES) {
            Ok(output) => output,
            Err(e) => {
                warn!(err = %e, "gateway invocation failed");
                return AgentResult::failed(
                    request.resume_session.clone(),
                    format!("agent invocation failed: {e:#}"),
                );
            }
        };

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "claude timed out");
            return AgentResult::failed(
                request.resume_session.clone(),
                format!("agent timed out after {}s", request.timeout.as_secs()),
            );
        }

        let stderr = output.stderr_utf8();
        if !stderr.trim().is_empty() {
            warn!(stderr = %stderr.trim(), "claude stderr");
        }

        let reduced = reduce_stream(&output.stdout_utf8());
        let session = reduced.session.or_else(|| request.resume_session.clone());

        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "claude exited nonzero");
            return AgentResult {
                text: reduced.text,
                session,
                succeeded: false,
                blocked: true,
                block_reason: Some(format!(
                    "agent exited with status {:?}",
                    output.status.code()
                )),
            };
        }

        let (blocked, block_reason) = detect_block(&reduced.text);
        debug!(chars = reduced.text.len(), blocked, "claude finished");
        AgentResult {
            text: reduced.text,
            session,
            succeeded: true,
            blocked,
            block_reason,
        }
    }
}

/// Launch a foreground interactive agent session (the human unblock flow).
/// Stdio is inherited; returns once the human exits the session.
#[instrument(skip_all, fields(resuming = resume_session.is_some()))]
pub fn launch_interactive(workdir: &Path, resume_session: Option<&str>) -> anyhow::Result<()> {
    let mut cmd = Command::new("claude");
    cmd.arg("--dangerously-skip-permissions");
    if let Some(session) = resume_session {
        cmd.arg("--resume").arg(session);
    }
    cmd.current_dir(workdir);

    info!("launching interactive claude session");
    let status = cmd
        .status()
        .context("spawn interactive claude session")?;
    debug!(exit_code = ?status.code(), "interactive session ended");
    Ok(())
}

struct Reduced {
    text: String,
    session: Option<String>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    session_id: Option<String>,
    result: Option<String>,
}

/// Reduce a stream-json event log to the final synthesized answer. The
/// backend emits newline-delimited JSON; the terminal `result` event carries
/// the answer text and the session id. Unparseable lines are skipped.
fn reduce_stream(stdout: &str) -> Reduced {
    let mut text = String::new();
    let mut session = None;

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<StreamEvent>(line) else {
            continue;
        };
        if let Some(id) = event.session_id {
            session = Some(id);
        }
        if event.kind.as_deref() == Some("result")
            && let Some(result) = event.result
        {
            text = result;
        }
    }

    Reduced { text, session }
}

/// Detect an agent-authored block signal in the final answer.
fn detect_block(text: &str) -> (bool, Option<String>) {
    if let Some(start) = text.find("[BLOCKED:") {
        let rest = &text[start + "[BLOCKED:".len()..];
        let reason = rest
            .find(']')
            .map(|end| rest[..end].trim().to_string())
            .filter(|r| !r.is_empty());
        return (true, reason);
    }
    (false, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduces_final_result_event() {
        let stdout = concat!(
            r#"{"type":"system","session_id":"abc"}"#,
            "\n",
            r#"{"type":"assistant","message":{}}"#,
            "\n",
            "not json\n",
            r#"{"type":"result","result":"[APPROVED] done","session_id":"abc"}"#,
            "\n",
        );
        let reduced = reduce_stream(stdout);
        assert_eq!(reduced.text, "[APPROVED] done");
        assert_eq!(reduced.session.as_deref(), Some("abc"));
    }

    #[test]
    fn later_result_event_wins() {
        let stdout = concat!(
            r#"{"type":"result","result":"first"}"#,
            "\n",
            r#"{"type":"result","result":"second"}"#,
            "\n",
        );
        assert_eq!(reduce_stream(stdout).text, "second");
    }

    #[test]
    fn block_marker_extracts_reason() {
        let (blocked, reason) = detect_block("work stopped [BLOCKED: missing API schema] here");
        assert!(blocked);
        assert_eq!(reason.as_deref(), Some("missing API schema"));
    }

    #[test]
    fn unterminated_block_marker_still_blocks() {
        let (blocked, reason) = detect_block("[BLOCKED: everything");
        assert!(blocked);
        assert_eq!(reason, None);
    }

    #[test]
    fn plain_text_is_not_blocked() {
        assert_eq!(detect_block("all good"), (false, None));
    }
}
