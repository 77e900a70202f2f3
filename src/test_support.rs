//! Test-only helpers: a scripted gateway and git workspace fixtures.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use crate::io::gateway::{AgentGateway, AgentResult, InvokeRequest};

/// Gateway that replays a queue of canned results and records every request
/// it receives. Panics when the script runs dry, so a test that invokes more
/// roles than it scripted fails loudly.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<AgentResult>>,
    requests: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedGateway {
    pub fn new(script: Vec<AgentResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far, in invocation order.
    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl AgentGateway for ScriptedGateway {
    fn invoke(&self, request: &InvokeRequest) -> AgentResult {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("scripted gateway exhausted at prompt: {}", request.prompt))
    }
}

/// Successful agent result with the given output text.
pub fn ok(text: &str) -> AgentResult {
    AgentResult {
        text: text.to_string(),
        session: None,
        succeeded: true,
        blocked: false,
        block_reason: None,
    }
}

/// Successful result that also carries a session token.
pub fn ok_with_session(text: &str, session: &str) -> AgentResult {
    AgentResult {
        session: Some(session.to_string()),
        ..ok(text)
    }
}

/// Failed invocation with a block reason.
pub fn failed(reason: &str) -> AgentResult {
    AgentResult {
        text: String::new(),
        session: None,
        succeeded: false,
        blocked: true,
        block_reason: Some(reason.to_string()),
    }
}

/// Initialize a git repository with one commit so `diff HEAD` works.
pub fn init_git_repo(dir: &Path) {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    std::fs::write(dir.join(".keep"), "").expect("write .keep");
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", "init"]);
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("spawn git");
    assert!(status.success(), "git {args:?} failed");
}
