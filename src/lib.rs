//! Development-loop orchestrator for agent-driven coding sessions.
//!
//! This crate drives a coding agent through a markdown plan of tasks, one
//! implement/review/fix/test/commit cycle per task, with durable per-plan
//! state so interrupted runs resume where they left off. The architecture
//! enforces a strict separation:
//!
//! - **[`interpret`]**: Pure classification of agent output into verdicts
//!   (review, escalation, split, polish, finalizer). No I/O, fully testable
//!   in isolation.
//! - **[`io`]**: Side-effecting operations (plan files, state store, git,
//!   process execution, the agent gateway). Isolated to enable mocking in
//!   tests.
//!
//! Orchestration modules ([`orchestrator`], [`roles`], [`escalation`],
//! [`safety`]) coordinate verdicts with I/O to implement the CLI commands.

pub mod escalation;
pub mod exit_codes;
pub mod interpret;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod roles;
pub mod safety;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
