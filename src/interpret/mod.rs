//! Classification of free-text agent output into phase decisions.
//!
//! Agents answer in natural language; these parsers are deliberately
//! permissive but override-ordered, and they fail safe. Ambiguous review or
//! escalation output leans toward flagging issues and stopping; the advisory
//! polish and finalizer passes lean the other way. Everything here is pure,
//! so every rule is unit-testable without a gateway.

mod decisions;
mod escalation;
mod finalizer;
mod polish;
mod review;
mod split;

pub use decisions::{DecisionRecord, extract_decisions};
pub use escalation::{EscalationVerdict, classify_escalation};
pub use finalizer::{FinalizerVerdict, classify_finalizer};
pub use polish::{PolishVerdict, classify_polish};
pub use review::{ReviewOutcome, ReviewVerdict, classify_review};
pub use split::{SplitVerdict, classify_split};

/// True iff the output carries the `[already_complete]` marker, meaning the
/// implementer found the task already done and made no changes.
pub fn is_already_complete(text: &str) -> bool {
    text.to_lowercase().contains("[already_complete]")
}
