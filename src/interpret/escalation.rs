//! Classification of the escalation agent's verdict.

/// Verdict from a deep-reasoning escalation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationVerdict {
    /// The agent authorized continuing autonomously.
    Proceed,
    /// Stop and hand off to a human.
    Escalate,
}

/// Classify escalation output. `[escalate]` wins over `[proceed]` when both
/// appear; output with neither marker escalates, since an escalation pass
/// that cannot state a verdict is not authorization to continue.
pub fn classify_escalation(text: &str) -> EscalationVerdict {
    let lower = text.to_lowercase();
    if lower.contains("[escalate]") {
        EscalationVerdict::Escalate
    } else if lower.contains("[proceed]") {
        EscalationVerdict::Proceed
    } else {
        EscalationVerdict::Escalate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proceed_alone_proceeds() {
        assert_eq!(
            classify_escalation("[PROCEED] the failure was transient"),
            EscalationVerdict::Proceed
        );
    }

    #[test]
    fn escalate_wins_over_proceed() {
        assert_eq!(
            classify_escalation("[PROCEED] although honestly [ESCALATE]"),
            EscalationVerdict::Escalate
        );
    }

    #[test]
    fn no_marker_escalates() {
        assert_eq!(
            classify_escalation("the situation is complicated"),
            EscalationVerdict::Escalate
        );
    }
}
