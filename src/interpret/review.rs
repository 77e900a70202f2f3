//! Classification of reviewer output.

/// Outcome of a review pass.
///
/// Phase logic matches exhaustively on this instead of juggling boolean
/// combinations. `missing_tests` rides alongside because test coverage is
/// orthogonal to whether the changes themselves passed review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewVerdict {
    pub outcome: ReviewOutcome,
    /// Reviewer noted missing test coverage.
    pub missing_tests: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// Clean approval, no caveats.
    Approved,
    /// Findings that warrant a fix iteration. `critical` findings escalate
    /// instead of looping.
    Issues { critical: bool },
    /// No recognizable verdict either way.
    Unclear,
}

impl ReviewVerdict {
    pub fn approved(&self) -> bool {
        self.outcome == ReviewOutcome::Approved
    }

    pub fn has_issues(&self) -> bool {
        matches!(self.outcome, ReviewOutcome::Issues { .. })
    }

    pub fn critical(&self) -> bool {
        matches!(self.outcome, ReviewOutcome::Issues { critical: true })
    }
}

/// Classify a reviewer's free-text output.
///
/// Priority order: critical markers/phrases, then issue markers and caveat
/// phrases, then approval. An approval claim undermined by caveat language
/// ("should be", "consider", "recommend") is not clean: the caveats win and
/// the fix loop gets a chance to address them.
///
/// The security check matches a phrase list, not the bare word "security",
/// so "no security issues found" does not trip it.
pub fn classify_review(text: &str) -> ReviewVerdict {
    let lower = text.to_lowercase();
    if lower.trim().is_empty() {
        return ReviewVerdict {
            outcome: ReviewOutcome::Unclear,
            missing_tests: false,
        };
    }

    let missing_tests = lower.contains("missing test")
        || lower.contains("no test")
        || lower.contains("add test")
        || lower.contains("needs test");

    let critical = lower.contains("[critical]")
        || lower.contains("[blocked]")
        || lower.contains("critical issue")
        || lower.contains("security vulnerability")
        || lower.contains("security risk")
        || lower.contains("security flaw");
    if critical {
        return ReviewVerdict {
            outcome: ReviewOutcome::Issues { critical: true },
            missing_tests,
        };
    }

    let explicit_issues = lower.contains("[issues]") || lower.contains("[suggestions]");
    let heuristic_issues =
        lower.contains("should be") || lower.contains("consider") || lower.contains("recommend");
    if explicit_issues || heuristic_issues {
        return ReviewVerdict {
            outcome: ReviewOutcome::Issues { critical: false },
            missing_tests,
        };
    }

    let approved =
        lower.contains("[approved]") || lower.contains("lgtm") || lower.contains("looks good");
    ReviewVerdict {
        outcome: if approved {
            ReviewOutcome::Approved
        } else {
            ReviewOutcome::Unclear
        },
        missing_tests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_unclear() {
        let v = classify_review("");
        assert_eq!(v.outcome, ReviewOutcome::Unclear);
        assert!(!v.missing_tests);
    }

    #[test]
    fn explicit_approval_with_clean_text_approves() {
        let v = classify_review("[APPROVED] Implementation matches the task.");
        assert!(v.approved());
    }

    #[test]
    fn critical_dominates_approval() {
        let v = classify_review("[APPROVED] but [CRITICAL] data loss on restart");
        assert!(v.critical());
        assert!(!v.approved());
    }

    #[test]
    fn approval_undermined_by_caveat_language() {
        let v = classify_review("[APPROVED] but you should be careful about X");
        assert!(!v.approved());
        assert!(v.has_issues());
        assert!(!v.critical());
    }

    #[test]
    fn explicit_issue_marker_sets_issues() {
        let v = classify_review("[ISSUES]\n1. off-by-one in pagination");
        assert_eq!(v.outcome, ReviewOutcome::Issues { critical: false });
    }

    #[test]
    fn heuristic_approval_requires_clean_verdict() {
        assert!(classify_review("lgtm, ship it").approved());
        let v = classify_review("looks good, but consider renaming the helper");
        assert!(!v.approved());
        assert!(v.has_issues());
    }

    #[test]
    fn positive_security_mention_is_not_critical() {
        assert!(!classify_review("I checked and there are no security issues.").critical());
    }

    #[test]
    fn security_phrases_are_critical() {
        assert!(classify_review("this introduces a security vulnerability").critical());
        assert!(classify_review("potential security risk in token handling").critical());
        assert!(classify_review("a security flaw in the session check").critical());
    }

    #[test]
    fn missing_tests_is_orthogonal() {
        let v = classify_review("[APPROVED] though the parser is missing tests");
        assert!(v.approved());
        assert!(v.missing_tests);
    }

    #[test]
    fn blocked_marker_is_critical() {
        assert!(classify_review("[BLOCKED] cannot proceed without schema").critical());
    }

    #[test]
    fn unrelated_prose_is_unclear() {
        let v = classify_review("I read through the diff and the surrounding module.");
        assert_eq!(v.outcome, ReviewOutcome::Unclear);
    }
}
