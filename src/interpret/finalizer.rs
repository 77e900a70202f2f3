//! Classification of finalizer output.

use std::sync::LazyLock;

use regex::Regex;

/// Verdict from a holistic finalization review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizerVerdict {
    /// Plan-level work is done. Ambiguous output lands here too: the
    /// finalizer is advisory, so it fails open rather than gating.
    Approved,
    /// Remaining issues to address, one entry per `### Issue N` block.
    Issues(Vec<String>),
}

static ISSUE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^###\s*Issue\s*\d+").unwrap()
});

/// Classify finalizer output. An `[issues]` marker overrides `[approved]`;
/// issue bodies run from each `### Issue N` heading to the next one or to an
/// `## Action` heading. A bare `[issues]` marker with no headings yields the
/// whole output as a single issue.
pub fn classify_finalizer(text: &str) -> FinalizerVerdict {
    let lower = text.to_lowercase();
    if !lower.contains("[issues]") {
        return FinalizerVerdict::Approved;
    }

    let end = lower.find("## action").unwrap_or(text.len());
    let scope = &text[..end];
    let starts: Vec<usize> = ISSUE_HEADING.find_iter(scope).map(|m| m.start()).collect();
    if starts.is_empty() {
        return FinalizerVerdict::Issues(vec![text.trim().to_string()]);
    }

    let mut issues = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let block_end = starts.get(i + 1).copied().unwrap_or(scope.len());
        let block = scope[start..block_end].trim();
        if !block.is_empty() {
            issues.push(block.to_string());
        }
    }
    FinalizerVerdict::Issues(issues)
}
