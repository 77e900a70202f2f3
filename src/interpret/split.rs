//! Classification of the task-splitter's output.

/// Verdict from the complexity-triage pass over a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitVerdict {
    /// Replace the task with the subtasks described by this markdown block.
    Split { subtasks: String },
    /// Task is fine as-is (explicit `[no_split]`, no marker, or an empty
    /// subtask list).
    Keep,
}

/// Classify splitter output. A split requires the `[split]` marker, the
/// absence of `[no_split]`, and a non-empty block under a `## Subtasks`
/// heading; anything less keeps the task whole.
pub fn classify_split(text: &str) -> SplitVerdict {
    let lower = text.to_lowercase();
    if !lower.contains("[split]") || lower.contains("[no_split]") {
        return SplitVerdict::Keep;
    }
    match subtasks_section(text) {
        Some(subtasks) if !subtasks.is_empty() => SplitVerdict::Split { subtasks },
        _ => SplitVerdict::Keep,
    }
}

/// Text after a `## Subtasks` heading (case-insensitive), trimmed.
fn subtasks_section(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let heading = lower.find("## subtasks")?;
    let after = &text[heading..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
    Some(after[body_start..].trim().to_string())
}
