//! Classification of polish output.

/// Verdict from the holistic polish pass over the accumulated diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolishVerdict {
    /// Nothing worth changing. Ambiguous output lands here; polish is
    /// advisory.
    Polished,
    /// Suggested improvements, passed verbatim to a fix pass.
    Suggestions(String),
}

/// Classify polish output. `[suggestions]` overrides `[polished]`.
pub fn classify_polish(text: &str) -> PolishVerdict {
    if text.to_lowercase().contains("[suggestions]") {
        PolishVerdict::Suggestions(text.trim().to_string())
    } else {
        PolishVerdict::Polished
    }
}
