//! Extraction of structured decision records from agent output.

use std::sync::LazyLock;

use regex::Regex;

/// A design decision an agent announced inline in its output. Persisted
/// append-only per topic so humans can audit what the agents chose and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRecord {
    pub topic: String,
    pub decision: String,
    pub reasoning: String,
    pub alternatives: Vec<String>,
}

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[decision:\s*([^\]]+)\]").unwrap());

static FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\A\s*decision:\s*(.+?)\s*reasoning:\s*(.+?)\s*alternatives:\s*(.+?)\s*\z")
        .unwrap()
});

/// Scan output for `[DECISION: <topic>]` blocks. Each block runs from its
/// marker to the next marker or end of text; missing sections mean the block
/// is skipped rather than half-parsed.
pub fn extract_decisions(text: &str) -> Vec<DecisionRecord> {
    let markers: Vec<_> = MARKER.captures_iter(text).collect();
    let mut records = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let whole = caps.get(0).unwrap();
        let end = markers
            .get(i + 1)
            .map(|next| next.get(0).unwrap().start())
            .unwrap_or(text.len());
        let Some(fields) = FIELDS.captures(&text[whole.end()..end]) else {
            continue;
        };
        records.push(DecisionRecord {
            topic: caps[1].trim().to_string(),
            decision: fields[1].trim().to_string(),
            reasoning: fields[2].trim().to_string(),
            alternatives: split_alternatives(&fields[3]),
        });
    }
    records
}

fn split_alternatives(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}
