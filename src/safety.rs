//! Policy firewall over task text.
//!
//! Tasks asking for merges, pushes to a main branch, deployments, or
//! releases are skipped rather than executed. This is a policy rejection,
//! not an error: the loop marks the task blocked and moves on, and a human
//! edits the plan if the task should really run.

use crate::io::plan::Task;

/// Outcome of the pre-implementation safety check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyCheck {
    Safe,
    /// Task text matched the denylist; `reason` names the forbidden
    /// operation category.
    Forbidden { reason: String },
}

const FORBIDDEN: &[(&str, &str)] = &[
    ("merge to main", "merging to main branch"),
    ("merge to master", "merging to master branch"),
    ("push to main", "pushing to main branch"),
    ("push to master", "pushing to master branch"),
    ("deploy to", "deployment operations"),
    ("deploy the", "deployment operations"),
    ("production deploy", "production deployment"),
    ("release to", "release operations"),
    ("merge branch", "branch merging"),
    ("git merge main", "merging main"),
    ("git merge master", "merging master"),
];

/// Check a task's title and description against the denylist.
pub fn check_task(task: &Task) -> SafetyCheck {
    let text = format!("{} {}", task.title, task.description).to_lowercase();
    for (pattern, category) in FORBIDDEN {
        if text.contains(pattern) {
            return SafetyCheck::Forbidden {
                reason: format!("task contains forbidden operation: {category}"),
            };
        }
    }
    SafetyCheck::Safe
}
