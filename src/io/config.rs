//! Orchestrator configuration stored at `dvx.toml` in the project root.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::git::MassiveChangeLimits;

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DvxConfig {
    /// Review fix-loop iterations per task before escalating.
    pub max_iterations: u32,

    /// Finalizer fix-loop iterations before escalating.
    pub max_finalizer_iterations: u32,

    /// Wall-clock timeout per routine agent invocation, in seconds.
    pub agent_timeout_secs: u64,

    /// Wall-clock timeout per deep-reasoning invocation, in seconds.
    pub deep_agent_timeout_secs: u64,

    /// Estimated-token budget for the plan document before compression.
    pub max_plan_tokens: usize,

    /// Diff size in bytes beyond which the reviewer sees stats only.
    pub review_diff_limit_bytes: usize,

    /// Deletion line count above which a change needs human review.
    pub massive_deletion_lines: usize,

    /// Deletion-to-insertion ratio that marks a change as deletion-heavy.
    pub massive_deletion_ratio: usize,

    /// Whole-file deletion count above which a change needs human review.
    pub massive_files_deleted: usize,
}

impl Default for DvxConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_finalizer_iterations: 5,
            agent_timeout_secs: 20 * 60,
            deep_agent_timeout_secs: 20 * 60,
            max_plan_tokens: 20_000,
            review_diff_limit_bytes: 15_000,
            massive_deletion_lines: 2000,
            massive_deletion_ratio: 10,
            massive_files_deleted: 20,
        }
    }
}

impl DvxConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_finalizer_iterations == 0 {
            return Err(anyhow!("max_finalizer_iterations must be > 0"));
        }
        if self.agent_timeout_secs == 0 || self.deep_agent_timeout_secs == 0 {
            return Err(anyhow!("agent timeouts must be > 0"));
        }
        if self.max_plan_tokens == 0 {
            return Err(anyhow!("max_plan_tokens must be > 0"));
        }
        if self.review_diff_limit_bytes == 0 {
            return Err(anyhow!("review_diff_limit_bytes must be > 0"));
        }
        if self.massive_deletion_ratio == 0 {
            return Err(anyhow!("massive_deletion_ratio must be > 0"));
        }
        Ok(())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn deep_agent_timeout(&self) -> Duration {
        Duration::from_secs(self.deep_agent_timeout_secs)
    }

    pub fn massive_limits(&self) -> MassiveChangeLimits {
        MassiveChangeLimits {
            deletion_lines: self.massive_deletion_lines,
            deletion_ratio: self.massive_deletion_ratio,
            files_deleted: self.massive_files_deleted,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DvxConfig::default()`.
pub fn load_config(path: &Path) -> Result<DvxConfig> {
    if !path.exists() {
        let cfg = DvxConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DvxConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
