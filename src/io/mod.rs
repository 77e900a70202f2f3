//! Filesystem, process, and version-control adapters.

pub mod config;
pub mod gateway;
pub mod git;
pub mod plan;
pub mod process;
pub mod prompt;
pub mod state;
