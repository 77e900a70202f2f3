//! dvx - development-loop orchestrator CLI.
//!
//! Automates the implement, review, fix, test, commit cycle over a markdown
//! plan of tasks, with durable per-plan state under `.dvx/`.

use std::env;
use std::fs;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use dvx::exit_codes;
use dvx::io::config::{DvxConfig, load_config};
use dvx::io::gateway::{ClaudeGateway, launch_interactive};
use dvx::io::git::Git;
use dvx::io::plan::Plan;
use dvx::io::state::{DVX_DIR, OrchestrationState, Phase, StateStore};
use dvx::orchestrator::Orchestrator;
use dvx::roles::Roles;

const CONFIG_FILE: &str = "dvx.toml";

#[derive(Parser)]
#[command(
    name = "dvx",
    version,
    about = "Development orchestrator - automated implement/review/test/commit cycles"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run orchestration (start, continue, or resolve a block).
    Run {
        /// Path to the plan file.
        plan_file: PathBuf,
        /// Discard existing state and start fresh.
        #[arg(short, long)]
        force: bool,
        /// Pause after each completed task for review.
        #[arg(short, long)]
        step: bool,
    },
    /// Show orchestration status for a plan.
    Status { plan_file: PathBuf },
    /// Show decisions recorded during orchestration.
    Decisions { plan_file: PathBuf },
    /// Delete orchestration state (one plan, or all of `.dvx/`).
    Clean { plan_file: Option<PathBuf> },
    /// Generate or update a plan file from a request description.
    Plan { plan_file: Option<PathBuf> },
}

fn main() {
    dvx::logging::init();
    let cli = Cli::parse();

    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_codes::BLOCKED
        }
    };
    std::process::exit(code);
}

fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Run {
            plan_file,
            force,
            step,
        } => cmd_run(&plan_file, force, step),
        Command::Status { plan_file } => cmd_status(&plan_file),
        Command::Decisions { plan_file } => cmd_decisions(&plan_file),
        Command::Clean { plan_file } => cmd_clean(plan_file.as_deref()),
        Command::Plan { plan_file } => cmd_plan(plan_file.as_deref()),
    }
}

/// Run orchestration, resolving whatever state the plan is in: fresh start,
/// step-mode pause, human block, or plain continuation.
fn cmd_run(plan_file: &Path, force: bool, step: bool) -> Result<i32> {
    if !plan_file.exists() {
        bail!("plan file not found: {}", plan_file.display());
    }

    let cwd = env::current_dir().context("resolve working directory")?;
    let store = StateStore::for_plan(&cwd, plan_file);
    let config = load_config(&cwd.join(CONFIG_FILE))?;

    if force {
        store.reset()?;
    }

    let mut state = match store.load()? {
        None => {
            let plan = Plan::new(plan_file);
            plan.sync_overrides(&store)?;
            let overrides = store.load_status_overrides()?;
            let summary = plan.summary(&overrides)?;

            println!("Starting orchestration of: {}", plan_file.display());
            println!();
            println!("Plan: {} tasks", summary.total);
            println!("  Done: {}", summary.done);
            println!("  In Progress: {}", summary.in_progress);
            println!("  Pending: {}", summary.pending);
            println!();

            let Some(next) = plan.next_pending(&overrides)? else {
                println!("No pending tasks found!");
                return Ok(exit_codes::OK);
            };

            if step {
                println!("Step mode: Will pause after each task for review");
                println!();
            }
            println!("Starting with task {}: {}", next.id, next.title);
            println!("{}", "=".repeat(60));
            println!();

            let mut state = OrchestrationState::new(&plan_file.to_string_lossy());
            state.step_mode = step;
            store.save(&mut state)?;
            state
        }
        Some(mut state) => {
            match state.phase {
                Phase::Blocked => {
                    println!("Resuming blocked orchestration: {}", state.plan_file);
                    if let (Some(id), Some(title)) =
                        (&state.current_task_id, &state.current_task_title)
                    {
                        println!("Current task: {id} - {title}");
                    }
                    println!();
                    show_blocked_context(&store);

                    println!("Launching interactive session to resolve...");
                    println!("Type /exit when done to return to dvx.");
                    println!();
                    launch_interactive(&cwd, state.reviewer_session.as_deref())?;

                    println!();
                    println!("Interactive session ended.");
                    println!("Clearing blocked state and continuing...");
                    println!();
                    store.clear_blocked()?;
                    state = store.load()?.unwrap_or(state);
                }
                Phase::Paused => {
                    println!("Resuming from step-mode pause: {}", state.plan_file);
                    println!();
                    state.phase = Phase::Idle;
                    store.save(&mut state)?;
                }
                Phase::Complete => {
                    println!("Plan already complete: {}", state.plan_file);
                    let plan = Plan::new(plan_file);
                    let overrides = store.load_status_overrides()?;
                    let summary = plan.summary(&overrides)?;
                    println!("All {} tasks done!", summary.total);
                    return Ok(exit_codes::OK);
                }
                _ => {
                    println!("Continuing orchestration of: {}", state.plan_file);
                    println!("Phase: {:?}", state.phase);
                    println!(
                        "Current task: {} - {}",
                        state.current_task_id.as_deref().unwrap_or("none"),
                        state.current_task_title.as_deref().unwrap_or("")
                    );
                    println!();
                }
            }
            if step && !state.step_mode {
                state.step_mode = true;
                store.save(&mut state)?;
                println!("Step mode enabled");
                println!();
            }
            state
        }
    };

    run_orchestrator(&cwd, &config, store, plan_file, &mut state)
}

/// Top-level loop wrapper: fold operational errors into guidance instead of
/// a backtrace.
fn run_orchestrator(
    cwd: &Path,
    config: &DvxConfig,
    store: StateStore,
    plan_file: &Path,
    state: &mut OrchestrationState,
) -> Result<i32> {
    let gateway = ClaudeGateway;
    let git = Git::new(cwd);
    let plan = Plan::new(plan_file);
    let orchestrator = Orchestrator::new(&gateway, config, git, store, plan);

    match orchestrator.run(state) {
        Ok(outcome) => {
            info!(?outcome, "orchestration finished");
            Ok(outcome.exit_code())
        }
        Err(err) => {
            eprintln!();
            eprintln!("Unexpected error: {err:#}");
            eprintln!("Run 'dvx run {}' to resume.", plan_file.display());
            Ok(exit_codes::BLOCKED)
        }
    }
}

fn show_blocked_context(store: &StateStore) {
    let path = store.blocked_context_path();
    let Ok(content) = fs::read_to_string(&path) else {
        return;
    };
    println!("Blocked context:");
    println!("{}", "-".repeat(40));
    let lines: Vec<&str> = content.lines().collect();
    for line in lines.iter().take(15) {
        println!("{line}");
    }
    if lines.len() > 15 {
        println!("...");
    }
    println!("{}", "-".repeat(40));
    println!();
}

fn cmd_status(plan_file: &Path) -> Result<i32> {
    let cwd = env::current_dir().context("resolve working directory")?;
    let store = StateStore::for_plan(&cwd, plan_file);
    let config = load_config(&cwd.join(CONFIG_FILE))?;

    let Some(state) = store.load()? else {
        println!("No active orchestration.");
        println!("Use 'dvx run <plan-file>' to begin.");
        return Ok(exit_codes::OK);
    };

    println!("DVX Status");
    println!("{}", "=".repeat(40));
    println!("Plan file: {}", state.plan_file);
    println!("Phase: {:?}", state.phase);
    println!(
        "Current task: {} - {}",
        state.current_task_id.as_deref().unwrap_or("none"),
        state.current_task_title.as_deref().unwrap_or("")
    );
    println!(
        "Iteration: {}/{}",
        state.iteration_count, config.max_iterations
    );
    println!("Step mode: {}", if state.step_mode { "yes" } else { "no" });
    println!("Started: {}", state.started_at.to_rfc3339());
    println!("Updated: {}", state.updated_at.to_rfc3339());
    println!();

    match state.phase {
        Phase::Paused => {
            println!("PAUSED - Task completed, waiting for review");
            println!("Run 'dvx run {}' to continue.", plan_file.display());
        }
        Phase::Blocked => {
            println!(
                "BLOCKED - See {} for details",
                store.blocked_context_path().display()
            );
            println!(
                "Run 'dvx run {}' to resolve and continue.",
                plan_file.display()
            );
        }
        _ => {
            if plan_file.exists() {
                let overrides = store.load_status_overrides()?;
                let summary = Plan::new(plan_file).summary(&overrides)?;
                println!("Progress: {}/{} tasks complete", summary.done, summary.total);
            } else {
                println!("Warning: Plan file not found: {}", plan_file.display());
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_decisions(plan_file: &Path) -> Result<i32> {
    let cwd = env::current_dir().context("resolve working directory")?;
    let store = StateStore::for_plan(&cwd, plan_file);

    let files = store.decision_files()?;
    if files.is_empty() {
        println!("No decisions recorded yet.");
        return Ok(exit_codes::OK);
    }

    println!("Decisions made during orchestration:");
    println!("{}", "=".repeat(40));
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!();
        println!("{name}:");
        println!("{}", "-".repeat(40));
        println!("{}", fs::read_to_string(&file)?);
    }
    Ok(exit_codes::OK)
}

fn cmd_clean(plan_file: Option<&Path>) -> Result<i32> {
    let cwd = env::current_dir().context("resolve working directory")?;

    match plan_file {
        Some(plan_file) => {
            let store = StateStore::for_plan(&cwd, plan_file);
            if !store.dir().exists() {
                println!("No state to clean for {}.", plan_file.display());
                return Ok(exit_codes::OK);
            }
            store.remove_all()?;
            println!("Removed {}", store.dir().display());
        }
        None => {
            let root = cwd.join(DVX_DIR);
            if !root.exists() {
                println!("No {DVX_DIR}/ directory to clean.");
                return Ok(exit_codes::OK);
            }
            fs::remove_dir_all(&root).with_context(|| format!("remove {}", root.display()))?;
            println!("Removed {}", root.display());
        }
    }
    Ok(exit_codes::OK)
}

/// Generate or update a plan file. The request text comes from stdin when
/// piped, otherwise from `$EDITOR`.
fn cmd_plan(plan_file: Option<&Path>) -> Result<i32> {
    let request = if std::io::stdin().is_terminal() {
        println!("Opening editor to capture plan description...");
        request_from_editor()?
    } else {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read stdin")?;
        buf.trim().to_string()
    };

    if request.is_empty() {
        bail!("no input provided");
    }

    println!("Generating plan...");
    println!();

    let existing = match plan_file {
        Some(path) if path.exists() => {
            Some(fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?)
        }
        _ => None,
    };
    let updating = existing.is_some();

    let cwd = env::current_dir().context("resolve working directory")?;
    let config = load_config(&cwd.join(CONFIG_FILE))?;
    let gateway = ClaudeGateway;
    let roles = Roles::new(&gateway, &config, cwd);

    let plan_name = plan_file.map(|p| p.to_string_lossy().into_owned());
    let result = roles.planner(&request, existing.as_deref(), plan_name.as_deref())?;
    if !result.succeeded {
        bail!(
            "plan generation failed: {}",
            result.block_reason.as_deref().unwrap_or("unknown error")
        );
    }

    let mut output = result.text.trim().to_string();
    let target = match plan_name {
        Some(name) => PathBuf::from(name),
        None => {
            let (name, trimmed) = extract_filename(&output);
            output = trimmed;
            PathBuf::from(name)
        }
    };

    output.push('\n');
    fs::write(&target, &output).with_context(|| format!("write {}", target.display()))?;
    println!(
        "{}: {}",
        if updating { "Updated" } else { "Created" },
        target.display()
    );
    println!("  {} lines", output.lines().count());
    Ok(exit_codes::OK)
}

/// Pull the `FILENAME:` trailer out of planner output, defaulting when the
/// planner omitted one.
fn extract_filename(output: &str) -> (String, String) {
    let mut kept = Vec::new();
    let mut name = None;
    for line in output.lines() {
        if name.is_none()
            && let Some(rest) = line.strip_prefix("FILENAME:")
        {
            name = Some(rest.trim().to_string());
            continue;
        }
        kept.push(line);
    }
    let name = name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "PLAN-new.md".to_string());
    (name, kept.join("\n").trim().to_string())
}

fn request_from_editor() -> Result<String> {
    let editor = env::var("EDITOR")
        .or_else(|_| env::var("VISUAL"))
        .unwrap_or_else(|_| "vi".to_string());

    let file = tempfile::Builder::new()
        .suffix(".md")
        .tempfile()
        .context("create editor scratch file")?;
    fs::write(
        file.path(),
        "# Describe your plan\n\n# Delete this line and write your plan description here.\n# Save and exit when done.\n",
    )?;

    let status = process::Command::new(&editor)
        .arg(file.path())
        .status()
        .with_context(|| format!("launch editor {editor}"))?;
    if !status.success() {
        bail!("editor exited with {status}");
    }

    let content = fs::read_to_string(file.path()).context("read editor scratch file")?;
    // Drop untouched template lines.
    let kept: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();
    Ok(kept.join("\n").trim().to_string())
}
