//! Command-line interface for officeflow.
//!
//! Provides commands for running the pipeline against a project, tailing
//! a run's log, listing runs and printing the runs fingerprint.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{CodexEngineAdapter, EngineAdapter, McpClientOptions, MockEngineAdapter};
use crate::config::{EngineMode, ProjectConfig, RuntimeConfig, DEFAULT_CONFIG_FILE};
use crate::core::{EventStore, Orchestrator, RunFollower, RunsRoot, TailRead};
use crate::domain::{RunOutcome, RunState};
use crate::plugins::PluginRegistry;

/// officeflow - Event-sourced coding-agent pipeline orchestrator
#[derive(Parser, Debug)]
#[command(name = "officeflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the stage pipeline for a goal
    Run {
        /// What the run should accomplish
        #[arg(short, long)]
        goal: String,

        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Project config file, relative to the project
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Run ID (generated if not provided)
        #[arg(long)]
        run_id: Option<String>,

        /// Use the real engine instead of the mock
        #[arg(long)]
        real: bool,
    },

    /// Print a run's events from a byte cursor
    Tail {
        /// Run ID
        run_id: String,

        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Byte offset to resume from
        #[arg(short, long, default_value = "0")]
        cursor: u64,

        /// Keep printing new events as they are appended
        #[arg(short, long)]
        follow: bool,
    },

    /// List runs, newest first
    Runs {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Print the change fingerprint of all runs
    Fingerprint {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                goal,
                project,
                config,
                run_id,
                real,
            } => run_goal(&goal, &project, &config, run_id, real).await,
            Commands::Tail {
                run_id,
                project,
                cursor,
                follow,
            } => tail_run(&project, &run_id, cursor, follow).await,
            Commands::Runs { project, limit } => list_runs(&project, limit).await,
            Commands::Fingerprint { project } => {
                let fingerprint = RunsRoot::for_project(&project).fingerprint().await?;
                println!("{}", fingerprint);
                Ok(())
            }
        }
    }
}

/// Run the pipeline for a goal
async fn run_goal(
    goal: &str,
    project: &Path,
    config_file: &Path,
    run_id: Option<String>,
    real: bool,
) -> Result<()> {
    let project = project
        .canonicalize()
        .with_context(|| format!("Project directory not found: {}", project.display()))?;

    let runtime = RuntimeConfig::from_process_env(&project, real)
        .await
        .map_err(|e| anyhow!("{} [{}]", e, e.code()))?;

    let config_path = project.join(config_file);
    let config = ProjectConfig::load(&config_path)?.with_base_branch(runtime.base_branch.as_deref());

    let run_id = run_id.unwrap_or_else(new_run_id);
    let runs = RunsRoot::for_project(&project);
    let store = EventStore::open(runs.path(), &run_id).await?;

    let engine: Box<dyn EngineAdapter> = match runtime.mode {
        EngineMode::Mock => Box::new(MockEngineAdapter::new()),
        EngineMode::Real => Box::new(CodexEngineAdapter::new(McpClientOptions::new(
            runtime.mcp_command.clone(),
            runtime.workdir.clone(),
        ))),
    };

    println!("Run ID: {}", run_id);
    println!("Events: {}", store.events_path().display());
    println!("Engine: {}", runtime.mode.as_str());

    let orchestrator = Orchestrator::new(store, config, engine, &project)
        .with_registry(PluginRegistry::with_builtins())
        .with_workdir(runtime.workdir.clone());

    let report = orchestrator.run(goal).await?;

    println!("Stages: {}", report.stages.join(" -> "));
    match report.outcome {
        RunOutcome::Done => {
            println!("Run completed");
            Ok(())
        }
        outcome => {
            let stage = report.failed_stage.as_deref().unwrap_or("-");
            let message = report.message.as_deref().unwrap_or("");
            bail!("Run {} ended {:?} at {}: {}", report.run_id, outcome, stage, message)
        }
    }
}

/// Print events from `cursor`, optionally following the log
async fn tail_run(project: &Path, run_id: &str, cursor: u64, follow: bool) -> Result<()> {
    let runs = RunsRoot::for_project(project);

    if !follow {
        let delta = runs.tail(run_id, cursor).await?;
        print_delta(&delta)?;
        eprintln!("cursor: {}", delta.cursor);
        return Ok(());
    }

    let (mut deltas, handle) = RunFollower::new(runs.events_path(run_id)?).follow(cursor);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            delta = deltas.recv() => match delta {
                Some(delta) => print_delta(&delta)?,
                None => break,
            },
        }
    }

    handle.stop().await
}

fn print_delta(delta: &TailRead) -> Result<()> {
    if delta.reset {
        eprintln!("-- log reset --");
    }
    for event in &delta.events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

/// List recent runs
async fn list_runs(project: &Path, limit: usize) -> Result<()> {
    let summaries = RunsRoot::for_project(project).summaries().await?;

    if summaries.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<32} {:<10} {:>8}  {}", "RUN ID", "STATUS", "COST", "GOAL");
    println!("{}", "-".repeat(80));

    for run in summaries.into_iter().take(limit) {
        let status = match run.status {
            RunState::Running => "running",
            RunState::Done => "done",
            RunState::Blocked => "blocked",
            RunState::Error => "error",
        };
        println!(
            "{:<32} {:<10} {:>8.4}  {}",
            run.run_id, status, run.estimated_cost, run.goal
        );
    }

    Ok(())
}

/// Sortable, unique run id: `YYYYMMDD-HHMMSS-xxxxxxxx`
fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..8])
}
