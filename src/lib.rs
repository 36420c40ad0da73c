//! officeflow - Event-sourced coding-agent pipeline orchestrator
//!
//! Drives a goal through a fixed sequence of stages (SPEC, IMPLEMENT, TEST,
//! REVIEW, GITHUB, BLOG_FACTS), delegating code work to an agent engine
//! over MCP stdio.
//!
//! # Architecture
//!
//! The system is built around an append-only event log:
//! - The orchestrator is the only writer of a run's `events.jsonl`
//! - Observers derive state by tailing the log with a byte cursor
//! - Plugins extend roles, stages, tools, policies and widgets
//!
//! # Modules
//!
//! - `adapters`: Engine adapters and the MCP stdio client
//! - `core`: Orchestration logic (EventStore, Pipeline, Policy)
//! - `domain`: Data structures (RunEvent, RunSummary, Artifact)
//! - `plugins`: Plugin contracts and registry
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline against a project
//! officeflow run --goal "add a health endpoint" --project ./app
//!
//! # Follow the run's log
//! officeflow tail <run-id> --follow
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod plugins;

// Re-export main types at crate root for convenience
pub use adapters::{CodexEngineAdapter, EngineAdapter, McpStdioClient, MockEngineAdapter};
pub use config::{ProjectConfig, RuntimeConfig};
pub use core::{EventStore, Orchestrator, RunsRoot};
pub use domain::{EventType, RunEvent, RunState, RunSummary};
pub use plugins::PluginRegistry;
