//! Domain types for the officeflow orchestrator.
//!
//! This module contains the core data structures:
//! - Events: Immutable records appended to a run's log
//! - Run: Summaries folded from event history
//! - Artifact: Stage outputs written next to the log

pub mod artifact;
pub mod events;
pub mod run;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactKind};
pub use events::{
    AgentNote, AgentSpawned, AgentState, AgentStatusUpdate, ArtifactCreated, CostUpdate,
    EventBody, EventType, Level, ManualFallback, McpState, McpTelemetry, RunEvent, RunFinished,
    RunOutcome, RunStarted, StageFinished, StageStarted, ToolCall, ValidationError,
};
pub use run::{RunState, RunSummary};
