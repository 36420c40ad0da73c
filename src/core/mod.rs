//! Core orchestration logic.
//!
//! This module contains:
//! - EventStore: Append-only run logs, tail and fingerprint
//! - Follow: Streaming tail deltas for a live run
//! - Pipeline: Stage resolution
//! - Policy: Gate evaluated before every stage
//! - Orchestrator: Stage state machine

pub mod event_store;
pub mod follow;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;

// Re-export commonly used types
pub use event_store::{EventStore, LogError, RunsRoot, TailRead};
pub use follow::{FollowConfig, FollowHandle, RunFollower};
pub use orchestrator::{Orchestrator, RunReport};
pub use pipeline::{resolve_stages, StageOrder, BASE_STAGES};
pub use policy::{GateEvaluation, PolicyDecision, PolicyGate, PolicyReport, PolicyViolation};
