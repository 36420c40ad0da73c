//! Event types for the append-only run log.
//!
//! Every transition of a run is recorded as an immutable [`RunEvent`]. The
//! wire shape is one JSON object per line:
//! `{id, runId, ts, level, type, stage?, agentId?, payload}` where the
//! payload shape is keyed by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single event in a run's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    /// Unique identifier within the run
    pub id: String,

    /// The run this event belongs to
    pub run_id: String,

    /// When this event occurred (ISO 8601)
    pub ts: DateTime<Utc>,

    /// Severity
    #[serde(default)]
    pub level: Level,

    /// Stage the event is attributed to (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Logical agent the event is attributed to (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Type tag plus type-specific payload
    #[serde(flatten)]
    pub body: EventBody,
}

impl RunEvent {
    /// Create a new event with a fresh id and the current timestamp
    pub fn new(run_id: impl Into<String>, body: EventBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            ts: Utc::now(),
            level: Level::Info,
            stage: None,
            agent_id: None,
            body,
        }
    }

    /// Attribute the event to a stage
    pub fn in_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Attribute the event to an agent
    pub fn by_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Override the severity
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// The type tag of this event
    pub fn event_type(&self) -> EventType {
        self.body.event_type()
    }

    /// Check the event against the log schema.
    ///
    /// Serde guarantees the shape; this covers the value constraints the type
    /// system cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        non_empty("id", &self.id)?;
        non_empty("runId", &self.run_id)?;
        if let Some(stage) = &self.stage {
            non_empty("stage", stage)?;
        }
        if let Some(agent_id) = &self.agent_id {
            non_empty("agentId", agent_id)?;
        }

        match &self.body {
            EventBody::StageStarted(p) => non_empty("payload.stage", &p.stage),
            EventBody::StageFinished(p) => non_empty("payload.stage", &p.stage),
            EventBody::AgentSpawned(p) => {
                non_empty("payload.agentId", &p.agent_id)?;
                non_empty("payload.role", &p.role)
            }
            EventBody::AgentNote(p) => non_empty("payload.message", &p.message),
            EventBody::ToolCallStarted(p) | EventBody::ToolCallFinished(p) => {
                non_empty("payload.tool", &p.tool)
            }
            EventBody::ArtifactCreated(p) => {
                non_empty("payload.artifactType", &p.artifact_type)?;
                non_empty("payload.path", &p.path)
            }
            EventBody::CostUpdate(p) => {
                non_empty("payload.model", &p.model)?;
                match p.estimated_cost {
                    Some(cost) if !cost.is_finite() || cost < 0.0 => {
                        Err(ValidationError::InvalidCost(cost))
                    }
                    _ => Ok(()),
                }
            }
            EventBody::RunStarted(_) | EventBody::RunFinished(_) | EventBody::AgentStatus(_) => {
                Ok(())
            }
        }
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(())
}

/// Reasons an event is rejected before it reaches the log
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("Estimated cost must be a non-negative number, got {0}")]
    InvalidCost(f64),

    #[error("Event belongs to run '{found}', log is for run '{expected}'")]
    RunMismatch { expected: String, found: String },

    #[error("Event id '{0}' already exists in this run")]
    DuplicateId(String),
}

/// Event severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Info,
    Warn,
    Error,
}

/// Type tag plus payload, serialized as sibling `type` and `payload` keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventBody {
    RunStarted(RunStarted),
    RunFinished(RunFinished),
    StageStarted(StageStarted),
    StageFinished(StageFinished),
    AgentSpawned(AgentSpawned),
    AgentStatus(AgentStatusUpdate),
    AgentNote(AgentNote),
    ToolCallStarted(ToolCall),
    ToolCallFinished(ToolCall),
    ArtifactCreated(ArtifactCreated),
    CostUpdate(CostUpdate),
}

impl EventBody {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::RunStarted(_) => EventType::RunStarted,
            Self::RunFinished(_) => EventType::RunFinished,
            Self::StageStarted(_) => EventType::StageStarted,
            Self::StageFinished(_) => EventType::StageFinished,
            Self::AgentSpawned(_) => EventType::AgentSpawned,
            Self::AgentStatus(_) => EventType::AgentStatus,
            Self::AgentNote(_) => EventType::AgentNote,
            Self::ToolCallStarted(_) => EventType::ToolCallStarted,
            Self::ToolCallFinished(_) => EventType::ToolCallFinished,
            Self::ArtifactCreated(_) => EventType::ArtifactCreated,
            Self::CostUpdate(_) => EventType::CostUpdate,
        }
    }
}

/// The fixed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunFinished,
    StageStarted,
    StageFinished,
    AgentSpawned,
    AgentStatus,
    AgentNote,
    ToolCallStarted,
    ToolCallFinished,
    ArtifactCreated,
    CostUpdate,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::RunFinished => "run_finished",
            Self::StageStarted => "stage_started",
            Self::StageFinished => "stage_finished",
            Self::AgentSpawned => "agent_spawned",
            Self::AgentStatus => "agent_status",
            Self::AgentNote => "agent_note",
            Self::ToolCallStarted => "tool_call_started",
            Self::ToolCallFinished => "tool_call_finished",
            Self::ArtifactCreated => "artifact_created",
            Self::CostUpdate => "cost_update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStarted {
    pub goal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFinished {
    pub goal: String,

    /// Present only when the run did not finish cleanly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunOutcome>,
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Blocked,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStarted {
    pub stage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFinished {
    pub stage: String,

    /// Set when the stage ended in failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpawned {
    pub agent_id: String,
    pub role: String,
    pub task: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusUpdate {
    pub status: AgentState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status reported by a stage agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Working,
    Done,
    Blocked,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNote {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpTelemetry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<ManualFallback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpTelemetry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactCreated {
    pub artifact_type: String,
    pub path: String,
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostUpdate {
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

/// Protocol-level telemetry attached to engine calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTelemetry {
    pub request_id: String,
    pub tool: String,
    pub state: McpState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpState {
    Starting,
    Ready,
    Running,
    Done,
    Blocked,
    Error,
}

/// A literal, reproducible recovery procedure for a failed or blocked step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualFallback {
    /// Directory the commands must run in
    pub cwd: String,

    /// Commands to run, in order
    pub commands: Vec<String>,

    /// Human-readable instructions
    pub notes: String,

    /// Command that re-invokes the whole pipeline for the same goal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun: Option<String>,
}

impl ManualFallback {
    /// Render as plain-text "- " steps
    pub fn render(&self) -> String {
        let mut lines = vec![self.notes.clone(), format!("cd {}", self.cwd)];
        lines.extend(self.commands.iter().cloned());
        if let Some(rerun) = &self.rerun {
            lines.push(rerun.clone());
        }
        lines
            .iter()
            .map(|line| format!("- {}", line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
