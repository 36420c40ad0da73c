//! Engine adapters.
//!
//! An engine adapter turns stage actions (edit files, run commands) into
//! calls against a coding engine and reports every failure in one shape:
//! [`ActionError`], with a status deciding whether the stage is blocked or
//! may be retried, and a manual recipe the operator can follow instead.

pub mod codex;
pub mod mcp;
pub mod mock;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ManualFallback, McpState, McpTelemetry};

pub use codex::CodexEngineAdapter;
pub use mcp::{McpClientOptions, McpError, McpStdioClient, ToolInfo};
pub use mock::MockEngineAdapter;

/// Action kinds an engine performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    EditFiles,
    RunCommands,
}

/// What a stage action is executed against
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub run_id: String,
    pub goal: String,
    pub stage: String,
    pub project_path: PathBuf,
    pub workdir: PathBuf,
    pub test_command: Option<String>,
}

impl EngineContext {
    /// Test command, falling back to the project default
    pub fn test_command(&self) -> &str {
        self.test_command.as_deref().unwrap_or("pnpm test")
    }

    /// Command that re-invokes the whole pipeline for the same goal
    pub fn rerun_command(&self) -> String {
        format!(
            "OFFICEFLOW_WORKDIR=\"{}\" officeflow run --goal \"{}\" --project \"{}\" --config project.yaml",
            self.workdir.display(),
            self.goal.replace('"', "\\\""),
            self.project_path.display()
        )
    }

    /// Manual recipe: `commands`, then the rerun command
    pub fn manual(&self, commands: Vec<String>, notes: impl Into<String>) -> ManualFallback {
        ManualFallback {
            cwd: self.workdir.display().to_string(),
            commands,
            notes: notes.into(),
            rerun: Some(self.rerun_command()),
        }
    }
}

/// Result of a successful engine initialization
#[derive(Debug, Clone)]
pub struct EngineInit {
    pub tools: Vec<String>,
    pub telemetry: McpTelemetry,
}

/// Result of a successful action
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// One-line description of what happened
    pub summary: String,

    /// Full engine output, if any
    pub raw_output: Option<String>,

    pub telemetry: Option<McpTelemetry>,
}

/// Whether a failure stops the run or may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStatus {
    /// Needs a human; never retried
    Blocked,
    /// Ordinary failure; consumes the retry budget
    Error,
}

impl FailureStatus {
    /// Terminal protocol state reported in telemetry
    pub fn mcp_state(&self) -> McpState {
        match self {
            Self::Blocked => McpState::Blocked,
            Self::Error => McpState::Error,
        }
    }
}

/// A failed action with everything needed to report and recover from it
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    pub status: FailureStatus,

    /// Machine code (e.g. `MCP_TIMEOUT`, `COMMAND_FAILED`)
    pub code: String,

    pub telemetry: Option<McpTelemetry>,
    pub manual: Option<ManualFallback>,
}

impl ActionError {
    pub fn new(status: FailureStatus, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
            code: code.into(),
            telemetry: None,
            manual: None,
        }
    }

    /// Ordinary, retryable failure
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FailureStatus::Error, code, message)
    }

    pub fn blocked(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FailureStatus::Blocked, code, message)
    }

    pub fn with_manual(mut self, manual: ManualFallback) -> Self {
        self.manual = Some(manual);
        self
    }

    pub fn with_telemetry(mut self, telemetry: McpTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn is_blocked(&self) -> bool {
        self.status == FailureStatus::Blocked
    }

    /// Map a protocol failure.
    ///
    /// Transport failures are errors; timeouts, approval denials and
    /// configuration problems need a human and block. Tool failures are
    /// ordinary errors.
    pub fn from_mcp(
        error: &McpError,
        ctx: &EngineContext,
        request_id: &str,
        tool: &str,
        commands: Vec<String>,
        server_command: &str,
    ) -> Self {
        let status = match error {
            McpError::Transport(_) | McpError::ToolFailure(_) => FailureStatus::Error,
            McpError::Timeout { .. } | McpError::Approval(_) | McpError::Config(_) => {
                FailureStatus::Blocked
            }
        };

        let manual = match error {
            McpError::Approval(_) => {
                let mut approval = vec![server_command.to_string(), "codex login".to_string()];
                approval.extend(commands);
                ctx.manual(
                    approval,
                    format!(
                        "Engine approval/auth blocked {}. Resolve approval/auth, then rerun.",
                        ctx.stage
                    ),
                )
            }
            _ => ctx.manual(
                commands,
                format!(
                    "Apply {} changes manually for goal \"{}\", then rerun the workflow.",
                    ctx.stage, ctx.goal
                ),
            ),
        };

        let telemetry = McpTelemetry {
            request_id: request_id.to_string(),
            tool: tool.to_string(),
            state: status.mcp_state(),
            duration_ms: None,
            error_code: Some(error.code().to_string()),
            tools: None,
        };

        Self::new(status, error.code(), error.to_string())
            .with_manual(manual)
            .with_telemetry(telemetry)
    }
}

/// A coding engine the orchestrator drives
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Short adapter name
    fn name(&self) -> &str;

    /// Name used in the connection note (e.g. "Codex MCP")
    fn display_name(&self) -> &str;

    /// Model reported in cost updates
    fn model(&self) -> &str;

    /// Tool label recorded on tool-call events for an action
    fn tool_label(&self, action: EngineAction) -> &str;

    async fn initialize(&self) -> Result<EngineInit, ActionError>;

    async fn edit_files(&self, ctx: &EngineContext) -> Result<ActionResult, ActionError>;

    async fn run_commands(&self, ctx: &EngineContext) -> Result<ActionResult, ActionError>;

    /// Release engine resources. Idempotent.
    async fn shutdown(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EngineContext {
        EngineContext {
            run_id: "run-1".to_string(),
            goal: "say \"hi\"".to_string(),
            stage: "IMPLEMENT".to_string(),
            project_path: PathBuf::from("/work/project"),
            workdir: PathBuf::from("/work/project"),
            test_command: None,
        }
    }

    #[test]
    fn test_rerun_command_escapes_goal() {
        let cmd = ctx().rerun_command();
        assert!(cmd.starts_with("OFFICEFLOW_WORKDIR=\"/work/project\""));
        assert!(cmd.contains("--goal \"say \\\"hi\\\"\""));
        assert!(cmd.contains("--project \"/work/project\""));
    }

    #[test]
    fn test_timeout_maps_to_blocked() {
        let err = McpError::Timeout {
            method: "tools/call".to_string(),
        };
        let mapped = ActionError::from_mcp(&err, &ctx(), "req-1", "codex", vec![], "codex mcp");

        assert!(mapped.is_blocked());
        assert_eq!(mapped.code, "MCP_TIMEOUT");
        assert_eq!(mapped.telemetry.unwrap().state, McpState::Blocked);
    }

    #[test]
    fn test_transport_maps_to_error() {
        let err = McpError::Transport("gone".to_string());
        let mapped = ActionError::from_mcp(&err, &ctx(), "req-1", "codex", vec![], "codex mcp");
        assert_eq!(mapped.status, FailureStatus::Error);
    }

    #[test]
    fn test_approval_manual_steps() {
        let err = McpError::Approval("approval required".to_string());
        let mapped = ActionError::from_mcp(
            &err,
            &ctx(),
            "req-1",
            "codex",
            vec!["git status".to_string()],
            "codex mcp-server",
        );

        assert!(mapped.is_blocked());
        assert_eq!(mapped.code, "MCP_APPROVAL");
        let telemetry = mapped.telemetry.as_ref().unwrap();
        assert_eq!(telemetry.error_code.as_deref(), Some("MCP_APPROVAL"));

        let manual = mapped.manual.unwrap();
        assert_eq!(manual.commands, vec!["codex mcp-server", "codex login", "git status"]);
        assert!(manual.rerun.is_some());
    }
}
