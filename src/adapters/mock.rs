//! Mock engine adapter.
//!
//! No engine server is involved. IMPLEMENT returns a deterministic summary;
//! TEST runs the project's test command locally through `sh -c` in the
//! working directory, so a failing test suite fails the stage for real.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{ActionError, ActionResult, EngineAction, EngineAdapter, EngineContext, EngineInit};
use crate::domain::{McpState, McpTelemetry};

/// Default limit for the local test command
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Deterministic local engine
pub struct MockEngineAdapter {
    command_timeout: Duration,
}

impl Default for MockEngineAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngineAdapter {
    pub fn new() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Override the local command timeout
    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Run a shell command, capturing combined output
    async fn shell(&self, ctx: &EngineContext, command: &str) -> Result<String, ActionError> {
        let manual = || {
            ctx.manual(
                vec![command.to_string()],
                format!("Run the {} command manually and fix failures, then rerun the workflow.", ctx.stage),
            )
        };

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ActionError::error("COMMAND_FAILED", format!("Failed to spawn '{}': {}", command, e))
                    .with_manual(manual())
            })?;

        let output = timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ActionError::error(
                    "COMMAND_TIMEOUT",
                    format!("'{}' timed out after {:?}", command, self.command_timeout),
                )
                .with_manual(manual())
            })?
            .map_err(|e| {
                ActionError::error("COMMAND_FAILED", format!("Failed to wait for '{}': {}", command, e))
                    .with_manual(manual())
            })?;

        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
        .trim()
        .to_string();

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(ActionError::error(
                "COMMAND_FAILED",
                format!("'{}' failed with exit code {}: {}", command, exit_code, combined),
            )
            .with_manual(manual()));
        }

        Ok(combined)
    }
}

#[async_trait]
impl EngineAdapter for MockEngineAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn display_name(&self) -> &str {
        "Mock engine"
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn tool_label(&self, action: EngineAction) -> &str {
        match action {
            EngineAction::EditFiles => "codex-mcp",
            EngineAction::RunCommands => "test_cmd",
        }
    }

    async fn initialize(&self) -> Result<EngineInit, ActionError> {
        Ok(EngineInit {
            tools: vec!["codex".to_string()],
            telemetry: McpTelemetry {
                request_id: Uuid::new_v4().to_string(),
                tool: "tools/list".to_string(),
                state: McpState::Ready,
                duration_ms: Some(0),
                error_code: None,
                tools: Some(vec!["codex".to_string()]),
            },
        })
    }

    async fn edit_files(&self, ctx: &EngineContext) -> Result<ActionResult, ActionError> {
        Ok(ActionResult {
            summary: format!("Mock IMPLEMENT completed for goal: {}", ctx.goal),
            raw_output: None,
            telemetry: None,
        })
    }

    #[instrument(skip(self, ctx), fields(stage = %ctx.stage))]
    async fn run_commands(&self, ctx: &EngineContext) -> Result<ActionResult, ActionError> {
        let command = ctx.test_command();
        let started = Instant::now();

        let output = self.shell(ctx, command).await?;
        debug!(duration_ms = started.elapsed().as_millis() as u64, "test command passed");

        Ok(ActionResult {
            summary: "tests completed".to_string(),
            raw_output: Some(output),
            telemetry: None,
        })
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
