//! Codex engine adapter.
//!
//! Drives a Codex MCP server through [`McpStdioClient`]. Both actions are a
//! single `codex` tool call with a stage prompt, sandboxed to the working
//! directory with on-request approvals.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use super::mcp::{McpClientOptions, McpError, McpStdioClient};
use super::{
    ActionError, ActionResult, EngineAction, EngineAdapter, EngineContext, EngineInit,
    FailureStatus,
};
use crate::domain::{ManualFallback, McpState, McpTelemetry};

const CODEX_TOOL: &str = "codex";
const TOOL_LABEL: &str = "codex-mcp";

/// Engine adapter backed by a Codex MCP server
pub struct CodexEngineAdapter {
    client: McpStdioClient,
}

impl CodexEngineAdapter {
    pub fn new(options: McpClientOptions) -> Self {
        Self {
            client: McpStdioClient::new(options),
        }
    }

    /// Wrap an already-built client
    pub fn with_client(client: McpStdioClient) -> Self {
        Self { client }
    }

    fn server_command(&self) -> &str {
        &self.client.options().command
    }

    async fn call_codex(
        &self,
        ctx: &EngineContext,
        prompt: String,
        manual_commands: Vec<String>,
    ) -> Result<ActionResult, ActionError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let arguments = json!({
            "prompt": prompt,
            "cwd": ctx.workdir.display().to_string(),
            "sandbox": "workspace-write",
            "approval-policy": "on-request",
        });

        match self.client.call_tool(CODEX_TOOL, arguments).await {
            Ok(output) => {
                let content = coerce_text(&output);
                let summary = if content.is_empty() {
                    format!("Codex {} execution completed.", ctx.stage)
                } else {
                    content.clone()
                };

                Ok(ActionResult {
                    summary,
                    raw_output: Some(content),
                    telemetry: Some(McpTelemetry {
                        request_id,
                        tool: CODEX_TOOL.to_string(),
                        state: McpState::Done,
                        duration_ms: Some(started.elapsed().as_millis() as u64),
                        error_code: None,
                        tools: None,
                    }),
                })
            }
            Err(e) => {
                let mut mapped = ActionError::from_mcp(
                    &e,
                    ctx,
                    &request_id,
                    CODEX_TOOL,
                    manual_commands,
                    self.server_command(),
                );
                if let Some(telemetry) = mapped.telemetry.as_mut() {
                    telemetry.duration_ms = Some(started.elapsed().as_millis() as u64);
                }
                Err(mapped)
            }
        }
    }
}

#[async_trait]
impl EngineAdapter for CodexEngineAdapter {
    fn name(&self) -> &str {
        "codex"
    }

    fn display_name(&self) -> &str {
        "Codex MCP"
    }

    fn model(&self) -> &str {
        "gpt-5"
    }

    fn tool_label(&self, _action: EngineAction) -> &str {
        TOOL_LABEL
    }

    #[instrument(skip(self))]
    async fn initialize(&self) -> Result<EngineInit, ActionError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let setup = async {
            self.client.start().await?;
            self.client.list_tools().await
        };

        match setup.await {
            Ok(tools) => {
                let names: Vec<String> = tools.into_iter().map(|t| t.name).collect();
                info!(tools = names.len(), "Codex MCP ready");

                Ok(EngineInit {
                    tools: names.clone(),
                    telemetry: McpTelemetry {
                        request_id,
                        tool: "tools/list".to_string(),
                        state: McpState::Ready,
                        duration_ms: Some(started.elapsed().as_millis() as u64),
                        error_code: None,
                        tools: Some(names),
                    },
                })
            }
            Err(e) => {
                let status = match e {
                    McpError::Transport(_) => FailureStatus::Error,
                    _ => FailureStatus::Blocked,
                };
                let manual = ManualFallback {
                    cwd: self.client.options().cwd.display().to_string(),
                    commands: vec![self.server_command().to_string(), "codex login".to_string()],
                    notes: "Codex MCP server could not be started. Check the command and credentials, then rerun.".to_string(),
                    rerun: None,
                };

                Err(ActionError::new(status, e.code(), e.to_string())
                    .with_manual(manual)
                    .with_telemetry(McpTelemetry {
                        request_id,
                        tool: "initialize".to_string(),
                        state: status.mcp_state(),
                        duration_ms: Some(started.elapsed().as_millis() as u64),
                        error_code: Some(e.code().to_string()),
                        tools: None,
                    }))
            }
        }
    }

    #[instrument(skip(self, ctx), fields(stage = %ctx.stage))]
    async fn edit_files(&self, ctx: &EngineContext) -> Result<ActionResult, ActionError> {
        let prompt = [
            format!("You are executing officeflow stage {}.", ctx.stage),
            format!("Goal: {}", ctx.goal),
            "Make the minimal set of file edits required to complete the IMPLEMENT stage.".to_string(),
            "Return a concise summary of what changed.".to_string(),
        ]
        .join("\n");

        self.call_codex(ctx, prompt, vec!["git status".to_string(), "git diff".to_string()])
            .await
    }

    #[instrument(skip(self, ctx), fields(stage = %ctx.stage))]
    async fn run_commands(&self, ctx: &EngineContext) -> Result<ActionResult, ActionError> {
        let test_command = ctx.test_command().to_string();
        let prompt = [
            format!("You are executing officeflow stage {}.", ctx.stage),
            format!("Goal: {}", ctx.goal),
            format!("Run this test command: {}", test_command),
            "If tests fail, report failure reasons and suggested fixes.".to_string(),
            "Return a summary of the command output.".to_string(),
        ]
        .join("\n");

        self.call_codex(ctx, prompt, vec![test_command]).await
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.client.shutdown().await?;
        Ok(())
    }
}

/// Extract the text an engine returned.
///
/// Accepts a bare string, the first `text` item of a content array, or an
/// object's string `content`; anything else is rendered as JSON.
pub fn coerce_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .find(|text| !text.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| output.to_string()),
        Value::Object(obj) => match obj.get("content") {
            Some(Value::String(s)) => s.clone(),
            _ => output.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_text() {
        assert_eq!(coerce_text(&json!("plain")), "plain");
        assert_eq!(
            coerce_text(&json!([{"type": "image"}, {"type": "text", "text": "first"}])),
            "first"
        );
        assert_eq!(coerce_text(&json!({"content": "inner"})), "inner");
        assert_eq!(coerce_text(&json!({"a": 1})), "{\"a\":1}");
        assert_eq!(coerce_text(&Value::Null), "");
    }

    #[test]
    fn test_labels() {
        let adapter = CodexEngineAdapter::new(McpClientOptions::new("codex mcp", "/tmp"));
        assert_eq!(adapter.tool_label(EngineAction::EditFiles), "codex-mcp");
        assert_eq!(adapter.tool_label(EngineAction::RunCommands), "codex-mcp");
        assert_eq!(adapter.display_name(), "Codex MCP");
    }
}
