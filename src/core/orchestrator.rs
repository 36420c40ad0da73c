//! Stage state machine.
//!
//! The orchestrator is the only writer of a run's log. For each resolved
//! stage it emits `stage_started`, runs the policy gate, spawns a logical
//! agent, executes the stage action (retrying ordinary failures within the
//! configured budget), and emits the stage's terminal events. Every exit
//! path goes through [`Orchestrator::finalize`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{ActionError, EngineAction, EngineAdapter, EngineContext, FailureStatus};
use crate::config::ProjectConfig;
use crate::domain::{
    AgentNote, AgentSpawned, AgentState, AgentStatusUpdate, Artifact, ArtifactCreated,
    ArtifactKind, CostUpdate, EventBody, Level, ManualFallback, McpTelemetry, RunEvent, RunFinished,
    RunOutcome, RunStarted, StageFinished, StageStarted, ToolCall,
};
use crate::plugins::{PluginRegistry, RoleContext, StageContext, ToolRegistry};

use super::event_store::{EventStore, LogError};
use super::pipeline::{resolve_stages, BASE_STAGES, BLOG_FACTS, GITHUB, IMPLEMENT, SPEC, TEST};
use super::policy::{PolicyDecision, PolicyGate, PolicyReport};

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,

    /// Resolved stage order
    pub stages: Vec<String>,

    /// Stage that ended the run early
    pub failed_stage: Option<String>,

    pub message: Option<String>,
}

#[derive(Debug)]
struct Termination {
    outcome: RunOutcome,
    stage: Option<String>,
    message: Option<String>,
}

impl Termination {
    fn done() -> Self {
        Self {
            outcome: RunOutcome::Done,
            stage: None,
            message: None,
        }
    }

    fn failed(outcome: RunOutcome, stage: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            outcome,
            stage: stage.map(str::to_string),
            message: Some(message.into()),
        }
    }
}

/// Why a stage action stopped
enum StageError {
    /// Classified failure: blocked or retryable
    Action(ActionError),
    /// The run cannot continue (e.g. the log is unwritable)
    Fatal(anyhow::Error),
}

impl From<ActionError> for StageError {
    fn from(e: ActionError) -> Self {
        Self::Action(e)
    }
}

impl From<anyhow::Error> for StageError {
    fn from(e: anyhow::Error) -> Self {
        Self::Fatal(e)
    }
}

impl From<LogError> for StageError {
    fn from(e: LogError) -> Self {
        Self::Fatal(e.into())
    }
}

/// Drives one run through the resolved stages
pub struct Orchestrator {
    store: EventStore,
    config: ProjectConfig,
    registry: PluginRegistry,
    engine: Box<dyn EngineAdapter>,
    project_path: PathBuf,
    workdir: PathBuf,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in plugins only
    pub fn new(
        store: EventStore,
        config: ProjectConfig,
        engine: Box<dyn EngineAdapter>,
        project_path: impl Into<PathBuf>,
    ) -> Self {
        let project_path = project_path.into();
        Self {
            store,
            config,
            registry: PluginRegistry::with_builtins(),
            engine,
            workdir: project_path.clone(),
            project_path,
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Directory the engine works in (defaults to the project)
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Effective stage order for this orchestrator's plugins
    pub fn stages(&self) -> Vec<String> {
        resolve_stages(
            &BASE_STAGES,
            self.registry.stages().map(|p| (p.stage_name(), p.order())),
        )
    }

    /// Execute the pipeline for `goal`
    #[instrument(skip(self, goal), fields(run_id = %self.store.run_id()))]
    pub async fn run(&self, goal: &str) -> Result<RunReport> {
        let stages = self.stages();
        info!(?stages, engine = self.engine.name(), "Starting run");

        self.emit(self.event(EventBody::RunStarted(RunStarted {
            goal: goal.to_string(),
        })))
        .await?;

        let mut decisions = Vec::new();
        let termination = match self.drive(goal, &stages, &mut decisions).await {
            Ok(termination) => termination,
            Err(e) => {
                let message = format!("{:#}", e);
                error!(error = %message, "Run aborted");
                Termination::failed(RunOutcome::Error, None, message)
            }
        };

        self.finalize(goal, &termination, decisions).await?;

        info!(outcome = ?termination.outcome, "Run finished");
        Ok(RunReport {
            run_id: self.store.run_id().to_string(),
            outcome: termination.outcome,
            stages,
            failed_stage: termination.stage,
            message: termination.message,
        })
    }

    async fn drive(
        &self,
        goal: &str,
        stages: &[String],
        decisions: &mut Vec<PolicyDecision>,
    ) -> Result<Termination> {
        match self.engine.initialize().await {
            Ok(init) => {
                let tools = if init.tools.is_empty() {
                    "none".to_string()
                } else {
                    init.tools.join(", ")
                };
                self.emit(self.event(EventBody::AgentNote(AgentNote {
                    message: format!("{} connected. Tools: {}", self.engine.display_name(), tools),
                    mcp: Some(init.telemetry),
                    manual: None,
                })))
                .await?;
            }
            Err(failure) => {
                // Attributed to the stage that could not start
                let stage = stages.first().map(String::as_str).unwrap_or(SPEC);
                warn!(stage, error = %failure, "Engine initialization failed");
                self.report_failure(stage, None, &failure).await?;
                let outcome = outcome_of(failure.status);
                return Ok(Termination::failed(outcome, Some(stage), failure.message));
            }
        }

        self.register_tools().await?;

        for stage in stages {
            if let Some(termination) = self.run_stage(goal, stage, decisions).await? {
                return Ok(termination);
            }
        }

        Ok(Termination::done())
    }

    /// Run one stage; `Some` ends the run
    async fn run_stage(
        &self,
        goal: &str,
        stage: &str,
        decisions: &mut Vec<PolicyDecision>,
    ) -> Result<Option<Termination>> {
        let run_id = self.store.run_id();
        info!(stage, "Stage started");

        self.emit(
            self.event(EventBody::StageStarted(StageStarted {
                stage: stage.to_string(),
            }))
            .in_stage(stage),
        )
        .await?;

        // Policy gate
        let prior_events = self.store.read_all().await?;
        let gate = PolicyGate::new(&self.config.policies, &self.registry)
            .evaluate(run_id, stage, goal, &prior_events)
            .await;
        decisions.extend(gate.decisions);

        if let Some(violation) = gate.violation {
            warn!(stage, %violation, "Stage blocked by policy");
            self.emit(
                self.event(EventBody::AgentStatus(AgentStatusUpdate {
                    status: AgentState::Blocked,
                    message: Some(violation.message_with_steps()),
                }))
                .in_stage(stage)
                .with_level(Level::Warn),
            )
            .await?;
            self.finish_stage(stage, Some(violation.to_string()), Level::Warn)
                .await?;
            return Ok(Some(Termination::failed(
                RunOutcome::Blocked,
                Some(stage),
                violation.to_string(),
            )));
        }

        // Agent
        let agent_id = format!("{}-agent", stage.to_lowercase());
        self.emit(self.stage_event(
            stage,
            &agent_id,
            EventBody::AgentSpawned(AgentSpawned {
                agent_id: agent_id.clone(),
                role: stage.to_lowercase(),
                task: format!("{} stage", stage),
            }),
        ))
        .await?;
        self.emit(self.stage_event(
            stage,
            &agent_id,
            EventBody::AgentStatus(AgentStatusUpdate {
                status: AgentState::Working,
                message: Some(format!("{} started", stage)),
            }),
        ))
        .await?;

        // Action, with retries
        let max_retries = self.config.policies.max_retries_per_stage;
        let mut attempt = 0;

        loop {
            let failure = match self.execute_stage(goal, stage, &agent_id).await {
                Ok(()) => break,
                Err(StageError::Fatal(e)) => return Err(e),
                Err(StageError::Action(failure)) if stage == GITHUB => self.github_blocked(failure),
                Err(StageError::Action(failure)) => failure,
            };

            if failure.is_blocked() {
                warn!(stage, code = %failure.code, error = %failure, "Stage blocked");
                self.report_failure(stage, Some(&agent_id), &failure).await?;
                self.finish_stage(stage, Some(failure.message.clone()), Level::Warn)
                    .await?;
                return Ok(Some(Termination::failed(
                    RunOutcome::Blocked,
                    Some(stage),
                    failure.message,
                )));
            }

            if attempt < max_retries {
                attempt += 1;
                warn!(stage, attempt, max_retries, error = %failure, "Retrying stage");
                self.emit(
                    self.stage_event(
                        stage,
                        &agent_id,
                        EventBody::AgentNote(AgentNote {
                            message: format!(
                                "{} retry {}/{}: {}",
                                stage, attempt, max_retries, failure.message
                            ),
                            mcp: failure.telemetry.clone(),
                            manual: None,
                        }),
                    )
                    .with_level(Level::Warn),
                )
                .await?;
                continue;
            }

            error!(stage, attempts = attempt + 1, error = %failure, "Stage failed");
            self.report_failure(stage, Some(&agent_id), &failure).await?;
            self.finish_stage(stage, Some(failure.message.clone()), Level::Error)
                .await?;
            return Ok(Some(Termination::failed(
                RunOutcome::Error,
                Some(stage),
                failure.message,
            )));
        }

        // Success
        self.emit(self.stage_event(
            stage,
            &agent_id,
            EventBody::CostUpdate(CostUpdate {
                model: self.engine.model().to_string(),
                tokens_in: 0,
                tokens_out: 0,
                estimated_cost: Some(0.0),
            }),
        ))
        .await?;
        self.emit(self.stage_event(
            stage,
            &agent_id,
            EventBody::AgentStatus(AgentStatusUpdate {
                status: AgentState::Done,
                message: Some(format!("{} complete", stage)),
            }),
        ))
        .await?;
        self.finish_stage(stage, None, Level::Info).await?;

        info!(stage, "Stage finished");
        Ok(None)
    }

    /// Role plugin, stage plugin, then the built-in action unless replaced
    async fn execute_stage(&self, goal: &str, stage: &str, agent_id: &str) -> Result<(), StageError> {
        let run_id = self.store.run_id();
        let mut run_builtin = true;

        if let Some(role) = self.registry.role_for(stage) {
            debug!(stage, plugin = role.name(), "Running role plugin");
            let ctx = RoleContext::new(run_id, goal, stage, agent_id, &self.store);
            role.create_agent(&ctx).await.map_err(|e| {
                ActionError::error(
                    "PLUGIN_FAILED",
                    format!("Role plugin '{}' failed: {:#}", role.name(), e),
                )
            })?;
            run_builtin = !role.replace_default();
        }

        if let Some(plugin) = self.registry.stage_plugin(stage) {
            debug!(stage, plugin = plugin.name(), "Running stage plugin");
            let ctx = StageContext { run_id, stage, goal };
            plugin.run(&ctx).await.map_err(|e| {
                ActionError::error(
                    "PLUGIN_FAILED",
                    format!("Stage plugin '{}' failed: {:#}", plugin.name(), e),
                )
            })?;
        }

        if !run_builtin {
            return Ok(());
        }

        match stage {
            IMPLEMENT => self.implement(goal, stage, agent_id).await,
            TEST => self.test(goal, stage, agent_id).await,
            GITHUB => self.github(stage, agent_id).await,
            BLOG_FACTS => self.blog_facts(goal, stage, agent_id).await,
            _ => Ok(()),
        }
    }

    async fn implement(&self, goal: &str, stage: &str, agent_id: &str) -> Result<(), StageError> {
        let tool = self.engine.tool_label(EngineAction::EditFiles);
        self.tool_call(stage, agent_id, tool, "implement changes", true, None)
            .await?;

        let result = self.engine.edit_files(&self.engine_context(goal, stage)).await?;

        self.tool_call(stage, agent_id, tool, &result.summary, false, result.telemetry)
            .await?;
        Ok(())
    }

    async fn test(&self, goal: &str, stage: &str, agent_id: &str) -> Result<(), StageError> {
        let tool = self.engine.tool_label(EngineAction::RunCommands);
        self.tool_call(stage, agent_id, tool, &self.config.test_cmd, true, None)
            .await?;

        let result = self.engine.run_commands(&self.engine_context(goal, stage)).await?;

        let output = result.raw_output.as_deref().unwrap_or(&result.summary);
        self.record_artifact(
            ArtifactKind::TestSummary,
            "test_summary.txt",
            output.as_bytes(),
            "Test output",
            Some((stage, agent_id)),
        )
        .await?;

        self.tool_call(stage, agent_id, tool, &result.summary, false, result.telemetry)
            .await?;
        Ok(())
    }

    async fn github(&self, stage: &str, agent_id: &str) -> Result<(), StageError> {
        self.tool_call(stage, agent_id, "git", "generate blog diff patch", true, None)
            .await?;

        let range = format!("origin/{}...HEAD", self.config.base_branch);
        let diff_cmd = format!("git diff {}", range);

        let output = Command::new("git")
            .args(["diff", &range])
            .current_dir(&self.project_path)
            .output()
            .await
            .map_err(|e| ActionError::error("GIT_FAILED", format!("Failed to run {}: {}", diff_cmd, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ActionError::error(
                "GIT_FAILED",
                format!("{} failed: {}", diff_cmd, stderr.trim()),
            )
            .into());
        }

        self.record_artifact(
            ArtifactKind::DiffPatch,
            "blog_diff.patch",
            &output.stdout,
            &format!("Generated with {}", diff_cmd),
            Some((stage, agent_id)),
        )
        .await?;

        self.tool_call(stage, agent_id, "git", "blog diff generated", false, None)
            .await?;
        Ok(())
    }

    async fn blog_facts(&self, goal: &str, stage: &str, agent_id: &str) -> Result<(), StageError> {
        let events = self.store.read_all().await?;
        let facts = blog_facts(self.store.run_id(), goal, &events);
        let content = serde_json::to_vec_pretty(&facts).context("Failed to encode blog facts")?;

        self.record_artifact(
            ArtifactKind::BlogFacts,
            "blog_facts.json",
            &content,
            "Blog facts exported",
            Some((stage, agent_id)),
        )
        .await?;
        Ok(())
    }

    /// GITHUB failures always block, with branch-specific recovery steps
    fn github_blocked(&self, failure: ActionError) -> ActionError {
        let base = &self.config.base_branch;
        let manual = ManualFallback {
            cwd: self.project_path.display().to_string(),
            commands: vec![
                "git fetch origin".to_string(),
                format!(
                    "git diff origin/{}...HEAD > runs/{}/artifacts/blog_diff.patch",
                    base,
                    self.store.run_id()
                ),
            ],
            notes: format!("Ensure branch {} exists on origin.", base),
            rerun: None,
        };

        let mut blocked = ActionError::blocked(
            failure.code.clone(),
            format!("GitHub stage blocked: {}", failure.message),
        )
        .with_manual(manual);
        blocked.telemetry = failure.telemetry;
        blocked
    }

    /// Register tool plugins before the first stage
    async fn register_tools(&self) -> Result<()> {
        let mut tools = ToolRegistry::default();

        for plugin in self.registry.tools() {
            let name = plugin.tool_name();
            self.emit(self.event(EventBody::ToolCallStarted(ToolCall {
                tool: name.to_string(),
                summary: "register tool".to_string(),
                mcp: None,
            })))
            .await?;

            let finished = match plugin.register(&mut tools).await {
                Ok(()) => self.event(EventBody::ToolCallFinished(ToolCall {
                    tool: name.to_string(),
                    summary: "tool registered".to_string(),
                    mcp: None,
                })),
                Err(e) => {
                    warn!(tool = name, error = %e, "Tool registration failed");
                    self.event(EventBody::ToolCallFinished(ToolCall {
                        tool: name.to_string(),
                        summary: format!("registration failed: {:#}", e),
                        mcp: None,
                    }))
                    .with_level(Level::Warn)
                }
            };
            self.emit(finished).await?;
        }

        if !tools.is_empty() {
            let content = serde_json::to_vec_pretty(&tools.to_json())?;
            self.record_artifact(
                ArtifactKind::RegisteredTools,
                "registered_tools.json",
                &content,
                &format!("{} tool(s) registered", tools.len()),
                None,
            )
            .await?;
        }

        Ok(())
    }

    /// Shut down the engine, persist widgets and the policy report, and
    /// emit `run_finished`
    async fn finalize(
        &self,
        goal: &str,
        termination: &Termination,
        decisions: Vec<PolicyDecision>,
    ) -> Result<()> {
        if let Err(e) = self.engine.shutdown().await {
            warn!(error = %e, "Engine shutdown failed");
        }

        let events = self.store.read_all().await?;
        let artifacts = artifact_paths(&events);

        for widget in self.registry.widgets() {
            let name = widget.widget_name();
            let model = match widget.compute(&events, &artifacts).await {
                Ok(model) => model,
                Err(e) => {
                    warn!(widget = name, error = %e, "Widget computation failed");
                    continue;
                }
            };
            let content = serde_json::to_vec_pretty(&model)?;
            if let Err(e) = self
                .record_artifact(
                    ArtifactKind::Widget,
                    &format!("widget_{}.json", file_safe(name)),
                    &content,
                    &format!("Widget {}", name),
                    None,
                )
                .await
            {
                warn!(widget = name, error = %e, "Widget artifact not written");
            }
        }

        let report = PolicyReport::new(self.store.run_id(), decisions);
        let content = serde_json::to_vec_pretty(&report)?;
        if let Err(e) = self
            .record_artifact(
                ArtifactKind::PolicyReport,
                "policy_report.json",
                &content,
                &format!("{} policy decision(s)", report.decisions.len()),
                None,
            )
            .await
        {
            warn!(error = %e, "Policy report not written");
        }

        let (status, level) = match termination.outcome {
            RunOutcome::Done => (None, Level::Info),
            RunOutcome::Blocked => (Some(RunOutcome::Blocked), Level::Warn),
            RunOutcome::Error => (Some(RunOutcome::Error), Level::Error),
        };
        self.emit(
            self.event(EventBody::RunFinished(RunFinished {
                goal: goal.to_string(),
                status,
            }))
            .with_level(level),
        )
        .await
    }

    /// Emit the blocked/error status and a note carrying the recovery recipe
    async fn report_failure(
        &self,
        stage: &str,
        agent_id: Option<&str>,
        failure: &ActionError,
    ) -> Result<()> {
        let (state, level) = match failure.status {
            FailureStatus::Blocked => (AgentState::Blocked, Level::Warn),
            FailureStatus::Error => (AgentState::Error, Level::Error),
        };

        let message = match &failure.manual {
            Some(manual) => format!("{}\nManual steps:\n{}", failure.message, manual.render()),
            None => failure.message.clone(),
        };

        let attribute = |event: RunEvent| {
            let event = event.in_stage(stage).with_level(level);
            match agent_id {
                Some(agent) => event.by_agent(agent),
                None => event,
            }
        };

        self.emit(attribute(self.event(EventBody::AgentStatus(AgentStatusUpdate {
            status: state,
            message: Some(message),
        }))))
        .await?;

        self.emit(attribute(self.event(EventBody::AgentNote(AgentNote {
            message: format!("{} blocked/error: {}", stage, failure.message),
            mcp: failure.telemetry.clone(),
            manual: failure.manual.clone(),
        }))))
        .await
    }

    async fn finish_stage(&self, stage: &str, error: Option<String>, level: Level) -> Result<()> {
        self.emit(
            self.event(EventBody::StageFinished(StageFinished {
                stage: stage.to_string(),
                error,
            }))
            .in_stage(stage)
            .with_level(level),
        )
        .await
    }

    async fn tool_call(
        &self,
        stage: &str,
        agent_id: &str,
        tool: &str,
        summary: &str,
        started: bool,
        mcp: Option<McpTelemetry>,
    ) -> Result<()> {
        let call = ToolCall {
            tool: tool.to_string(),
            summary: summary.to_string(),
            mcp,
        };
        let body = if started {
            EventBody::ToolCallStarted(call)
        } else {
            EventBody::ToolCallFinished(call)
        };
        self.emit(self.stage_event(stage, agent_id, body)).await
    }

    /// Store an artifact and announce it; unchanged rewrites are silent
    async fn record_artifact(
        &self,
        kind: ArtifactKind,
        name: &str,
        content: &[u8],
        summary: &str,
        attribution: Option<(&str, &str)>,
    ) -> Result<Artifact> {
        let artifact = self.store.store_artifact(kind, name, content).await?;

        if artifact.changed {
            let mut event = self.event(EventBody::ArtifactCreated(ArtifactCreated {
                artifact_type: kind.as_str().to_string(),
                path: self.store.display_path(&artifact.path),
                summary: summary.to_string(),
                url: None,
            }));
            if let Some((stage, agent_id)) = attribution {
                event = event.in_stage(stage).by_agent(agent_id);
            }
            self.emit(event).await?;
        }

        Ok(artifact)
    }

    fn engine_context(&self, goal: &str, stage: &str) -> EngineContext {
        EngineContext {
            run_id: self.store.run_id().to_string(),
            goal: goal.to_string(),
            stage: stage.to_string(),
            project_path: self.project_path.clone(),
            workdir: self.workdir.clone(),
            test_command: Some(self.config.test_cmd.clone()),
        }
    }

    fn event(&self, body: EventBody) -> RunEvent {
        RunEvent::new(self.store.run_id(), body)
    }

    fn stage_event(&self, stage: &str, agent_id: &str, body: EventBody) -> RunEvent {
        self.event(body).in_stage(stage).by_agent(agent_id)
    }

    async fn emit(&self, event: RunEvent) -> Result<()> {
        self.store
            .append(&event)
            .await
            .with_context(|| format!("Failed to append {} event", event.event_type().as_str()))
    }
}

fn outcome_of(status: FailureStatus) -> RunOutcome {
    match status {
        FailureStatus::Blocked => RunOutcome::Blocked,
        FailureStatus::Error => RunOutcome::Error,
    }
}

/// Artifact paths announced in a history, in order
pub fn artifact_paths(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.body {
            EventBody::ArtifactCreated(a) => Some(a.path.clone()),
            _ => None,
        })
        .collect()
}

/// Facts about a run suitable for a write-up
pub fn blog_facts(run_id: &str, goal: &str, events: &[RunEvent]) -> Value {
    let mut completed = Vec::new();
    let mut tools = Vec::new();

    for event in events {
        match &event.body {
            EventBody::StageFinished(p) if p.error.is_none() => completed.push(p.stage.clone()),
            EventBody::ToolCallStarted(p) if !tools.contains(&p.tool) => tools.push(p.tool.clone()),
            _ => {}
        }
    }

    json!({
        "runId": run_id,
        "goal": goal,
        "stagesCompleted": completed,
        "tools": tools,
        "artifacts": artifact_paths(events),
    })
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_safe() {
        assert_eq!(file_safe("events"), "events");
        assert_eq!(file_safe("../cost view"), "___cost_view");
    }

    #[test]
    fn test_blog_facts_from_history() {
        let events = vec![
            RunEvent::new(
                "run-1",
                EventBody::StageFinished(StageFinished {
                    stage: "SPEC".to_string(),
                    error: None,
                }),
            ),
            RunEvent::new(
                "run-1",
                EventBody::StageFinished(StageFinished {
                    stage: "TEST".to_string(),
                    error: Some("boom".to_string()),
                }),
            ),
            RunEvent::new(
                "run-1",
                EventBody::ToolCallStarted(ToolCall {
                    tool: "test_cmd".to_string(),
                    summary: "true".to_string(),
                    mcp: None,
                }),
            ),
        ];

        let facts = blog_facts("run-1", "goal", &events);

        assert_eq!(facts["stagesCompleted"], json!(["SPEC"]));
        assert_eq!(facts["tools"], json!(["test_cmd"]));
        assert_eq!(facts["artifacts"], json!([]));
    }
}
