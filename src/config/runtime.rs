//! Engine runtime configuration resolved from the environment.
//!
//! Resolution is eager: every precondition is checked before any engine
//! process is spawned, and each violation has its own error code.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `OFFICEFLOW_MODE` | `mock` or `real` |
//! | `OFFICEFLOW_MCP_TRANSPORT` | only `stdio` |
//! | `OFFICEFLOW_MCP_COMMAND` | engine server command line |
//! | `OFFICEFLOW_WORKDIR` | directory the engine works in |
//! | `OFFICEFLOW_BASE_BRANCH` | overrides `base_branch` |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub const ENV_MODE: &str = "OFFICEFLOW_MODE";
pub const ENV_TRANSPORT: &str = "OFFICEFLOW_MCP_TRANSPORT";
pub const ENV_COMMAND: &str = "OFFICEFLOW_MCP_COMMAND";
pub const ENV_WORKDIR: &str = "OFFICEFLOW_WORKDIR";
pub const ENV_BASE_BRANCH: &str = "OFFICEFLOW_BASE_BRANCH";

/// Used when no server command can be detected
const FALLBACK_COMMAND: &str = "codex mcp";

/// Engine execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Deterministic local engine, no subprocess server
    Mock,
    /// Real engine server over stdio
    Real,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Real => "real",
        }
    }
}

/// Why the runtime configuration was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeConfigError {
    #[error("Invalid OFFICEFLOW_MODE: {0}. Expected mock|real.")]
    InvalidMode(String),

    #[error("Invalid OFFICEFLOW_MCP_TRANSPORT: {0}. Only stdio is supported.")]
    InvalidTransport(String),

    #[error("OFFICEFLOW_MCP_COMMAND resolved to an empty value.")]
    EmptyCommand,

    #[error("Real mode requires a native Linux path; {0} is under /mnt and is not supported. Use a path inside the Linux filesystem.")]
    WorkdirUnsupported(String),

    #[error("Real mode requires engine credentials. Set OPENAI_API_KEY or run `codex login` so ~/.codex/auth.json exists.")]
    AuthMissing,
}

impl RuntimeConfigError {
    /// Stable machine code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMode(_) => "INVALID_MODE",
            Self::InvalidTransport(_) => "INVALID_TRANSPORT",
            Self::EmptyCommand => "EMPTY_COMMAND",
            Self::WorkdirUnsupported(_) => "WORKDIR_UNSUPPORTED",
            Self::AuthMissing => "AUTH_MISSING",
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub mode: EngineMode,

    /// Engine server command line (whitespace separated)
    pub mcp_command: String,

    /// Directory the engine operates in
    pub workdir: PathBuf,

    /// Overrides the project's base branch
    pub base_branch: Option<String>,
}

impl RuntimeConfig {
    /// Resolve from an environment snapshot.
    ///
    /// `real_requested` is the caller's opt-in (e.g. a `--real` flag); an
    /// explicit `OFFICEFLOW_MODE` wins over it.
    pub async fn resolve(
        project_path: &Path,
        real_requested: bool,
        env: &HashMap<String, String>,
    ) -> Result<Self, RuntimeConfigError> {
        let mode = match non_blank(env, ENV_MODE) {
            Some(value) => parse_mode(value)?,
            None if real_requested => EngineMode::Real,
            None => EngineMode::Mock,
        };

        if let Some(transport) = non_blank(env, ENV_TRANSPORT) {
            if !transport.eq_ignore_ascii_case("stdio") {
                return Err(RuntimeConfigError::InvalidTransport(transport.to_string()));
            }
        }

        let mcp_command = match env.get(ENV_COMMAND) {
            Some(value) if value.trim().is_empty() => return Err(RuntimeConfigError::EmptyCommand),
            Some(value) => value.trim().to_string(),
            None if mode == EngineMode::Real => detect_mcp_command(env).await,
            // Mock runs never start a server
            None => FALLBACK_COMMAND.to_string(),
        };

        let workdir = absolute(
            non_blank(env, ENV_WORKDIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| project_path.to_path_buf()),
        );

        let base_branch = non_blank(env, ENV_BASE_BRANCH).map(str::to_string);

        if mode == EngineMode::Real {
            if workdir.starts_with("/mnt/") {
                return Err(RuntimeConfigError::WorkdirUnsupported(
                    workdir.display().to_string(),
                ));
            }
            if !has_engine_auth(env) {
                return Err(RuntimeConfigError::AuthMissing);
            }
        }

        debug!(mode = mode.as_str(), command = %mcp_command, workdir = %workdir.display(), "runtime config resolved");

        Ok(Self {
            mode,
            mcp_command,
            workdir,
            base_branch,
        })
    }

    /// Resolve from the process environment
    pub async fn from_process_env(
        project_path: &Path,
        real_requested: bool,
    ) -> Result<Self, RuntimeConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::resolve(project_path, real_requested, &env).await
    }
}

/// Pick the engine server subcommand the installed CLI understands
pub async fn detect_mcp_command(env: &HashMap<String, String>) -> String {
    let probe = Command::new("codex")
        .arg("--help")
        .envs(env)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(Duration::from_secs(8), probe).await {
        Ok(Ok(output)) => {
            let help = String::from_utf8_lossy(&output.stdout);
            if help.contains("mcp-server") {
                "codex mcp-server".to_string()
            } else {
                FALLBACK_COMMAND.to_string()
            }
        }
        _ => {
            debug!("engine CLI not detected, using fallback command");
            FALLBACK_COMMAND.to_string()
        }
    }
}

fn parse_mode(value: &str) -> Result<EngineMode, RuntimeConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "mock" => Ok(EngineMode::Mock),
        "real" => Ok(EngineMode::Real),
        _ => Err(RuntimeConfigError::InvalidMode(value.to_string())),
    }
}

fn non_blank<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn has_engine_auth(env: &HashMap<String, String>) -> bool {
    if non_blank(env, "OPENAI_API_KEY").is_some() {
        return true;
    }

    let home = non_blank(env, "HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir);

    match home {
        Some(home) => std::fs::File::open(home.join(".codex").join("auth.json")).is_ok(),
        None => false,
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&path))
        .unwrap_or(path)
}
