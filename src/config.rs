//! Project configuration for officeflow.
//!
//! Configuration sources:
//! 1. `project.yaml` inside the target project (this module)
//! 2. Environment variables for the engine runtime (see [`runtime`])
//!
//! Every key of `project.yaml` is optional; a missing file yields the
//! defaults.

pub mod runtime;

use std::path::Path;

use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use runtime::{detect_mcp_command, EngineMode, RuntimeConfig, RuntimeConfigError};

/// Default config file name, relative to the project
pub const DEFAULT_CONFIG_FILE: &str = "project.yaml";

/// Project settings read from `project.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Branch the GITHUB stage diffs against
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Command the TEST stage runs
    #[serde(default = "default_test_cmd")]
    pub test_cmd: String,

    #[serde(default = "default_lint_cmd")]
    pub lint_cmd: String,

    #[serde(default = "default_format_cmd")]
    pub format_cmd: String,

    /// Pull request template, relative to the project
    #[serde(default = "default_pr_template")]
    pub pr_template: String,

    #[serde(default)]
    pub package_manager: PackageManager,

    #[serde(default)]
    pub policies: PolicyConfig,
}

fn default_base_branch() -> String {
    "main".to_string()
}
fn default_test_cmd() -> String {
    "pnpm test".to_string()
}
fn default_lint_cmd() -> String {
    "pnpm lint".to_string()
}
fn default_format_cmd() -> String {
    "pnpm -r format".to_string()
}
fn default_pr_template() -> String {
    ".github/pull_request_template.md".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            test_cmd: default_test_cmd(),
            lint_cmd: default_lint_cmd(),
            format_cmd: default_format_cmd(),
            pr_template: default_pr_template(),
            package_manager: PackageManager::default(),
            policies: PolicyConfig::default(),
        }
    }
}

impl ProjectConfig {
    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no project config, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes to null
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(content).context("Invalid project YAML")?;
        config.policies.validate()?;
        Ok(config)
    }

    /// Apply the runtime base-branch override, if any
    pub fn with_base_branch(mut self, base_branch: Option<&str>) -> Self {
        if let Some(branch) = base_branch {
            self.base_branch = branch.to_string();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Pnpm,
    Npm,
    Yarn,
}

/// Built-in policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Glob patterns of stage names that may never run
    #[serde(default)]
    pub forbidden_stages: Vec<String>,

    /// Block GITHUB unless TEST finished without error earlier in the run
    #[serde(default = "default_require_test")]
    pub require_test_stage_before_github: bool,

    /// Extra attempts allowed for a failing stage
    #[serde(default)]
    pub max_retries_per_stage: u32,
}

fn default_require_test() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            forbidden_stages: Vec::new(),
            require_test_stage_before_github: default_require_test(),
            max_retries_per_stage: 0,
        }
    }
}

impl PolicyConfig {
    /// Reject patterns that can never match anything
    pub fn validate(&self) -> Result<()> {
        for pattern in &self.forbidden_stages {
            Pattern::new(pattern)
                .with_context(|| format!("Invalid forbidden_stages pattern: {}", pattern))?;
        }
        Ok(())
    }

    /// The forbid-list entry matching `stage`, if any
    pub fn forbidding_pattern(&self, stage: &str) -> Option<&str> {
        self.forbidden_stages
            .iter()
            .find(|p| {
                p.as_str() == stage
                    || Pattern::new(p).map(|pat| pat.matches(stage)).unwrap_or(false)
            })
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ProjectConfig::default();
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.test_cmd, "pnpm test");
        assert_eq!(config.package_manager, PackageManager::Pnpm);
        assert!(config.policies.require_test_stage_before_github);
        assert_eq!(config.policies.max_retries_per_stage, 0);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
test_cmd: "true"
policies:
  forbidden_stages: [REVIEW]
  max_retries_per_stage: 1
"#;
        let config = ProjectConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.test_cmd, "true");
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.policies.forbidden_stages, vec!["REVIEW"]);
        assert_eq!(config.policies.max_retries_per_stage, 1);
        assert!(config.policies.require_test_stage_before_github);
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = ProjectConfig::load(&temp.path().join("project.yaml")).unwrap();
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn test_forbidden_patterns() {
        let policies = PolicyConfig {
            forbidden_stages: vec!["REVIEW".to_string(), "BLOG_*".to_string()],
            ..Default::default()
        };

        assert_eq!(policies.forbidding_pattern("REVIEW"), Some("REVIEW"));
        assert_eq!(policies.forbidding_pattern("BLOG_FACTS"), Some("BLOG_*"));
        assert_eq!(policies.forbidding_pattern("TEST"), None);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let yaml = "policies:\n  forbidden_stages: [\"[\"]\n";
        assert!(ProjectConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_base_branch_override() {
        let config = ProjectConfig::default().with_base_branch(Some("develop"));
        assert_eq!(config.base_branch, "develop");
    }
}
