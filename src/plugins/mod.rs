//! Plugin contracts and registry.
//!
//! Plugins are values implementing one of five capability traits. They are
//! assembled into a [`PluginRegistry`] at startup from an explicit list; no
//! code is loaded at runtime.
//!
//! - [`RolePlugin`]: supplies agent behavior for one stage, optionally
//!   replacing the built-in action
//! - [`StagePlugin`]: contributes an extra stage with relative ordering
//! - [`ToolPlugin`]: registers named capabilities before the first stage
//! - [`PolicyPlugin`]: a gate evaluated before every stage
//! - [`WidgetPlugin`]: a read-model computed after the run

pub mod builtin;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::event_store::EventStore;
use crate::core::pipeline::StageOrder;
use crate::domain::RunEvent;

pub use builtin::DefaultStageOrderPolicy;

/// The only plugin API version this registry accepts
pub const PLUGIN_API_VERSION: &str = "v1";

/// Plugin contract violations detected at registration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("Plugin '{plugin}' targets API version '{found}', expected 'v1'")]
    UnsupportedApiVersion { plugin: String, found: String },

    #[error("Plugin name must not be empty")]
    EmptyName,
}

/// Context handed to a role plugin
pub struct RoleContext<'a> {
    pub run_id: &'a str,
    pub goal: &'a str,
    pub stage: &'a str,
    pub agent_id: &'a str,
    store: &'a EventStore,
}

impl<'a> RoleContext<'a> {
    pub fn new(
        run_id: &'a str,
        goal: &'a str,
        stage: &'a str,
        agent_id: &'a str,
        store: &'a EventStore,
    ) -> Self {
        Self {
            run_id,
            goal,
            stage,
            agent_id,
            store,
        }
    }

    /// Append an event to the run's log
    pub async fn emit(&self, event: RunEvent) -> Result<()> {
        self.store.append(&event).await?;
        Ok(())
    }
}

/// Context handed to a stage plugin
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub run_id: &'a str,
    pub stage: &'a str,
    pub goal: &'a str,
}

/// Input to a policy plugin
#[derive(Debug, Clone)]
pub struct PolicyInput<'a> {
    pub run_id: &'a str,
    pub stage: &'a str,
    pub prior_events: &'a [RunEvent],
    pub goal: &'a str,
}

/// Verdict of a policy plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub pass: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyResult {
    pub fn pass() -> Self {
        Self {
            pass: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            reason: Some(reason.into()),
        }
    }
}

/// Named capabilities registered by tool plugins
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Value>,
}

impl ToolRegistry {
    /// Register (or replace) a tool's metadata
    pub fn register(&mut self, tool_name: impl Into<String>, metadata: Value) {
        self.tools.insert(tool_name.into(), metadata);
    }

    pub fn get(&self, tool_name: &str) -> Option<&Value> {
        self.tools.get(tool_name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Tool name -> metadata
    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.tools).unwrap_or(Value::Null)
    }
}

#[async_trait]
pub trait RolePlugin: Send + Sync {
    fn name(&self) -> &str;

    fn api_version(&self) -> &str {
        PLUGIN_API_VERSION
    }

    /// Stage this role serves (matched case-insensitively)
    fn role_name(&self) -> &str;

    /// Suppress the built-in action of the stage
    fn replace_default(&self) -> bool {
        false
    }

    async fn create_agent(&self, ctx: &RoleContext<'_>) -> Result<()>;
}

#[async_trait]
pub trait StagePlugin: Send + Sync {
    fn name(&self) -> &str;

    fn api_version(&self) -> &str {
        PLUGIN_API_VERSION
    }

    fn stage_name(&self) -> &str;

    fn order(&self) -> StageOrder {
        StageOrder::default()
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<()>;
}

#[async_trait]
pub trait ToolPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn api_version(&self) -> &str {
        PLUGIN_API_VERSION
    }

    fn tool_name(&self) -> &str;

    async fn register(&self, registry: &mut ToolRegistry) -> Result<()>;
}

#[async_trait]
pub trait PolicyPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn api_version(&self) -> &str {
        PLUGIN_API_VERSION
    }

    async fn evaluate(&self, input: &PolicyInput<'_>) -> Result<PolicyResult>;
}

#[async_trait]
pub trait WidgetPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn api_version(&self) -> &str {
        PLUGIN_API_VERSION
    }

    fn widget_name(&self) -> &str;

    /// Derive a JSON model from the full history and artifact paths
    async fn compute(&self, events: &[RunEvent], artifacts: &[String]) -> Result<Value>;
}

/// A registered plugin of any kind
#[derive(Clone)]
pub enum Plugin {
    Role(Arc<dyn RolePlugin>),
    Stage(Arc<dyn StagePlugin>),
    Tool(Arc<dyn ToolPlugin>),
    Policy(Arc<dyn PolicyPlugin>),
    Widget(Arc<dyn WidgetPlugin>),
}

impl Plugin {
    pub fn name(&self) -> &str {
        match self {
            Self::Role(p) => p.name(),
            Self::Stage(p) => p.name(),
            Self::Tool(p) => p.name(),
            Self::Policy(p) => p.name(),
            Self::Widget(p) => p.name(),
        }
    }

    pub fn api_version(&self) -> &str {
        match self {
            Self::Role(p) => p.api_version(),
            Self::Stage(p) => p.api_version(),
            Self::Tool(p) => p.api_version(),
            Self::Policy(p) => p.api_version(),
            Self::Widget(p) => p.api_version(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Role(_) => "role",
            Self::Stage(_) => "stage",
            Self::Tool(_) => "tool",
            Self::Policy(_) => "policy",
            Self::Widget(_) => "widget",
        }
    }
}

/// Plugins in registration order
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Plugin>,
}

impl PluginRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in plugins
    pub fn with_builtins() -> Self {
        Self {
            plugins: vec![Plugin::Policy(Arc::new(DefaultStageOrderPolicy))],
        }
    }

    /// Register a plugin after checking its contract
    pub fn add(&mut self, plugin: Plugin) -> Result<(), PluginError> {
        if plugin.name().trim().is_empty() {
            return Err(PluginError::EmptyName);
        }
        if plugin.api_version() != PLUGIN_API_VERSION {
            return Err(PluginError::UnsupportedApiVersion {
                plugin: plugin.name().to_string(),
                found: plugin.api_version().to_string(),
            });
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn add_role(&mut self, plugin: impl RolePlugin + 'static) -> Result<(), PluginError> {
        self.add(Plugin::Role(Arc::new(plugin)))
    }

    pub fn add_stage(&mut self, plugin: impl StagePlugin + 'static) -> Result<(), PluginError> {
        self.add(Plugin::Stage(Arc::new(plugin)))
    }

    pub fn add_tool(&mut self, plugin: impl ToolPlugin + 'static) -> Result<(), PluginError> {
        self.add(Plugin::Tool(Arc::new(plugin)))
    }

    pub fn add_policy(&mut self, plugin: impl PolicyPlugin + 'static) -> Result<(), PluginError> {
        self.add(Plugin::Policy(Arc::new(plugin)))
    }

    pub fn add_widget(&mut self, plugin: impl WidgetPlugin + 'static) -> Result<(), PluginError> {
        self.add(Plugin::Widget(Arc::new(plugin)))
    }

    pub fn list(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn roles(&self) -> impl Iterator<Item = &Arc<dyn RolePlugin>> {
        self.plugins.iter().filter_map(|p| match p {
            Plugin::Role(r) => Some(r),
            _ => None,
        })
    }

    pub fn stages(&self) -> impl Iterator<Item = &Arc<dyn StagePlugin>> {
        self.plugins.iter().filter_map(|p| match p {
            Plugin::Stage(s) => Some(s),
            _ => None,
        })
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<dyn ToolPlugin>> {
        self.plugins.iter().filter_map(|p| match p {
            Plugin::Tool(t) => Some(t),
            _ => None,
        })
    }

    pub fn policies(&self) -> impl Iterator<Item = &Arc<dyn PolicyPlugin>> {
        self.plugins.iter().filter_map(|p| match p {
            Plugin::Policy(p) => Some(p),
            _ => None,
        })
    }

    pub fn widgets(&self) -> impl Iterator<Item = &Arc<dyn WidgetPlugin>> {
        self.plugins.iter().filter_map(|p| match p {
            Plugin::Widget(w) => Some(w),
            _ => None,
        })
    }

    /// First role plugin registered for `stage`
    pub fn role_for(&self, stage: &str) -> Option<&Arc<dyn RolePlugin>> {
        self.roles()
            .find(|r| r.role_name().eq_ignore_ascii_case(stage))
    }

    /// First stage plugin contributing `stage`
    pub fn stage_plugin(&self, stage: &str) -> Option<&Arc<dyn StagePlugin>> {
        self.stages().find(|s| s.stage_name() == stage)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| (p.kind(), p.name())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Versioned(&'static str);

    #[async_trait]
    impl PolicyPlugin for Versioned {
        fn name(&self) -> &str {
            "versioned"
        }

        fn api_version(&self) -> &str {
            self.0
        }

        async fn evaluate(&self, _input: &PolicyInput<'_>) -> Result<PolicyResult> {
            Ok(PolicyResult::pass())
        }
    }

    struct Implementer;

    #[async_trait]
    impl RolePlugin for Implementer {
        fn name(&self) -> &str {
            "implementer"
        }

        fn role_name(&self) -> &str {
            "implement"
        }

        async fn create_agent(&self, _ctx: &RoleContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_rejects_other_api_versions() {
        let mut registry = PluginRegistry::new();

        assert!(registry.add_policy(Versioned("v1")).is_ok());
        let err = registry.add_policy(Versioned("v2")).unwrap_err();

        assert_eq!(
            err,
            PluginError::UnsupportedApiVersion {
                plugin: "versioned".to_string(),
                found: "v2".to_string(),
            }
        );
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_builtins_include_default_policy() {
        let registry = PluginRegistry::with_builtins();
        let names: Vec<_> = registry.policies().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["default-stage-order"]);
    }

    #[test]
    fn test_role_lookup_ignores_case() {
        let mut registry = PluginRegistry::new();
        registry.add_role(Implementer).unwrap();

        assert!(registry.role_for("IMPLEMENT").is_some());
        assert!(registry.role_for("TEST").is_none());
    }

    #[test]
    fn test_tool_registry_json() {
        let mut tools = ToolRegistry::default();
        tools.register("lint", serde_json::json!({"cmd": "pnpm lint"}));

        assert_eq!(tools.len(), 1);
        assert_eq!(tools.to_json()["lint"]["cmd"], "pnpm lint");
    }
}
