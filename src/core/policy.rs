//! Policy gate evaluated before every stage.
//!
//! Two layers, first failure wins:
//! 1. Built-in checks from `project.yaml` (forbidden stages, TEST before
//!    GITHUB). These cannot be overridden by plugins.
//! 2. Policy plugins, in registration order.
//!
//! Every evaluated policy produces a [`PolicyDecision`]; decisions are
//! accumulated into the run's `policy_report.json`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PolicyConfig;
use crate::core::pipeline::{GITHUB, TEST};
use crate::domain::{EventBody, RunEvent};
use crate::plugins::{PluginRegistry, PolicyInput};

pub const SOURCE_FORBIDDEN: &str = "builtin:forbidden_stages";
pub const SOURCE_REQUIRE_TEST: &str = "builtin:require_test_stage_before_github";

/// Outcome of one policy for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub stage: String,

    /// `builtin:<setting>` or `plugin:<name>`
    pub source: String,

    pub pass: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A failed policy, with the text shown to the operator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("Stage {stage} is forbidden by policies.forbidden_stages (pattern '{pattern}')")]
    Forbidden { stage: String, pattern: String },

    #[error("Stage GITHUB requires a successful TEST stage earlier in this run")]
    TestRequired,

    #[error("Policy '{policy}' blocked stage {stage}: {reason}")]
    Plugin {
        policy: String,
        stage: String,
        reason: String,
    },
}

impl PolicyViolation {
    /// Literal steps that clear the violation
    pub fn remediation(&self) -> Vec<String> {
        match self {
            Self::Forbidden { pattern, .. } => vec![
                format!("Remove '{}' from policies.forbidden_stages in project.yaml", pattern),
                "Rerun the workflow".to_string(),
            ],
            Self::TestRequired => vec![
                "Make sure the TEST stage is in the pipeline and passes (test_cmd in project.yaml)".to_string(),
                "Or set policies.require_test_stage_before_github: false".to_string(),
                "Rerun the workflow".to_string(),
            ],
            Self::Plugin { policy, .. } => vec![
                format!("Resolve the condition reported by policy '{}'", policy),
                "Rerun the workflow".to_string(),
            ],
        }
    }

    /// Violation text followed by the manual steps
    pub fn message_with_steps(&self) -> String {
        let steps = self
            .remediation()
            .iter()
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\nManual steps:\n{}", self, steps)
    }
}

/// Result of gating one stage
#[derive(Debug, Clone, Default)]
pub struct GateEvaluation {
    /// Decisions in evaluation order, ending at the first failure
    pub decisions: Vec<PolicyDecision>,

    /// The failure that blocks the stage
    pub violation: Option<PolicyViolation>,
}

impl GateEvaluation {
    pub fn passed(&self) -> bool {
        self.violation.is_none()
    }

    fn record(&mut self, stage: &str, source: String, pass: bool, reason: Option<String>) {
        self.decisions.push(PolicyDecision {
            stage: stage.to_string(),
            source,
            pass,
            reason,
        });
    }
}

/// Evaluates built-in and plugin policies
pub struct PolicyGate<'a> {
    config: &'a PolicyConfig,
    registry: &'a PluginRegistry,
}

impl<'a> PolicyGate<'a> {
    pub fn new(config: &'a PolicyConfig, registry: &'a PluginRegistry) -> Self {
        Self { config, registry }
    }

    /// Gate `stage` given the run's history so far
    pub async fn evaluate(
        &self,
        run_id: &str,
        stage: &str,
        goal: &str,
        prior_events: &[RunEvent],
    ) -> GateEvaluation {
        let mut eval = GateEvaluation::default();

        // Built-in layer
        match self.config.forbidding_pattern(stage) {
            Some(pattern) => {
                let violation = PolicyViolation::Forbidden {
                    stage: stage.to_string(),
                    pattern: pattern.to_string(),
                };
                eval.record(stage, SOURCE_FORBIDDEN.to_string(), false, Some(violation.to_string()));
                eval.violation = Some(violation);
                return eval;
            }
            None => eval.record(stage, SOURCE_FORBIDDEN.to_string(), true, None),
        }

        if stage == GITHUB && self.config.require_test_stage_before_github {
            if test_succeeded(prior_events) {
                eval.record(stage, SOURCE_REQUIRE_TEST.to_string(), true, None);
            } else {
                let violation = PolicyViolation::TestRequired;
                eval.record(stage, SOURCE_REQUIRE_TEST.to_string(), false, Some(violation.to_string()));
                eval.violation = Some(violation);
                return eval;
            }
        }

        // Plugin layer
        let input = PolicyInput {
            run_id,
            stage,
            prior_events,
            goal,
        };

        for policy in self.registry.policies() {
            let source = format!("plugin:{}", policy.name());
            let (pass, reason) = match policy.evaluate(&input).await {
                Ok(result) => (result.pass, result.reason),
                Err(e) => {
                    // A policy that cannot decide does not let the stage through
                    warn!(policy = policy.name(), stage, error = %e, "policy evaluation failed");
                    (false, Some(format!("evaluation failed: {:#}", e)))
                }
            };

            debug!(policy = policy.name(), stage, pass, "policy evaluated");
            eval.record(stage, source, pass, reason.clone());

            if !pass {
                eval.violation = Some(PolicyViolation::Plugin {
                    policy: policy.name().to_string(),
                    stage: stage.to_string(),
                    reason: reason.unwrap_or_else(|| "no reason given".to_string()),
                });
                return eval;
            }
        }

        eval
    }
}

/// True when a TEST `stage_finished` without an error exists
pub fn test_succeeded(events: &[RunEvent]) -> bool {
    events.iter().any(|e| match &e.body {
        EventBody::StageFinished(p) => p.stage == TEST && p.error.is_none(),
        _ => false,
    })
}

/// Persisted audit record of every decision in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyReport {
    pub run_id: String,
    pub blocked: bool,
    pub decisions: Vec<PolicyDecision>,
}

impl PolicyReport {
    pub fn new(run_id: &str, decisions: Vec<PolicyDecision>) -> Self {
        Self {
            run_id: run_id.to_string(),
            blocked: decisions.iter().any(|d| !d.pass),
            decisions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StageFinished;

    fn finished(stage: &str, error: Option<&str>) -> RunEvent {
        RunEvent::new(
            "run-1",
            EventBody::StageFinished(StageFinished {
                stage: stage.to_string(),
                error: error.map(str::to_string),
            }),
        )
    }

    #[test]
    fn test_succeeded_ignores_failed_runs() {
        assert!(!test_succeeded(&[]));
        assert!(!test_succeeded(&[finished(TEST, Some("boom"))]));
        assert!(test_succeeded(&[finished(TEST, Some("boom")), finished(TEST, None)]));
        assert!(!test_succeeded(&[finished("SPEC", None)]));
    }

    #[tokio::test]
    async fn test_forbidden_short_circuits() {
        let config = PolicyConfig {
            forbidden_stages: vec!["REVIEW".to_string()],
            ..Default::default()
        };
        let registry = PluginRegistry::with_builtins();
        let gate = PolicyGate::new(&config, &registry);

        let eval = gate.evaluate("run-1", "REVIEW", "goal", &[]).await;

        assert!(!eval.passed());
        assert_eq!(eval.decisions.len(), 1);
        assert_eq!(eval.decisions[0].source, SOURCE_FORBIDDEN);
        assert!(matches!(eval.violation, Some(PolicyViolation::Forbidden { .. })));
    }

    #[tokio::test]
    async fn test_passing_stage_records_every_policy() {
        let config = PolicyConfig::default();
        let registry = PluginRegistry::with_builtins();
        let gate = PolicyGate::new(&config, &registry);

        let eval = gate
            .evaluate("run-1", GITHUB, "goal", &[finished(TEST, None)])
            .await;

        assert!(eval.passed());
        let sources: Vec<_> = eval.decisions.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(
            sources,
            vec![SOURCE_FORBIDDEN, SOURCE_REQUIRE_TEST, "plugin:default-stage-order"]
        );
    }

    #[tokio::test]
    async fn test_github_requires_successful_test() {
        let config = PolicyConfig::default();
        let registry = PluginRegistry::with_builtins();
        let gate = PolicyGate::new(&config, &registry);

        for history in [vec![], vec![finished(TEST, Some("exit 1"))]] {
            let eval = gate.evaluate("run-1", GITHUB, "goal", &history).await;

            assert!(matches!(eval.violation, Some(PolicyViolation::TestRequired)));
            let last = eval.decisions.last().unwrap();
            assert_eq!(last.source, SOURCE_REQUIRE_TEST);
            assert!(!last.pass);
            // Plugins are not consulted once a built-in rule fails
            assert_eq!(eval.decisions.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_require_test_can_be_disabled() {
        let config = PolicyConfig {
            require_test_stage_before_github: false,
            ..Default::default()
        };
        let registry = PluginRegistry::with_builtins();
        let gate = PolicyGate::new(&config, &registry);

        let eval = gate.evaluate("run-1", GITHUB, "goal", &[]).await;

        assert!(eval.passed());
        assert!(eval.decisions.iter().all(|d| d.source != SOURCE_REQUIRE_TEST));
    }

    #[test]
    fn test_remediation_text() {
        let text = PolicyViolation::TestRequired.message_with_steps();
        assert!(text.starts_with("Stage GITHUB requires"));
        assert!(text.contains("Manual steps:\n- "));
    }

    #[test]
    fn test_report_blocked_flag() {
        let report = PolicyReport::new(
            "run-1",
            vec![PolicyDecision {
                stage: "REVIEW".to_string(),
                source: SOURCE_FORBIDDEN.to_string(),
                pass: false,
                reason: None,
            }],
        );
        assert!(report.blocked);
    }
}
