//! Run summaries reconstructed from event history.
//!
//! A run's state is never stored separately: observers fold the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{AgentState, EventBody, RunEvent, RunOutcome};

/// Summary of a single pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Run identifier
    pub run_id: String,

    /// Goal the run was started with
    pub goal: String,

    /// When `run_started` was recorded
    pub started_at: Option<DateTime<Utc>>,

    /// When `run_finished` was recorded
    pub finished_at: Option<DateTime<Utc>>,

    /// Derived status
    pub status: RunState,

    /// Sum of all reported cost estimates
    pub estimated_cost: f64,

    /// Artifact paths in creation order
    pub artifacts: Vec<String>,
}

impl RunSummary {
    /// Reconstruct a summary from a sequence of events
    pub fn from_events(run_id: &str, events: &[RunEvent]) -> Option<Self> {
        if events.is_empty() {
            return None;
        }

        let mut summary = Self {
            run_id: run_id.to_string(),
            goal: "(unknown)".to_string(),
            started_at: None,
            finished_at: None,
            status: RunState::Running,
            estimated_cost: 0.0,
            artifacts: Vec::new(),
        };

        let mut blocked = false;
        let mut errored = false;

        for event in events {
            match &event.body {
                EventBody::RunStarted(p) if summary.started_at.is_none() => {
                    summary.goal = p.goal.clone();
                    summary.started_at = Some(event.ts);
                }
                EventBody::RunFinished(p) if summary.finished_at.is_none() => {
                    summary.finished_at = Some(event.ts);
                    match p.status {
                        Some(RunOutcome::Blocked) => blocked = true,
                        Some(RunOutcome::Error) => errored = true,
                        _ => {}
                    }
                }
                EventBody::AgentStatus(p) => match p.status {
                    AgentState::Blocked => blocked = true,
                    AgentState::Error => errored = true,
                    _ => {}
                },
                EventBody::CostUpdate(p) => {
                    summary.estimated_cost += p.estimated_cost.unwrap_or(0.0);
                }
                EventBody::ArtifactCreated(p) => summary.artifacts.push(p.path.clone()),
                _ => {}
            }
        }

        summary.status = if blocked {
            RunState::Blocked
        } else if errored {
            RunState::Error
        } else if summary.finished_at.is_some() {
            RunState::Done
        } else {
            RunState::Running
        };

        Some(summary)
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.status, RunState::Running)
    }
}

/// Status of a run as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Done,
    Blocked,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{
        AgentStatusUpdate, ArtifactCreated, CostUpdate, RunFinished, RunStarted,
    };

    fn started(run_id: &str) -> RunEvent {
        RunEvent::new(
            run_id,
            EventBody::RunStarted(RunStarted {
                goal: "ship it".to_string(),
            }),
        )
    }

    fn finished(run_id: &str) -> RunEvent {
        RunEvent::new(
            run_id,
            EventBody::RunFinished(RunFinished {
                goal: "ship it".to_string(),
                status: None,
            }),
        )
    }

    #[test]
    fn test_empty_history_has_no_summary() {
        assert!(RunSummary::from_events("run-1", &[]).is_none());
    }

    #[test]
    fn test_running_then_done() {
        let mut events = vec![started("run-1")];
        let running = RunSummary::from_events("run-1", &events).unwrap();
        assert!(running.is_running());
        assert_eq!(running.goal, "ship it");

        events.push(RunEvent::new(
            "run-1",
            EventBody::CostUpdate(CostUpdate {
                model: "mock".to_string(),
                tokens_in: 10,
                tokens_out: 5,
                estimated_cost: Some(0.25),
            }),
        ));
        events.push(RunEvent::new(
            "run-1",
            EventBody::ArtifactCreated(ArtifactCreated {
                artifact_type: "test_summary".to_string(),
                path: "runs/run-1/artifacts/test_summary.txt".to_string(),
                summary: "Test output".to_string(),
                url: None,
            }),
        ));
        events.push(finished("run-1"));

        let done = RunSummary::from_events("run-1", &events).unwrap();
        assert_eq!(done.status, RunState::Done);
        assert_eq!(done.estimated_cost, 0.25);
        assert_eq!(done.artifacts.len(), 1);
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn test_blocked_wins_over_error() {
        let events = vec![
            started("run-1"),
            RunEvent::new(
                "run-1",
                EventBody::AgentStatus(AgentStatusUpdate {
                    status: AgentState::Error,
                    message: None,
                }),
            ),
            RunEvent::new(
                "run-1",
                EventBody::AgentStatus(AgentStatusUpdate {
                    status: AgentState::Blocked,
                    message: None,
                }),
            ),
            finished("run-1"),
        ];

        let summary = RunSummary::from_events("run-1", &events).unwrap();
        assert_eq!(summary.status, RunState::Blocked);
    }
}
