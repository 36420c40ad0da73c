//! Artifacts produced by pipeline stages.
//!
//! Artifacts are files under `runs/<runId>/artifacts/`; the log only
//! carries a pointer to them via `artifact_created`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A persisted artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Kind of artifact
    pub kind: ArtifactKind,

    /// File name inside the artifacts directory
    pub name: String,

    /// Absolute path on disk
    pub path: PathBuf,

    /// Hex SHA-256 of the content
    pub digest: String,

    /// False when identical content was already present
    pub changed: bool,
}

/// Types of artifacts the pipeline writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Output of the TEST stage
    TestSummary,

    /// Branch diff produced by the GITHUB stage
    DiffPatch,

    /// Facts extracted for a write-up
    BlogFacts,

    /// Tool plugin registrations
    RegisteredTools,

    /// Widget plugin read-model
    Widget,

    /// Policy decisions of the run
    PolicyReport,
}

impl ArtifactKind {
    /// Wire name used in `artifact_created.artifactType`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestSummary => "test_summary",
            Self::DiffPatch => "diff_patch",
            Self::BlogFacts => "blog_facts",
            Self::RegisteredTools => "registered_tools",
            Self::Widget => "widget",
            Self::PolicyReport => "policy_report",
        }
    }
}
