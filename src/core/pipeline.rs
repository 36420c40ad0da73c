//! Stage definitions and resolution.
//!
//! The pipeline is a fixed base order of stages. Stage plugins may insert
//! additional stages once, relative to an anchor, before the run starts; the
//! resolved list does not change afterwards.

use serde::{Deserialize, Serialize};

pub const SPEC: &str = "SPEC";
pub const IMPLEMENT: &str = "IMPLEMENT";
pub const TEST: &str = "TEST";
pub const REVIEW: &str = "REVIEW";
pub const GITHUB: &str = "GITHUB";
pub const BLOG_FACTS: &str = "BLOG_FACTS";

/// The fixed base order
pub const BASE_STAGES: [&str; 6] = [SPEC, IMPLEMENT, TEST, REVIEW, GITHUB, BLOG_FACTS];

/// Relative placement requested by a stage plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOrder {
    /// Insert directly before this stage, if present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,

    /// Otherwise insert directly after this stage, if present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl StageOrder {
    pub fn before(stage: impl Into<String>) -> Self {
        Self {
            before: Some(stage.into()),
            after: None,
        }
    }

    pub fn after(stage: impl Into<String>) -> Self {
        Self {
            before: None,
            after: Some(stage.into()),
        }
    }
}

/// Compute the effective stage order.
///
/// Additions are processed in the order given. A name already in the list is
/// skipped. Otherwise the stage goes directly before its `before` anchor,
/// else directly after its `after` anchor, else at the end. Anchors are
/// looked up in the list built so far, so earlier insertions can serve as
/// anchors for later ones.
pub fn resolve_stages<'a, I>(base: &[&str], additions: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, StageOrder)>,
{
    let mut stages: Vec<String> = base.iter().map(|s| s.to_string()).collect();

    for (name, order) in additions {
        if stages.iter().any(|s| s == name) {
            continue;
        }

        let position = |anchor: &Option<String>| {
            anchor
                .as_deref()
                .and_then(|a| stages.iter().position(|s| s == a))
        };

        let index = match (position(&order.before), position(&order.after)) {
            (Some(i), _) => i,
            (None, Some(i)) => i + 1,
            (None, None) => stages.len(),
        };

        stages.insert(index, name.to_string());
    }

    stages
}
