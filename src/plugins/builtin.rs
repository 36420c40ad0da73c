//! Plugins shipped with the registry.

use anyhow::Result;
use async_trait::async_trait;

use super::{PolicyInput, PolicyPlugin, PolicyResult};

/// Records that the resolved stage order was honored. Always passes.
pub struct DefaultStageOrderPolicy;

#[async_trait]
impl PolicyPlugin for DefaultStageOrderPolicy {
    fn name(&self) -> &str {
        "default-stage-order"
    }

    async fn evaluate(&self, _input: &PolicyInput<'_>) -> Result<PolicyResult> {
        Ok(PolicyResult::pass())
    }
}
