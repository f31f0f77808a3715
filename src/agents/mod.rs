//! Agent contract - the capability interface the orchestrator dispatches to.
//!
//! Three roles share one trait:
//! - **Delegator**: decomposes a task into subtasks, later aggregates their results
//! - **Worker**: produces a candidate result for a leaf task
//! - **Verifier**: accepts or rejects a candidate result
//!
//! How an agent reaches its answer (LLM calls, tools, humans) is up to the
//! implementation. The orchestrator only routes a [`Dispatch`] to the agent
//! registered for the task's role and applies the returned [`Outcome`].

mod outcome;
mod role;

pub use outcome::{DependencyResult, Dispatch, DispatchMode, Outcome};
pub use role::Role;

use async_trait::async_trait;
use std::sync::Arc;

/// Trait for role implementations.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Process a dispatch and report what happened.
    ///
    /// Returning `Err` is treated as a retryable [`Outcome::Error`].
    async fn process(&self, dispatch: &Dispatch) -> anyhow::Result<Outcome>;
}

/// One agent per role, selected by the task's `assigned_role`.
#[derive(Clone)]
pub struct AgentSet {
    delegator: Arc<dyn Agent>,
    verifier: Arc<dyn Agent>,
    worker: Arc<dyn Agent>,
}

impl AgentSet {
    pub fn new(
        delegator: Arc<dyn Agent>,
        verifier: Arc<dyn Agent>,
        worker: Arc<dyn Agent>,
    ) -> Self {
        Self {
            delegator,
            verifier,
            worker,
        }
    }

    pub fn for_role(&self, role: Role) -> Arc<dyn Agent> {
        match role {
            Role::Delegator => Arc::clone(&self.delegator),
            Role::Verifier => Arc::clone(&self.verifier),
            Role::Worker => Arc::clone(&self.worker),
        }
    }
}

impl std::fmt::Debug for AgentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSet").finish_non_exhaustive()
    }
}
