//! Subtask specifications produced by a decomposition.

use serde::{Deserialize, Serialize};

use super::task::TaskId;
use crate::agents::Role;

/// Where a subtask dependency points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyRef {
    /// An earlier subtask of the same decomposition, by position
    Sibling(usize),
    /// A task already on the board
    Task(TaskId),
}

/// One subtask requested by the delegator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    /// Defaults to the execution worker
    #[serde(default)]
    pub role: Role,
}

impl SubtaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            name: None,
            requirements: Vec::new(),
            dependencies: Vec::new(),
            role: Role::Worker,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    /// Depend on the subtask at `index` in the same decomposition.
    pub fn after_sibling(mut self, index: usize) -> Self {
        self.dependencies.push(DependencyRef::Sibling(index));
        self
    }

    /// Depend on a task already on the board.
    pub fn after_task(mut self, id: TaskId) -> Self {
        self.dependencies.push(DependencyRef::Task(id));
        self
    }

    /// Hand the subtask to another role (e.g. a nested delegator).
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}
