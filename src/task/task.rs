//! Task record stored on the board.
//!
//! # Invariants
//! - `id` is assigned once by the board and never changes
//! - `children` only ever holds ids greater than `id`
//! - `attempt_count <= max_attempts`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::status::TaskStatus;
use crate::agents::Role;

/// Identifier of a task on the board.
///
/// Ids are handed out sequentially, so ordering by id is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// What happened on the most recent dispatch of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub last_action: String,
    pub last_observation: String,
    pub timestamp: DateTime<Utc>,
}

/// A node in the task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Short label for logs and UIs
    pub name: String,
    /// Work payload; never interpreted by the board
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub status: TaskStatus,
    /// Task that spawned this one through decomposition
    pub parent: Option<TaskId>,
    /// Subtasks in decomposition order
    #[serde(default)]
    pub children: Vec<TaskId>,
    /// Tasks that must be completed before this one may start
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    pub assigned_role: Role,
    pub attempt_count: u32,
    /// Retry limit of `assigned_role` when the task was created
    pub max_attempts: u32,
    /// Worker output, set when entering pending_review
    pub result: Option<String>,
    /// Latest verifier feedback, handed to the next attempt
    pub feedback: Option<String>,
    pub context: Option<TaskContext>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        description: String,
        role: Role,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: format!("task-{}", id.0),
            description,
            requirements: Vec::new(),
            status: TaskStatus::Waiting,
            parent: None,
            children: Vec::new(),
            dependencies: Vec::new(),
            assigned_role: role,
            attempt_count: 0,
            max_attempts,
            result: None,
            feedback: None,
            context: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another dispatch into in_progress is allowed.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// True for a task that has been split into subtasks.
    pub fn is_decomposed(&self) -> bool {
        !self.children.is_empty()
    }

    /// Result truncated for logs and event payloads.
    pub fn result_preview(&self, max_chars: usize) -> Option<String> {
        self.result.as_deref().map(|r| preview(r, max_chars))
    }
}

/// Truncate `text` to at most `max_chars` characters, marking the cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
