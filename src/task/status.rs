//! Task status and the legal transition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a task on the board.
///
/// Legal transitions:
/// - waiting -> in_progress (dispatch), failed (dependency or parent failed)
/// - in_progress -> pending_review, failed, re_progress (retryable worker error)
/// - pending_review -> completed, re_progress, failed (rejected with no attempts left)
/// - re_progress -> in_progress (re-dispatch), failed (parent failed)
///
/// `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet dispatched
    #[default]
    Waiting,
    /// Dispatched to a worker (or decomposed and waiting on children)
    InProgress,
    /// Candidate result produced, waiting for the verifier
    PendingReview,
    /// Verifier accepted the result
    Completed,
    /// Rejected or errored, waiting for re-dispatch
    ReProgress,
    /// Gave up
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::PendingReview => "pending_review",
            TaskStatus::Completed => "completed",
            TaskStatus::ReProgress => "re_progress",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Check if transition to target status is valid.
    ///
    /// A same-state "transition" is not a no-op; it is rejected like any
    /// other edge missing from the table.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, target),
            (Waiting, InProgress)
                | (Waiting, Failed)
                | (InProgress, PendingReview)
                | (InProgress, Failed)
                | (InProgress, ReProgress)
                | (PendingReview, Completed)
                | (PendingReview, ReProgress)
                | (PendingReview, Failed)
                | (ReProgress, InProgress)
                | (ReProgress, Failed)
        )
    }

    pub fn all() -> &'static [TaskStatus] {
        &[
            TaskStatus::Waiting,
            TaskStatus::InProgress,
            TaskStatus::PendingReview,
            TaskStatus::Completed,
            TaskStatus::ReProgress,
            TaskStatus::Failed,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TaskStatus::Waiting),
            "in_progress" => Ok(TaskStatus::InProgress),
            "pending_review" => Ok(TaskStatus::PendingReview),
            "completed" => Ok(TaskStatus::Completed),
            "re_progress" => Ok(TaskStatus::ReProgress),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid status string
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid status '{0}', expected one of: waiting, in_progress, pending_review, completed, re_progress, failed")]
pub struct ParseStatusError(pub String);
