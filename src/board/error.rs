//! Board error types.

use thiserror::Error;

use crate::task::{TaskId, TaskStatus};

/// Result type for board operations
pub type BoardResult<T> = Result<T, BoardError>;

/// Structural misuse of the board API. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    /// Unknown dependency, self-dependency, or an edge that would close a cycle
    #[error("Invalid dependency: {0}")]
    InvalidDependency(String),

    #[error("Cannot decompose {parent} while {status}: {reason}")]
    InvalidParentState {
        parent: TaskId,
        status: TaskStatus,
        reason: String,
    },

    #[error("Illegal transition for {task}: {from} -> {to}")]
    IllegalTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("{task} has used all {attempts} attempts")]
    RetriesExhausted { task: TaskId, attempts: u32 },

    #[error("{0} already has a dispatch in flight")]
    AlreadyDispatched(TaskId),
}

impl BoardError {
    pub fn invalid_dependency(msg: impl Into<String>) -> Self {
        BoardError::InvalidDependency(msg.into())
    }

    pub fn invalid_parent(parent: TaskId, status: TaskStatus, reason: impl Into<String>) -> Self {
        BoardError::InvalidParentState {
            parent,
            status,
            reason: reason.into(),
        }
    }
}
