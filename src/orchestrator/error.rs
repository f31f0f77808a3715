//! Run errors and reports.

use thiserror::Error;
use uuid::Uuid;

use crate::board::BoardError;
use crate::task::TaskId;

pub type RunResult<T> = Result<T, RunError>;

/// Why a run ended without a completed root.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("Task {task} failed: {reason}")]
    Failed { task: TaskId, reason: String },

    #[error("Iteration budget exhausted after {iterations} rounds ({} tasks unfinished)", unfinished.len())]
    BudgetExhausted {
        iterations: u32,
        unfinished: Vec<TaskId>,
    },

    #[error("Run stalled: {} unfinished tasks and nothing dispatchable", unfinished.len())]
    Stalled { unfinished: Vec<TaskId> },

    #[error("Run cancelled after {iterations} rounds")]
    Cancelled { iterations: u32 },

    #[error(transparent)]
    Board(#[from] BoardError),
}

impl RunError {
    /// Short tag used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Failed { .. } => "failed",
            RunError::BudgetExhausted { .. } => "budget_exhausted",
            RunError::Stalled { .. } => "stalled",
            RunError::Cancelled { .. } => "cancelled",
            RunError::Board(_) => "board",
        }
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub root: TaskId,
    /// Rounds executed
    pub iterations: u32,
    pub outcome: RunResult<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = RunError::Failed {
            task: TaskId(2),
            reason: "rejected after 2 attempts".into(),
        };
        assert_eq!(err.to_string(), "Task task-2 failed: rejected after 2 attempts");

        let err = RunError::BudgetExhausted {
            iterations: 1,
            unfinished: vec![TaskId(0)],
        };
        assert_eq!(
            err.to_string(),
            "Iteration budget exhausted after 1 rounds (1 tasks unfinished)"
        );
        assert_eq!(err.kind(), "budget_exhausted");
    }

    #[test]
    fn test_board_errors_convert() {
        let err: RunError = BoardError::UnknownTask(TaskId(9)).into();
        assert_eq!(err.kind(), "board");
        assert_eq!(err, RunError::Board(BoardError::UnknownTask(TaskId(9))));
    }
}
