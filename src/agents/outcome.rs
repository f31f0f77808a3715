//! What an agent receives and what it hands back.

use serde::{Deserialize, Serialize};

use super::Role;
use crate::task::{preview, SubtaskSpec, Task, TaskId};

/// Why a task is being handed to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Do the work: decompose (delegator) or produce a result (worker)
    Execute,
    /// All children completed; the delegator combines their results
    Aggregate,
    /// Judge the candidate result (verifier)
    Review,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Execute => "execute",
            DispatchMode::Aggregate => "aggregate",
            DispatchMode::Review => "review",
        }
    }
}

/// Result of a completed dependency, given to the dependent as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyResult {
    pub task_id: TaskId,
    pub name: String,
    pub result: String,
}

/// A single unit of work handed to an agent.
///
/// `task` is a snapshot taken at dispatch time; agents never see the board.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub task: Task,
    pub mode: DispatchMode,
    pub dependency_results: Vec<DependencyResult>,
    /// Completed children, only filled for [`DispatchMode::Aggregate`]
    pub children: Vec<Task>,
}

impl Dispatch {
    /// Role the dispatch is routed to.
    pub fn role(&self) -> Role {
        match self.mode {
            DispatchMode::Review => Role::Verifier,
            DispatchMode::Aggregate => Role::Delegator,
            DispatchMode::Execute => self.task.assigned_role,
        }
    }
}

/// Tagged result an agent returns for a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    /// Split the task into subtasks (delegator only)
    Decomposed { subtasks: Vec<SubtaskSpec> },
    /// Candidate result for review
    Result { result: String },
    /// Verifier decision on a pending result
    Verdict {
        accepted: bool,
        #[serde(default)]
        feedback: Option<String>,
    },
    /// The agent could not do the work
    Error { reason: String, retryable: bool },
}

impl Outcome {
    pub fn decomposed(subtasks: Vec<SubtaskSpec>) -> Self {
        Outcome::Decomposed { subtasks }
    }

    pub fn result(result: impl Into<String>) -> Self {
        Outcome::Result {
            result: result.into(),
        }
    }

    pub fn accept() -> Self {
        Outcome::Verdict {
            accepted: true,
            feedback: None,
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Outcome::Verdict {
            accepted: false,
            feedback: Some(feedback.into()),
        }
    }

    /// Error that may be retried under the role's retry policy.
    pub fn error(reason: impl Into<String>) -> Self {
        Outcome::Error {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Error that fails the task immediately.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Outcome::Error {
            reason: reason.into(),
            retryable: false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Decomposed { .. } => "decomposed",
            Outcome::Result { .. } => "result",
            Outcome::Verdict { .. } => "verdict",
            Outcome::Error { .. } => "error",
        }
    }

    /// One-line description for events and logs.
    pub fn summary(&self) -> String {
        match self {
            Outcome::Decomposed { subtasks } => format!("decomposed into {} subtasks", subtasks.len()),
            Outcome::Result { result } => format!("result: {}", preview(result, 80)),
            Outcome::Verdict { accepted: true, .. } => "accepted".to_string(),
            Outcome::Verdict {
                accepted: false,
                feedback,
            } => match feedback {
                Some(f) => format!("rejected: {}", preview(f, 80)),
                None => "rejected".to_string(),
            },
            Outcome::Error { reason, retryable } => {
                format!(
                    "{} error: {}",
                    if *retryable { "retryable" } else { "fatal" },
                    preview(reason, 80)
                )
            }
        }
    }

    /// Whether this outcome is part of the contract for `mode`.
    ///
    /// Errors are always allowed. Decomposition is only allowed for a
    /// delegator executing a task; aggregation must produce a result.
    pub fn is_permitted(&self, role: Role, mode: DispatchMode) -> bool {
        match (self, mode) {
            (Outcome::Error { .. }, _) => true,
            (Outcome::Decomposed { .. }, DispatchMode::Execute) => role == Role::Delegator,
            (Outcome::Result { .. }, DispatchMode::Execute | DispatchMode::Aggregate) => true,
            (Outcome::Verdict { .. }, DispatchMode::Review) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_table() {
        let decompose = Outcome::decomposed(vec![SubtaskSpec::new("a")]);
        assert!(decompose.is_permitted(Role::Delegator, DispatchMode::Execute));
        assert!(!decompose.is_permitted(Role::Worker, DispatchMode::Execute));
        assert!(!decompose.is_permitted(Role::Delegator, DispatchMode::Aggregate));

        assert!(Outcome::result("x").is_permitted(Role::Worker, DispatchMode::Execute));
        assert!(Outcome::result("x").is_permitted(Role::Delegator, DispatchMode::Aggregate));
        assert!(!Outcome::result("x").is_permitted(Role::Verifier, DispatchMode::Review));

        assert!(Outcome::accept().is_permitted(Role::Verifier, DispatchMode::Review));
        assert!(!Outcome::accept().is_permitted(Role::Worker, DispatchMode::Execute));

        assert!(Outcome::error("boom").is_permitted(Role::Verifier, DispatchMode::Review));
    }

    #[test]
    fn test_summary() {
        assert_eq!(Outcome::accept().summary(), "accepted");
        assert_eq!(Outcome::reject("too short").summary(), "rejected: too short");
        assert_eq!(Outcome::fatal("disk gone").summary(), "fatal error: disk gone");
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(Outcome::result("ok")).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["result"], "ok");
    }
}
