//! Event record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::task::TaskId;

/// Event kinds for the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Run started for a root task
    RunStarted,
    /// Task added to the board (initial waiting state)
    TaskCreated,
    /// Status changed
    Transition,
    /// Task handed to an agent
    Dispatch,
    /// Agent returned an outcome
    Outcome,
    /// Agent error, timeout, contract violation, or rejected board operation
    Error,
    /// Run reached its final state
    RunFinished,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RunStarted => "run_started",
            Self::TaskCreated => "task_created",
            Self::Transition => "transition",
            Self::Dispatch => "dispatch",
            Self::Outcome => "outcome",
            Self::Error => "error",
            Self::RunFinished => "run_finished",
        };
        write!(f, "{}", s)
    }
}

/// An immutable entry in the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the stream, starting at 0
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub task_id: TaskId,
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    /// Free-form details for audit and debugging
    pub payload: serde_json::Value,
}

impl Event {
    /// Text field of the payload, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} #{}] {} {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.seq,
            self.kind,
            self.task_id,
            self.payload
        )
    }
}
