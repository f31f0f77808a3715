//! Task module - the task record, its lifecycle states, and subtask specs.
//!
//! This module is designed with the board's invariants in mind:
//! - Status changes are only legal along the edges of [`TaskStatus::can_transition_to`]
//! - Task relations are stored as ids, never as live references
//! - Pure data; all mutation goes through [`crate::board::TaskBoard`]

#[allow(clippy::module_inception)]
pub mod task;
mod status;
mod subtask;

pub use status::{ParseStatusError, TaskStatus};
pub use subtask::{DependencyRef, SubtaskSpec};
pub use task::{preview, Task, TaskContext, TaskId};
