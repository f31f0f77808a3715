//! Task status board - owns the task graph and its state machine.
//!
//! # Key Concepts
//! - Arena: tasks indexed by id, relations stored as id lists
//! - Ready task: waiting, with every dependency completed
//! - Transition: the only way a task's status changes
//! - In flight: a task with an outstanding agent dispatch (at most one)

#[allow(clippy::module_inception)]
mod board;
mod error;

pub use board::{BoardSnapshot, PropagatedFailure, TaskBoard};
pub use error::{BoardError, BoardResult};

use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared board for concurrent access.
pub type SharedTaskBoard = Arc<RwLock<TaskBoard>>;

/// Create a new shared board.
pub fn create_shared_board(board: TaskBoard) -> SharedTaskBoard {
    Arc::new(RwLock::new(board))
}
