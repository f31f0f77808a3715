//! # Taskboard
//!
//! Hierarchical multi-agent task orchestration around a shared status board.
//!
//! This library provides:
//! - A task board that owns the task graph and enforces its state machine
//! - A round-based orchestrator that dispatches ready work to role agents
//! - An append-only event stream recording every mutation
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │           Orchestrator           │
//!        │ (plans rounds, applies outcomes) │
//!        └───────┬──────────────────┬───────┘
//!                │                  │
//!                ▼                  ▼
//!        ┌──────────────┐   ┌──────────────┐
//!        │  TaskBoard   │   │ EventStream  │
//!        └──────────────┘   └──────────────┘
//!                ▲
//!                │ Dispatch / Outcome
//!   ┌────────────┼─────────────┐
//!   ▼            ▼             ▼
//! Delegator    Worker       Verifier
//! ```
//!
//! ## Task Flow
//! 1. A root task is submitted to the delegator
//! 2. The delegator decomposes it, or a worker produces a result
//! 3. The verifier accepts or rejects each result
//! 4. Once every child completes, the delegator aggregates their results
//!
//! ## Modules
//! - `agents`: agent trait, roles, and the dispatch/outcome contract
//! - `board`: task board and its state machine
//! - `config`: YAML configuration with environment overrides
//! - `events`: event stream
//! - `orchestrator`: the run loop
//! - `task`: task records and statuses

pub mod agents;
pub mod board;
pub mod config;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod task;

pub use agents::{Agent, AgentSet, Dispatch, DispatchMode, Outcome, Role};
pub use board::{BoardError, SharedTaskBoard, TaskBoard};
pub use config::SystemConfig;
pub use events::{Event, EventKind, EventStream};
pub use orchestrator::{Orchestrator, RunError, RunReport};
pub use task::{SubtaskSpec, Task, TaskId, TaskStatus};
