//! Orchestrator - drives the board to completion.
//!
//! # Run loop
//! Each round:
//! 1. Stop if the root is terminal, the run was cancelled, or the round
//!    budget is spent
//! 2. Claim everything dispatchable: ready tasks, retries, pending reviews,
//!    and parents whose children all completed
//! 3. Dispatch to agents with bounded concurrency, applying each outcome as
//!    it arrives
//! 4. Fail whatever a failure has blocked
//!
//! An empty round while the root is unfinished means the run is stalled.
//! Cancellation is observed between rounds; in-flight dispatches finish
//! and are applied first.

mod error;
mod round;

pub use error::{RunError, RunReport, RunResult};

use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::agents::{AgentSet, Role};
use crate::board::{create_shared_board, BoardError, BoardSnapshot, SharedTaskBoard, TaskBoard};
use crate::config::SystemConfig;
use crate::events::{EventKind, EventStream};
use crate::task::{preview, TaskId, TaskStatus};

use round::ReviewErrors;

/// Owns the board and the event stream, and is the only writer to both
/// while a run is active.
pub struct Orchestrator {
    config: SystemConfig,
    board: SharedTaskBoard,
    events: Arc<EventStream>,
    agents: AgentSet,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with an empty board.
    pub fn new(config: SystemConfig, agents: AgentSet) -> Self {
        let board = create_shared_board(TaskBoard::new(config.retry_limits()));
        Self::with_board(config, agents, board, Arc::new(EventStream::new()))
    }

    /// Use an existing board and event stream, e.g. one prepared by hand.
    pub fn with_board(
        config: SystemConfig,
        agents: AgentSet,
        board: SharedTaskBoard,
        events: Arc<EventStream>,
    ) -> Self {
        Self {
            config,
            board,
            events,
            agents,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn board(&self) -> SharedTaskBoard {
        Arc::clone(&self.board)
    }

    pub fn events(&self) -> Arc<EventStream> {
        Arc::clone(&self.events)
    }

    /// Cancelling this token stops the run at the next round boundary.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        self.board.read().await.snapshot()
    }

    /// Add a root task assigned to `role`.
    pub async fn submit(&self, description: impl Into<String>, role: Role) -> RunResult<TaskId> {
        let (id, name) = {
            let mut board = self.board.write().await;
            let id = board.create_task_with_role(description, &[], None, role)?;
            let name = board.get_task(id).map(|t| t.name.clone()).unwrap_or_default();
            (id, name)
        };
        tracing::info!("Submitted {} for {}: {}", id, role, name);
        self.events
            .append(id, EventKind::TaskCreated, json!({ "name": name, "role": role }))
            .await;
        Ok(id)
    }

    /// Submit `description` to the delegator and run it to completion.
    pub async fn process_query(&self, description: impl Into<String>) -> RunResult<String> {
        let root = self.submit(description, Role::Delegator).await?;
        self.run(root).await
    }

    /// Drive the board until `root` is terminal. Returns the root's result.
    pub async fn run(&self, root: TaskId) -> RunResult<String> {
        self.run_with_report(root).await.outcome
    }

    pub async fn run_with_report(&self, root: TaskId) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id, %root);
        let mut iterations = 0;
        let outcome = self
            .drive(root, &mut iterations)
            .instrument(span.clone())
            .await;

        span.in_scope(|| match &outcome {
            Ok(result) => tracing::info!(
                "Run finished after {} rounds: {}",
                iterations,
                preview(result, 80)
            ),
            Err(e) => tracing::warn!("Run ended after {} rounds: {}", iterations, e),
        });
        RunReport {
            run_id,
            root,
            iterations,
            outcome,
        }
    }

    async fn drive(&self, root: TaskId, iterations: &mut u32) -> RunResult<String> {
        if self.board.read().await.get_task(root).is_none() {
            return Err(BoardError::UnknownTask(root).into());
        }
        self.events
            .append(
                root,
                EventKind::RunStarted,
                json!({ "max_iterations": self.config.max_iterations }),
            )
            .await;

        let outcome = self.run_rounds(root, iterations).await;

        let payload = match &outcome {
            Ok(_) => json!({ "status": "completed", "iterations": *iterations }),
            Err(e) => json!({
                "status": e.kind(),
                "iterations": *iterations,
                "reason": e.to_string(),
            }),
        };
        self.events.append(root, EventKind::RunFinished, payload).await;
        outcome
    }

    async fn run_rounds(&self, root: TaskId, iterations: &mut u32) -> RunResult<String> {
        let mut review_errors = ReviewErrors::new();
        loop {
            if let Some(outcome) = self.root_outcome(root).await {
                return outcome;
            }
            if self.cancel.is_cancelled() {
                return Err(RunError::Cancelled {
                    iterations: *iterations,
                });
            }
            if *iterations >= self.config.max_iterations {
                return Err(RunError::BudgetExhausted {
                    iterations: *iterations,
                    unfinished: self.unfinished().await,
                });
            }

            let dispatches = self.plan_round().await?;
            if dispatches.is_empty() {
                // Planning may have failed tasks that had no attempts left.
                if self.propagate_failures().await > 0 {
                    continue;
                }
                if let Some(outcome) = self.root_outcome(root).await {
                    return outcome;
                }
                return Err(RunError::Stalled {
                    unfinished: self.unfinished().await,
                });
            }

            *iterations += 1;
            tracing::debug!("Round {}: {} dispatches", iterations, dispatches.len());
            self.execute_round(dispatches, &mut review_errors).await?;
            self.propagate_failures().await;
        }
    }

    /// Final outcome once the root is terminal.
    async fn root_outcome(&self, root: TaskId) -> Option<RunResult<String>> {
        let (status, result) = {
            let board = self.board.read().await;
            let task = board.get_task(root)?;
            (task.status, task.result.clone())
        };
        match status {
            TaskStatus::Completed => Some(Ok(result.unwrap_or_default())),
            TaskStatus::Failed => {
                let reason = self
                    .events
                    .latest_for_task(root, EventKind::Error)
                    .await
                    .and_then(|e| e.payload_str("reason").map(str::to_string))
                    .unwrap_or_else(|| "task failed".to_string());
                Some(Err(RunError::Failed { task: root, reason }))
            }
            _ => None,
        }
    }

    async fn unfinished(&self) -> Vec<TaskId> {
        let board = self.board.read().await;
        TaskStatus::all()
            .iter()
            .filter(|s| !s.is_terminal())
            .flat_map(|s| board.tasks_by_status(*s))
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
