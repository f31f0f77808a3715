//! One orchestration round: plan, dispatch, apply.
//!
//! Board mutations happen under the board write lock and are recorded in a
//! [`RoundLog`]; the log is flushed to the event stream right after the lock
//! is released, so events keep mutation order.

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::Orchestrator;
use crate::agents::{Agent, Dispatch, DispatchMode, Outcome, Role};
use crate::board::{BoardError, BoardResult, TaskBoard};
use crate::events::EventKind;
use crate::task::{Task, TaskId, TaskStatus};

/// Consecutive verifier errors per task.
pub(super) type ReviewErrors = HashMap<TaskId, u32>;

struct PendingEvent {
    task_id: TaskId,
    kind: EventKind,
    payload: serde_json::Value,
}

/// Events produced while the board lock is held.
#[derive(Default)]
pub(super) struct RoundLog {
    events: Vec<PendingEvent>,
}

impl RoundLog {
    fn push(&mut self, task_id: TaskId, kind: EventKind, payload: serde_json::Value) {
        self.events.push(PendingEvent {
            task_id,
            kind,
            payload,
        });
    }

    fn transition(&mut self, task_id: TaskId, from: TaskStatus, to: TaskStatus) {
        self.push(task_id, EventKind::Transition, json!({ "from": from, "to": to }));
    }

    fn error(&mut self, task_id: TaskId, reason: &str, retryable: bool) {
        self.push(
            task_id,
            EventKind::Error,
            json!({ "reason": reason, "retryable": retryable }),
        );
    }
}

fn lookup(board: &TaskBoard, id: TaskId) -> BoardResult<&Task> {
    board.get_task(id).ok_or(BoardError::UnknownTask(id))
}

/// Transition `id` and record it.
fn move_task(
    board: &mut TaskBoard,
    log: &mut RoundLog,
    id: TaskId,
    to: TaskStatus,
    result: Option<String>,
) -> BoardResult<()> {
    let from = lookup(board, id)?.status;
    board.transition(id, to, result)?;
    tracing::info!("{}: {} -> {}", id, from, to);
    log.transition(id, from, to);
    Ok(())
}

fn fail_task(board: &mut TaskBoard, log: &mut RoundLog, id: TaskId, reason: String) -> BoardResult<()> {
    tracing::warn!("{} failed: {}", id, reason);
    log.error(id, &reason, false);
    move_task(board, log, id, TaskStatus::Failed, None)
}

/// Send the task back for another attempt, or fail it when none are left.
fn retry_or_fail(board: &mut TaskBoard, log: &mut RoundLog, id: TaskId, reason: String) -> BoardResult<()> {
    let task = lookup(board, id)?;
    if task.has_attempts_left() {
        tracing::warn!(
            "{} attempt {}/{} failed, retrying: {}",
            id,
            task.attempt_count,
            task.max_attempts,
            reason
        );
        log.error(id, &reason, true);
        move_task(board, log, id, TaskStatus::ReProgress, None)
    } else {
        let reason = format!("{} (after {} attempts)", reason, task.attempt_count);
        fail_task(board, log, id, reason)
    }
}

/// Pick everything dispatchable right now, move it into position, and
/// claim it. Returned dispatches are in task creation order.
fn plan(board: &mut TaskBoard, log: &mut RoundLog) -> BoardResult<Vec<Dispatch>> {
    let mut planned: Vec<(TaskId, DispatchMode)> = Vec::new();

    for id in board.get_ready_tasks() {
        let (attempts_left, decomposed, role) = {
            let task = lookup(board, id)?;
            (task.has_attempts_left(), task.is_decomposed(), task.assigned_role)
        };
        if !attempts_left {
            fail_task(board, log, id, format!("no attempts allowed for role {}", role))?;
            continue;
        }
        move_task(board, log, id, TaskStatus::InProgress, None)?;
        // Children wired up ahead of time: wait for them instead of executing.
        if !decomposed {
            board.claim(id)?;
            planned.push((id, DispatchMode::Execute));
        }
    }

    for id in board.tasks_by_status(TaskStatus::ReProgress) {
        let decomposed = lookup(board, id)?.is_decomposed();
        move_task(board, log, id, TaskStatus::InProgress, None)?;
        board.claim(id)?;
        let mode = if decomposed {
            DispatchMode::Aggregate
        } else {
            DispatchMode::Execute
        };
        planned.push((id, mode));
    }

    for id in board.tasks_by_status(TaskStatus::PendingReview) {
        if !board.is_in_flight(id) {
            board.claim(id)?;
            planned.push((id, DispatchMode::Review));
        }
    }

    for id in board.awaiting_aggregation() {
        board.claim(id)?;
        planned.push((id, DispatchMode::Aggregate));
    }

    planned.sort_by_key(|(id, _)| *id);
    planned
        .into_iter()
        .map(|(id, mode)| {
            let task = lookup(board, id)?.clone();
            let children = match mode {
                DispatchMode::Aggregate => board.children(id),
                _ => Vec::new(),
            };
            Ok(Dispatch {
                task,
                mode,
                dependency_results: board.dependency_results(id),
                children,
            })
        })
        .collect()
}

/// Apply one outcome. The caller holds the board lock.
fn apply(
    board: &mut TaskBoard,
    log: &mut RoundLog,
    dispatch: &Dispatch,
    outcome: Outcome,
    review_errors: &mut ReviewErrors,
) -> BoardResult<()> {
    let id = dispatch.task.id;
    let role = dispatch.role();
    let mode = dispatch.mode;

    board.release(id);
    board.record_context(id, format!("{} {}", role, mode.as_str()), outcome.summary())?;

    if !outcome.is_permitted(role, mode) {
        let reason = format!(
            "contract violation: {} returned {} for {}",
            role,
            outcome.kind(),
            mode.as_str()
        );
        tracing::error!("{}: {}", id, reason);
        return fail_task(board, log, id, reason);
    }

    match outcome {
        Outcome::Result { result } => move_task(board, log, id, TaskStatus::PendingReview, Some(result)),

        Outcome::Decomposed { subtasks } if subtasks.is_empty() => {
            retry_or_fail(board, log, id, "empty decomposition".to_string())
        }

        Outcome::Decomposed { subtasks } => match board.add_children(id, subtasks) {
            Ok(children) => {
                for child in children {
                    let task = lookup(board, child)?;
                    tracing::info!("{} created under {}: {}", child, id, task.name);
                    log.push(
                        child,
                        EventKind::TaskCreated,
                        json!({
                            "parent": id,
                            "name": task.name,
                            "role": task.assigned_role,
                            "dependencies": task.dependencies,
                        }),
                    );
                }
                Ok(())
            }
            Err(e @ (BoardError::InvalidDependency(_) | BoardError::InvalidParentState { .. })) => {
                fail_task(board, log, id, format!("invalid decomposition: {}", e))
            }
            Err(e) => Err(e),
        },

        Outcome::Verdict { accepted: true, .. } => {
            review_errors.remove(&id);
            move_task(board, log, id, TaskStatus::Completed, None)
        }

        Outcome::Verdict {
            accepted: false,
            feedback,
        } => {
            review_errors.remove(&id);
            board.set_feedback(id, feedback.clone())?;
            let task = lookup(board, id)?;
            if task.has_attempts_left() {
                move_task(board, log, id, TaskStatus::ReProgress, None)
            } else {
                let mut reason = format!("rejected after {} attempts", task.attempt_count);
                if let Some(feedback) = feedback {
                    reason = format!("{}: {}", reason, feedback);
                }
                fail_task(board, log, id, reason)
            }
        }

        Outcome::Error {
            reason,
            retryable: false,
        } => fail_task(board, log, id, reason),

        // The candidate result stays pending review.
        Outcome::Error { reason, .. } if mode == DispatchMode::Review => {
            let errors = review_errors.entry(id).or_default();
            *errors += 1;
            let errors = *errors;
            let limit = board.limits().for_role(Role::Verifier);
            if errors >= limit {
                review_errors.remove(&id);
                fail_task(
                    board,
                    log,
                    id,
                    format!("verifier failed {} times: {}", errors, reason),
                )
            } else {
                tracing::warn!("Review of {} failed ({}/{}): {}", id, errors, limit, reason);
                log.error(id, &reason, true);
                Ok(())
            }
        }

        Outcome::Error { reason, .. } => retry_or_fail(board, log, id, reason),
    }
}

/// Call the agent, turning errors and timeouts into retryable outcomes.
async fn call_agent(agent: &dyn Agent, dispatch: &Dispatch, timeout: Duration) -> Outcome {
    match tokio::time::timeout(timeout, agent.process(dispatch)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => Outcome::error(format!("{:#}", e)),
        Err(_) => Outcome::error(format!("{} timed out after {:?}", dispatch.role(), timeout)),
    }
}

impl Orchestrator {
    pub(super) async fn flush(&self, log: RoundLog) {
        for event in log.events {
            self.events
                .append(event.task_id, event.kind, event.payload)
                .await;
        }
    }

    /// Claim everything dispatchable and announce the dispatches.
    pub(super) async fn plan_round(&self) -> BoardResult<Vec<Dispatch>> {
        let mut log = RoundLog::default();
        let planned = {
            let mut board = self.board.write().await;
            plan(&mut board, &mut log)
        };
        self.flush(log).await;
        let dispatches = planned?;

        for dispatch in &dispatches {
            tracing::debug!(
                "Dispatching {} to {} ({}, attempt {})",
                dispatch.task.id,
                dispatch.role(),
                dispatch.mode.as_str(),
                dispatch.task.attempt_count
            );
            self.events
                .append(
                    dispatch.task.id,
                    EventKind::Dispatch,
                    json!({
                        "role": dispatch.role(),
                        "mode": dispatch.mode,
                        "attempt": dispatch.task.attempt_count,
                    }),
                )
                .await;
        }
        Ok(dispatches)
    }

    /// Run all dispatches with bounded concurrency and apply each outcome
    /// as it arrives. Every dispatch is applied even if one fails to apply;
    /// the first such error is returned.
    pub(super) async fn execute_round(
        &self,
        dispatches: Vec<Dispatch>,
        review_errors: &mut ReviewErrors,
    ) -> BoardResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut in_flight = FuturesUnordered::new();

        for dispatch in dispatches {
            let agent = self.agents.for_role(dispatch.role());
            let timeout = self.config.timeout(dispatch.role());
            let semaphore = Arc::clone(&semaphore);
            in_flight.push(async move {
                let outcome = match semaphore.acquire().await {
                    Ok(_permit) => call_agent(&*agent, &dispatch, timeout).await,
                    Err(_) => Outcome::error("dispatch semaphore closed"),
                };
                (dispatch, outcome)
            });
        }

        let mut first_error = None;
        while let Some((dispatch, outcome)) = in_flight.next().await {
            if let Err(e) = self.apply_outcome(&dispatch, outcome, review_errors).await {
                tracing::error!("Failed to apply outcome for {}: {}", dispatch.task.id, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn apply_outcome(
        &self,
        dispatch: &Dispatch,
        outcome: Outcome,
        review_errors: &mut ReviewErrors,
    ) -> BoardResult<()> {
        let id = dispatch.task.id;
        tracing::info!(
            "{} ({} {}): {}",
            id,
            dispatch.role(),
            dispatch.mode.as_str(),
            outcome.summary()
        );

        let mut log = RoundLog::default();
        log.push(
            id,
            EventKind::Outcome,
            json!({
                "role": dispatch.role(),
                "mode": dispatch.mode,
                "outcome": outcome.kind(),
                "summary": outcome.summary(),
            }),
        );
        let applied = {
            let mut board = self.board.write().await;
            apply(&mut board, &mut log, dispatch, outcome, review_errors)
        };
        self.flush(log).await;
        applied
    }

    /// Fail everything blocked by a failure. Returns how many tasks failed.
    pub(super) async fn propagate_failures(&self) -> usize {
        let mut log = RoundLog::default();
        let failed = self.board.write().await.propagate_failures();
        for failure in &failed {
            tracing::warn!("{} failed: {}", failure.task, failure.reason);
            log.error(failure.task, &failure.reason, false);
            log.transition(failure.task, failure.from, TaskStatus::Failed);
        }
        self.flush(log).await;
        failed.len()
    }
}
