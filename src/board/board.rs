//! The task status board.

use chrono::Utc;
use std::collections::{HashMap, HashSet};

use super::error::{BoardError, BoardResult};
use crate::agents::{DependencyResult, Role};
use crate::config::RetryLimits;
use crate::task::{DependencyRef, SubtaskSpec, Task, TaskContext, TaskId, TaskStatus};

/// Read-only copy of the whole graph.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSnapshot {
    /// Tasks in creation order
    pub tasks: Vec<Task>,
}

impl BoardSnapshot {
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn status_of(&self, id: TaskId) -> Option<TaskStatus> {
        self.get(id).map(|t| t.status)
    }
}

/// A task failed because something it needed failed first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagatedFailure {
    pub task: TaskId,
    pub from: TaskStatus,
    pub reason: String,
}

/// Single source of truth for the task graph.
///
/// Tasks live in an arena indexed by id; relations are id lists. Tasks are
/// never removed, so a finished task stays as a historical record.
#[derive(Debug)]
pub struct TaskBoard {
    tasks: Vec<Task>,
    in_flight: HashSet<TaskId>,
    limits: RetryLimits,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self::new(RetryLimits::default())
    }
}

impl TaskBoard {
    pub fn new(limits: RetryLimits) -> Self {
        Self {
            tasks: Vec::new(),
            in_flight: HashSet::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &RetryLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get_task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0 as usize)
    }

    fn task(&self, id: TaskId) -> BoardResult<&Task> {
        self.get_task(id).ok_or(BoardError::UnknownTask(id))
    }

    fn task_mut(&mut self, id: TaskId) -> BoardResult<&mut Task> {
        self.tasks
            .get_mut(id.0 as usize)
            .ok_or(BoardError::UnknownTask(id))
    }

    fn next_id(&self) -> TaskId {
        TaskId(self.tasks.len() as u64)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────

    /// Create a task in `waiting`.
    ///
    /// Top-level tasks go to the delegator, tasks with a parent to the
    /// execution worker. Unknown dependency ids fail with `InvalidDependency`.
    pub fn create_task(
        &mut self,
        description: impl Into<String>,
        dependencies: &[TaskId],
        parent: Option<TaskId>,
    ) -> BoardResult<TaskId> {
        let role = if parent.is_some() {
            Role::Worker
        } else {
            Role::Delegator
        };
        self.create_task_with_role(description, dependencies, parent, role)
    }

    /// Create a task with an explicit role.
    ///
    /// A parent must be `waiting` (children wired up front) or `in_progress`
    /// with no dispatch in flight; anything else fails with
    /// `InvalidParentState` and leaves the board untouched.
    pub fn create_task_with_role(
        &mut self,
        description: impl Into<String>,
        dependencies: &[TaskId],
        parent: Option<TaskId>,
        role: Role,
    ) -> BoardResult<TaskId> {
        for dep in dependencies {
            if self.get_task(*dep).is_none() {
                return Err(BoardError::invalid_dependency(format!(
                    "{} does not exist",
                    dep
                )));
            }
        }
        if let Some(parent) = parent {
            let parent_task = self.task(parent)?;
            let accepts_children = match parent_task.status {
                TaskStatus::Waiting => true,
                TaskStatus::InProgress => !self.is_in_flight(parent),
                _ => false,
            };
            if !accepts_children {
                return Err(BoardError::invalid_parent(
                    parent,
                    parent_task.status,
                    "children can only be added to a waiting or idle in-progress task",
                ));
            }
        }

        let id = self.next_id();
        let mut task = Task::new(id, description.into(), role, self.limits.for_role(role));
        task.dependencies = dedup(dependencies.iter().copied());
        task.parent = parent;
        self.tasks.push(task);

        if let Some(parent) = parent {
            self.task_mut(parent)?.children.push(id);
        }

        Ok(id)
    }

    /// Wire `task` to wait for `depends_on`.
    ///
    /// Only a `waiting` task can gain dependencies. Fails with
    /// `InvalidDependency` if `depends_on` is unknown, is `task` itself, or
    /// already (transitively) depends on `task`. The board is untouched on
    /// failure.
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) -> BoardResult<()> {
        let status = self.task(task)?.status;
        if self.get_task(depends_on).is_none() {
            return Err(BoardError::invalid_dependency(format!(
                "{} does not exist",
                depends_on
            )));
        }
        if task == depends_on {
            return Err(BoardError::invalid_dependency(format!(
                "{} cannot depend on itself",
                task
            )));
        }
        if status != TaskStatus::Waiting {
            return Err(BoardError::invalid_dependency(format!(
                "{} is {}; only waiting tasks can gain dependencies",
                task, status
            )));
        }
        if self.depends_on(depends_on, task) {
            return Err(BoardError::invalid_dependency(format!(
                "{} -> {} would create a cycle",
                task, depends_on
            )));
        }

        let record = self.task_mut(task)?;
        if !record.dependencies.contains(&depends_on) {
            record.dependencies.push(depends_on);
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Whether `from` reaches `target` by following dependency edges.
    pub fn depends_on(&self, from: TaskId, target: TaskId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(task) = self.get_task(current) else {
                continue;
            };
            for dep in &task.dependencies {
                if *dep == target {
                    return true;
                }
                stack.push(*dep);
            }
        }
        false
    }

    /// Decompose `parent` into subtasks.
    ///
    /// The parent must be `in_progress` and not already decomposed. All
    /// specs are validated before anything is created, so a bad spec leaves
    /// the board unchanged. Sibling references must point to an earlier
    /// subtask; a subtask may not depend on its parent or any ancestor.
    pub fn add_children(
        &mut self,
        parent: TaskId,
        subtasks: Vec<SubtaskSpec>,
    ) -> BoardResult<Vec<TaskId>> {
        let parent_task = self.task(parent)?;
        if parent_task.status != TaskStatus::InProgress {
            return Err(BoardError::invalid_parent(
                parent,
                parent_task.status,
                "only an in-progress task can be decomposed",
            ));
        }
        if parent_task.is_decomposed() {
            return Err(BoardError::invalid_parent(
                parent,
                parent_task.status,
                "task has already been decomposed",
            ));
        }

        let ancestors = self.ancestors(parent);
        let first_id = self.next_id().0;
        let mut resolved = Vec::with_capacity(subtasks.len());
        for (index, spec) in subtasks.iter().enumerate() {
            let mut deps = Vec::with_capacity(spec.dependencies.len());
            for dep in &spec.dependencies {
                let id = match *dep {
                    DependencyRef::Sibling(sibling) if sibling < index => {
                        TaskId(first_id + sibling as u64)
                    }
                    DependencyRef::Sibling(sibling) => {
                        return Err(BoardError::invalid_dependency(format!(
                            "subtask {} may only depend on earlier siblings, not {}",
                            index, sibling
                        )));
                    }
                    DependencyRef::Task(id) => {
                        if self.get_task(id).is_none() {
                            return Err(BoardError::invalid_dependency(format!(
                                "{} does not exist",
                                id
                            )));
                        }
                        if ancestors.contains(&id) {
                            return Err(BoardError::invalid_dependency(format!(
                                "subtask {} cannot depend on its ancestor {}",
                                index, id
                            )));
                        }
                        id
                    }
                };
                deps.push(id);
            }
            resolved.push(dedup(deps));
        }

        let mut ids = Vec::with_capacity(subtasks.len());
        for (spec, deps) in subtasks.into_iter().zip(resolved) {
            let id = self.next_id();
            let mut task = Task::new(id, spec.description, spec.role, self.limits.for_role(spec.role));
            if let Some(name) = spec.name {
                task.name = name;
            }
            task.requirements = spec.requirements;
            task.dependencies = deps;
            task.parent = Some(parent);
            self.tasks.push(task);
            ids.push(id);
        }

        let parent_task = self.task_mut(parent)?;
        parent_task.children.extend(ids.iter().copied());
        parent_task.updated_at = Utc::now();
        Ok(ids)
    }

    /// `id` and every task above it.
    fn ancestors(&self, id: TaskId) -> HashSet<TaskId> {
        let mut out = HashSet::new();
        let mut current = Some(id);
        while let Some(c) = current {
            if !out.insert(c) {
                break;
            }
            current = self.get_task(c).and_then(|t| t.parent);
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────
    // State machine
    // ─────────────────────────────────────────────────────────────────────

    /// Apply a status change along a legal edge.
    ///
    /// Entering `in_progress` consumes an attempt and fails with
    /// `RetriesExhausted` when none are left. `result` is stored when
    /// entering `pending_review`. On error nothing changes.
    pub fn transition(
        &mut self,
        id: TaskId,
        to: TaskStatus,
        result: Option<String>,
    ) -> BoardResult<()> {
        let task = self.task_mut(id)?;
        let from = task.status;
        if !from.can_transition_to(to) {
            return Err(BoardError::IllegalTransition { task: id, from, to });
        }
        if to == TaskStatus::InProgress {
            if !task.has_attempts_left() {
                return Err(BoardError::RetriesExhausted {
                    task: id,
                    attempts: task.attempt_count,
                });
            }
            task.attempt_count += 1;
        }
        if to == TaskStatus::PendingReview {
            if let Some(result) = result {
                task.result = Some(result);
            }
        }
        task.status = to;
        task.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_terminal(&self, id: TaskId) -> BoardResult<bool> {
        Ok(self.task(id)?.is_terminal())
    }

    pub fn set_feedback(&mut self, id: TaskId, feedback: Option<String>) -> BoardResult<()> {
        let task = self.task_mut(id)?;
        task.feedback = feedback;
        task.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_context(
        &mut self,
        id: TaskId,
        action: impl Into<String>,
        observation: impl Into<String>,
    ) -> BoardResult<()> {
        let task = self.task_mut(id)?;
        let now = Utc::now();
        task.context = Some(TaskContext {
            last_action: action.into(),
            last_observation: observation.into(),
            timestamp: now,
        });
        task.updated_at = now;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // In-flight bookkeeping
    // ─────────────────────────────────────────────────────────────────────

    /// Mark `id` as having a dispatch in flight.
    pub fn claim(&mut self, id: TaskId) -> BoardResult<()> {
        self.task(id)?;
        if !self.in_flight.insert(id) {
            return Err(BoardError::AlreadyDispatched(id));
        }
        Ok(())
    }

    /// Returns false if `id` was not in flight.
    pub fn release(&mut self, id: TaskId) -> bool {
        self.in_flight.remove(&id)
    }

    pub fn is_in_flight(&self, id: TaskId) -> bool {
        self.in_flight.contains(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Waiting tasks whose dependencies are all completed, in creation order.
    pub fn get_ready_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Waiting && self.dependencies_completed(t))
            .map(|t| t.id)
            .collect()
    }

    fn dependencies_completed(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.get_task(*dep)
                .map(|d| d.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// Decomposed `in_progress` tasks whose children are all completed and
    /// that have nothing in flight, in creation order.
    pub fn awaiting_aggregation(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::InProgress
                    && t.is_decomposed()
                    && !self.is_in_flight(t.id)
                    && self.all_children_completed(t.id)
            })
            .map(|t| t.id)
            .collect()
    }

    pub fn all_children_completed(&self, id: TaskId) -> bool {
        self.get_task(id)
            .map(|t| {
                t.children.iter().all(|c| {
                    self.get_task(*c)
                        .map(|c| c.status == TaskStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.id)
            .collect()
    }

    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let mut counts: HashMap<TaskStatus, usize> =
            TaskStatus::all().iter().map(|s| (*s, 0)).collect();
        for task in &self.tasks {
            *counts.entry(task.status).or_default() += 1;
        }
        counts
    }

    /// Tasks that list `id` as a direct dependency.
    pub fn dependents(&self, id: TaskId) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.dependencies.contains(&id))
            .map(|t| t.id)
            .collect()
    }

    /// Waiting tasks that cannot start until `id` completes, directly or
    /// through other waiting tasks. Sorted by id.
    pub fn blocked_by(&self, id: TaskId) -> Vec<TaskId> {
        let mut blocked = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents(current) {
                let waiting = self
                    .get_task(dependent)
                    .map(|t| t.status == TaskStatus::Waiting)
                    .unwrap_or(false);
                if waiting && blocked.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }
        let mut out: Vec<TaskId> = blocked.into_iter().collect();
        out.sort();
        out
    }

    /// Results of the completed dependencies of `id`.
    pub fn dependency_results(&self, id: TaskId) -> Vec<DependencyResult> {
        let Some(task) = self.get_task(id) else {
            return Vec::new();
        };
        task.dependencies
            .iter()
            .filter_map(|dep| self.get_task(*dep))
            .filter(|dep| dep.status == TaskStatus::Completed)
            .filter_map(|dep| {
                dep.result.as_ref().map(|result| DependencyResult {
                    task_id: dep.id,
                    name: dep.name.clone(),
                    result: result.clone(),
                })
            })
            .collect()
    }

    /// Copies of the children of `id`, in decomposition order.
    pub fn children(&self, id: TaskId) -> Vec<Task> {
        self.get_task(id)
            .map(|t| {
                t.children
                    .iter()
                    .filter_map(|c| self.get_task(*c).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Failure propagation
    // ─────────────────────────────────────────────────────────────────────

    /// Fail tasks that can no longer make progress because something they
    /// need has failed:
    /// - waiting tasks with a failed dependency
    /// - unfinished tasks with a failed parent, so a failed task's whole
    ///   subtree fails
    /// - decomposed in-progress tasks with a failed child
    ///
    /// Tasks with a dispatch in flight are left alone until it is applied.
    ///
    /// Repeats until nothing changes. Returns the failed tasks in the order
    /// they were failed. Every change follows a legal edge.
    pub fn propagate_failures(&mut self) -> Vec<PropagatedFailure> {
        let mut failed = Vec::new();
        loop {
            let doomed: Vec<PropagatedFailure> = self
                .tasks
                .iter()
                .filter_map(|t| {
                    self.failure_cause(t).map(|reason| PropagatedFailure {
                        task: t.id,
                        from: t.status,
                        reason,
                    })
                })
                .collect();
            if doomed.is_empty() {
                break;
            }
            for failure in doomed {
                if let Ok(task) = self.task_mut(failure.task) {
                    debug_assert!(task.status.can_transition_to(TaskStatus::Failed));
                    task.status = TaskStatus::Failed;
                    task.updated_at = Utc::now();
                }
                failed.push(failure);
            }
        }
        failed
    }

    fn failure_cause(&self, task: &Task) -> Option<String> {
        if task.is_terminal() || self.is_in_flight(task.id) {
            return None;
        }
        let is_failed =
            |id: &TaskId| self.get_task(*id).map(|t| t.status == TaskStatus::Failed).unwrap_or(false);

        if task.status == TaskStatus::Waiting {
            if let Some(dep) = task.dependencies.iter().find(|d| is_failed(*d)) {
                return Some(format!("dependency {} failed", dep));
            }
        }
        if let Some(parent) = task.parent.filter(|p| is_failed(p)) {
            return Some(format!("parent {} failed", parent));
        }
        if task.status == TaskStatus::InProgress && task.is_decomposed() {
            return task
                .children
                .iter()
                .find(|c| is_failed(*c))
                .map(|c| format!("subtask {} failed", c));
        }
        None
    }

    /// Read-only copy of the full graph.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            tasks: self.tasks.clone(),
        }
    }
}

fn dedup(ids: impl IntoIterator<Item = TaskId>) -> Vec<TaskId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> TaskBoard {
        TaskBoard::new(RetryLimits {
            delegator: 3,
            verifier: 3,
            worker: 2,
        })
    }

    fn start(board: &mut TaskBoard, id: TaskId) {
        board.transition(id, TaskStatus::InProgress, None).unwrap();
    }

    #[test]
    fn test_create_assigns_roles_and_limits() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        let child = board.create_task("leaf", &[], Some(root)).unwrap();

        let root_task = board.get_task(root).unwrap();
        assert_eq!(root_task.assigned_role, Role::Delegator);
        assert_eq!(root_task.max_attempts, 3);
        assert_eq!(root_task.children, vec![child]);

        let child_task = board.get_task(child).unwrap();
        assert_eq!(child_task.assigned_role, Role::Worker);
        assert_eq!(child_task.max_attempts, 2);
        assert_eq!(child_task.parent, Some(root));
    }

    #[test]
    fn test_create_with_unknown_dependency_fails() {
        let mut board = board();
        let err = board.create_task("x", &[TaskId(9)], None).unwrap_err();
        assert!(matches!(err, BoardError::InvalidDependency(_)));
        assert!(board.is_empty());
    }

    #[test]
    fn test_ready_tasks_respect_dependencies() {
        let mut board = board();
        let a = board.create_task("a", &[], None).unwrap();
        let b = board.create_task("b", &[a], None).unwrap();
        let c = board.create_task("c", &[], None).unwrap();

        assert_eq!(board.get_ready_tasks(), vec![a, c]);

        start(&mut board, a);
        board
            .transition(a, TaskStatus::PendingReview, Some("done".into()))
            .unwrap();
        assert_eq!(board.get_ready_tasks(), vec![c]);

        board.transition(a, TaskStatus::Completed, None).unwrap();
        assert_eq!(board.get_ready_tasks(), vec![b, c]);
    }

    #[test]
    fn test_illegal_transition_leaves_state_unchanged() {
        let mut board = board();
        let a = board.create_task("a", &[], None).unwrap();
        let before = board.snapshot();

        let err = board.transition(a, TaskStatus::Completed, None).unwrap_err();
        assert_eq!(
            err,
            BoardError::IllegalTransition {
                task: a,
                from: TaskStatus::Waiting,
                to: TaskStatus::Completed
            }
        );
        assert_eq!(board.snapshot(), before);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        start(&mut board, root);
        let leaf = board
            .add_children(root, vec![SubtaskSpec::new("leaf")])
            .unwrap()[0];

        for _ in 0..2 {
            start(&mut board, leaf);
            board
                .transition(leaf, TaskStatus::PendingReview, Some("r".into()))
                .unwrap();
            board.transition(leaf, TaskStatus::ReProgress, None).unwrap();
        }
        let err = board.transition(leaf, TaskStatus::InProgress, None).unwrap_err();
        assert_eq!(err, BoardError::RetriesExhausted { task: leaf, attempts: 2 });
        assert_eq!(board.get_task(leaf).unwrap().attempt_count, 2);
        assert_eq!(board.get_task(leaf).unwrap().status, TaskStatus::ReProgress);
    }

    #[test]
    fn test_result_set_on_pending_review() {
        let mut board = board();
        let a = board.create_task("a", &[], None).unwrap();
        start(&mut board, a);
        board
            .transition(a, TaskStatus::PendingReview, Some("patch".into()))
            .unwrap();
        assert_eq!(board.get_task(a).unwrap().result.as_deref(), Some("patch"));
    }

    #[test]
    fn test_mutual_dependency_rejected() {
        let mut board = board();
        let a = board.create_task("a", &[], None).unwrap();
        let b = board.create_task("b", &[], None).unwrap();

        board.add_dependency(a, b).unwrap();
        let before = board.snapshot();
        let err = board.add_dependency(b, a).unwrap_err();
        assert!(matches!(err, BoardError::InvalidDependency(_)));
        assert_eq!(board.snapshot(), before);
    }

    #[test]
    fn test_transitive_cycle_and_self_dependency_rejected() {
        let mut board = board();
        let a = board.create_task("a", &[], None).unwrap();
        let b = board.create_task("b", &[a], None).unwrap();
        let c = board.create_task("c", &[b], None).unwrap();

        assert!(board.depends_on(c, a));
        assert!(matches!(
            board.add_dependency(a, c),
            Err(BoardError::InvalidDependency(_))
        ));
        assert!(matches!(
            board.add_dependency(a, a),
            Err(BoardError::InvalidDependency(_))
        ));
        assert!(matches!(
            board.add_dependency(a, TaskId(42)),
            Err(BoardError::InvalidDependency(_))
        ));
        assert_eq!(board.add_dependency(TaskId(42), a), Err(BoardError::UnknownTask(TaskId(42))));
    }

    #[test]
    fn test_add_children_requires_in_progress_parent() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        let err = board
            .add_children(root, vec![SubtaskSpec::new("a")])
            .unwrap_err();
        assert!(matches!(
            err,
            BoardError::InvalidParentState {
                status: TaskStatus::Waiting,
                ..
            }
        ));

        start(&mut board, root);
        let ids = board
            .add_children(
                root,
                vec![SubtaskSpec::new("a"), SubtaskSpec::new("b").after_sibling(0)],
            )
            .unwrap();
        assert_eq!(ids, vec![TaskId(1), TaskId(2)]);
        assert_eq!(board.get_task(ids[1]).unwrap().dependencies, vec![ids[0]]);
        assert!(ids.iter().all(|id| *id > root));

        let err = board
            .add_children(root, vec![SubtaskSpec::new("again")])
            .unwrap_err();
        assert!(matches!(err, BoardError::InvalidParentState { .. }));
    }

    #[test]
    fn test_add_children_is_atomic() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        start(&mut board, root);
        let before = board.snapshot();

        let forward = board.add_children(
            root,
            vec![SubtaskSpec::new("a").after_sibling(1), SubtaskSpec::new("b")],
        );
        assert!(matches!(forward, Err(BoardError::InvalidDependency(_))));

        let on_parent = board.add_children(
            root,
            vec![SubtaskSpec::new("a"), SubtaskSpec::new("b").after_task(root)],
        );
        assert!(matches!(on_parent, Err(BoardError::InvalidDependency(_))));
        assert_eq!(board.snapshot(), before);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let mut board = board();
        let a = board.create_task("a", &[], None).unwrap();
        board.claim(a).unwrap();
        assert_eq!(board.claim(a), Err(BoardError::AlreadyDispatched(a)));
        assert!(board.release(a));
        assert!(!board.release(a));
        board.claim(a).unwrap();
    }

    #[test]
    fn test_propagate_failures_through_dependencies_and_parents() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        start(&mut board, root);
        let ids = board
            .add_children(
                root,
                vec![
                    SubtaskSpec::new("a"),
                    SubtaskSpec::new("b").after_sibling(0),
                    SubtaskSpec::new("c"),
                ],
            )
            .unwrap();
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        start(&mut board, a);
        board.transition(a, TaskStatus::Failed, None).unwrap();
        assert_eq!(board.blocked_by(a), vec![b]);

        let failed = board.propagate_failures();
        let ids: Vec<TaskId> = failed.iter().map(|f| f.task).collect();
        assert_eq!(ids, vec![root, b, c]);
        assert_eq!(failed[0].from, TaskStatus::InProgress);
        assert_eq!(failed[1].reason, format!("dependency {} failed", a));
        assert_eq!(board.get_task(root).unwrap().status, TaskStatus::Failed);
        assert!(board.propagate_failures().is_empty());
    }

    #[test]
    fn test_propagation_waits_for_in_flight_parent() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        start(&mut board, root);
        let a = board.add_children(root, vec![SubtaskSpec::new("a")]).unwrap()[0];
        start(&mut board, a);
        board.transition(a, TaskStatus::Failed, None).unwrap();

        board.claim(root).unwrap();
        assert!(board.propagate_failures().is_empty());
        board.release(root);
        assert_eq!(board.propagate_failures().len(), 1);
    }

    #[test]
    fn test_awaiting_aggregation_and_dependency_results() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        start(&mut board, root);
        let ids = board
            .add_children(
                root,
                vec![SubtaskSpec::new("a").named("first"), SubtaskSpec::new("b").after_sibling(0)],
            )
            .unwrap();
        assert!(board.awaiting_aggregation().is_empty());

        start(&mut board, ids[0]);
        board
            .transition(ids[0], TaskStatus::PendingReview, Some("A".into()))
            .unwrap();
        board.transition(ids[0], TaskStatus::Completed, None).unwrap();

        let deps = board.dependency_results(ids[1]);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "first");
        assert_eq!(deps[0].result, "A");

        start(&mut board, ids[1]);
        board
            .transition(ids[1], TaskStatus::PendingReview, Some("B".into()))
            .unwrap();
        board.transition(ids[1], TaskStatus::Completed, None).unwrap();
        assert_eq!(board.awaiting_aggregation(), vec![root]);
        assert_eq!(board.children(root).len(), 2);
    }

    #[test]
    fn test_snapshot_is_stable() {
        let mut board = board();
        let a = board.create_task("a", &[], None).unwrap();
        board.create_task("b", &[a], None).unwrap();
        assert_eq!(board.snapshot(), board.snapshot());

        let counts = board.status_counts();
        assert_eq!(counts[&TaskStatus::Waiting], 2);
        assert_eq!(counts[&TaskStatus::Completed], 0);
    }

    #[test]
    fn test_annotations_do_not_touch_status() {
        let mut board = board();
        let a = board.create_task("a", &[], None).unwrap();
        let b = board.create_task("b", &[a], None).unwrap();
        assert_eq!(board.dependents(a), vec![b]);
        assert!(board.dependents(b).is_empty());

        board.set_feedback(a, Some("add tests".into())).unwrap();
        board.record_context(a, "worker execute", "result: ok").unwrap();
        let task = board.get_task(a).unwrap();
        assert_eq!(task.status, TaskStatus::Waiting);
        assert_eq!(task.feedback.as_deref(), Some("add tests"));
        assert_eq!(task.context.as_ref().unwrap().last_action, "worker execute");

        assert_eq!(
            board.set_feedback(TaskId(9), None),
            Err(BoardError::UnknownTask(TaskId(9)))
        );
    }

    #[test]
    fn test_create_child_rejects_closed_parent() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        start(&mut board, root);
        board
            .transition(root, TaskStatus::PendingReview, Some("done".into()))
            .unwrap();

        let before = board.snapshot();
        let err = board.create_task("late child", &[], Some(root)).unwrap_err();
        assert!(matches!(
            err,
            BoardError::InvalidParentState {
                status: TaskStatus::PendingReview,
                ..
            }
        ));
        assert_eq!(board.snapshot(), before);

        board.transition(root, TaskStatus::Completed, None).unwrap();
        let before = board.snapshot();
        assert!(board.create_task("late child", &[], Some(root)).is_err());
        assert_eq!(board.snapshot(), before);
        assert!(board.get_ready_tasks().is_empty());
    }

    #[test]
    fn test_create_child_rejects_in_flight_parent() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        start(&mut board, root);
        board.claim(root).unwrap();
        assert!(matches!(
            board.create_task("child", &[], Some(root)),
            Err(BoardError::InvalidParentState { .. })
        ));
        assert!(board.get_task(root).unwrap().children.is_empty());

        // Idle again: children are accepted.
        board.release(root);
        let child = board.create_task("child", &[], Some(root)).unwrap();
        assert_eq!(board.get_task(root).unwrap().children, vec![child]);
    }

    #[test]
    fn test_failed_parent_fails_whole_subtree() {
        let mut board = board();
        let root = board.create_task("root", &[], None).unwrap();
        start(&mut board, root);
        let ids = board
            .add_children(
                root,
                vec![
                    SubtaskSpec::new("retrying"),
                    SubtaskSpec::new("reviewing"),
                    SubtaskSpec::new("running"),
                    SubtaskSpec::new("done"),
                ],
            )
            .unwrap();
        let (retrying, reviewing, running, done) = (ids[0], ids[1], ids[2], ids[3]);

        start(&mut board, retrying);
        board.transition(retrying, TaskStatus::ReProgress, None).unwrap();
        start(&mut board, reviewing);
        board
            .transition(reviewing, TaskStatus::PendingReview, Some("r".into()))
            .unwrap();
        start(&mut board, running);
        board.claim(running).unwrap();
        start(&mut board, done);
        board
            .transition(done, TaskStatus::PendingReview, Some("d".into()))
            .unwrap();
        board.transition(done, TaskStatus::Completed, None).unwrap();

        // The parent fails on its own, e.g. a fatal aggregation error.
        board.transition(root, TaskStatus::Failed, None).unwrap();

        let failed = board.propagate_failures();
        let ids: Vec<TaskId> = failed.iter().map(|f| f.task).collect();
        assert_eq!(ids, vec![retrying, reviewing]);
        assert_eq!(failed[0].from, TaskStatus::ReProgress);
        assert_eq!(failed[0].reason, format!("parent {} failed", root));

        // In flight: failed once its dispatch is released.
        assert_eq!(board.get_task(running).unwrap().status, TaskStatus::InProgress);
        board.release(running);
        let failed = board.propagate_failures();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task, running);

        assert_eq!(board.get_task(done).unwrap().status, TaskStatus::Completed);
    }
}
