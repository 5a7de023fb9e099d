//! Task repository: the single authority over task documents.
//!
//! Every mutation validates its input before touching the store and is
//! applied as one atomic store write. Claim exclusivity is checked inside
//! that write, so two concurrent claims on the same task cannot both win.

use missionctl_proto::agent::AgentId;
use missionctl_proto::task::{
    EXECUTION_LOG_CAPACITY, ExecutionLogEntry, ExecutionStatus, NewTask, Task, TaskId, TaskPatch,
    TaskQuery, TaskStatus, append_bounded,
};
use missionctl_proto::validate::{self, ValidationError};
use tokio::sync::broadcast;

use crate::store::{Change, Collection, Document, StoreError, now_ms};

impl Document for Task {
    type Id = TaskId;
    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> &TaskId {
        &self.id
    }
}

/// Errors returned by task operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// A field limit was violated; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No task with the given id.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The task already has an assignee.
    #[error("task already claimed: {0}")]
    AlreadyClaimed(TaskId),
    /// The store rejected the write.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for TaskError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// A status write together with the status it replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Status before the write.
    pub from: TaskStatus,
    /// Task after the write.
    pub task: Task,
}

/// Validating operations over the `tasks` collection.
#[derive(Default)]
pub struct TaskRepository {
    tasks: Collection<Task>,
}

impl TaskRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Collection::new(),
        }
    }

    /// Subscribes to every applied task write.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Change<Task>> {
        self.tasks.subscribe()
    }

    /// Returns the tasks matching `query`, in insertion order.
    pub async fn list(&self, query: &TaskQuery) -> Vec<Task> {
        self.tasks.scan(|t| query.matches(t)).await
    }

    /// Returns the task with the given id, or `None`.
    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.get(id).await
    }

    /// Returns every task in `status`, across all boards.
    pub async fn get_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.tasks.scan(|t| t.status == status).await
    }

    /// Returns every task assigned to `agent_id`, across all boards.
    pub async fn assigned_to(&self, agent_id: &AgentId) -> Vec<Task> {
        self.tasks
            .scan(|t| t.assignee_id.as_ref() == Some(agent_id))
            .await
    }

    /// Returns the direct subtasks of `parent`.
    pub async fn get_sub_tasks(&self, parent: &TaskId) -> Vec<Task> {
        self.list(&TaskQuery::children(*parent)).await
    }

    /// Creates a task in the backlog of its board.
    ///
    /// The task's `order` is the number of tasks on the board at the moment
    /// of insertion.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Validation`] if a field limit is violated.
    pub async fn create(&self, new: NewTask) -> Result<Task, TaskError> {
        validate::validate_new_task(&new)?;
        let now = now_ms();
        let task = self
            .tasks
            .insert_with::<TaskError>(|docs| {
                let order = docs.count(|t| t.board_id == new.board_id) as u64;
                Ok(Task {
                    id: TaskId::new(),
                    board_id: new.board_id,
                    title: new.title,
                    description: new.description,
                    status: TaskStatus::Backlog,
                    priority: new.priority,
                    assignee_id: None,
                    parent_task_id: new.parent_task_id,
                    created_by: new.created_by,
                    tags: new.tags,
                    required_skills: new.required_skills,
                    due_date: new.due_date,
                    acceptance_criteria: new.acceptance_criteria,
                    order,
                    execution_log: Vec::new(),
                    execution_status: None,
                    created_at: now,
                    updated_at: now,
                    completed_at: None,
                    claimed_at: None,
                })
            })
            .await?;
        tracing::info!(
            task_id = %task.id,
            board_id = %task.board_id,
            order = task.order,
            "task created"
        );
        Ok(task)
    }

    /// Writes the provided fields of `patch` and refreshes `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Validation`] before any lookup if a provided
    /// field violates a limit, or [`TaskError::NotFound`].
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, TaskError> {
        validate::validate_patch(&patch)?;
        let now = now_ms();
        let task = self
            .patch(id, |task| {
                patch.apply_to(task);
                task.updated_at = now;
                Ok(())
            })
            .await?
            .1;
        tracing::debug!(task_id = %id, "task updated");
        Ok(task)
    }

    /// Deletes a task and returns it.
    ///
    /// Subtasks and comments are left alone; see
    /// [`detach_sub_tasks`](Self::detach_sub_tasks).
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] without touching the store if the
    /// task does not exist.
    pub async fn remove(&self, id: &TaskId) -> Result<Task, TaskError> {
        let task = self.tasks.delete(id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => TaskError::NotFound(*id),
            other => TaskError::Store(other),
        })?;
        tracing::info!(task_id = %id, "task removed");
        Ok(task)
    }

    /// Sets the status of a task. Moving to the current status is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`].
    pub async fn move_task(
        &self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<Transition, TaskError> {
        let now = now_ms();
        let (from, task) = self
            .patch(id, |task| {
                let from = task.status;
                task.status = status;
                task.updated_at = now;
                Ok(from)
            })
            .await?;
        tracing::debug!(task_id = %id, from = %from, to = %status, "task moved");
        Ok(Transition { from, task })
    }

    /// Assigns an unassigned task to `agent_id` and starts it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`], or [`TaskError::AlreadyClaimed`] if
    /// the task has an assignee; in that case nothing is written.
    pub async fn claim(&self, id: &TaskId, agent_id: &AgentId) -> Result<Task, TaskError> {
        let now = now_ms();
        let result = self
            .patch(id, |task| {
                if task.is_claimed() {
                    return Err(TaskError::AlreadyClaimed(*id));
                }
                task.assignee_id = Some(agent_id.clone());
                task.status = TaskStatus::InProgress;
                task.claimed_at = Some(now);
                task.execution_status = Some(ExecutionStatus::Pending);
                task.updated_at = now;
                Ok(())
            })
            .await;
        match result {
            Ok(((), task)) => {
                tracing::info!(task_id = %id, agent_id = %agent_id, "task claimed");
                Ok(task)
            }
            Err(e) => {
                tracing::warn!(task_id = %id, agent_id = %agent_id, error = %e, "claim rejected");
                Err(e)
            }
        }
    }

    /// Finishes a task: `done`/`completed` on success, `review`/`failed`
    /// otherwise. The prior state is not checked.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`].
    pub async fn complete(&self, id: &TaskId, success: bool) -> Result<Transition, TaskError> {
        let now = now_ms();
        let (from, task) = self
            .patch(id, |task| {
                let from = task.status;
                if success {
                    task.status = TaskStatus::Done;
                    task.execution_status = Some(ExecutionStatus::Completed);
                } else {
                    task.status = TaskStatus::Review;
                    task.execution_status = Some(ExecutionStatus::Failed);
                }
                task.completed_at = Some(now);
                task.updated_at = now;
                Ok(from)
            })
            .await?;
        tracing::info!(task_id = %id, success, "task completed");
        Ok(Transition { from, task })
    }

    /// Appends a line to the execution log, keeping only the most recent
    /// [`EXECUTION_LOG_CAPACITY`] lines. Returns the resulting log length.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Validation`] for oversized content (checked
    /// first), or [`TaskError::NotFound`].
    pub async fn append_execution_log(
        &self,
        id: &TaskId,
        entry: ExecutionLogEntry,
    ) -> Result<usize, TaskError> {
        validate::validate_log_entry(&entry)?;
        let (len, _) = self
            .patch(id, |task| {
                append_bounded(&mut task.execution_log, entry, EXECUTION_LOG_CAPACITY);
                Ok(task.execution_log.len())
            })
            .await?;
        tracing::trace!(task_id = %id, len, "execution log appended");
        Ok(len)
    }

    /// Sets the execution status of a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`].
    pub async fn set_execution_status(
        &self,
        id: &TaskId,
        status: ExecutionStatus,
    ) -> Result<Task, TaskError> {
        let now = now_ms();
        let ((), task) = self
            .patch(id, |task| {
                task.execution_status = Some(status);
                task.updated_at = now;
                Ok(())
            })
            .await?;
        tracing::debug!(task_id = %id, status = %status, "execution status set");
        Ok(task)
    }

    /// Clears `parent_task_id` on every direct subtask of `parent`,
    /// returning the detached subtasks.
    pub async fn detach_sub_tasks(&self, parent: &TaskId) -> Vec<Task> {
        let now = now_ms();
        let detached = self
            .tasks
            .update_where(
                |t| t.parent_task_id.as_ref() == Some(parent),
                |t| {
                    t.parent_task_id = None;
                    t.updated_at = now;
                },
            )
            .await;
        if !detached.is_empty() {
            tracing::info!(parent_id = %parent, count = detached.len(), "subtasks detached");
        }
        detached
    }

    /// Runs `f` as one atomic read-modify-write on the task, mapping a
    /// missing document to [`TaskError::NotFound`].
    async fn patch<R>(
        &self,
        id: &TaskId,
        f: impl FnOnce(&mut Task) -> Result<R, TaskError>,
    ) -> Result<(R, Task), TaskError> {
        self.tasks.update(id, f).await.map_err(|e| match e {
            TaskError::Store(StoreError::NotFound { .. }) => TaskError::NotFound(*id),
            other => other,
        })
    }
}
