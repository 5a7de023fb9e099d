//! Task records for mission control boards.
//!
//! Defines the [`Task`] document, its enumerated fields, the creation and
//! patch payloads accepted by the task repository, and the bounded
//! execution-log append shared by every writer of the log.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentId;

/// Maximum allowed task title length in UTF-16 code units.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Maximum allowed description length in UTF-16 code units.
pub const MAX_DESCRIPTION_LENGTH: usize = 5000;

/// Maximum allowed acceptance criteria length in UTF-16 code units.
pub const MAX_ACCEPTANCE_CRITERIA_LENGTH: usize = 5000;

/// Maximum allowed content length of a single execution log entry.
pub const MAX_LOG_CONTENT_LENGTH: usize = 10_000;

/// Maximum number of items in `tags` and in `required_skills`.
pub const MAX_LIST_ITEMS: usize = 20;

/// Number of execution log entries retained per task.
pub const EXECUTION_LOG_CAPACITY: usize = 1000;

/// Returned when a string does not name a variant of one of the task enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Unique identifier for a task, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of the board owning a task.
///
/// Boards are created outside this system, so the id is an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoardId(String);

impl BoardId {
    /// Creates a board identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this board id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BoardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Board column a task sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Captured but not yet planned.
    Backlog,
    /// Planned and ready to be picked up.
    Todo,
    /// Claimed and being worked on.
    InProgress,
    /// Waiting for review, also where failed executions land.
    Review,
    /// Finished.
    Done,
}

impl TaskStatus {
    /// Every status, in board column order.
    pub const ALL: [Self; 5] = [
        Self::Backlog,
        Self::Todo,
        Self::InProgress,
        Self::Review,
        Self::Done,
    ];

    /// Returns the wire/storage name of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("task status", s))
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Can wait.
    Low,
    /// Default priority.
    Medium,
    /// Should be picked up soon.
    High,
    /// Drop everything.
    Urgent,
}

impl Priority {
    /// Returns the wire/storage name of this priority.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(UnknownVariant::new("priority", other)),
        }
    }
}

/// Execution state reported by the agent working on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Claimed, execution not started.
    Pending,
    /// Execution in progress.
    Running,
    /// Waiting for a human to approve the next step.
    PendingApproval,
    /// Execution finished successfully.
    Completed,
    /// Execution failed.
    Failed,
}

impl ExecutionStatus {
    /// Returns the wire/storage name of this execution status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::PendingApproval => "pending_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "pending_approval" => Ok(Self::PendingApproval),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant::new("execution status", other)),
        }
    }
}

/// Kind of an execution log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogEntryKind {
    /// A command the agent ran.
    Command,
    /// Output captured from a command.
    Output,
    /// An error reported during execution.
    Error,
    /// Free-form progress information.
    Info,
}

impl LogEntryKind {
    /// Returns the wire/storage name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Output => "output",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

impl std::fmt::Display for LogEntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogEntryKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "command" => Ok(Self::Command),
            "output" => Ok(Self::Output),
            "error" => Ok(Self::Error),
            "info" => Ok(Self::Info),
            other => Err(UnknownVariant::new("log entry kind", other)),
        }
    }
}

/// One line of a task's execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Milliseconds since epoch, as reported by the writer.
    pub timestamp: u64,
    /// What kind of line this is.
    pub kind: LogEntryKind,
    /// Line content (at most [`MAX_LOG_CONTENT_LENGTH`] characters).
    pub content: String,
}

impl ExecutionLogEntry {
    /// Creates a log entry.
    pub fn new(timestamp: u64, kind: LogEntryKind, content: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind,
            content: content.into(),
        }
    }
}

/// Who created a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatedBy {
    /// Created by a registered agent.
    Agent(AgentId),
    /// Created from the dashboard by a person.
    Human,
}

/// A task document as stored and served.
///
/// Optional fields are `None` when they were never supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier (UUID v7, time-ordered).
    pub id: TaskId,
    /// Board this task belongs to.
    pub board_id: BoardId,
    /// Task title (1..=200 characters).
    pub title: String,
    /// Optional long-form description.
    pub description: Option<String>,
    /// Current board column.
    pub status: TaskStatus,
    /// Task priority.
    pub priority: Priority,
    /// Agent holding the task, if claimed or assigned.
    pub assignee_id: Option<AgentId>,
    /// Parent task for subtasks.
    pub parent_task_id: Option<TaskId>,
    /// Creator, when known.
    pub created_by: Option<CreatedBy>,
    /// Free-form labels.
    pub tags: Option<Vec<String>>,
    /// Skills an agent needs to pick this task up.
    pub required_skills: Option<Vec<String>>,
    /// Due date in milliseconds since epoch.
    pub due_date: Option<u64>,
    /// What "done" means for this task.
    pub acceptance_criteria: Option<String>,
    /// Position on the board at creation time. Never renumbered.
    pub order: u64,
    /// Most recent execution log lines, oldest first.
    pub execution_log: Vec<ExecutionLogEntry>,
    /// Execution state reported by the assignee.
    pub execution_status: Option<ExecutionStatus>,
    /// Creation time (milliseconds since epoch).
    pub created_at: u64,
    /// Last field change (milliseconds since epoch).
    pub updated_at: u64,
    /// When `complete` was last called.
    pub completed_at: Option<u64>,
    /// When the task was claimed.
    pub claimed_at: Option<u64>,
}

impl Task {
    /// Returns `true` if an agent already holds this task.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        self.assignee_id.is_some()
    }
}

/// Payload for creating a task.
///
/// Use [`NewTask::new`] for the required fields and struct update syntax
/// for the optional ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Owning board.
    pub board_id: BoardId,
    /// Task title.
    pub title: String,
    /// Task priority.
    pub priority: Priority,
    /// Optional description.
    pub description: Option<String>,
    /// Optional creator.
    pub created_by: Option<CreatedBy>,
    /// Optional parent task.
    pub parent_task_id: Option<TaskId>,
    /// Optional acceptance criteria.
    pub acceptance_criteria: Option<String>,
    /// Optional required skills.
    pub required_skills: Option<Vec<String>>,
    /// Optional tags.
    pub tags: Option<Vec<String>>,
    /// Optional due date (milliseconds since epoch).
    pub due_date: Option<u64>,
}

impl NewTask {
    /// Creates a payload with only the required fields set.
    pub fn new(board_id: BoardId, title: impl Into<String>, priority: Priority) -> Self {
        Self {
            board_id,
            title: title.into(),
            priority,
            description: None,
            created_by: None,
            parent_task_id: None,
            acceptance_criteria: None,
            required_skills: None,
            tags: None,
            due_date: None,
        }
    }
}

/// Partial update of a task. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// Move the task to another board.
    pub board_id: Option<BoardId>,
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New assignee.
    pub assignee_id: Option<AgentId>,
    /// New parent task.
    pub parent_task_id: Option<TaskId>,
    /// New acceptance criteria.
    pub acceptance_criteria: Option<String>,
    /// Replacement required skills.
    pub required_skills: Option<Vec<String>>,
    /// New priority.
    pub priority: Option<Priority>,
    /// Replacement tags.
    pub tags: Option<Vec<String>>,
    /// New due date.
    pub due_date: Option<u64>,
}

impl TaskPatch {
    /// Returns `true` if the patch changes no field.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.board_id.is_none()
            && self.title.is_none()
            && self.description.is_none()
            && self.assignee_id.is_none()
            && self.parent_task_id.is_none()
            && self.acceptance_criteria.is_none()
            && self.required_skills.is_none()
            && self.priority.is_none()
            && self.tags.is_none()
            && self.due_date.is_none()
    }

    /// Writes every provided field into `task`.
    ///
    /// Timestamps are left to the caller.
    pub fn apply_to(self, task: &mut Task) {
        if let Some(board_id) = self.board_id {
            task.board_id = board_id;
        }
        if let Some(title) = self.title {
            task.title = title;
        }
        if self.description.is_some() {
            task.description = self.description;
        }
        if self.assignee_id.is_some() {
            task.assignee_id = self.assignee_id;
        }
        if self.parent_task_id.is_some() {
            task.parent_task_id = self.parent_task_id;
        }
        if self.acceptance_criteria.is_some() {
            task.acceptance_criteria = self.acceptance_criteria;
        }
        if self.required_skills.is_some() {
            task.required_skills = self.required_skills;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if self.tags.is_some() {
            task.tags = self.tags;
        }
        if self.due_date.is_some() {
            task.due_date = self.due_date;
        }
    }
}

/// Filter for task listings and live subscriptions.
///
/// A parent filter takes precedence over a board filter; with neither set
/// every task matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskQuery {
    /// Only tasks on this board.
    pub board_id: Option<BoardId>,
    /// Only direct subtasks of this task.
    pub parent_task_id: Option<TaskId>,
}

impl TaskQuery {
    /// Matches every task.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            board_id: None,
            parent_task_id: None,
        }
    }

    /// Matches tasks on one board.
    #[must_use]
    pub const fn board(board_id: BoardId) -> Self {
        Self {
            board_id: Some(board_id),
            parent_task_id: None,
        }
    }

    /// Matches direct subtasks of `parent`.
    #[must_use]
    pub const fn children(parent: TaskId) -> Self {
        Self {
            board_id: None,
            parent_task_id: Some(parent),
        }
    }

    /// Returns `true` if `task` belongs to the result of this query.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(parent) = &self.parent_task_id {
            return task.parent_task_id.as_ref() == Some(parent);
        }
        if let Some(board) = &self.board_id {
            return &task.board_id == board;
        }
        true
    }
}

/// Appends `entry` to `log`, then drops the oldest entries so that at most
/// `capacity` remain.
pub fn append_bounded(log: &mut Vec<ExecutionLogEntry>, entry: ExecutionLogEntry, capacity: usize) {
    log.push(entry);
    if log.len() > capacity {
        let excess = log.len() - capacity;
        log.drain(..excess);
    }
}
