//! Activity feed records.

use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    /// A task was created.
    TaskCreated,
    /// A task changed column.
    TaskMoved,
    /// A task was completed (successfully or not).
    TaskCompleted,
    /// An agent claimed a task.
    AgentClaimed,
    /// An agent released its task.
    AgentReleased,
    /// A comment was posted.
    Comment,
    /// An agent was mentioned in a comment.
    Mention,
}

impl ActivityKind {
    /// Returns the wire/storage name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskMoved => "task_moved",
            Self::TaskCompleted => "task_completed",
            Self::AgentClaimed => "agent_claimed",
            Self::AgentReleased => "agent_released",
            Self::Comment => "comment",
            Self::Mention => "mention",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One human-readable feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Monotonic sequence number assigned by the feed.
    pub id: u64,
    /// What happened.
    pub kind: ActivityKind,
    /// Agent id or human name responsible, when known.
    pub actor_id: Option<String>,
    /// Task concerned, when any.
    pub task_id: Option<TaskId>,
    /// Title of that task at the time of the event.
    pub task_title: Option<String>,
    /// Rendered description of the event.
    pub message: String,
    /// When it happened (milliseconds since epoch).
    pub timestamp: u64,
}
