//! Client-side board model.
//!
//! A [`Board`] holds the last task snapshot pushed by the server and groups
//! it into the five status columns. It has no mutation API of its own: the
//! only way its contents change is [`Board::apply_snapshot`].

pub mod keyboard;
pub mod reconciler;

use missionctl_proto::task::{Task, TaskId, TaskStatus};

/// A board column: one status and its display title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Status of every task in this column.
    pub status: TaskStatus,
    /// Heading shown above the column.
    pub title: &'static str,
}

/// The fixed columns, left to right.
pub const COLUMNS: [Column; 5] = [
    Column {
        status: TaskStatus::Backlog,
        title: "Backlog",
    },
    Column {
        status: TaskStatus::Todo,
        title: "To Do",
    },
    Column {
        status: TaskStatus::InProgress,
        title: "In Progress",
    },
    Column {
        status: TaskStatus::Review,
        title: "Review",
    },
    Column {
        status: TaskStatus::Done,
        title: "Done",
    },
];

/// Returns the position of `status` in [`COLUMNS`].
#[must_use]
pub fn column_index(status: TaskStatus) -> usize {
    COLUMNS
        .iter()
        .position(|c| c.status == status)
        .unwrap_or_default()
}

/// Last known state of a board.
///
/// `Loading` means no snapshot has arrived yet, which is not the same as a
/// board with no tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Board {
    /// Waiting for the first snapshot.
    #[default]
    Loading,
    /// Tasks from the latest snapshot.
    Ready(Vec<Task>),
}

impl Board {
    /// Creates a board that has not received a snapshot yet.
    #[must_use]
    pub const fn new() -> Self {
        Self::Loading
    }

    /// Replaces the board contents with a pushed snapshot.
    pub fn apply_snapshot(&mut self, tasks: Vec<Task>) {
        tracing::debug!(tasks = tasks.len(), "board snapshot applied");
        *self = Self::Ready(tasks);
    }

    /// Returns `true` until the first snapshot arrives.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Every task in the snapshot, in server order. Empty while loading.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        match self {
            Self::Loading => &[],
            Self::Ready(tasks) => tasks,
        }
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks().iter().find(|t| t.id == id)
    }

    /// Tasks in one column, sorted by `order` (then creation time).
    #[must_use]
    pub fn column(&self, status: TaskStatus) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks().iter().filter(|t| t.status == status).collect();
        tasks.sort_by_key(|t| (t.order, t.created_at));
        tasks
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use missionctl_proto::task::{BoardId, Priority, Task, TaskId, TaskStatus};

    /// Builds a task with only the fields the board looks at.
    pub(crate) fn task(title: &str, status: TaskStatus, order: u64) -> Task {
        Task {
            id: TaskId::new(),
            board_id: BoardId::new("ops"),
            title: title.to_string(),
            description: None,
            status,
            priority: Priority::Medium,
            assignee_id: None,
            parent_task_id: None,
            created_by: None,
            tags: None,
            required_skills: None,
            due_date: None,
            acceptance_criteria: None,
            order,
            execution_log: Vec::new(),
            execution_status: None,
            created_at: order,
            updated_at: order,
            completed_at: None,
            claimed_at: None,
        }
    }
}
