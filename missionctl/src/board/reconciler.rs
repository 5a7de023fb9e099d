//! Drag-and-drop reconciliation.
//!
//! A [`BoardReconciler`] turns one drag gesture into at most one
//! `tasks.move` call. It reads the current [`Board`] to resolve drop targets
//! but never writes to it; the server's next snapshot is what moves the card
//! on screen.

use missionctl_proto::task::{Task, TaskId, TaskStatus};

use super::Board;
use crate::gateway::TaskGateway;

/// Where a dragged card was released or is hovering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    /// A column, identified by its status.
    Column(TaskStatus),
    /// Another card; the drop lands in that card's column.
    Task(TaskId),
}

/// Input to the reconciler, from the pointer or the keyboard sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragEvent {
    /// A card was lifted.
    Start(TaskId),
    /// The card hovers over a target, or over nothing.
    Over(Option<DropTarget>),
    /// The card was released.
    End(Option<DropTarget>),
    /// The gesture was abandoned.
    Cancel,
}

/// What a finished gesture did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    /// No gesture was in progress.
    NotDragging,
    /// Released outside any target.
    NoTarget,
    /// The dragged task, or the task it was dropped on, is no longer on the
    /// board.
    TaskGone,
    /// Dropped into the column it already sits in.
    Unchanged,
    /// The move was sent and acknowledged.
    Moved {
        /// Moved task.
        task: TaskId,
        /// Column it left.
        from: TaskStatus,
        /// Column it entered.
        to: TaskStatus,
    },
    /// The move was sent and rejected.
    Failed {
        /// Task that stayed put.
        task: TaskId,
        /// Column it was meant to enter.
        to: TaskStatus,
        /// Reason reported by the gateway.
        error: String,
    },
}

/// Gesture state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    /// No card lifted.
    #[default]
    Idle,
    /// A card is lifted.
    Dragging {
        /// The lifted task.
        task: TaskId,
        /// Current hover target, if any.
        over: Option<DropTarget>,
    },
}

/// Per-board drag state machine.
pub struct BoardReconciler<G> {
    gateway: G,
    state: DragState,
}

impl<G: TaskGateway> BoardReconciler<G> {
    /// Creates an idle reconciler that sends moves through `gateway`.
    pub const fn new(gateway: G) -> Self {
        Self {
            gateway,
            state: DragState::Idle,
        }
    }

    /// Returns the gateway.
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Returns the gesture state.
    pub const fn state(&self) -> DragState {
        self.state
    }

    /// The lifted task as it looks on `board`, for rendering the overlay.
    pub fn active<'a>(&self, board: &'a Board) -> Option<&'a Task> {
        match self.state {
            DragState::Idle => None,
            DragState::Dragging { task, .. } => board.task(task),
        }
    }

    /// Lifts a card. Ids not on the board leave the reconciler idle.
    pub fn drag_start(&mut self, board: &Board, task: TaskId) {
        if board.task(task).is_none() {
            tracing::debug!(task_id = %task, "drag start on unknown task ignored");
            self.state = DragState::Idle;
            return;
        }
        self.state = DragState::Dragging { task, over: None };
    }

    /// Records the hover target. Never issues a mutation.
    pub const fn drag_over(&mut self, target: Option<DropTarget>) {
        if let DragState::Dragging { task, .. } = self.state {
            self.state = DragState::Dragging { task, over: target };
        }
    }

    /// Abandons the gesture.
    pub const fn drag_cancel(&mut self) {
        self.state = DragState::Idle;
    }

    /// Releases the card over `target` and issues at most one move.
    ///
    /// A failed move is logged and reported; it is not retried.
    pub async fn drag_end(&mut self, board: &Board, target: Option<DropTarget>) -> DropOutcome {
        let DragState::Dragging { task: id, .. } = std::mem::take(&mut self.state) else {
            return DropOutcome::NotDragging;
        };
        let Some(target) = target else {
            return DropOutcome::NoTarget;
        };
        let Some(task) = board.task(id) else {
            return DropOutcome::TaskGone;
        };
        let to = match target {
            DropTarget::Column(status) => status,
            DropTarget::Task(over) => match board.task(over) {
                Some(other) => other.status,
                None => return DropOutcome::TaskGone,
            },
        };
        let from = task.status;
        if from == to {
            return DropOutcome::Unchanged;
        }

        match self.gateway.move_task(id, to).await {
            Ok(()) => {
                tracing::info!(task_id = %id, %from, %to, "task moved");
                DropOutcome::Moved { task: id, from, to }
            }
            Err(e) => {
                tracing::warn!(task_id = %id, %to, error = %e, "task move failed");
                DropOutcome::Failed {
                    task: id,
                    to,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Feeds one event through the state machine. Returns an outcome only
    /// for [`DragEvent::End`].
    pub async fn handle(&mut self, board: &Board, event: DragEvent) -> Option<DropOutcome> {
        match event {
            DragEvent::Start(task) => {
                self.drag_start(board, task);
                None
            }
            DragEvent::Over(target) => {
                self.drag_over(target);
                None
            }
            DragEvent::End(target) => Some(self.drag_end(board, target).await),
            DragEvent::Cancel => {
                self.drag_cancel();
                None
            }
        }
    }
}
