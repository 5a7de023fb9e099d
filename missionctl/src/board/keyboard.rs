//! Keyboard drag sensor.
//!
//! Lets a card be moved without a pointer: Space or Enter grabs the focused
//! card, arrows move the hover, Space or Enter drops, Esc cancels. The sensor
//! emits the same [`DragEvent`]s the pointer path does.

use missionctl_proto::task::{TaskId, TaskStatus};

use super::reconciler::{DragEvent, DropTarget};
use super::{Board, COLUMNS, column_index};

/// Keys the sensor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Grab or drop.
    Space,
    /// Grab or drop.
    Enter,
    /// Previous column.
    Left,
    /// Next column.
    Right,
    /// Previous card in the column.
    Up,
    /// Next card in the column.
    Down,
    /// Cancel the drag.
    Esc,
}

impl Key {
    /// Parses a key name as typed on a line: `space`, `enter`, `left`,
    /// `right`, `up`, `down`, `esc`, or the vi keys `h`, `j`, `k`, `l`.
    ///
    /// A bare newline reads as Enter and `q` as Esc, since a line-based
    /// terminal cannot send either key on its own.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "space" => Some(Self::Space),
            "enter" | "" => Some(Self::Enter),
            "left" | "h" => Some(Self::Left),
            "right" | "l" => Some(Self::Right),
            "up" | "k" => Some(Self::Up),
            "down" | "j" => Some(Self::Down),
            "esc" | "escape" | "q" => Some(Self::Esc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Grab {
    column: usize,
    row: Option<usize>,
}

/// Keyboard focus and drag state for one board.
#[derive(Debug, Default)]
pub struct KeyboardSensor {
    focus: Option<TaskId>,
    grab: Option<Grab>,
}

impl KeyboardSensor {
    /// Creates a sensor with nothing focused.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            focus: None,
            grab: None,
        }
    }

    /// The focused card.
    #[must_use]
    pub const fn focused(&self) -> Option<TaskId> {
        self.focus
    }

    /// Moves focus to a card.
    pub const fn focus(&mut self, task: TaskId) {
        self.focus = Some(task);
    }

    /// Returns `true` while a card is grabbed.
    #[must_use]
    pub const fn is_dragging(&self) -> bool {
        self.grab.is_some()
    }

    /// Current hover target while grabbing.
    #[must_use]
    pub fn hover(&self, board: &Board) -> Option<DropTarget> {
        self.grab.map(|g| hover_target(board, g))
    }

    /// Handles one key press and returns the drag event it produces, if any.
    pub fn handle_key(&mut self, board: &Board, key: Key) -> Option<DragEvent> {
        match self.grab {
            Some(grab) => self.handle_grabbed(board, grab, key),
            None => self.handle_idle(board, key),
        }
    }

    fn handle_grabbed(&mut self, board: &Board, mut grab: Grab, key: Key) -> Option<DragEvent> {
        match key {
            Key::Space | Key::Enter => {
                self.grab = None;
                Some(DragEvent::End(Some(hover_target(board, grab))))
            }
            Key::Esc => {
                self.grab = None;
                Some(DragEvent::Cancel)
            }
            Key::Left | Key::Right => {
                let column = if key == Key::Left {
                    grab.column.saturating_sub(1)
                } else {
                    (grab.column + 1).min(COLUMNS.len() - 1)
                };
                if column == grab.column {
                    return None;
                }
                grab.column = column;
                grab.row = None;
                self.grab = Some(grab);
                Some(DragEvent::Over(Some(hover_target(board, grab))))
            }
            Key::Up | Key::Down => {
                let len = board.column(COLUMNS[grab.column].status).len();
                let row = step_row(grab.row, len, key == Key::Down);
                if row == grab.row {
                    return None;
                }
                grab.row = row;
                self.grab = Some(grab);
                Some(DragEvent::Over(Some(hover_target(board, grab))))
            }
        }
    }

    fn handle_idle(&mut self, board: &Board, key: Key) -> Option<DragEvent> {
        let Some(focused) = self.focus.and_then(|id| board.task(id)) else {
            self.focus = first_task(board);
            return None;
        };
        let status = focused.status;
        let id = focused.id;

        match key {
            Key::Space | Key::Enter => {
                self.grab = Some(Grab {
                    column: column_index(status),
                    row: None,
                });
                Some(DragEvent::Start(id))
            }
            Key::Esc => None,
            Key::Up | Key::Down => {
                let column = board.column(status);
                let row = column.iter().position(|t| t.id == id);
                if let Some(next) = step_row(row, column.len(), key == Key::Down) {
                    self.focus = Some(column[next].id);
                }
                None
            }
            Key::Left | Key::Right => {
                let index = column_index(status);
                let next = if key == Key::Left {
                    index.checked_sub(1)
                } else {
                    Some(index + 1).filter(|i| *i < COLUMNS.len())
                };
                if let Some(next) = next
                    && let Some(first) = board.column(COLUMNS[next].status).first()
                {
                    self.focus = Some(first.id);
                }
                None
            }
        }
    }
}

fn hover_target(board: &Board, grab: Grab) -> DropTarget {
    let status: TaskStatus = COLUMNS[grab.column].status;
    grab.row
        .and_then(|row| board.column(status).get(row).map(|t| DropTarget::Task(t.id)))
        .unwrap_or(DropTarget::Column(status))
}

/// Next row index within a column of `len` cards, clamped to its ends.
fn step_row(row: Option<usize>, len: usize, down: bool) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(match (row, down) {
        (None, true) => 0,
        (None, false) => len - 1,
        (Some(i), true) => (i + 1).min(len - 1),
        (Some(i), false) => i.saturating_sub(1),
    })
}

fn first_task(board: &Board) -> Option<TaskId> {
    COLUMNS
        .iter()
        .find_map(|c| board.column(c.status).first().map(|t| t.id))
}
