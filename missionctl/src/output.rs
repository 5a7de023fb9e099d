//! Plain-text rendering for CLI output.

use std::fmt::Write as _;

use missionctl_proto::activity::ActivityEntry;
use missionctl_proto::agent::{Agent, AgentDetail};
use missionctl_proto::comment::CommentThread;
use missionctl_proto::message::{AgentMessage, Conversation};
use missionctl_proto::task::Task;

use crate::board::reconciler::DropTarget;
use crate::board::{Board, COLUMNS, column_index};

/// Format an epoch-millisecond timestamp as local "YYYY-MM-DD HH:MM".
#[must_use]
pub fn format_timestamp_ms(ms: u64) -> String {
    use chrono::{Local, TimeZone};
    let secs = (ms / 1000).cast_signed();
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    match Local.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        _ => "????-??-?? ??:??".to_string(),
    }
}

/// One-line summary: id, status, priority, title, assignee.
#[must_use]
pub fn task_line(task: &Task) -> String {
    let mut line = format!(
        "{}  {:<11} {:<6} {}",
        task.id,
        task.status.as_str(),
        task.priority.as_str(),
        task.title
    );
    if let Some(assignee) = &task.assignee_id {
        let _ = write!(line, "  [{assignee}]");
    }
    line
}

/// Multi-line detail view including the execution log.
#[must_use]
pub fn task_detail(task: &Task) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", task.title);
    let _ = writeln!(out, "  id:        {}", task.id);
    let _ = writeln!(out, "  board:     {}", task.board_id);
    let _ = writeln!(out, "  status:    {}", task.status);
    let _ = writeln!(out, "  priority:  {}", task.priority);
    let _ = writeln!(out, "  order:     {}", task.order);
    if let Some(assignee) = &task.assignee_id {
        let _ = writeln!(out, "  assignee:  {assignee}");
    }
    if let Some(parent) = &task.parent_task_id {
        let _ = writeln!(out, "  parent:    {parent}");
    }
    if let Some(tags) = &task.tags {
        let _ = writeln!(out, "  tags:      {}", tags.join(", "));
    }
    if let Some(skills) = &task.required_skills {
        let _ = writeln!(out, "  skills:    {}", skills.join(", "));
    }
    if let Some(due) = task.due_date {
        let _ = writeln!(out, "  due:       {}", format_timestamp_ms(due));
    }
    let _ = writeln!(out, "  created:   {}", format_timestamp_ms(task.created_at));
    let _ = writeln!(out, "  updated:   {}", format_timestamp_ms(task.updated_at));
    if let Some(claimed) = task.claimed_at {
        let _ = writeln!(out, "  claimed:   {}", format_timestamp_ms(claimed));
    }
    if let Some(completed) = task.completed_at {
        let _ = writeln!(out, "  completed: {}", format_timestamp_ms(completed));
    }
    if let Some(status) = task.execution_status {
        let _ = writeln!(out, "  execution: {status}");
    }
    if let Some(description) = &task.description {
        let _ = writeln!(out, "\n{description}");
    }
    if let Some(criteria) = &task.acceptance_criteria {
        let _ = writeln!(out, "\nAcceptance criteria:\n{criteria}");
    }
    if !task.execution_log.is_empty() {
        let _ = writeln!(out, "\nExecution log ({} entries):", task.execution_log.len());
        for entry in &task.execution_log {
            let _ = writeln!(
                out,
                "  {} {:<7} {}",
                format_timestamp_ms(entry.timestamp),
                entry.kind.as_str(),
                entry.content
            );
        }
    }
    out
}

/// Renders a board column by column.
#[must_use]
pub fn board_view(board: &Board) -> String {
    if board.is_loading() {
        return "loading...\n".to_string();
    }
    let mut out = String::new();
    for column in &COLUMNS {
        let tasks = board.column(column.status);
        let _ = writeln!(out, "== {} ({}) ==", column.title, tasks.len());
        for task in tasks {
            let _ = writeln!(out, "  {}", task_line(task));
        }
    }
    out
}

/// Where a dragged card would land: a column heading, or a card with its
/// column.
#[must_use]
pub fn drop_target_label(board: &Board, target: Option<DropTarget>) -> String {
    match target {
        None => "nothing".to_string(),
        Some(DropTarget::Column(status)) => {
            format!("{} column", COLUMNS[column_index(status)].title)
        }
        Some(DropTarget::Task(id)) => match board.task(id) {
            Some(task) => format!(
                "\"{}\" in {}",
                task.title,
                COLUMNS[column_index(task.status)].title
            ),
            None => "a card that is gone".to_string(),
        },
    }
}

/// Status line for a card being dragged.
#[must_use]
pub fn drag_status(board: &Board, task: &Task, target: Option<DropTarget>) -> String {
    format!(
        "dragging: {}  over {}",
        task.title,
        drop_target_label(board, target)
    )
}

/// One activity entry.
#[must_use]
pub fn activity_line(entry: &ActivityEntry) -> String {
    let mut line = format!(
        "{}  {:<15} {}",
        format_timestamp_ms(entry.timestamp),
        entry.kind.as_str(),
        entry.message
    );
    if let Some(actor) = &entry.actor_id {
        let _ = write!(line, "  ({actor})");
    }
    line
}

/// Comment threads with replies indented.
#[must_use]
pub fn comment_threads(threads: &[CommentThread]) -> String {
    let mut out = String::new();
    for thread in threads {
        let root = &thread.root;
        let _ = writeln!(
            out,
            "{} {}: {}",
            format_timestamp_ms(root.created_at),
            root.author_id,
            root.content
        );
        for reply in &thread.replies {
            let _ = writeln!(
                out,
                "    {} {}: {}",
                format_timestamp_ms(reply.created_at),
                reply.author_id,
                reply.content
            );
        }
    }
    out
}

/// One agent: handle, status, current task.
#[must_use]
pub fn agent_line(agent: &Agent) -> String {
    let mut line = format!(
        "@{:<16} {:<8} {}",
        agent.handle,
        agent.status.as_str(),
        agent.name
    );
    if let Some(task) = &agent.current_task_id {
        let _ = write!(line, "  on {task}");
    }
    line
}

/// An agent's record, working memory, tasks and recent activity.
#[must_use]
pub fn agent_detail(detail: &AgentDetail) -> String {
    let agent = &detail.agent;
    let mut out = String::new();
    let _ = writeln!(out, "@{} ({})", agent.handle, agent.name);
    let _ = writeln!(out, "  id:        {}", agent.id);
    let _ = writeln!(out, "  role:      {}", agent.role);
    let _ = writeln!(out, "  status:    {}", agent.status);
    if let Some(beat) = agent.last_heartbeat {
        let _ = writeln!(out, "  heartbeat: {}", format_timestamp_ms(beat));
    }
    if !agent.skills.is_empty() {
        let _ = writeln!(out, "  skills:    {}", agent.skills.join(", "));
    }
    if let Some(memory) = &agent.working_memory {
        let _ = writeln!(out, "\nWorking memory ({}):", format_timestamp_ms(memory.updated_at));
        if let Some(focus) = &memory.current_focus {
            let _ = writeln!(out, "  focus:    {focus}");
        }
        if let Some(context) = &memory.last_context {
            let _ = writeln!(out, "  context:  {context}");
        }
        for task in memory.recent_tasks.iter().flatten() {
            let _ = writeln!(out, "  recent:   {task}");
        }
        for reflection in memory.reflections.iter().flatten() {
            let _ = writeln!(out, "  reflects: {reflection}");
        }
    }
    let _ = writeln!(out, "\nTasks ({}):", detail.tasks.len());
    for task in &detail.tasks {
        let _ = writeln!(out, "  {}", task_line(task));
    }
    if !detail.activity.is_empty() {
        let _ = writeln!(out, "\nRecent activity:");
        for entry in &detail.activity {
            let _ = writeln!(out, "  {}", activity_line(entry));
        }
    }
    out
}

/// One message with its acknowledgement state and response.
#[must_use]
pub fn message_line(message: &AgentMessage) -> String {
    let mut line = format!(
        "{}  {}  [{}] {}",
        format_timestamp_ms(message.created_at),
        message.id,
        message.message_type,
        message.content
    );
    if !message.acknowledged {
        line.push_str("  (unacknowledged)");
    }
    if let Some(response) = &message.response {
        let _ = write!(line, "\n    -> {response}");
    }
    line
}

/// Conversations with a header per sender and recipient pair.
#[must_use]
pub fn conversations(conversations: &[Conversation]) -> String {
    let mut out = String::new();
    for conversation in conversations {
        let _ = writeln!(
            out,
            "== {} -> {} ({}) ==",
            conversation.from_agent_id,
            conversation.to_agent_id,
            conversation.messages.len()
        );
        for message in &conversation.messages {
            let _ = writeln!(out, "  {}", message_line(message));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use missionctl_proto::agent::AgentId;
    use missionctl_proto::task::TaskStatus;

    use super::*;
    use crate::board::test_support::task;

    #[test]
    fn timestamp_has_date_and_minutes() {
        let formatted = format_timestamp_ms(1_700_000_000_000);
        assert_eq!(formatted.len(), "2023-11-14 22:13".len());
        assert!(!formatted.contains('?'));
    }

    #[test]
    fn task_line_shows_assignee() {
        let mut t = task("Ship v2", TaskStatus::InProgress, 0);
        assert!(!task_line(&t).contains('['));
        t.assignee_id = Some(AgentId::new("agent-1"));
        let line = task_line(&t);
        assert!(line.contains("in_progress"));
        assert!(line.ends_with("Ship v2  [agent-1]"));
    }

    #[test]
    fn board_view_lists_every_column() {
        let mut board = Board::new();
        assert_eq!(board_view(&board), "loading...\n");

        board.apply_snapshot(vec![task("deploy", TaskStatus::Review, 0)]);
        let view = board_view(&board);
        assert!(view.contains("== Backlog (0) =="));
        assert!(view.contains("== Review (1) =="));
        assert!(view.contains("deploy"));
    }

    #[test]
    fn drag_status_names_columns_and_cards() {
        let mut board = Board::new();
        let lifted = task("deploy", TaskStatus::Todo, 0);
        let under = task("rollback plan", TaskStatus::InProgress, 0);
        let under_id = under.id;
        board.apply_snapshot(vec![lifted.clone(), under]);

        assert_eq!(
            drag_status(&board, &lifted, Some(DropTarget::Column(TaskStatus::InProgress))),
            "dragging: deploy  over In Progress column"
        );
        assert_eq!(
            drop_target_label(&board, Some(DropTarget::Task(under_id))),
            "\"rollback plan\" in In Progress"
        );
        assert_eq!(drop_target_label(&board, None), "nothing");
        assert!(!drag_status(&board, &lifted, None).contains("Column("));
    }

    #[test]
    fn agent_detail_lists_tasks_and_memory() {
        use missionctl_proto::agent::{AgentStatus, WorkingMemory};

        let mut t = task("deploy", TaskStatus::InProgress, 0);
        t.assignee_id = Some(AgentId::new("agent-lena"));
        let detail = AgentDetail {
            agent: Agent {
                id: AgentId::new("agent-lena"),
                handle: "lena".to_string(),
                name: "Lena".to_string(),
                role: "ops".to_string(),
                status: AgentStatus::Working,
                current_task_id: Some(t.id),
                last_heartbeat: None,
                skills: vec!["rust".to_string()],
                working_memory: Some(WorkingMemory {
                    current_focus: Some("release".to_string()),
                    reflections: Some(vec!["smaller batches".to_string()]),
                    ..WorkingMemory::default()
                }),
            },
            tasks: vec![t],
            activity: Vec::new(),
        };
        let view = agent_detail(&detail);
        assert!(view.starts_with("@lena (Lena)"));
        assert!(view.contains("focus:    release"));
        assert!(view.contains("reflects: smaller batches"));
        assert!(view.contains("Tasks (1):"));
        assert!(view.contains("deploy  [agent-lena]"));
        assert!(!view.contains("Recent activity"));
    }

    #[test]
    fn messages_show_ack_state_and_response() {
        use missionctl_proto::message::{MessageId, conversations as group};

        let message = AgentMessage {
            id: MessageId::new(),
            from_agent_id: AgentId::new("agent-lena"),
            to_agent_id: AgentId::new("agent-ops"),
            message_type: "handoff".to_string(),
            content: "take the deploy".to_string(),
            acknowledged: false,
            response: None,
            created_at: 1_700_000_000_000,
        };
        assert!(message_line(&message).ends_with("[handoff] take the deploy  (unacknowledged)"));

        let answered = AgentMessage {
            acknowledged: true,
            response: Some("on it".to_string()),
            ..message.clone()
        };
        let line = message_line(&answered);
        assert!(!line.contains("unacknowledged"));
        assert!(line.ends_with("\n    -> on it"));

        let view = conversations(&group(vec![message]));
        assert!(view.starts_with("== agent-lena -> agent-ops (1) =="));
    }

    #[test]
    fn detail_includes_log_entries() {
        use missionctl_proto::task::{ExecutionLogEntry, LogEntryKind};

        let mut t = task("build", TaskStatus::InProgress, 0);
        t.execution_log
            .push(ExecutionLogEntry::new(0, LogEntryKind::Command, "cargo build"));
        let detail = task_detail(&t);
        assert!(detail.contains("Execution log (1 entries):"));
        assert!(detail.contains("cargo build"));
    }
}
