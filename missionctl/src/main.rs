//! Command-line client for the mission control board.
//!
//! Every subcommand opens one WebSocket connection to the server, runs its
//! calls and exits. Logs go to a file so stdout carries only command output.
//!
//! ```bash
//! # List tasks on a board
//! cargo run --bin missionctl -- list --board deployment
//!
//! # Create and claim a task
//! cargo run --bin missionctl -- create --board deployment "Ship v2" --priority high
//! cargo run --bin missionctl -- claim <task-id> agent-1
//!
//! # Follow a board live, moving cards with the keyboard
//! cargo run --bin missionctl -- board --board deployment
//!
//! # Send a message between agents and read the conversations
//! cargo run --bin missionctl -- message send lena ops "take the deploy"
//! cargo run --bin missionctl -- message list
//!
//! # Point at another server
//! MISSIONCTL_SERVER=ws://10.0.0.5:9400/ws cargo run --bin missionctl -- activity
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use missionctl_proto::agent::{AgentId, AgentStatus, NewAgent, WorkingMemory};
use missionctl_proto::comment::{AuthorType, CommentId, NewComment, thread};
use missionctl_proto::message::{DEFAULT_MESSAGE_TYPE, MessageId, NewMessage, conversations};
use missionctl_proto::task::{
    BoardId, CreatedBy, ExecutionLogEntry, ExecutionStatus, LogEntryKind, NewTask, Priority,
    TaskId, TaskPatch, TaskQuery, TaskStatus,
};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use missionctl::board::Board;
use missionctl::board::keyboard::{Key, KeyboardSensor};
use missionctl::board::reconciler::{BoardReconciler, DropOutcome};
use missionctl::config::{CliArgs, ClientConfig};
use missionctl::gateway::remote::RemoteGateway;
use missionctl::gateway::{GatewayError, TaskGateway};
use missionctl::output;

#[derive(Parser, Debug)]
#[command(version, about = "Mission control board client")]
struct Cli {
    #[command(flatten)]
    global: CliArgs,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tasks.
    List {
        /// Only tasks on this board.
        #[arg(long)]
        board: Option<String>,
        /// Only direct subtasks of this task (takes precedence over --board).
        #[arg(long)]
        parent: Option<TaskId>,
        /// Only tasks in this column.
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Show one task with its execution log and comments.
    Show {
        /// Task id.
        id: TaskId,
    },
    /// Create a task in the backlog.
    Create {
        /// Owning board.
        #[arg(long)]
        board: String,
        /// Task title.
        title: String,
        /// low, medium, high or urgent.
        #[arg(long, default_value = "medium")]
        priority: Priority,
        /// Longer description.
        #[arg(long)]
        description: Option<String>,
        /// Parent task, making this a subtask.
        #[arg(long)]
        parent: Option<TaskId>,
        /// Tag, repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Required skill, repeatable.
        #[arg(long = "skill")]
        skills: Vec<String>,
        /// Acceptance criteria.
        #[arg(long)]
        acceptance: Option<String>,
        /// Due date, epoch milliseconds.
        #[arg(long)]
        due: Option<u64>,
        /// Record the creator as this agent instead of a human.
        #[arg(long)]
        agent: Option<String>,
    },
    /// Change task fields.
    Edit {
        /// Task id.
        id: TaskId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        board: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long)]
        parent: Option<TaskId>,
        #[arg(long)]
        acceptance: Option<String>,
        /// Replaces all tags.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Replaces all required skills.
        #[arg(long = "skill")]
        skills: Vec<String>,
        #[arg(long)]
        due: Option<u64>,
    },
    /// Move a task to another column.
    Move {
        /// Task id.
        id: TaskId,
        /// backlog, todo, `in_progress`, review or done.
        status: TaskStatus,
    },
    /// Assign a task to an agent and start it.
    Claim {
        /// Task id.
        id: TaskId,
        /// Claiming agent id.
        agent: String,
    },
    /// Finish a task.
    Complete {
        /// Task id.
        id: TaskId,
        /// Mark the execution as failed (sends the task to review).
        #[arg(long)]
        failed: bool,
    },
    /// Append a line to a task's execution log.
    Log {
        /// Task id.
        id: TaskId,
        /// Log line.
        content: String,
        /// command, output, error or info.
        #[arg(long, default_value = "info")]
        kind: LogEntryKind,
    },
    /// Set a task's execution status.
    ExecStatus {
        /// Task id.
        id: TaskId,
        /// pending, running, `pending_approval`, completed or failed.
        status: ExecutionStatus,
    },
    /// Delete a task. Subtasks are detached and comments removed.
    Remove {
        /// Task id.
        id: TaskId,
    },
    /// Post a comment, or list the thread when no text is given.
    Comment {
        /// Task id.
        id: TaskId,
        /// Comment text; `@handle` mentions notify agents.
        content: Option<String>,
        /// Author id.
        #[arg(long, default_value = "human")]
        author: String,
        /// Post as an agent rather than a human.
        #[arg(long)]
        as_agent: bool,
        /// Reply to this comment.
        #[arg(long)]
        reply_to: Option<CommentId>,
    },
    /// Show recent activity, newest first.
    Activity {
        /// Maximum number of entries.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Manage agents.
    #[command(subcommand)]
    Agent(AgentCommand),
    /// Send and read direct messages between agents.
    #[command(subcommand)]
    Message(MessageCommand),
    /// Print the board every time it changes.
    Watch {
        /// Only tasks on this board.
        #[arg(long)]
        board: Option<String>,
    },
    /// Follow the board live and move cards with keys read from stdin.
    ///
    /// One key per line: h/j/k/l or left/down/up/right, space, enter or an
    /// empty line to grab and drop, esc or q to cancel.
    Board {
        /// Only tasks on this board.
        #[arg(long)]
        board: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AgentCommand {
    /// List registered agents.
    List,
    /// Show an agent with its tasks, working memory and recent activity.
    Show {
        /// Agent handle.
        handle: String,
    },
    /// Replace an agent's working memory.
    Memory {
        /// Agent handle.
        handle: String,
        /// Where the agent left off.
        #[arg(long)]
        context: Option<String>,
        /// What the agent is concentrating on.
        #[arg(long)]
        focus: Option<String>,
        /// Recently handled task, repeatable.
        #[arg(long = "recent-task")]
        recent_tasks: Vec<String>,
        /// Lesson to keep, repeatable.
        #[arg(long = "reflection")]
        reflections: Vec<String>,
    },
    /// Register a new agent.
    Register {
        /// Unique handle.
        handle: String,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
        /// Role description.
        #[arg(long, default_value = "agent")]
        role: String,
        /// Skill, repeatable.
        #[arg(long = "skill")]
        skills: Vec<String>,
    },
    /// Report that an agent is alive.
    Heartbeat {
        /// Agent handle.
        handle: String,
        /// Reported status (default online).
        #[arg(long)]
        status: Option<AgentStatus>,
    },
    /// Clear an agent's current task.
    Release {
        /// Agent handle.
        handle: String,
    },
}

#[derive(Subcommand, Debug)]
enum MessageCommand {
    /// Send a message from one agent to another.
    Send {
        /// Sender handle.
        from: String,
        /// Recipient handle.
        to: String,
        /// Message text.
        content: String,
        /// Message type label.
        #[arg(long = "type", default_value = DEFAULT_MESSAGE_TYPE)]
        message_type: String,
    },
    /// Show recent messages grouped into conversations.
    List {
        /// Maximum number of messages.
        #[arg(long, default_value_t = 300)]
        limit: u32,
    },
    /// Show an agent's unacknowledged messages, oldest first.
    Inbox {
        /// Recipient handle.
        handle: String,
    },
    /// Acknowledge a message.
    Ack {
        /// Message id.
        id: MessageId,
        /// Answer for the sender.
        #[arg(long)]
        response: Option<String>,
    },
}

/// Errors surfaced to the user.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("agent {0} not found")]
    AgentNotFound(String),

    #[error("failed to read keys from stdin: {0}")]
    Stdin(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.global) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(server = %config.server_url, "missionctl starting");

    let result = run(cli.command, cli.json, &config).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "command failed");
    }
    drop(log_guard);

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Initialize file-based logging.
///
/// Logs are written to a file (never stdout, which carries command output).
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("missionctl.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() { None } else { Some(values) }
}

fn board_query(board: Option<String>) -> TaskQuery {
    board.map_or_else(TaskQuery::all, |b| TaskQuery::board(BoardId::new(b)))
}

#[allow(clippy::too_many_lines)]
async fn run(command: Command, json: bool, config: &ClientConfig) -> Result<(), CliError> {
    let gateway = RemoteGateway::connect(&config.server_url, config.request_timeout).await?;

    match command {
        Command::List {
            board,
            parent,
            status,
        } => {
            let tasks = match (parent, status) {
                (Some(parent), _) => gateway.sub_tasks(parent).await?,
                (None, Some(status)) if board.is_none() => gateway.tasks_by_status(status).await?,
                (None, status) => {
                    let mut tasks = gateway.list_tasks(board_query(board)).await?;
                    if let Some(status) = status {
                        tasks.retain(|t| t.status == status);
                    }
                    tasks
                }
            };
            if json {
                return print_json(&tasks);
            }
            for task in &tasks {
                println!("{}", output::task_line(task));
            }
        }
        Command::Show { id } => {
            let task = gateway.get_task(id).await?.ok_or(CliError::TaskNotFound(id))?;
            let comments = gateway.list_comments(id).await?;
            if json {
                return print_json(&serde_json::json!({ "task": task, "comments": comments }));
            }
            print!("{}", output::task_detail(&task));
            if !comments.is_empty() {
                println!("\nComments:");
                print!("{}", output::comment_threads(&thread(comments)));
            }
        }
        Command::Create {
            board,
            title,
            priority,
            description,
            parent,
            tags,
            skills,
            acceptance,
            due,
            agent,
        } => {
            let new = NewTask {
                description,
                parent_task_id: parent,
                tags: non_empty(tags),
                required_skills: non_empty(skills),
                acceptance_criteria: acceptance,
                due_date: due,
                created_by: Some(agent.map_or(CreatedBy::Human, |a| {
                    CreatedBy::Agent(AgentId::new(a))
                })),
                ..NewTask::new(BoardId::new(board), title, priority)
            };
            let id = gateway.create_task(new).await?;
            if json {
                return print_json(&id);
            }
            println!("{id}");
        }
        Command::Edit {
            id,
            title,
            description,
            priority,
            board,
            assignee,
            parent,
            acceptance,
            tags,
            skills,
            due,
        } => {
            let patch = TaskPatch {
                board_id: board.map(BoardId::new),
                title,
                description,
                assignee_id: assignee.map(AgentId::new),
                parent_task_id: parent,
                acceptance_criteria: acceptance,
                required_skills: non_empty(skills),
                priority,
                tags: non_empty(tags),
                due_date: due,
            };
            gateway.update_task(id, patch).await?;
        }
        Command::Move { id, status } => gateway.move_task(id, status).await?,
        Command::Claim { id, agent } => gateway.claim_task(id, AgentId::new(agent)).await?,
        Command::Complete { id, failed } => gateway.complete_task(id, !failed).await?,
        Command::Log { id, content, kind } => {
            let entry = ExecutionLogEntry::new(now_ms(), kind, content);
            gateway.append_execution_log(id, entry).await?;
        }
        Command::ExecStatus { id, status } => gateway.set_execution_status(id, status).await?,
        Command::Remove { id } => gateway.remove_task(id).await?,
        Command::Comment {
            id,
            content,
            author,
            as_agent,
            reply_to,
        } => {
            if let Some(content) = content {
                let new = NewComment {
                    task_id: id,
                    author_id: author,
                    author_type: if as_agent {
                        AuthorType::Agent
                    } else {
                        AuthorType::Human
                    },
                    content,
                    parent_id: reply_to,
                };
                let comment_id = gateway.create_comment(new).await?;
                if json {
                    return print_json(&comment_id);
                }
                println!("{comment_id}");
            } else {
                let comments = gateway.list_comments(id).await?;
                if json {
                    return print_json(&comments);
                }
                print!("{}", output::comment_threads(&thread(comments)));
            }
        }
        Command::Activity { limit } => {
            let entries = gateway.recent_activity(limit).await?;
            if json {
                return print_json(&entries);
            }
            for entry in &entries {
                println!("{}", output::activity_line(entry));
            }
        }
        Command::Agent(agent) => run_agent(&gateway, agent, json).await?,
        Command::Message(message) => run_message(&gateway, message, json).await?,
        Command::Watch { board } => watch(&gateway, board_query(board), json).await?,
        Command::Board { board } => interactive_board(gateway, board_query(board)).await?,
    }
    Ok(())
}

async fn run_agent(
    gateway: &RemoteGateway,
    command: AgentCommand,
    json: bool,
) -> Result<(), CliError> {
    match command {
        AgentCommand::List => {
            let agents = gateway.list_agents().await?;
            if json {
                return print_json(&agents);
            }
            for agent in &agents {
                println!("{}", output::agent_line(agent));
            }
        }
        AgentCommand::Show { handle } => {
            let Some(detail) = gateway.agent_detail(&handle).await? else {
                return Err(CliError::AgentNotFound(handle));
            };
            if json {
                return print_json(&detail);
            }
            print!("{}", output::agent_detail(&detail));
        }
        AgentCommand::Memory {
            handle,
            context,
            focus,
            recent_tasks,
            reflections,
        } => {
            let memory = WorkingMemory {
                last_context: context,
                current_focus: focus,
                recent_tasks: non_empty(recent_tasks),
                reflections: non_empty(reflections),
                updated_at: now_ms(),
            };
            gateway.update_working_memory(&handle, memory).await?;
        }
        AgentCommand::Register {
            handle,
            name,
            role,
            skills,
        } => {
            let new = NewAgent {
                name: name.unwrap_or_else(|| handle.clone()),
                handle,
                role,
                skills,
            };
            let id = gateway.register_agent(new).await?;
            if json {
                return print_json(&id);
            }
            println!("{id}");
        }
        AgentCommand::Heartbeat { handle, status } => gateway.heartbeat(&handle, status).await?,
        AgentCommand::Release { handle } => gateway.release_agent(&handle).await?,
    }
    Ok(())
}

async fn run_message(
    gateway: &RemoteGateway,
    command: MessageCommand,
    json: bool,
) -> Result<(), CliError> {
    match command {
        MessageCommand::Send {
            from,
            to,
            content,
            message_type,
        } => {
            let id = gateway
                .send_message(NewMessage {
                    from,
                    to,
                    message_type,
                    content,
                })
                .await?;
            if json {
                return print_json(&id);
            }
            println!("{id}");
        }
        MessageCommand::List { limit } => {
            let messages = gateway.list_messages(limit).await?;
            if json {
                return print_json(&messages);
            }
            if messages.is_empty() {
                println!("no messages");
            }
            print!("{}", output::conversations(&conversations(messages)));
        }
        MessageCommand::Inbox { handle } => {
            let messages = gateway.inbox(&handle).await?;
            if json {
                return print_json(&messages);
            }
            for message in &messages {
                println!("{}  from {}", output::message_line(message), message.from_agent_id);
            }
        }
        MessageCommand::Ack { id, response } => {
            gateway.acknowledge_message(id, response).await?;
        }
    }
    Ok(())
}

/// Prints every snapshot of a live query until the server goes away.
async fn watch(gateway: &RemoteGateway, query: TaskQuery, json: bool) -> Result<(), CliError> {
    let mut subscription = gateway.subscribe(query).await?;
    let mut board = Board::new();
    while let Some(tasks) = subscription.next().await {
        board.apply_snapshot(tasks);
        if json {
            print_json(&board.tasks())?;
        } else {
            println!("{}", output::board_view(&board));
        }
    }
    Err(GatewayError::ConnectionClosed.into())
}

/// Live board driven by key names read line by line from stdin.
async fn interactive_board(gateway: RemoteGateway, query: TaskQuery) -> Result<(), CliError> {
    let gateway = Arc::new(gateway);
    let mut subscription = gateway.subscribe(query).await?;
    let mut reconciler = BoardReconciler::new(Arc::clone(&gateway));
    let mut sensor = KeyboardSensor::new();
    let mut board = Board::new();

    let (key_tx, mut key_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if key_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("{}", output::board_view(&board));
    loop {
        tokio::select! {
            snapshot = subscription.next() => {
                let Some(tasks) = snapshot else {
                    return Err(GatewayError::ConnectionClosed.into());
                };
                board.apply_snapshot(tasks);
                println!("{}", output::board_view(&board));
            }
            line = key_rx.recv() => {
                let Some(line) = line else { return Ok(()) };
                let Some(key) = Key::from_name(&line) else {
                    eprintln!("unknown key: {}", line.trim());
                    continue;
                };
                let Some(event) = sensor.handle_key(&board, key) else {
                    if let Some(task) = sensor.focused().and_then(|id| board.task(id)) {
                        println!("> {}", output::task_line(task));
                    }
                    continue;
                };
                match reconciler.handle(&board, event).await {
                    Some(DropOutcome::Failed { error, .. }) => eprintln!("move failed: {error}"),
                    Some(outcome) => tracing::debug!(?outcome, "drop finished"),
                    None => {
                        if let Some(task) = reconciler.active(&board) {
                            println!(
                                "{}",
                                output::drag_status(&board, task, sensor.hover(&board))
                            );
                        }
                    }
                }
            }
        }
    }
}
