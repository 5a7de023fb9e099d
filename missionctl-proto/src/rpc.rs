//! RPC protocol between mission control clients and the server.
//!
//! Clients send [`ClientMessage`] values and receive [`ServerMessage`]
//! values, each postcard-encoded in a WebSocket binary frame. Calls are
//! correlated by a client-chosen `request_id`; live queries by a
//! client-chosen `subscription_id`.

use serde::{Deserialize, Serialize};

use crate::activity::ActivityEntry;
use crate::agent::{Agent, AgentDetail, AgentId, AgentStatus, NewAgent, WorkingMemory};
use crate::comment::{Comment, CommentId, NewComment};
use crate::message::{AgentMessage, MessageId, NewMessage};
use crate::task::{
    ExecutionLogEntry, ExecutionStatus, NewTask, Task, TaskId, TaskPatch, TaskQuery, TaskStatus,
};

/// Client-chosen correlation id for a call.
pub type RequestId = u64;

/// Client-chosen id for a live query.
pub type SubscriptionId = u64;

/// A query or mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// `tasks.list`
    ListTasks(TaskQuery),
    /// `tasks.get`
    GetTask(TaskId),
    /// `tasks.getByStatus`
    TasksByStatus(TaskStatus),
    /// `tasks.getSubTasks`
    SubTasks(TaskId),
    /// `tasks.create`
    CreateTask(NewTask),
    /// `tasks.update`
    UpdateTask {
        /// Task to patch.
        id: TaskId,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// `tasks.move`
    MoveTask {
        /// Task to move.
        id: TaskId,
        /// Destination column.
        status: TaskStatus,
    },
    /// `tasks.claim`
    ClaimTask {
        /// Task to claim.
        id: TaskId,
        /// Claiming agent.
        agent_id: AgentId,
    },
    /// `tasks.complete`
    CompleteTask {
        /// Task to complete.
        id: TaskId,
        /// Whether execution succeeded.
        success: bool,
    },
    /// `tasks.appendExecutionLog`
    AppendExecutionLog {
        /// Task whose log grows.
        id: TaskId,
        /// Line to append.
        entry: ExecutionLogEntry,
    },
    /// `tasks.setExecutionStatus`
    SetExecutionStatus {
        /// Task to patch.
        id: TaskId,
        /// New execution status.
        status: ExecutionStatus,
    },
    /// `tasks.remove`
    RemoveTask(TaskId),
    /// `agents.list`
    ListAgents,
    /// `agents.get`
    GetAgent {
        /// Handle, with or without `@`.
        handle: String,
    },
    /// `agents.getById`
    GetAgentById(AgentId),
    /// `agents.getWithTasks`
    AgentDetail {
        /// Handle, with or without `@`.
        handle: String,
    },
    /// `agents.register`
    RegisterAgent(NewAgent),
    /// `agents.heartbeat`
    Heartbeat {
        /// Reporting agent.
        handle: String,
        /// Reported status, `online` when absent.
        status: Option<AgentStatus>,
    },
    /// `agents.updateStatus`
    UpdateAgentStatus {
        /// Agent to update.
        handle: String,
        /// New status.
        status: AgentStatus,
    },
    /// `agents.updateWorkingMemory`
    UpdateWorkingMemory {
        /// Agent whose memory is replaced.
        handle: String,
        /// The new memory, stored as given.
        memory: WorkingMemory,
    },
    /// `agents.releaseTask`
    ReleaseAgent {
        /// Agent giving up its current task.
        handle: String,
    },
    /// `agentMessages.send`
    SendMessage(NewMessage),
    /// `agentMessages.listAll`
    ListMessages {
        /// Maximum number of messages, newest first.
        limit: u32,
    },
    /// `agentMessages.inbox`
    Inbox {
        /// Recipient handle, with or without `@`.
        handle: String,
    },
    /// `agentMessages.acknowledge`
    AcknowledgeMessage {
        /// Message being acknowledged.
        id: MessageId,
        /// Optional answer for the sender.
        response: Option<String>,
    },
    /// `comments.listByTask`
    ListComments(TaskId),
    /// `comments.create`
    CreateComment(NewComment),
    /// `activity.recent`
    RecentActivity {
        /// Maximum number of entries, newest first.
        limit: u32,
    },
}

impl Request {
    /// Returns the dotted operation name, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListTasks(_) => "tasks.list",
            Self::GetTask(_) => "tasks.get",
            Self::TasksByStatus(_) => "tasks.getByStatus",
            Self::SubTasks(_) => "tasks.getSubTasks",
            Self::CreateTask(_) => "tasks.create",
            Self::UpdateTask { .. } => "tasks.update",
            Self::MoveTask { .. } => "tasks.move",
            Self::ClaimTask { .. } => "tasks.claim",
            Self::CompleteTask { .. } => "tasks.complete",
            Self::AppendExecutionLog { .. } => "tasks.appendExecutionLog",
            Self::SetExecutionStatus { .. } => "tasks.setExecutionStatus",
            Self::RemoveTask(_) => "tasks.remove",
            Self::ListAgents => "agents.list",
            Self::GetAgent { .. } => "agents.get",
            Self::GetAgentById(_) => "agents.getById",
            Self::AgentDetail { .. } => "agents.getWithTasks",
            Self::RegisterAgent(_) => "agents.register",
            Self::Heartbeat { .. } => "agents.heartbeat",
            Self::UpdateAgentStatus { .. } => "agents.updateStatus",
            Self::UpdateWorkingMemory { .. } => "agents.updateWorkingMemory",
            Self::ReleaseAgent { .. } => "agents.releaseTask",
            Self::SendMessage(_) => "agentMessages.send",
            Self::ListMessages { .. } => "agentMessages.listAll",
            Self::Inbox { .. } => "agentMessages.inbox",
            Self::AcknowledgeMessage { .. } => "agentMessages.acknowledge",
            Self::ListComments(_) => "comments.listByTask",
            Self::CreateComment(_) => "comments.create",
            Self::RecentActivity { .. } => "activity.recent",
        }
    }
}

/// Successful result of a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// The mutation was applied.
    Done,
    /// A task list.
    Tasks(Vec<Task>),
    /// A single task lookup; `None` when it does not exist.
    Task(Option<Task>),
    /// Id of a newly created task.
    TaskCreated(TaskId),
    /// An agent list.
    Agents(Vec<Agent>),
    /// A single agent lookup.
    Agent(Option<Agent>),
    /// An agent with its tasks and activity; `None` for an unknown handle.
    AgentDetail(Option<Box<AgentDetail>>),
    /// Id of a newly registered agent.
    AgentRegistered(AgentId),
    /// Comments on a task, oldest first.
    Comments(Vec<Comment>),
    /// Id of a newly posted comment.
    CommentCreated(CommentId),
    /// Activity entries, newest first.
    Activity(Vec<ActivityEntry>),
    /// Agent messages.
    Messages(Vec<AgentMessage>),
    /// Id of a newly sent message.
    MessageSent(MessageId),
}

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A field limit was violated; nothing was written.
    Validation,
    /// The referenced record does not exist.
    NotFound,
    /// The call lost a race (e.g. the task is already claimed).
    Conflict,
    /// The store failed.
    Store,
    /// The request could not be decoded or is not allowed on this channel.
    BadRequest,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Store => "store",
            Self::BadRequest => "bad request",
        })
    }
}

/// Wire form of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RpcError {
    /// Category, for callers that branch on it.
    pub kind: ErrorKind,
    /// Human-readable reason.
    pub message: String,
}

impl RpcError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Run a query or mutation once.
    Call {
        /// Echoed back in the matching [`ServerMessage::Reply`].
        request_id: RequestId,
        /// What to run.
        request: Request,
    },
    /// Start a live task query. The server pushes a snapshot immediately and
    /// again after every change that affects the result.
    Subscribe {
        /// Echoed back in every [`ServerMessage::Snapshot`].
        subscription_id: SubscriptionId,
        /// Which tasks to watch.
        query: TaskQuery,
    },
    /// Stop a live query.
    Unsubscribe {
        /// The subscription to drop.
        subscription_id: SubscriptionId,
    },
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Result of a [`ClientMessage::Call`].
    Reply {
        /// The call being answered.
        request_id: RequestId,
        /// Outcome of the call.
        result: Result<Response, RpcError>,
    },
    /// Current result of a live query.
    Snapshot {
        /// The live query being refreshed.
        subscription_id: SubscriptionId,
        /// Every matching task, in insertion order.
        tasks: Vec<Task>,
    },
    /// A frame could not be processed.
    Error {
        /// Human-readable description.
        reason: String,
    },
}

/// Encodes a [`ClientMessage`] into bytes using postcard.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode_client(msg: &ClientMessage) -> Result<Vec<u8>, String> {
    postcard::to_allocvec(msg).map_err(|e| format!("client message encode error: {e}"))
}

/// Decodes a [`ClientMessage`] from bytes using postcard.
///
/// # Errors
///
/// Returns an error string if deserialization fails.
pub fn decode_client(bytes: &[u8]) -> Result<ClientMessage, String> {
    postcard::from_bytes(bytes).map_err(|e| format!("client message decode error: {e}"))
}

/// Encodes a [`ServerMessage`] into bytes using postcard.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode_server(msg: &ServerMessage) -> Result<Vec<u8>, String> {
    postcard::to_allocvec(msg).map_err(|e| format!("server message encode error: {e}"))
}

/// Decodes a [`ServerMessage`] from bytes using postcard.
///
/// # Errors
///
/// Returns an error string if deserialization fails.
pub fn decode_server(bytes: &[u8]) -> Result<ServerMessage, String> {
    postcard::from_bytes(bytes).map_err(|e| format!("server message decode error: {e}"))
}
