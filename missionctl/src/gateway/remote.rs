//! WebSocket gateway to a mission control server.
//!
//! Calls are correlated with replies by request id and live queries with
//! snapshots by subscription id. A background reader task demultiplexes
//! incoming frames; callers wait on a oneshot (calls) or an mpsc channel
//! (subscriptions).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use missionctl_proto::activity::ActivityEntry;
use missionctl_proto::agent::{Agent, AgentDetail, AgentId, AgentStatus, NewAgent, WorkingMemory};
use missionctl_proto::comment::{Comment, CommentId, NewComment};
use missionctl_proto::message::{AgentMessage, MessageId, NewMessage};
use missionctl_proto::rpc::{
    self, ClientMessage, Request, RequestId, Response, RpcError, ServerMessage, SubscriptionId,
};
use missionctl_proto::task::{
    ExecutionLogEntry, ExecutionStatus, NewTask, Task, TaskId, TaskPatch, TaskQuery, TaskStatus,
};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{GatewayError, TaskGateway, expect_done};

type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

type Pending = parking_lot::Mutex<HashMap<RequestId, oneshot::Sender<Result<Response, RpcError>>>>;

type Subscribers = parking_lot::Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<Vec<Task>>>>;

/// Default timeout for opening the WebSocket.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a call to be answered.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared between the gateway and its reader task.
struct Shared {
    pending: Pending,
    subscribers: Subscribers,
    connected: AtomicBool,
}

/// A live task query. Yields the full matching task list after every change.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Vec<Task>>,
}

impl Subscription {
    /// Returns the subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next snapshot. Returns `None` once the connection is
    /// gone.
    pub async fn next(&mut self) -> Option<Vec<Task>> {
        self.rx.recv().await
    }
}

/// [`TaskGateway`] over a WebSocket connection.
pub struct RemoteGateway {
    server_url: String,
    ws_sender: Mutex<WsSender>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    request_timeout: Duration,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl RemoteGateway {
    /// Connects to the server's `/ws` endpoint.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Timeout`] if the connection is not established
    ///   within 10 seconds.
    /// - [`GatewayError::Unreachable`] if the server refuses the connection.
    /// - [`GatewayError::Io`] for any other connection failure.
    pub async fn connect(
        server_url: &str,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let (ws_stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(server_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = server_url, "WebSocket connect timed out");
                    GatewayError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = server_url, err = %e, "WebSocket connect failed");
                    map_ws_connect_error(server_url, e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let shared = Arc::new(Shared {
            pending: parking_lot::Mutex::new(HashMap::new()),
            subscribers: parking_lot::Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        });
        let reader_handle = tokio::spawn(reader_loop(ws_reader, Arc::clone(&shared)));

        tracing::info!(url = server_url, "connected to mission control server");

        Ok(Self {
            server_url: server_url.to_string(),
            ws_sender: Mutex::new(ws_sender),
            shared,
            next_id: AtomicU64::new(1),
            request_timeout,
            _reader_handle: reader_handle,
        })
    }

    /// Returns the server URL this gateway is connected to.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Returns `true` while the reader task sees an open connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Starts a live query. The first snapshot arrives as soon as the server
    /// has run the query; until then the board is still loading.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionClosed`] if the frame cannot be sent.
    pub async fn subscribe(&self, query: TaskQuery) -> Result<Subscription, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().insert(id, tx);
        let msg = ClientMessage::Subscribe {
            subscription_id: id,
            query,
        };
        if let Err(e) = self.send(&msg).await {
            self.shared.subscribers.lock().remove(&id);
            return Err(e);
        }
        tracing::debug!(subscription_id = id, "subscribed");
        Ok(Subscription { id, rx })
    }

    /// Stops a live query.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionClosed`] if the frame cannot be sent.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<(), GatewayError> {
        self.shared.subscribers.lock().remove(&subscription.id);
        self.send(&ClientMessage::Unsubscribe {
            subscription_id: subscription.id,
        })
        .await
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::ConnectionClosed);
        }
        let bytes =
            rpc::encode_client(msg).map_err(|e| GatewayError::Io(std::io::Error::other(e)))?;
        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::Binary(bytes.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "WebSocket send failed");
            self.shared.connected.store(false, Ordering::Relaxed);
            GatewayError::ConnectionClosed
        })
    }

    // --- typed calls ---

    /// `tasks.list`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn list_tasks(&self, query: TaskQuery) -> Result<Vec<Task>, GatewayError> {
        match self.call(Request::ListTasks(query)).await? {
            Response::Tasks(tasks) => Ok(tasks),
            _ => Err(GatewayError::UnexpectedResponse("tasks.list")),
        }
    }

    /// `tasks.getByStatus`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, GatewayError> {
        match self.call(Request::TasksByStatus(status)).await? {
            Response::Tasks(tasks) => Ok(tasks),
            _ => Err(GatewayError::UnexpectedResponse("tasks.getByStatus")),
        }
    }

    /// `tasks.getSubTasks`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn sub_tasks(&self, parent: TaskId) -> Result<Vec<Task>, GatewayError> {
        match self.call(Request::SubTasks(parent)).await? {
            Response::Tasks(tasks) => Ok(tasks),
            _ => Err(GatewayError::UnexpectedResponse("tasks.getSubTasks")),
        }
    }

    /// `tasks.get`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>, GatewayError> {
        match self.call(Request::GetTask(id)).await? {
            Response::Task(task) => Ok(task),
            _ => Err(GatewayError::UnexpectedResponse("tasks.get")),
        }
    }

    /// `tasks.create`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn create_task(&self, new: NewTask) -> Result<TaskId, GatewayError> {
        match self.call(Request::CreateTask(new)).await? {
            Response::TaskCreated(id) => Ok(id),
            _ => Err(GatewayError::UnexpectedResponse("tasks.create")),
        }
    }

    /// `tasks.update`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<(), GatewayError> {
        let response = self.call(Request::UpdateTask { id, patch }).await?;
        expect_done(response, "tasks.update")
    }

    /// `tasks.claim`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error; a conflict if the task is
    /// already assigned.
    pub async fn claim_task(&self, id: TaskId, agent_id: AgentId) -> Result<(), GatewayError> {
        let response = self.call(Request::ClaimTask { id, agent_id }).await?;
        expect_done(response, "tasks.claim")
    }

    /// `tasks.complete`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn complete_task(&self, id: TaskId, success: bool) -> Result<(), GatewayError> {
        let response = self.call(Request::CompleteTask { id, success }).await?;
        expect_done(response, "tasks.complete")
    }

    /// `tasks.appendExecutionLog`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn append_execution_log(
        &self,
        id: TaskId,
        entry: ExecutionLogEntry,
    ) -> Result<(), GatewayError> {
        let response = self.call(Request::AppendExecutionLog { id, entry }).await?;
        expect_done(response, "tasks.appendExecutionLog")
    }

    /// `tasks.setExecutionStatus`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn set_execution_status(
        &self,
        id: TaskId,
        status: ExecutionStatus,
    ) -> Result<(), GatewayError> {
        let response = self.call(Request::SetExecutionStatus { id, status }).await?;
        expect_done(response, "tasks.setExecutionStatus")
    }

    /// `tasks.remove`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn remove_task(&self, id: TaskId) -> Result<(), GatewayError> {
        let response = self.call(Request::RemoveTask(id)).await?;
        expect_done(response, "tasks.remove")
    }

    /// `agents.list`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn list_agents(&self) -> Result<Vec<Agent>, GatewayError> {
        match self.call(Request::ListAgents).await? {
            Response::Agents(agents) => Ok(agents),
            _ => Err(GatewayError::UnexpectedResponse("agents.list")),
        }
    }

    /// `agents.getById`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn agent_by_id(&self, id: AgentId) -> Result<Option<Agent>, GatewayError> {
        match self.call(Request::GetAgentById(id)).await? {
            Response::Agent(agent) => Ok(agent),
            _ => Err(GatewayError::UnexpectedResponse("agents.getById")),
        }
    }

    /// `agents.getWithTasks`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn agent_detail(&self, handle: &str) -> Result<Option<AgentDetail>, GatewayError> {
        let request = Request::AgentDetail {
            handle: handle.to_string(),
        };
        match self.call(request).await? {
            Response::AgentDetail(detail) => Ok(detail.map(|d| *d)),
            _ => Err(GatewayError::UnexpectedResponse("agents.getWithTasks")),
        }
    }

    /// `agents.updateWorkingMemory`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn update_working_memory(
        &self,
        handle: &str,
        memory: WorkingMemory,
    ) -> Result<(), GatewayError> {
        let response = self
            .call(Request::UpdateWorkingMemory {
                handle: handle.to_string(),
                memory,
            })
            .await?;
        expect_done(response, "agents.updateWorkingMemory")
    }

    /// `agents.register`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn register_agent(&self, new: NewAgent) -> Result<AgentId, GatewayError> {
        match self.call(Request::RegisterAgent(new)).await? {
            Response::AgentRegistered(id) => Ok(id),
            _ => Err(GatewayError::UnexpectedResponse("agents.register")),
        }
    }

    /// `agents.heartbeat`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn heartbeat(
        &self,
        handle: &str,
        status: Option<AgentStatus>,
    ) -> Result<(), GatewayError> {
        let response = self
            .call(Request::Heartbeat {
                handle: handle.to_string(),
                status,
            })
            .await?;
        expect_done(response, "agents.heartbeat")
    }

    /// `agents.releaseTask`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn release_agent(&self, handle: &str) -> Result<(), GatewayError> {
        let response = self
            .call(Request::ReleaseAgent {
                handle: handle.to_string(),
            })
            .await?;
        expect_done(response, "agents.releaseTask")
    }

    /// `comments.listByTask`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn list_comments(&self, task_id: TaskId) -> Result<Vec<Comment>, GatewayError> {
        match self.call(Request::ListComments(task_id)).await? {
            Response::Comments(comments) => Ok(comments),
            _ => Err(GatewayError::UnexpectedResponse("comments.listByTask")),
        }
    }

    /// `comments.create`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn create_comment(&self, new: NewComment) -> Result<CommentId, GatewayError> {
        match self.call(Request::CreateComment(new)).await? {
            Response::CommentCreated(id) => Ok(id),
            _ => Err(GatewayError::UnexpectedResponse("comments.create")),
        }
    }

    /// `agentMessages.send`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn send_message(&self, new: NewMessage) -> Result<MessageId, GatewayError> {
        match self.call(Request::SendMessage(new)).await? {
            Response::MessageSent(id) => Ok(id),
            _ => Err(GatewayError::UnexpectedResponse("agentMessages.send")),
        }
    }

    /// `agentMessages.listAll`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn list_messages(&self, limit: u32) -> Result<Vec<AgentMessage>, GatewayError> {
        match self.call(Request::ListMessages { limit }).await? {
            Response::Messages(messages) => Ok(messages),
            _ => Err(GatewayError::UnexpectedResponse("agentMessages.listAll")),
        }
    }

    /// `agentMessages.inbox`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn inbox(&self, handle: &str) -> Result<Vec<AgentMessage>, GatewayError> {
        let request = Request::Inbox {
            handle: handle.to_string(),
        };
        match self.call(request).await? {
            Response::Messages(messages) => Ok(messages),
            _ => Err(GatewayError::UnexpectedResponse("agentMessages.inbox")),
        }
    }

    /// `agentMessages.acknowledge`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn acknowledge_message(
        &self,
        id: MessageId,
        response: Option<String>,
    ) -> Result<(), GatewayError> {
        let reply = self
            .call(Request::AcknowledgeMessage { id, response })
            .await?;
        expect_done(reply, "agentMessages.acknowledge")
    }

    /// `activity.recent`
    ///
    /// # Errors
    ///
    /// Returns any transport or server error.
    pub async fn recent_activity(&self, limit: u32) -> Result<Vec<ActivityEntry>, GatewayError> {
        match self.call(Request::RecentActivity { limit }).await? {
            Response::Activity(entries) => Ok(entries),
            _ => Err(GatewayError::UnexpectedResponse("activity.recent")),
        }
    }
}

impl TaskGateway for RemoteGateway {
    /// Sends a call and waits for the matching reply.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Timeout`] if no reply arrives in time.
    /// - [`GatewayError::ConnectionClosed`] if the connection drops first.
    /// - [`GatewayError::Rpc`] if the server rejected the request.
    async fn call(&self, request: Request) -> Result<Response, GatewayError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = request.name();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(request_id, tx);

        if let Err(e) = self
            .send(&ClientMessage::Call {
                request_id,
                request,
            })
            .await
        {
            self.shared.pending.lock().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result.map_err(GatewayError::Rpc),
            Ok(Err(_)) => Err(GatewayError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().remove(&request_id);
                tracing::warn!(op, request_id, "request timed out");
                Err(GatewayError::Timeout)
            }
        }
    }
}

/// Background task that reads server frames and routes them.
///
/// Malformed frames are logged and skipped. When the socket closes every
/// pending call fails with [`GatewayError::ConnectionClosed`] and every
/// subscription ends.
async fn reader_loop(mut ws_reader: WsReader, shared: Arc<Shared>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match rpc::decode_server(&data) {
                Ok(ServerMessage::Reply { request_id, result }) => {
                    let waiter = shared.pending.lock().remove(&request_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(result);
                        }
                        None => tracing::debug!(request_id, "reply for abandoned request"),
                    }
                }
                Ok(ServerMessage::Snapshot {
                    subscription_id,
                    tasks,
                }) => {
                    let mut subscribers = shared.subscribers.lock();
                    if let Some(tx) = subscribers.get(&subscription_id)
                        && tx.send(tasks).is_err()
                    {
                        subscribers.remove(&subscription_id);
                    }
                }
                Ok(ServerMessage::Error { reason }) => {
                    tracing::warn!(reason = %reason, "server error");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed server frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ignore ping/pong/text/raw frames.
            }
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::Relaxed);
    shared.pending.lock().clear();
    shared.subscribers.lock().clear();
    tracing::info!("gateway reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`GatewayError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> GatewayError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                GatewayError::Unreachable(url.to_string())
            } else {
                GatewayError::Io(io_err)
            }
        }
        WsError::Http(response) => GatewayError::Io(std::io::Error::other(format!(
            "server HTTP error: status {}",
            response.status()
        ))),
        other => GatewayError::Io(std::io::Error::other(format!(
            "server connection error: {other}"
        ))),
    }
}
