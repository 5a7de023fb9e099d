//! WebSocket server: request dispatch and live task queries.
//!
//! Each connection gets a writer task fed by an unbounded channel, a reader
//! loop that answers calls, and a live-query task that owns the
//! connection's subscriptions. The live-query task listens to the task
//! collection's change notices and pushes a fresh snapshot to every
//! subscription whose filter matched the document before or after the write.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use missionctl_proto::rpc::{
    self, ClientMessage, ErrorKind, RpcError, ServerMessage, SubscriptionId,
};
use missionctl_proto::task::{Task, TaskQuery};
use tokio::sync::{broadcast, mpsc};

use crate::service::MissionControl;
use crate::store::Change;

/// Default maximum accepted frame size in bytes (256 KB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 256 * 1024;

/// Shared server state.
pub struct ServerState {
    /// Collections and dispatch.
    pub mission: MissionControl,
    /// Frames larger than this are rejected.
    max_payload_size: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates empty state with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_PAYLOAD_SIZE, MissionControl::new())
    }

    /// Creates state with a custom frame size limit around existing
    /// collections.
    #[must_use]
    pub const fn with_config(max_payload_size: usize, mission: MissionControl) -> Self {
        Self {
            mission,
            max_payload_size,
        }
    }
}

/// Commands from the reader loop to the live-query task.
#[derive(Debug)]
enum LiveCommand {
    Subscribe {
        subscription_id: SubscriptionId,
        query: TaskQuery,
    },
    Unsubscribe {
        subscription_id: SubscriptionId,
    },
}

/// Handles an upgraded WebSocket connection.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let (live_tx, live_rx) = mpsc::unbounded_channel::<LiveCommand>();

    // Subscribe to changes before any query runs so no write slips between
    // a snapshot and the first notice.
    let changes = state.mission.tasks().subscribe();

    tracing::info!("client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!("WebSocket write failed");
                break;
            }
        }
    });

    let live_task = tokio::spawn(run_live_queries(
        Arc::clone(&state),
        changes,
        live_rx,
        tx.clone(),
    ));

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(&data, &reader_state, &tx, &live_tx).await;
                }
                Message::Close(_) => {
                    tracing::info!("received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }
    live_task.abort();
    tracing::info!("client disconnected");
}

/// Handles one binary frame from a client.
async fn handle_binary_message(
    data: &[u8],
    state: &ServerState,
    tx: &mpsc::UnboundedSender<Message>,
    live: &mpsc::UnboundedSender<LiveCommand>,
) {
    if data.len() > state.max_payload_size {
        tracing::warn!(
            size = data.len(),
            max = state.max_payload_size,
            "frame exceeds size limit"
        );
        send(
            tx,
            &ServerMessage::Error {
                reason: format!(
                    "payload too large: {} bytes (max {})",
                    data.len(),
                    state.max_payload_size
                ),
            },
        );
        return;
    }

    let msg = match rpc::decode_client(data) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode client message");
            send(tx, &ServerMessage::Error { reason: e });
            return;
        }
    };

    match msg {
        ClientMessage::Call {
            request_id,
            request,
        } => {
            let result = state.mission.dispatch(request).await;
            send(tx, &ServerMessage::Reply { request_id, result });
        }
        ClientMessage::Subscribe {
            subscription_id,
            query,
        } => {
            tracing::debug!(subscription_id, "subscribe");
            if live
                .send(LiveCommand::Subscribe {
                    subscription_id,
                    query,
                })
                .is_err()
            {
                send(
                    tx,
                    &ServerMessage::Error {
                        reason: RpcError::new(ErrorKind::Store, "live queries unavailable")
                            .to_string(),
                    },
                );
            }
        }
        ClientMessage::Unsubscribe { subscription_id } => {
            tracing::debug!(subscription_id, "unsubscribe");
            let _ = live.send(LiveCommand::Unsubscribe { subscription_id });
        }
    }
}

/// Owns a connection's subscriptions and pushes snapshots as tasks change.
async fn run_live_queries(
    state: Arc<ServerState>,
    mut changes: broadcast::Receiver<Change<Task>>,
    mut commands: mpsc::UnboundedReceiver<LiveCommand>,
    tx: mpsc::UnboundedSender<Message>,
) {
    let mut subscriptions: BTreeMap<SubscriptionId, TaskQuery> = BTreeMap::new();
    loop {
        tokio::select! {
            // Commands first, so an unsubscribe sent before a write wins.
            biased;
            cmd = commands.recv() => match cmd {
                Some(LiveCommand::Subscribe { subscription_id, query }) => {
                    push_snapshot(&state, &tx, subscription_id, &query).await;
                    subscriptions.insert(subscription_id, query);
                }
                Some(LiveCommand::Unsubscribe { subscription_id }) => {
                    subscriptions.remove(&subscription_id);
                }
                None => break,
            },
            change = changes.recv() => match change {
                Ok(change) => {
                    for (id, query) in &subscriptions {
                        if affects(query, &change) {
                            push_snapshot(&state, &tx, *id, query).await;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "live queries lagged, refreshing all");
                    for (id, query) in &subscriptions {
                        push_snapshot(&state, &tx, *id, query).await;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Returns `true` if a write may have changed the result of `query`.
fn affects(query: &TaskQuery, change: &Change<Task>) -> bool {
    change.before.as_ref().is_some_and(|t| query.matches(t))
        || change.after.as_ref().is_some_and(|t| query.matches(t))
}

async fn push_snapshot(
    state: &ServerState,
    tx: &mpsc::UnboundedSender<Message>,
    subscription_id: SubscriptionId,
    query: &TaskQuery,
) {
    let tasks = state.mission.tasks().list(query).await;
    tracing::trace!(subscription_id, count = tasks.len(), "pushing snapshot");
    send(
        tx,
        &ServerMessage::Snapshot {
            subscription_id,
            tasks,
        },
    );
}

/// Encodes a server message and queues it for the connection's writer.
fn send(tx: &mpsc::UnboundedSender<Message>, msg: &ServerMessage) {
    match rpc::encode_server(msg) {
        Ok(bytes) => {
            let _ = tx.send(Message::Binary(bytes.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode server message"),
    }
}

/// Starts the server on the given address with empty state and returns the
/// bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the server with a pre-configured [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the server in-process on `127.0.0.1:0` for testing.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use missionctl_proto::rpc::{Request, Response};
    use missionctl_proto::task::{BoardId, NewTask, Priority, TaskStatus};
    use tokio_tungstenite::tungstenite;

    use super::*;

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect(addr: std::net::SocketAddr) -> Ws {
        let url = format!("ws://{addr}/ws");
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        ws
    }

    async fn ws_send(ws: &mut Ws, msg: &ClientMessage) {
        let bytes = rpc::encode_client(msg).unwrap();
        ws.send(tungstenite::Message::Binary(bytes.into()))
            .await
            .unwrap();
    }

    async fn ws_recv(ws: &mut Ws) -> ServerMessage {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for server message")
            .unwrap()
            .unwrap();
        rpc::decode_server(&msg.into_data()).unwrap()
    }

    async fn call(ws: &mut Ws, request_id: u64, request: Request) -> Result<Response, RpcError> {
        ws_send(ws, &ClientMessage::Call { request_id, request }).await;
        loop {
            if let ServerMessage::Reply {
                request_id: id,
                result,
            } = ws_recv(ws).await
                && id == request_id
            {
                return result;
            }
        }
    }

    fn new_task(board: &str, title: &str) -> NewTask {
        NewTask::new(BoardId::new(board), title, Priority::Medium)
    }

    #[test]
    fn affects_checks_both_images() {
        let mut task = Task {
            id: missionctl_proto::task::TaskId::new(),
            board_id: BoardId::new("a"),
            title: "t".to_string(),
            description: None,
            status: TaskStatus::Backlog,
            priority: Priority::Low,
            assignee_id: None,
            parent_task_id: None,
            created_by: None,
            tags: None,
            required_skills: None,
            due_date: None,
            acceptance_criteria: None,
            order: 0,
            execution_log: Vec::new(),
            execution_status: None,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
            claimed_at: None,
        };
        let board_a = TaskQuery::board(BoardId::new("a"));
        let board_b = TaskQuery::board(BoardId::new("b"));

        let before = task.clone();
        task.board_id = BoardId::new("b");
        let moved = Change {
            before: Some(before),
            after: Some(task),
        };
        assert!(affects(&board_a, &moved));
        assert!(affects(&board_b, &moved));
        assert!(!affects(&TaskQuery::board(BoardId::new("c")), &moved));
    }

    #[tokio::test]
    async fn call_round_trip() {
        let (addr, _handle) = start_test_server().await;
        let mut ws = connect(addr).await;

        let created = call(&mut ws, 1, Request::CreateTask(new_task("ops", "Deploy")))
            .await
            .unwrap();
        let Response::TaskCreated(id) = created else {
            panic!("expected TaskCreated, got {created:?}");
        };

        let fetched = call(&mut ws, 2, Request::GetTask(id)).await.unwrap();
        let Response::Task(Some(task)) = fetched else {
            panic!("expected task, got {fetched:?}");
        };
        assert_eq!(task.title, "Deploy");
        assert_eq!(task.status, TaskStatus::Backlog);
    }

    #[tokio::test]
    async fn errors_come_back_as_replies() {
        let (addr, _handle) = start_test_server().await;
        let mut ws = connect(addr).await;

        let err = call(
            &mut ws,
            9,
            Request::MoveTask {
                id: missionctl_proto::task::TaskId::new(),
                status: TaskStatus::Done,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn subscription_pushes_initial_and_updated_snapshots() {
        let (addr, _handle) = start_test_server().await;
        let mut watcher = connect(addr).await;
        let mut writer = connect(addr).await;

        ws_send(
            &mut watcher,
            &ClientMessage::Subscribe {
                subscription_id: 4,
                query: TaskQuery::board(BoardId::new("ops")),
            },
        )
        .await;
        assert_eq!(
            ws_recv(&mut watcher).await,
            ServerMessage::Snapshot {
                subscription_id: 4,
                tasks: vec![]
            }
        );

        // A write on another board is not pushed.
        call(&mut writer, 1, Request::CreateTask(new_task("other", "x")))
            .await
            .unwrap();
        call(&mut writer, 2, Request::CreateTask(new_task("ops", "y")))
            .await
            .unwrap();

        match ws_recv(&mut watcher).await {
            ServerMessage::Snapshot {
                subscription_id,
                tasks,
            } => {
                assert_eq!(subscription_id, 4);
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0].title, "y");
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_snapshots() {
        let (addr, _handle) = start_test_server().await;
        let mut ws = connect(addr).await;

        ws_send(
            &mut ws,
            &ClientMessage::Subscribe {
                subscription_id: 1,
                query: TaskQuery::all(),
            },
        )
        .await;
        assert!(matches!(
            ws_recv(&mut ws).await,
            ServerMessage::Snapshot { .. }
        ));
        ws_send(&mut ws, &ClientMessage::Unsubscribe { subscription_id: 1 }).await;

        // The reply is the only frame; no snapshot follows the write.
        let reply = call(&mut ws, 5, Request::CreateTask(new_task("a", "t"))).await;
        assert!(reply.is_ok());
        let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
        assert!(next.is_err(), "unexpected frame after unsubscribe");
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let state = Arc::new(ServerState::with_config(64, MissionControl::new()));
        let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
            .await
            .unwrap();
        let mut ws = connect(addr).await;

        ws_send(
            &mut ws,
            &ClientMessage::Call {
                request_id: 1,
                request: Request::CreateTask(new_task("ops", &"x".repeat(100))),
            },
        )
        .await;
        match ws_recv(&mut ws).await {
            ServerMessage::Error { reason } => assert!(reason.contains("payload too large")),
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(
            state
                .mission
                .tasks()
                .list(&TaskQuery::all())
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn garbage_frame_yields_error() {
        let (addr, _handle) = start_test_server().await;
        let mut ws = connect(addr).await;
        ws.send(tungstenite::Message::Binary(vec![0xFF, 0xFF, 0xFF].into()))
            .await
            .unwrap();
        assert!(matches!(
            ws_recv(&mut ws).await,
            ServerMessage::Error { .. }
        ));
    }
}
