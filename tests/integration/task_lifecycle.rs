//! Integration tests for the task lifecycle through the server.
//!
//! Drives the service facade directly and over a real WebSocket:
//! - create / claim / complete end to end
//! - field limits leave documents untouched
//! - claim exclusivity, idempotent moves, not-found on stale ids
//! - live query snapshots reach every subscribed connection

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use missionctl_proto::agent::AgentId;
use missionctl_proto::rpc::{
    self, ClientMessage, ErrorKind, Request, Response, RpcError, ServerMessage,
};
use missionctl_proto::task::{
    BoardId, ExecutionLogEntry, ExecutionStatus, LogEntryKind, NewTask, Priority, Task, TaskId,
    TaskPatch, TaskQuery, TaskStatus,
};
use missionctl_server::server::{self, ServerState};
use missionctl_server::service::MissionControl;
use tokio_tungstenite::tungstenite::Message;

type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn create(mission: &MissionControl, board: &str, title: &str) -> TaskId {
    match mission
        .dispatch(Request::CreateTask(NewTask::new(
            BoardId::new(board),
            title,
            Priority::Medium,
        )))
        .await
        .unwrap()
    {
        Response::TaskCreated(id) => id,
        other => panic!("unexpected response: {other:?}"),
    }
}

async fn get(mission: &MissionControl, id: TaskId) -> Option<Task> {
    match mission.dispatch(Request::GetTask(id)).await.unwrap() {
        Response::Task(task) => task,
        other => panic!("unexpected response: {other:?}"),
    }
}

fn kind(result: Result<Response, RpcError>) -> ErrorKind {
    result.unwrap_err().kind
}

// =============================================================================
// Facade
// =============================================================================

#[tokio::test]
async fn ship_v2_end_to_end() {
    let mission = MissionControl::new();
    create(&mission, "deployment", "Earlier work").await;

    let id = match mission
        .dispatch(Request::CreateTask(NewTask::new(
            BoardId::new("deployment"),
            "Ship v2",
            Priority::High,
        )))
        .await
        .unwrap()
    {
        Response::TaskCreated(id) => id,
        other => panic!("unexpected response: {other:?}"),
    };
    let task = get(&mission, id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Backlog);
    assert_eq!(task.order, 1);
    assert!(task.description.is_none());
    assert!(task.assignee_id.is_none());
    assert!(task.tags.is_none());

    mission
        .dispatch(Request::ClaimTask {
            id,
            agent_id: AgentId::new("agent-1"),
        })
        .await
        .unwrap();
    let task = get(&mission, id).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assignee_id, Some(AgentId::new("agent-1")));
    assert_eq!(task.execution_status, Some(ExecutionStatus::Pending));
    assert!(task.claimed_at.is_some());

    let second = mission
        .dispatch(Request::ClaimTask {
            id,
            agent_id: AgentId::new("agent-2"),
        })
        .await;
    assert_eq!(kind(second), ErrorKind::Conflict);
    assert_eq!(
        get(&mission, id).await.unwrap().assignee_id,
        Some(AgentId::new("agent-1"))
    );

    mission
        .dispatch(Request::CompleteTask { id, success: true })
        .await
        .unwrap();
    let task = get(&mission, id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.execution_status, Some(ExecutionStatus::Completed));
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn overlong_title_is_rejected_and_nothing_changes() {
    let mission = MissionControl::new();
    let long = "x".repeat(201);

    let result = mission
        .dispatch(Request::CreateTask(NewTask::new(
            BoardId::new("b"),
            long.clone(),
            Priority::Low,
        )))
        .await;
    assert_eq!(kind(result), ErrorKind::Validation);
    assert!(mission.tasks().list(&TaskQuery::all()).await.is_empty());

    let id = create(&mission, "b", "short").await;
    let before = get(&mission, id).await.unwrap();
    let result = mission
        .dispatch(Request::UpdateTask {
            id,
            patch: TaskPatch {
                title: Some(long),
                ..TaskPatch::default()
            },
        })
        .await;
    assert_eq!(kind(result), ErrorKind::Validation);
    assert_eq!(get(&mission, id).await.unwrap(), before);
}

#[tokio::test]
async fn execution_log_keeps_the_latest_thousand() {
    let mission = MissionControl::new();
    let id = create(&mission, "b", "long runner").await;

    for i in 0..1005_u64 {
        mission
            .dispatch(Request::AppendExecutionLog {
                id,
                entry: ExecutionLogEntry::new(i, LogEntryKind::Output, format!("line {i}")),
            })
            .await
            .unwrap();
    }

    let log = get(&mission, id).await.unwrap().execution_log;
    assert_eq!(log.len(), 1000);
    assert_eq!(log[0].content, "line 5");
    assert_eq!(log[999].content, "line 1004");
}

#[tokio::test]
async fn oversized_log_content_is_rejected() {
    let mission = MissionControl::new();
    let id = create(&mission, "b", "t").await;

    let result = mission
        .dispatch(Request::AppendExecutionLog {
            id,
            entry: ExecutionLogEntry::new(0, LogEntryKind::Output, "y".repeat(10_001)),
        })
        .await;
    assert_eq!(kind(result), ErrorKind::Validation);
    assert!(get(&mission, id).await.unwrap().execution_log.is_empty());
}

#[tokio::test]
async fn moving_twice_is_idempotent() {
    let mission = MissionControl::new();
    let id = create(&mission, "b", "t").await;

    for _ in 0..2 {
        mission
            .dispatch(Request::MoveTask {
                id,
                status: TaskStatus::Review,
            })
            .await
            .unwrap();
    }
    assert_eq!(get(&mission, id).await.unwrap().status, TaskStatus::Review);
}

#[tokio::test]
async fn removing_missing_task_is_not_found() {
    let mission = MissionControl::new();
    let id = create(&mission, "b", "keep me").await;

    let result = mission.dispatch(Request::RemoveTask(TaskId::new())).await;
    assert_eq!(kind(result), ErrorKind::NotFound);
    assert!(get(&mission, id).await.is_some());
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let mission = Arc::new(MissionControl::new());
    let id = create(&mission, "b", "contested").await;

    let mut handles = Vec::new();
    for n in 0..8 {
        let mission = Arc::clone(&mission);
        handles.push(tokio::spawn(async move {
            mission
                .dispatch(Request::ClaimTask {
                    id,
                    agent_id: AgentId::new(format!("agent-{n}")),
                })
                .await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => assert_eq!(e.kind, ErrorKind::Conflict),
        }
    }
    assert_eq!(wins, 1);
}

// =============================================================================
// WebSocket
// =============================================================================

async fn connect(url: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    let bytes = rpc::encode_client(msg).unwrap();
    ws.send(Message::Binary(bytes.into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within 5s")
            .unwrap()
            .unwrap();
        if let Message::Binary(data) = frame {
            return rpc::decode_server(&data).unwrap();
        }
    }
}

async fn start() -> (String, tokio::task::JoinHandle<()>) {
    let state = Arc::new(ServerState::new());
    let (addr, handle) = server::start_server_with_state("127.0.0.1:0", state)
        .await
        .unwrap();
    (format!("ws://{addr}/ws"), handle)
}

#[tokio::test]
async fn other_connections_see_the_move() {
    let (url, _handle) = start().await;
    let mut watcher = connect(&url).await;
    let mut actor = connect(&url).await;

    send(
        &mut watcher,
        &ClientMessage::Subscribe {
            subscription_id: 1,
            query: TaskQuery::board(BoardId::new("deployment")),
        },
    )
    .await;
    assert!(matches!(
        recv(&mut watcher).await,
        ServerMessage::Snapshot { subscription_id: 1, tasks } if tasks.is_empty()
    ));

    send(
        &mut actor,
        &ClientMessage::Call {
            request_id: 10,
            request: Request::CreateTask(NewTask::new(
                BoardId::new("deployment"),
                "Ship v2",
                Priority::High,
            )),
        },
    )
    .await;
    let ServerMessage::Reply {
        request_id: 10,
        result: Ok(Response::TaskCreated(id)),
    } = recv(&mut actor).await
    else {
        panic!("create was not acknowledged");
    };

    let ServerMessage::Snapshot { tasks, .. } = recv(&mut watcher).await else {
        panic!("expected snapshot after create");
    };
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Backlog);

    send(
        &mut actor,
        &ClientMessage::Call {
            request_id: 11,
            request: Request::MoveTask {
                id,
                status: TaskStatus::Todo,
            },
        },
    )
    .await;
    assert!(matches!(
        recv(&mut actor).await,
        ServerMessage::Reply {
            request_id: 11,
            result: Ok(Response::Done)
        }
    ));

    let ServerMessage::Snapshot { tasks, .. } = recv(&mut watcher).await else {
        panic!("expected snapshot after move");
    };
    assert_eq!(tasks[0].status, TaskStatus::Todo);
}

#[tokio::test]
async fn changes_on_other_boards_are_not_pushed() {
    let (url, _handle) = start().await;
    let mut ws = connect(&url).await;

    send(
        &mut ws,
        &ClientMessage::Subscribe {
            subscription_id: 7,
            query: TaskQuery::board(BoardId::new("alpha")),
        },
    )
    .await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Snapshot { .. }));

    send(
        &mut ws,
        &ClientMessage::Call {
            request_id: 1,
            request: Request::CreateTask(NewTask::new(
                BoardId::new("beta"),
                "elsewhere",
                Priority::Low,
            )),
        },
    )
    .await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::Reply { request_id: 1, .. }
    ));

    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "no snapshot expected for another board");
}

#[tokio::test]
async fn rejected_call_carries_error_kind() {
    let (url, _handle) = start().await;
    let mut ws = connect(&url).await;

    send(
        &mut ws,
        &ClientMessage::Call {
            request_id: 3,
            request: Request::MoveTask {
                id: TaskId::new(),
                status: TaskStatus::Done,
            },
        },
    )
    .await;
    match recv(&mut ws).await {
        ServerMessage::Reply {
            request_id: 3,
            result: Err(e),
        } => assert_eq!(e.kind, ErrorKind::NotFound),
        other => panic!("unexpected message: {other:?}"),
    }
}
