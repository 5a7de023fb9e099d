//! Integration tests for the client board against a live server.
//!
//! Validates that:
//! - the board stays loading until the first snapshot arrives
//! - a drag across columns issues one move and the next snapshot shows it
//! - a drop in place issues nothing
//! - the keyboard path drives the same reconciler
//! - a stale drag reports the server's not-found

use std::sync::Arc;
use std::time::Duration;

use missionctl::board::Board;
use missionctl::board::keyboard::{Key, KeyboardSensor};
use missionctl::board::reconciler::{BoardReconciler, DropOutcome, DropTarget};
use missionctl::gateway::remote::{DEFAULT_REQUEST_TIMEOUT, RemoteGateway, Subscription};
use missionctl::gateway::{GatewayError, TaskGateway};
use missionctl_proto::agent::AgentId;
use missionctl_proto::rpc::ErrorKind;
use missionctl_proto::task::{BoardId, NewTask, Priority, TaskId, TaskQuery, TaskStatus};

async fn start_server() -> (String, tokio::task::JoinHandle<()>) {
    let (addr, handle) = missionctl_server::server::start_server("127.0.0.1:0")
        .await
        .expect("failed to start server");
    (format!("ws://{addr}/ws"), handle)
}

async fn connect(url: &str) -> Arc<RemoteGateway> {
    Arc::new(
        RemoteGateway::connect(url, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap(),
    )
}

/// Applies snapshots until `done` holds for the board.
async fn sync_until(
    board: &mut Board,
    subscription: &mut Subscription,
    done: impl Fn(&Board) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&*board) {
            let tasks = subscription.next().await.expect("subscription closed");
            board.apply_snapshot(tasks);
        }
    })
    .await
    .expect("board did not reach the expected state");
}

async fn create(gateway: &RemoteGateway, title: &str, status: TaskStatus) -> TaskId {
    let id = gateway
        .create_task(NewTask::new(
            BoardId::new("deployment"),
            title,
            Priority::Medium,
        ))
        .await
        .unwrap();
    if status != TaskStatus::Backlog {
        gateway.move_task(id, status).await.unwrap();
    }
    id
}

#[tokio::test]
async fn board_loads_then_follows_server() {
    let (url, _handle) = start_server().await;
    let gateway = connect(&url).await;

    let mut board = Board::new();
    assert!(board.is_loading());

    let mut sub = gateway
        .subscribe(TaskQuery::board(BoardId::new("deployment")))
        .await
        .unwrap();
    sync_until(&mut board, &mut sub, |b| !b.is_loading()).await;
    assert!(board.tasks().is_empty());

    let id = create(&gateway, "Ship v2", TaskStatus::Backlog).await;
    sync_until(&mut board, &mut sub, |b| b.task(id).is_some()).await;
    assert_eq!(board.column(TaskStatus::Backlog).len(), 1);
}

#[tokio::test]
async fn drag_to_done_moves_once_and_snapshot_follows() {
    let (url, _handle) = start_server().await;
    let gateway = connect(&url).await;
    let id = create(&gateway, "deploy", TaskStatus::Todo).await;

    let mut sub = gateway.subscribe(TaskQuery::all()).await.unwrap();
    let mut board = Board::new();
    sync_until(&mut board, &mut sub, |b| {
        b.task(id).is_some_and(|t| t.status == TaskStatus::Todo)
    })
    .await;

    let mut reconciler = BoardReconciler::new(Arc::clone(&gateway));
    reconciler.drag_start(&board, id);
    let outcome = reconciler
        .drag_end(&board, Some(DropTarget::Column(TaskStatus::Done)))
        .await;
    assert_eq!(
        outcome,
        DropOutcome::Moved {
            task: id,
            from: TaskStatus::Todo,
            to: TaskStatus::Done,
        }
    );

    // Local board is untouched until the pushed snapshot arrives.
    assert_eq!(board.task(id).unwrap().status, TaskStatus::Todo);
    sync_until(&mut board, &mut sub, |b| {
        b.task(id).is_some_and(|t| t.status == TaskStatus::Done)
    })
    .await;
}

#[tokio::test]
async fn drop_in_own_column_leaves_task_alone() {
    let (url, _handle) = start_server().await;
    let gateway = connect(&url).await;
    let id = create(&gateway, "deploy", TaskStatus::Todo).await;
    let before = gateway.get_task(id).await.unwrap().unwrap();

    let mut board = Board::new();
    board.apply_snapshot(gateway.list_tasks(TaskQuery::all()).await.unwrap());

    let mut reconciler = BoardReconciler::new(Arc::clone(&gateway));
    reconciler.drag_start(&board, id);
    let outcome = reconciler
        .drag_end(&board, Some(DropTarget::Column(TaskStatus::Todo)))
        .await;
    assert_eq!(outcome, DropOutcome::Unchanged);

    let after = gateway.get_task(id).await.unwrap().unwrap();
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn keyboard_drag_moves_card_right() {
    let (url, _handle) = start_server().await;
    let gateway = connect(&url).await;
    let id = create(&gateway, "keyboard", TaskStatus::InProgress).await;

    let mut board = Board::new();
    board.apply_snapshot(gateway.list_tasks(TaskQuery::all()).await.unwrap());

    let mut sensor = KeyboardSensor::new();
    let mut reconciler = BoardReconciler::new(Arc::clone(&gateway));
    sensor.focus(id);

    let mut last = None;
    for key in [Key::Space, Key::Right, Key::Enter] {
        if let Some(event) = sensor.handle_key(&board, key) {
            last = reconciler.handle(&board, event).await;
        }
    }
    assert!(matches!(
        last,
        Some(DropOutcome::Moved {
            to: TaskStatus::Review,
            ..
        })
    ));
    assert_eq!(
        gateway.get_task(id).await.unwrap().unwrap().status,
        TaskStatus::Review
    );
}

#[tokio::test]
async fn stale_drag_reports_not_found() {
    let (url, _handle) = start_server().await;
    let gateway = connect(&url).await;
    let id = create(&gateway, "doomed", TaskStatus::Todo).await;

    let mut board = Board::new();
    board.apply_snapshot(gateway.list_tasks(TaskQuery::all()).await.unwrap());

    // Someone else removes the task before the drop.
    let other = connect(&url).await;
    other.remove_task(id).await.unwrap();

    let mut reconciler = BoardReconciler::new(Arc::clone(&gateway));
    reconciler.drag_start(&board, id);
    let outcome = reconciler
        .drag_end(&board, Some(DropTarget::Column(TaskStatus::Done)))
        .await;
    match outcome {
        DropOutcome::Failed { task, to, error } => {
            assert_eq!(task, id);
            assert_eq!(to, TaskStatus::Done);
            assert!(error.starts_with("not found"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn second_claim_over_the_wire_conflicts() {
    let (url, _handle) = start_server().await;
    let gateway = connect(&url).await;
    let id = create(&gateway, "contested", TaskStatus::Todo).await;

    gateway
        .claim_task(id, AgentId::new("agent-1"))
        .await
        .unwrap();
    let err = gateway
        .claim_task(id, AgentId::new("agent-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Rpc(_)));
    assert_eq!(err.rpc_kind(), Some(ErrorKind::Conflict));
    assert_eq!(
        gateway.get_task(id).await.unwrap().unwrap().assignee_id,
        Some(AgentId::new("agent-1"))
    );
}
