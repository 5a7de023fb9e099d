//! Integration tests for agent detail, working memory and direct messages
//! through the WebSocket gateway.

use std::time::Duration;

use missionctl::gateway::GatewayError;
use missionctl::gateway::remote::{DEFAULT_REQUEST_TIMEOUT, RemoteGateway};
use missionctl_proto::agent::{AGENT_DETAIL_ACTIVITY, NewAgent, WorkingMemory};
use missionctl_proto::message::{NewMessage, conversations};
use missionctl_proto::rpc::ErrorKind;
use missionctl_proto::task::{BoardId, NewTask, Priority};

async fn connect() -> (RemoteGateway, tokio::task::JoinHandle<()>) {
    let (addr, handle) = missionctl_server::server::start_server("127.0.0.1:0")
        .await
        .expect("failed to start server");
    let gateway = RemoteGateway::connect(&format!("ws://{addr}/ws"), DEFAULT_REQUEST_TIMEOUT)
        .await
        .unwrap();
    (gateway, handle)
}

async fn register(gateway: &RemoteGateway, handle: &str) {
    gateway
        .register_agent(NewAgent {
            handle: handle.to_string(),
            name: handle.to_string(),
            role: "worker".to_string(),
            skills: vec![],
        })
        .await
        .unwrap();
}

fn message(from: &str, to: &str, content: &str) -> NewMessage {
    NewMessage {
        from: from.to_string(),
        to: to.to_string(),
        message_type: "handoff".to_string(),
        content: content.to_string(),
    }
}

#[tokio::test]
async fn agent_detail_shows_claimed_work_and_memory() {
    let (gateway, _handle) = connect().await;
    register(&gateway, "lena").await;
    let lena = gateway.agent_detail("lena").await.unwrap().unwrap().agent;

    for title in ["Ship v2", "Write notes"] {
        let id = gateway
            .create_task(NewTask::new(BoardId::new("deployment"), title, Priority::High))
            .await
            .unwrap();
        gateway.claim_task(id, lena.id.clone()).await.unwrap();
    }
    gateway
        .update_working_memory(
            "@lena",
            WorkingMemory {
                current_focus: Some("Ship v2".to_string()),
                updated_at: 7,
                ..WorkingMemory::default()
            },
        )
        .await
        .unwrap();

    let detail = gateway.agent_detail("@lena").await.unwrap().unwrap();
    assert_eq!(detail.tasks.len(), 2);
    assert!(detail.activity.len() <= AGENT_DETAIL_ACTIVITY);
    assert_eq!(detail.activity.len(), 2);
    assert_eq!(detail.activity[0].task_title.as_deref(), Some("Write notes"));
    assert_eq!(
        detail.agent.working_memory.and_then(|m| m.current_focus),
        Some("Ship v2".to_string())
    );

    let by_id = gateway.agent_by_id(lena.id).await.unwrap().unwrap();
    assert_eq!(by_id.handle, "lena");
    assert!(gateway.agent_detail("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn messages_flow_between_agents() {
    let (gateway, _handle) = connect().await;
    register(&gateway, "lena").await;
    register(&gateway, "ops").await;

    let first = gateway
        .send_message(message("lena", "ops", "take the deploy"))
        .await
        .unwrap();
    // Keep creation times distinct so ordering is by time, not by id.
    tokio::time::sleep(Duration::from_millis(5)).await;
    gateway
        .send_message(message("ops", "lena", "taking it"))
        .await
        .unwrap();

    let inbox = gateway.inbox("ops").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id, first);

    gateway
        .acknowledge_message(first, Some("on it".to_string()))
        .await
        .unwrap();
    assert!(gateway.inbox("ops").await.unwrap().is_empty());

    let all = gateway.list_messages(300).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].content, "taking it");
    assert_eq!(all[1].response.as_deref(), Some("on it"));

    let grouped = conversations(all);
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[0].messages[0].content, "taking it");
}

#[tokio::test]
async fn message_to_unknown_agent_is_not_found() {
    let (gateway, _handle) = connect().await;
    register(&gateway, "lena").await;

    let err = gateway
        .send_message(message("lena", "ghost", "hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Rpc(_)));
    assert_eq!(err.rpc_kind(), Some(ErrorKind::NotFound));
    assert!(gateway.list_messages(10).await.unwrap().is_empty());
}
