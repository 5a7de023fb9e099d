//! The mission control service facade.
//!
//! [`MissionControl`] owns every collection, dispatches RPC requests to them,
//! and records activity for the writes that people watch for. Cross-record
//! bookkeeping lives here: claiming a task marks the agent as working,
//! removing a task detaches its subtasks and deletes its comments, and
//! messages are addressed by handle but stored by agent id.

use missionctl_proto::activity::ActivityKind;
use missionctl_proto::agent::{AGENT_DETAIL_ACTIVITY, Agent, AgentDetail, AgentId, normalize_handle};
use missionctl_proto::comment::{AuthorType, CommentId, NewComment, extract_mentions};
use missionctl_proto::message::{MessageId, NewMessage};
use missionctl_proto::rpc::{ErrorKind, Request, Response, RpcError};
use missionctl_proto::task::{CreatedBy, Task, TaskId};

use crate::activity::{ActivityFeed, Event};
use crate::agents::{AgentError, AgentRegistry};
use crate::comments::{CommentError, CommentStore};
use crate::messages::{MessageError, MessageStore};
use crate::repository::{TaskError, TaskRepository, Transition};
use crate::store::StoreError;

impl From<TaskError> for RpcError {
    fn from(e: TaskError) -> Self {
        let kind = match &e {
            TaskError::Validation(_) => ErrorKind::Validation,
            TaskError::NotFound(_) => ErrorKind::NotFound,
            TaskError::AlreadyClaimed(_) => ErrorKind::Conflict,
            TaskError::Store(_) => ErrorKind::Store,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<AgentError> for RpcError {
    fn from(e: AgentError) -> Self {
        let kind = match &e {
            AgentError::InvalidHandle(_) => ErrorKind::Validation,
            AgentError::HandleTaken(_) => ErrorKind::Conflict,
            AgentError::NotFound(_) => ErrorKind::NotFound,
            AgentError::Store(_) => ErrorKind::Store,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<CommentError> for RpcError {
    fn from(e: CommentError) -> Self {
        let kind = match &e {
            CommentError::Validation(_) => ErrorKind::Validation,
            CommentError::ParentNotFound(_) => ErrorKind::NotFound,
            CommentError::Store(_) => ErrorKind::Store,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<MessageError> for RpcError {
    fn from(e: MessageError) -> Self {
        let kind = match &e {
            MessageError::Validation(_) => ErrorKind::Validation,
            MessageError::NotFound(_) => ErrorKind::NotFound,
            MessageError::Store(_) => ErrorKind::Store,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<StoreError> for RpcError {
    fn from(e: StoreError) -> Self {
        Self::new(ErrorKind::Store, e.to_string())
    }
}

/// How many of the newest activity entries an agent detail view looks
/// through for that agent's own entries.
const DETAIL_ACTIVITY_WINDOW: usize = 200;

/// All server-side state behind one dispatch entry point.
pub struct MissionControl {
    tasks: TaskRepository,
    agents: AgentRegistry,
    comments: CommentStore,
    messages: MessageStore,
    activity: ActivityFeed,
}

impl Default for MissionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MissionControl {
    /// Creates empty state with the default activity capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_activity(ActivityFeed::new())
    }

    /// Creates empty state recording into the given feed.
    #[must_use]
    pub fn with_activity(activity: ActivityFeed) -> Self {
        Self {
            tasks: TaskRepository::new(),
            agents: AgentRegistry::new(),
            comments: CommentStore::new(),
            messages: MessageStore::new(),
            activity,
        }
    }

    /// The task repository.
    #[must_use]
    pub const fn tasks(&self) -> &TaskRepository {
        &self.tasks
    }

    /// The agent registry.
    #[must_use]
    pub const fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// The comment store.
    #[must_use]
    pub const fn comments(&self) -> &CommentStore {
        &self.comments
    }

    /// The agent message store.
    #[must_use]
    pub const fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// The activity feed.
    #[must_use]
    pub const fn activity(&self) -> &ActivityFeed {
        &self.activity
    }

    /// Runs one request.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] form of whatever the underlying operation
    /// rejected.
    pub async fn dispatch(&self, request: Request) -> Result<Response, RpcError> {
        let op = request.name();
        tracing::debug!(op, "dispatching request");
        let result = self.run(request).await;
        if let Err(e) = &result {
            tracing::warn!(op, kind = %e.kind, error = %e, "request failed");
        }
        result
    }

    #[allow(clippy::too_many_lines)]
    async fn run(&self, request: Request) -> Result<Response, RpcError> {
        match request {
            Request::ListTasks(query) => Ok(Response::Tasks(self.tasks.list(&query).await)),
            Request::GetTask(id) => Ok(Response::Task(self.tasks.get(&id).await)),
            Request::TasksByStatus(status) => {
                Ok(Response::Tasks(self.tasks.get_by_status(status).await))
            }
            Request::SubTasks(parent) => {
                Ok(Response::Tasks(self.tasks.get_sub_tasks(&parent).await))
            }
            Request::CreateTask(new) => {
                let task = self.tasks.create(new).await?;
                let mut event = Event::new(
                    ActivityKind::TaskCreated,
                    format!("created \"{}\"", task.title),
                )
                .task(task.id, task.title.clone());
                if let Some(actor) = created_by_actor(task.created_by.as_ref()) {
                    event = event.actor(actor);
                }
                self.activity.record(event).await;
                Ok(Response::TaskCreated(task.id))
            }
            Request::UpdateTask { id, patch } => {
                self.tasks.update(&id, patch).await?;
                Ok(Response::Done)
            }
            Request::MoveTask { id, status } => {
                let moved = self.tasks.move_task(&id, status).await?;
                self.record_move(&moved).await;
                Ok(Response::Done)
            }
            Request::ClaimTask { id, agent_id } => {
                let task = self.tasks.claim(&id, &agent_id).await?;
                self.agents.mark_claimed(&agent_id, task.id).await;
                self.activity
                    .record(
                        Event::new(
                            ActivityKind::AgentClaimed,
                            format!("{agent_id} claimed \"{}\"", task.title),
                        )
                        .actor(agent_id.as_str())
                        .task(task.id, task.title.clone()),
                    )
                    .await;
                Ok(Response::Done)
            }
            Request::CompleteTask { id, success } => {
                let Transition { task, .. } = self.tasks.complete(&id, success).await?;
                let verb = if success { "completed" } else { "failed" };
                let mut event = Event::new(
                    ActivityKind::TaskCompleted,
                    format!("{verb} \"{}\"", task.title),
                )
                .task(task.id, task.title.clone());
                if let Some(assignee) = &task.assignee_id {
                    event = event.actor(assignee.as_str());
                }
                self.activity.record(event).await;
                Ok(Response::Done)
            }
            Request::AppendExecutionLog { id, entry } => {
                self.tasks.append_execution_log(&id, entry).await?;
                Ok(Response::Done)
            }
            Request::SetExecutionStatus { id, status } => {
                self.tasks.set_execution_status(&id, status).await?;
                Ok(Response::Done)
            }
            Request::RemoveTask(id) => {
                self.remove_task(&id).await?;
                Ok(Response::Done)
            }
            Request::ListAgents => Ok(Response::Agents(self.agents.list().await)),
            Request::GetAgent { handle } => {
                Ok(Response::Agent(self.agents.get_by_handle(&handle).await))
            }
            Request::GetAgentById(id) => Ok(Response::Agent(self.agents.get(&id).await)),
            Request::AgentDetail { handle } => Ok(Response::AgentDetail(
                self.agent_detail(&handle).await.map(Box::new),
            )),
            Request::RegisterAgent(new) => {
                let agent = self.agents.register(new).await?;
                Ok(Response::AgentRegistered(agent.id))
            }
            Request::Heartbeat { handle, status } => {
                self.agents.heartbeat(&handle, status).await?;
                Ok(Response::Done)
            }
            Request::UpdateAgentStatus { handle, status } => {
                self.agents.update_status(&handle, status).await?;
                Ok(Response::Done)
            }
            Request::UpdateWorkingMemory { handle, memory } => {
                self.agents.update_working_memory(&handle, memory).await?;
                Ok(Response::Done)
            }
            Request::ReleaseAgent { handle } => {
                let (agent, released) = self.agents.release(&handle).await?;
                let mut event = Event::new(
                    ActivityKind::AgentReleased,
                    format!("@{} released its task", agent.handle),
                )
                .actor(agent.id.as_str());
                if let Some(task) = self.task_for(released).await {
                    event = event.task(task.id, task.title);
                }
                self.activity.record(event).await;
                Ok(Response::Done)
            }
            Request::ListComments(task_id) => Ok(Response::Comments(
                self.comments.list_by_task(&task_id).await,
            )),
            Request::CreateComment(new) => {
                let id = self.create_comment(new).await?;
                Ok(Response::CommentCreated(id))
            }
            Request::RecentActivity { limit } => {
                let limit = usize::try_from(limit).unwrap_or(usize::MAX);
                Ok(Response::Activity(self.activity.recent(limit).await))
            }
            Request::SendMessage(new) => {
                let id = self.send_message(new).await?;
                Ok(Response::MessageSent(id))
            }
            Request::ListMessages { limit } => {
                let limit = usize::try_from(limit).unwrap_or(usize::MAX);
                Ok(Response::Messages(self.messages.list_all(limit).await))
            }
            Request::Inbox { handle } => {
                let agent = self.agent_by_handle(&handle).await?;
                Ok(Response::Messages(self.messages.inbox(&agent.id).await))
            }
            Request::AcknowledgeMessage { id, response } => {
                self.messages.acknowledge(&id, response).await?;
                Ok(Response::Done)
            }
        }
    }

    async fn record_move(&self, moved: &Transition) {
        if moved.from == moved.task.status {
            return;
        }
        let mut event = Event::new(
            ActivityKind::TaskMoved,
            format!(
                "moved \"{}\" from {} to {}",
                moved.task.title, moved.from, moved.task.status
            ),
        )
        .task(moved.task.id, moved.task.title.clone());
        if let Some(assignee) = &moved.task.assignee_id {
            event = event.actor(assignee.as_str());
        }
        self.activity.record(event).await;
    }

    /// Deletes a task, detaches its subtasks and deletes its comments.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] without changing anything if the task
    /// does not exist.
    pub async fn remove_task(&self, id: &TaskId) -> Result<Task, TaskError> {
        let task = self.tasks.remove(id).await?;
        let detached = self.tasks.detach_sub_tasks(id).await;
        let comments = self.comments.remove_for_task(id).await;
        tracing::info!(
            task_id = %id,
            detached = detached.len(),
            comments,
            "task and dependents removed"
        );
        Ok(task)
    }

    async fn create_comment(&self, new: NewComment) -> Result<CommentId, RpcError> {
        let task = self
            .tasks
            .get(&new.task_id)
            .await
            .ok_or(TaskError::NotFound(new.task_id))?;

        let mut mentioned: Vec<(AgentId, String)> = Vec::new();
        for handle in extract_mentions(&new.content) {
            match self.agents.get_by_handle(&handle).await {
                Some(agent) => mentioned.push((agent.id, agent.handle)),
                None => tracing::debug!(handle = %handle, "mention of unknown handle ignored"),
            }
        }

        let author = match new.author_type {
            AuthorType::Agent => new.author_id.clone(),
            AuthorType::Human => format!("{} (human)", new.author_id),
        };
        let actor = new.author_id.clone();
        let comment = self
            .comments
            .create(new, mentioned.iter().map(|(id, _)| id.clone()).collect())
            .await?;

        self.activity
            .record(
                Event::new(
                    ActivityKind::Comment,
                    format!("{author} commented on \"{}\"", task.title),
                )
                .actor(actor.clone())
                .task(task.id, task.title.clone()),
            )
            .await;
        for (_, handle) in mentioned {
            self.activity
                .record(
                    Event::new(
                        ActivityKind::Mention,
                        format!("{author} mentioned @{handle} on \"{}\"", task.title),
                    )
                    .actor(actor.clone())
                    .task(task.id, task.title.clone()),
                )
                .await;
        }
        Ok(comment.id)
    }

    /// Returns an agent with every task assigned to it and its own most
    /// recent activity, or `None` for an unknown handle.
    pub async fn agent_detail(&self, handle: &str) -> Option<AgentDetail> {
        let agent = self.agents.get_by_handle(handle).await?;
        let tasks = self.tasks.assigned_to(&agent.id).await;
        let activity = self
            .activity
            .recent_matching(DETAIL_ACTIVITY_WINDOW, AGENT_DETAIL_ACTIVITY, |e| {
                e.actor_id.as_deref().is_some_and(|actor| agent.answers_to(actor))
            })
            .await;
        Some(AgentDetail {
            agent,
            tasks,
            activity,
        })
    }

    async fn agent_by_handle(&self, handle: &str) -> Result<Agent, AgentError> {
        self.agents
            .get_by_handle(handle)
            .await
            .ok_or_else(|| AgentError::NotFound(normalize_handle(handle).to_lowercase()))
    }

    async fn send_message(&self, new: NewMessage) -> Result<MessageId, RpcError> {
        let from = self.agent_by_handle(&new.from).await?;
        let to = self.agent_by_handle(&new.to).await?;
        let message = self
            .messages
            .send(from.id, to.id, &new.message_type, &new.content)
            .await?;
        Ok(message.id)
    }

    async fn task_for(&self, id: Option<TaskId>) -> Option<Task> {
        match id {
            Some(id) => self.tasks.get(&id).await,
            None => None,
        }
    }
}

fn created_by_actor(created_by: Option<&CreatedBy>) -> Option<String> {
    match created_by? {
        CreatedBy::Agent(id) => Some(id.to_string()),
        CreatedBy::Human => Some("human".to_string()),
    }
}
