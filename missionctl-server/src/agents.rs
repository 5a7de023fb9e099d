//! Registry of agents and their liveness.

use missionctl_proto::agent::{
    Agent, AgentId, AgentStatus, NewAgent, WorkingMemory, normalize_handle,
};
use missionctl_proto::task::TaskId;

use crate::store::{Collection, Document, StoreError, now_ms};

impl Document for Agent {
    type Id = AgentId;
    const COLLECTION: &'static str = "agents";

    fn id(&self) -> &AgentId {
        &self.id
    }
}

/// Errors returned by agent operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// The handle is empty or contains characters outside `[A-Za-z0-9_-]`.
    #[error("invalid agent handle: {0:?}")]
    InvalidHandle(String),
    /// Another agent already uses this handle.
    #[error("agent handle already taken: @{0}")]
    HandleTaken(String),
    /// No agent with this handle.
    #[error("agent not found: @{0}")]
    NotFound(String),
    /// The store rejected the write.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Agent records, keyed by an id derived from the handle.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Collection<Agent>,
}

fn valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl AgentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: Collection::new(),
        }
    }

    /// Returns every agent in registration order.
    pub async fn list(&self) -> Vec<Agent> {
        self.agents.scan(|_| true).await
    }

    /// Looks an agent up by id.
    pub async fn get(&self, id: &AgentId) -> Option<Agent> {
        self.agents.get(id).await
    }

    /// Looks an agent up by handle; a leading `@` and letter case are
    /// ignored.
    pub async fn get_by_handle(&self, handle: &str) -> Option<Agent> {
        let handle = normalize_handle(handle).to_lowercase();
        self.agents
            .scan(|a| a.handle == handle)
            .await
            .into_iter()
            .next()
    }

    /// Registers a new agent with status `online`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidHandle`] or [`AgentError::HandleTaken`].
    pub async fn register(&self, new: NewAgent) -> Result<Agent, AgentError> {
        let handle = normalize_handle(&new.handle).to_lowercase();
        if !valid_handle(&handle) {
            return Err(AgentError::InvalidHandle(new.handle));
        }
        let agent = self
            .agents
            .insert_with::<AgentError>(|docs| {
                if docs.iter().any(|a| a.handle == handle) {
                    return Err(AgentError::HandleTaken(handle.clone()));
                }
                Ok(Agent {
                    id: AgentId::new(format!("agent-{handle}")),
                    handle: handle.clone(),
                    name: new.name,
                    role: new.role,
                    status: AgentStatus::Online,
                    current_task_id: None,
                    last_heartbeat: Some(now_ms()),
                    skills: new.skills,
                    working_memory: None,
                })
            })
            .await?;
        tracing::info!(agent_id = %agent.id, handle = %agent.handle, "agent registered");
        Ok(agent)
    }

    /// Stamps `last_heartbeat` and sets the reported status, `online` when
    /// none is given.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NotFound`].
    pub async fn heartbeat(
        &self,
        handle: &str,
        status: Option<AgentStatus>,
    ) -> Result<Agent, AgentError> {
        let now = now_ms();
        let agent = self
            .patch_by_handle(handle, |a| {
                a.status = status.unwrap_or(AgentStatus::Online);
                a.last_heartbeat = Some(now);
            })
            .await?;
        tracing::trace!(handle = %agent.handle, status = %agent.status, "heartbeat");
        Ok(agent)
    }

    /// Sets an agent's status.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NotFound`].
    pub async fn update_status(
        &self,
        handle: &str,
        status: AgentStatus,
    ) -> Result<Agent, AgentError> {
        let agent = self.patch_by_handle(handle, |a| a.status = status).await?;
        tracing::debug!(handle = %agent.handle, status = %status, "agent status updated");
        Ok(agent)
    }

    /// Replaces an agent's working memory.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NotFound`].
    pub async fn update_working_memory(
        &self,
        handle: &str,
        memory: WorkingMemory,
    ) -> Result<Agent, AgentError> {
        let agent = self
            .patch_by_handle(handle, |a| a.working_memory = Some(memory))
            .await?;
        tracing::debug!(handle = %agent.handle, "working memory updated");
        Ok(agent)
    }

    /// Marks a registered agent as working on `task_id`.
    ///
    /// Claims by unregistered agent ids are allowed, so a missing agent is
    /// not an error; `None` is returned instead.
    pub async fn mark_claimed(&self, agent_id: &AgentId, task_id: TaskId) -> Option<Agent> {
        let result = self
            .agents
            .update(agent_id, |a| {
                a.status = AgentStatus::Working;
                a.current_task_id = Some(task_id);
                Ok::<_, StoreError>(())
            })
            .await;
        match result {
            Ok(((), agent)) => Some(agent),
            Err(e) => {
                tracing::debug!(agent_id = %agent_id, error = %e, "claim by unregistered agent");
                None
            }
        }
    }

    /// Clears the agent's current task and sets it `idle`. Returns the
    /// agent and the task it held, if any. The task itself is not touched.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NotFound`].
    pub async fn release(&self, handle: &str) -> Result<(Agent, Option<TaskId>), AgentError> {
        let mut released = None;
        let agent = self
            .patch_by_handle(handle, |a| {
                released = a.current_task_id.take();
                a.status = AgentStatus::Idle;
            })
            .await?;
        tracing::info!(handle = %agent.handle, task_id = ?released, "agent released task");
        Ok((agent, released))
    }

    async fn patch_by_handle(
        &self,
        handle: &str,
        f: impl FnOnce(&mut Agent),
    ) -> Result<Agent, AgentError> {
        let not_found = || AgentError::NotFound(normalize_handle(handle).to_lowercase());
        let agent = self.get_by_handle(handle).await.ok_or_else(not_found)?;
        let result = self
            .agents
            .update(&agent.id, |a| {
                f(a);
                Ok::<_, AgentError>(())
            })
            .await;
        match result {
            Ok(((), agent)) => Ok(agent),
            Err(AgentError::Store(StoreError::NotFound { .. })) => Err(not_found()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_agent(handle: &str) -> NewAgent {
        NewAgent {
            handle: handle.to_string(),
            name: format!("Agent {handle}"),
            role: "builder".to_string(),
            skills: vec!["rust".to_string()],
        }
    }

    #[tokio::test]
    async fn register_strips_at_and_starts_online() {
        let registry = AgentRegistry::new();
        let agent = registry.register(new_agent("@Lena")).await.unwrap();
        assert_eq!(agent.handle, "lena");
        assert_eq!(agent.id, AgentId::new("agent-lena"));
        assert_eq!(agent.status, AgentStatus::Online);
        assert!(agent.current_task_id.is_none());
        assert!(agent.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn duplicate_handle_is_rejected() {
        let registry = AgentRegistry::new();
        registry.register(new_agent("lena")).await.unwrap();
        let err = registry.register(new_agent("@lena")).await.unwrap_err();
        assert_eq!(err, AgentError::HandleTaken("lena".to_string()));
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_handles_are_rejected() {
        let registry = AgentRegistry::new();
        for bad in ["", "@", "two words", "émile"] {
            assert!(matches!(
                registry.register(new_agent(bad)).await,
                Err(AgentError::InvalidHandle(_))
            ));
        }
    }

    #[tokio::test]
    async fn get_by_handle_ignores_at_and_case() {
        let registry = AgentRegistry::new();
        registry.register(new_agent("ops_bot")).await.unwrap();
        assert!(registry.get_by_handle("@OPS_BOT").await.is_some());
        assert!(registry.get_by_handle("other").await.is_none());
    }

    #[tokio::test]
    async fn heartbeat_defaults_to_online() {
        let registry = AgentRegistry::new();
        registry.register(new_agent("lena")).await.unwrap();
        registry
            .update_status("lena", AgentStatus::Sleeping)
            .await
            .unwrap();

        let agent = registry.heartbeat("@lena", None).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Online);
        let agent = registry
            .heartbeat("lena", Some(AgentStatus::Idle))
            .await
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn heartbeat_unknown_agent_is_not_found() {
        let registry = AgentRegistry::new();
        assert_eq!(
            registry.heartbeat("@ghost", None).await.unwrap_err(),
            AgentError::NotFound("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn get_by_id_uses_derived_id() {
        let registry = AgentRegistry::new();
        let agent = registry.register(new_agent("lena")).await.unwrap();
        assert_eq!(registry.get(&agent.id).await, Some(agent));
        assert!(registry.get(&AgentId::new("lena")).await.is_none());
    }

    #[tokio::test]
    async fn working_memory_is_replaced_whole() {
        let registry = AgentRegistry::new();
        registry.register(new_agent("lena")).await.unwrap();

        let first = WorkingMemory {
            current_focus: Some("deploy".to_string()),
            reflections: Some(vec!["check the rollback".to_string()]),
            updated_at: 1,
            ..WorkingMemory::default()
        };
        let agent = registry
            .update_working_memory("@lena", first.clone())
            .await
            .unwrap();
        assert_eq!(agent.working_memory, Some(first));

        let second = WorkingMemory {
            last_context: Some("halfway".to_string()),
            updated_at: 2,
            ..WorkingMemory::default()
        };
        registry
            .update_working_memory("lena", second.clone())
            .await
            .unwrap();
        let stored = registry.get_by_handle("lena").await.unwrap();
        assert_eq!(stored.working_memory, Some(second));
    }

    #[tokio::test]
    async fn working_memory_for_unknown_agent_is_not_found() {
        let registry = AgentRegistry::new();
        assert_eq!(
            registry
                .update_working_memory("ghost", WorkingMemory::default())
                .await
                .unwrap_err(),
            AgentError::NotFound("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn claim_then_release() {
        let registry = AgentRegistry::new();
        let agent = registry.register(new_agent("lena")).await.unwrap();
        let task_id = TaskId::new();

        let working = registry.mark_claimed(&agent.id, task_id).await.unwrap();
        assert_eq!(working.status, AgentStatus::Working);
        assert_eq!(working.current_task_id, Some(task_id));

        let (idle, released) = registry.release("lena").await.unwrap();
        assert_eq!(idle.status, AgentStatus::Idle);
        assert!(idle.current_task_id.is_none());
        assert_eq!(released, Some(task_id));
    }

    #[tokio::test]
    async fn mark_claimed_for_unregistered_agent_is_noop() {
        let registry = AgentRegistry::new();
        assert!(
            registry
                .mark_claimed(&AgentId::new("agent-1"), TaskId::new())
                .await
                .is_none()
        );
        assert!(registry.list().await.is_empty());
    }
}
