//! Agent records.
//!
//! Agents are the workers that claim tasks. The task repository only ever
//! stores an [`AgentId`]; the rest of the record is owned by the agent
//! registry on the server.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::activity::ActivityEntry;
use crate::task::{Task, TaskId, UnknownVariant};

/// How many of an agent's own activity entries its detail view carries.
pub const AGENT_DETAIL_ACTIVITY: usize = 20;

/// Identifier of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Creates an agent identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this agent id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Liveness state an agent reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Connected and available.
    Online,
    /// Holding a task.
    Working,
    /// Connected, nothing to do.
    Idle,
    /// Dormant until woken.
    Sleeping,
    /// Not connected.
    Offline,
}

impl AgentStatus {
    /// Returns the wire/storage name of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Working => "working",
            Self::Idle => "idle",
            Self::Sleeping => "sleeping",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "working" => Ok(Self::Working),
            "idle" => Ok(Self::Idle),
            "sleeping" => Ok(Self::Sleeping),
            "offline" => Ok(Self::Offline),
            other => Err(UnknownVariant {
                kind: "agent status",
                value: other.to_string(),
            }),
        }
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier.
    pub id: AgentId,
    /// Unique handle, stored without the leading `@`.
    pub handle: String,
    /// Display name.
    pub name: String,
    /// What the agent is for.
    pub role: String,
    /// Last reported status.
    pub status: AgentStatus,
    /// Task the agent currently holds.
    pub current_task_id: Option<TaskId>,
    /// Last heartbeat (milliseconds since epoch).
    pub last_heartbeat: Option<u64>,
    /// Skills matched against a task's `required_skills`.
    pub skills: Vec<String>,
    /// Notes the agent carries between sessions.
    pub working_memory: Option<WorkingMemory>,
}

impl Agent {
    /// Returns `true` if an activity actor string refers to this agent: its
    /// id, its handle, or its handle with a leading `@`.
    #[must_use]
    pub fn answers_to(&self, actor: &str) -> bool {
        actor == self.id.as_str() || normalize_handle(actor) == self.handle
    }
}

/// Context an agent saves for itself and reads back on its next run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingMemory {
    /// Free-form summary of where the agent left off.
    pub last_context: Option<String>,
    /// What the agent is concentrating on.
    pub current_focus: Option<String>,
    /// Recently handled task references.
    pub recent_tasks: Option<Vec<String>>,
    /// Lessons the agent wants to keep.
    pub reflections: Option<Vec<String>>,
    /// When the agent last wrote this (milliseconds since epoch).
    pub updated_at: u64,
}

/// An agent with its assigned tasks and its latest activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDetail {
    /// The agent record.
    pub agent: Agent,
    /// Every task whose assignee is this agent, in insertion order.
    pub tasks: Vec<Task>,
    /// The agent's own activity, newest first, at most
    /// [`AGENT_DETAIL_ACTIVITY`] entries.
    pub activity: Vec<ActivityEntry>,
}

/// Payload for registering an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAgent {
    /// Requested handle; a leading `@` is stripped.
    pub handle: String,
    /// Display name.
    pub name: String,
    /// What the agent is for.
    pub role: String,
    /// Declared skills.
    pub skills: Vec<String>,
}

/// Strips a leading `@` from a handle.
#[must_use]
pub fn normalize_handle(handle: &str) -> &str {
    handle.strip_prefix('@').unwrap_or(handle)
}
