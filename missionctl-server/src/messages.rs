//! Direct messages between agents.

use missionctl_proto::agent::AgentId;
use missionctl_proto::message::{AgentMessage, DEFAULT_MESSAGE_TYPE, MessageId};
use missionctl_proto::validate::{self, ValidationError};

use crate::store::{Collection, Document, StoreError, now_ms};

impl Document for AgentMessage {
    type Id = MessageId;
    const COLLECTION: &'static str = "agent_messages";

    fn id(&self) -> &MessageId {
        &self.id
    }
}

/// Errors returned by message operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Empty or oversized content or response.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No message with this id.
    #[error("message not found: {0}")]
    NotFound(MessageId),
    /// The store rejected the write.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for MessageError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Every message between agents, in send order.
#[derive(Default)]
pub struct MessageStore {
    messages: Collection<AgentMessage>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: Collection::new(),
        }
    }

    /// Stores a message between two resolved agents. Content is trimmed and
    /// a blank type becomes [`DEFAULT_MESSAGE_TYPE`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Validation`] for empty or oversized content.
    pub async fn send(
        &self,
        from: AgentId,
        to: AgentId,
        message_type: &str,
        content: &str,
    ) -> Result<AgentMessage, MessageError> {
        validate::validate_message(content)?;
        let message_type = match message_type.trim() {
            "" => DEFAULT_MESSAGE_TYPE.to_string(),
            other => other.to_string(),
        };
        let message = self
            .messages
            .insert(AgentMessage {
                id: MessageId::new(),
                from_agent_id: from,
                to_agent_id: to,
                message_type,
                content: content.trim().to_string(),
                acknowledged: false,
                response: None,
                created_at: now_ms(),
            })
            .await?;
        tracing::debug!(
            message_id = %message.id,
            from = %message.from_agent_id,
            to = %message.to_agent_id,
            "message sent"
        );
        Ok(message)
    }

    /// Returns up to `limit` messages, newest first.
    pub async fn list_all(&self, limit: usize) -> Vec<AgentMessage> {
        let mut all = self.messages.scan(|_| true).await;
        all.reverse();
        all.truncate(limit);
        all
    }

    /// Returns the messages `agent_id` has not acknowledged yet, oldest
    /// first.
    pub async fn inbox(&self, agent_id: &AgentId) -> Vec<AgentMessage> {
        self.messages
            .scan(|m| m.to_agent_id == *agent_id && !m.acknowledged)
            .await
    }

    /// Marks a message acknowledged. A given response replaces any earlier
    /// one; acknowledging twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Validation`] for an oversized response or
    /// [`MessageError::NotFound`].
    pub async fn acknowledge(
        &self,
        id: &MessageId,
        response: Option<String>,
    ) -> Result<AgentMessage, MessageError> {
        if let Some(response) = &response {
            validate::validate_message_response(response)?;
        }
        let result = self
            .messages
            .update(id, |m| {
                m.acknowledged = true;
                if response.is_some() {
                    m.response = response;
                }
                Ok::<_, MessageError>(())
            })
            .await;
        match result {
            Ok(((), message)) => {
                tracing::debug!(message_id = %message.id, "message acknowledged");
                Ok(message)
            }
            Err(MessageError::Store(StoreError::NotFound { .. })) => {
                Err(MessageError::NotFound(*id))
            }
            Err(e) => Err(e),
        }
    }
}
