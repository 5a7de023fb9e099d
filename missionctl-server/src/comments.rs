//! Threaded task comments.

use missionctl_proto::agent::AgentId;
use missionctl_proto::comment::{Comment, CommentId, NewComment};
use missionctl_proto::task::TaskId;
use missionctl_proto::validate::{self, ValidationError};

use crate::store::{Collection, Document, StoreError, now_ms};

impl Document for Comment {
    type Id = CommentId;
    const COLLECTION: &'static str = "comments";

    fn id(&self) -> &CommentId {
        &self.id
    }
}

/// Errors returned by comment operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommentError {
    /// Empty or oversized content.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The replied-to comment does not exist on this task.
    #[error("parent comment not found: {0}")]
    ParentNotFound(CommentId),
    /// The store rejected the write.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CommentError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Comment records across all tasks.
#[derive(Default)]
pub struct CommentStore {
    comments: Collection<Comment>,
}

impl CommentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            comments: Collection::new(),
        }
    }

    /// Stores a comment with trimmed content and the given resolved
    /// mentions.
    ///
    /// # Errors
    ///
    /// Returns [`CommentError::Validation`] for empty or oversized content,
    /// or [`CommentError::ParentNotFound`] if `parent_id` does not name a
    /// comment on the same task.
    pub async fn create(
        &self,
        new: NewComment,
        mentions: Vec<AgentId>,
    ) -> Result<Comment, CommentError> {
        validate::validate_comment(&new.content)?;
        let comment = self
            .comments
            .insert_with::<CommentError>(|docs| {
                if let Some(parent) = new.parent_id {
                    if !docs.iter().any(|c| c.id == parent && c.task_id == new.task_id) {
                        return Err(CommentError::ParentNotFound(parent));
                    }
                }
                Ok(Comment {
                    id: CommentId::new(),
                    task_id: new.task_id,
                    author_id: new.author_id,
                    author_type: new.author_type,
                    content: new.content.trim().to_string(),
                    parent_id: new.parent_id,
                    mentions,
                    created_at: now_ms(),
                })
            })
            .await?;
        tracing::debug!(
            comment_id = %comment.id,
            task_id = %comment.task_id,
            mentions = comment.mentions.len(),
            "comment created"
        );
        Ok(comment)
    }

    /// Returns the comments on a task, oldest first.
    pub async fn list_by_task(&self, task_id: &TaskId) -> Vec<Comment> {
        let mut comments = self.comments.scan(|c| c.task_id == *task_id).await;
        comments.sort_by_key(|c| c.created_at);
        comments
    }

    /// Deletes every comment on a task, returning how many were removed.
    pub async fn remove_for_task(&self, task_id: &TaskId) -> usize {
        let removed = self.comments.delete_where(|c| c.task_id == *task_id).await;
        if !removed.is_empty() {
            tracing::debug!(task_id = %task_id, count = removed.len(), "comments removed");
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use missionctl_proto::comment::{AuthorType, MAX_COMMENT_LENGTH};

    use super::*;

    fn new_comment(task_id: TaskId, content: &str) -> NewComment {
        NewComment {
            task_id,
            author_id: "lena".to_string(),
            author_type: AuthorType::Human,
            content: content.to_string(),
            parent_id: None,
        }
    }

    #[tokio::test]
    async fn create_trims_and_lists_oldest_first() {
        let store = CommentStore::new();
        let task = TaskId::new();
        store.create(new_comment(task, "  first  "), vec![]).await.unwrap();
        store.create(new_comment(task, "second"), vec![]).await.unwrap();
        store
            .create(new_comment(TaskId::new(), "elsewhere"), vec![])
            .await
            .unwrap();

        let listed = store.list_by_task(&task).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].content, "first");
        assert_eq!(listed[1].content, "second");
    }

    #[tokio::test]
    async fn blank_and_oversized_content_rejected() {
        let store = CommentStore::new();
        let task = TaskId::new();
        assert!(matches!(
            store.create(new_comment(task, "   "), vec![]).await,
            Err(CommentError::Validation(ValidationError::Empty { .. }))
        ));
        let long = "x".repeat(MAX_COMMENT_LENGTH + 1);
        assert!(matches!(
            store.create(new_comment(task, &long), vec![]).await,
            Err(CommentError::Validation(ValidationError::TooLong { .. }))
        ));
        assert!(store.list_by_task(&task).await.is_empty());
    }

    #[tokio::test]
    async fn reply_requires_parent_on_same_task() {
        let store = CommentStore::new();
        let task = TaskId::new();
        let root = store.create(new_comment(task, "root"), vec![]).await.unwrap();

        let reply = store
            .create(
                NewComment {
                    parent_id: Some(root.id),
                    ..new_comment(task, "reply")
                },
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(reply.parent_id, Some(root.id));

        let err = store
            .create(
                NewComment {
                    parent_id: Some(root.id),
                    ..new_comment(TaskId::new(), "wrong task")
                },
                vec![],
            )
            .await
            .unwrap_err();
        assert_eq!(err, CommentError::ParentNotFound(root.id));
    }

    #[tokio::test]
    async fn mentions_are_stored() {
        let store = CommentStore::new();
        let comment = store
            .create(
                new_comment(TaskId::new(), "@lena look"),
                vec![AgentId::new("agent-lena")],
            )
            .await
            .unwrap();
        assert_eq!(comment.mentions, vec![AgentId::new("agent-lena")]);
    }

    #[tokio::test]
    async fn remove_for_task_only_touches_that_task() {
        let store = CommentStore::new();
        let doomed = TaskId::new();
        let kept = TaskId::new();
        store.create(new_comment(doomed, "a"), vec![]).await.unwrap();
        store.create(new_comment(doomed, "b"), vec![]).await.unwrap();
        store.create(new_comment(kept, "c"), vec![]).await.unwrap();

        assert_eq!(store.remove_for_task(&doomed).await, 2);
        assert!(store.list_by_task(&doomed).await.is_empty());
        assert_eq!(store.list_by_task(&kept).await.len(), 1);
    }
}
