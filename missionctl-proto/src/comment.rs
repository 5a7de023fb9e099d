//! Threaded task comments.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentId;
use crate::task::TaskId;

/// Maximum allowed comment length in UTF-16 code units.
pub const MAX_COMMENT_LENGTH: usize = 5000;

/// Unique identifier for a comment (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommentId(Uuid);

impl CommentId {
    /// Creates a new time-ordered comment identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CommentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CommentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Who wrote a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorType {
    /// `author_id` is an [`AgentId`].
    Agent,
    /// `author_id` is a free-form human name.
    Human,
}

/// A comment on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique comment identifier.
    pub id: CommentId,
    /// Task the comment belongs to.
    pub task_id: TaskId,
    /// Agent id or human name, depending on `author_type`.
    pub author_id: String,
    /// How to interpret `author_id`.
    pub author_type: AuthorType,
    /// Trimmed comment body.
    pub content: String,
    /// Comment this one replies to.
    pub parent_id: Option<CommentId>,
    /// Agents mentioned with `@handle`.
    pub mentions: Vec<AgentId>,
    /// Creation time (milliseconds since epoch).
    pub created_at: u64,
}

/// Payload for posting a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    /// Task being commented on.
    pub task_id: TaskId,
    /// Agent id or human name.
    pub author_id: String,
    /// How to interpret `author_id`.
    pub author_type: AuthorType,
    /// Comment body.
    pub content: String,
    /// Comment being replied to.
    pub parent_id: Option<CommentId>,
}

/// A root comment with every reply beneath it, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentThread {
    /// The comment that started the thread.
    pub root: Comment,
    /// Replies at any depth, in creation order.
    pub replies: Vec<Comment>,
}

/// Extracts lowercased `@handle` mentions in order of first appearance.
///
/// A handle is a run of ASCII letters, digits and underscores directly after
/// an `@`.
#[must_use]
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut handles: Vec<String> = Vec::new();
    let mut rest = content;
    while let Some(at) = rest.find('@') {
        let after = &rest[at + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if len > 0 {
            let handle = after[..len].to_ascii_lowercase();
            if !handles.contains(&handle) {
                handles.push(handle);
            }
        }
        rest = &after[len..];
    }
    handles
}

/// Arranges a flat comment list into threads.
///
/// Replies are attached to their root ancestor. A reply whose parent is not
/// in the list starts its own thread. Threads and replies are ordered by
/// `created_at`.
#[must_use]
pub fn thread(mut comments: Vec<Comment>) -> Vec<CommentThread> {
    comments.sort_by_key(|c| c.created_at);
    let parents: HashMap<CommentId, Option<CommentId>> =
        comments.iter().map(|c| (c.id, c.parent_id)).collect();

    let root_of = |mut id: CommentId| {
        // Bounded walk: a malformed cycle stops after visiting every comment.
        for _ in 0..parents.len() {
            match parents.get(&id) {
                Some(Some(parent)) if parents.contains_key(parent) => id = *parent,
                _ => break,
            }
        }
        id
    };

    let mut threads: Vec<CommentThread> = Vec::new();
    let mut index: HashMap<CommentId, usize> = HashMap::new();
    let mut replies: Vec<(CommentId, Comment)> = Vec::new();

    for comment in comments {
        let root = root_of(comment.id);
        if root == comment.id {
            index.insert(comment.id, threads.len());
            threads.push(CommentThread {
                root: comment,
                replies: Vec::new(),
            });
        } else {
            replies.push((root, comment));
        }
    }
    for (root, reply) in replies {
        if let Some(&i) = index.get(&root) {
            threads[i].replies.push(reply);
        }
    }
    threads
}
