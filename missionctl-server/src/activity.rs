//! Bounded in-memory activity feed.
//!
//! The [`ActivityFeed`] keeps the most recent entries in arrival order and
//! drops the oldest once its capacity is exceeded.

use std::collections::VecDeque;

use missionctl_proto::activity::{ActivityEntry, ActivityKind};
use missionctl_proto::task::TaskId;
use tokio::sync::RwLock;

use crate::store::now_ms;

/// Default number of entries kept before FIFO eviction.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 500;

/// An event about to be recorded.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: ActivityKind,
    /// Who did it.
    pub actor_id: Option<String>,
    /// Task concerned, with its title at the time.
    pub task: Option<(TaskId, String)>,
    /// Rendered description.
    pub message: String,
}

impl Event {
    /// Creates an event with no actor or task attached.
    pub fn new(kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            actor_id: None,
            task: None,
            message: message.into(),
        }
    }

    /// Attaches the responsible agent or human.
    #[must_use]
    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Attaches the task concerned.
    #[must_use]
    pub fn task(mut self, id: TaskId, title: impl Into<String>) -> Self {
        self.task = Some((id, title.into()));
        self
    }
}

struct Feed {
    entries: VecDeque<ActivityEntry>,
    next_id: u64,
}

/// Newest-last ring of activity entries.
pub struct ActivityFeed {
    feed: RwLock<Feed>,
    capacity: usize,
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityFeed {
    /// Creates an empty feed with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
    }

    /// Creates an empty feed holding at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            feed: RwLock::new(Feed {
                entries: VecDeque::new(),
                next_id: 1,
            }),
            capacity,
        }
    }

    /// Records an event and returns the stored entry.
    pub async fn record(&self, event: Event) -> ActivityEntry {
        let (task_id, task_title) = event.task.map_or((None, None), |(id, t)| (Some(id), Some(t)));
        let mut feed = self.feed.write().await;
        let entry = ActivityEntry {
            id: feed.next_id,
            kind: event.kind,
            actor_id: event.actor_id,
            task_id,
            task_title,
            message: event.message,
            timestamp: now_ms(),
        };
        feed.next_id += 1;
        feed.entries.push_back(entry.clone());
        while feed.entries.len() > self.capacity {
            feed.entries.pop_front();
        }
        drop(feed);
        tracing::debug!(kind = %entry.kind, id = entry.id, "activity recorded");
        entry
    }

    /// Returns up to `limit` entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        self.feed
            .read()
            .await
            .entries
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Looks through the newest `window` entries and returns up to `limit`
    /// of those matching `pred`, newest first.
    pub async fn recent_matching(
        &self,
        window: usize,
        limit: usize,
        pred: impl Fn(&ActivityEntry) -> bool,
    ) -> Vec<ActivityEntry> {
        self.feed
            .read()
            .await
            .entries
            .iter()
            .rev()
            .take(window)
            .filter(|e| pred(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of entries currently held.
    pub async fn len(&self) -> usize {
        self.feed.read().await.entries.len()
    }

    /// Returns `true` if nothing has been recorded or everything was evicted.
    pub async fn is_empty(&self) -> bool {
        self.feed.read().await.entries.is_empty()
    }
}
