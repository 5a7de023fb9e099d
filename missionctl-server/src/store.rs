//! In-memory document collections with change notifications.
//!
//! A [`Collection`] keeps its documents in insertion order and runs every
//! write under one write lock, so a read-modify-write through
//! [`Collection::update`] never interleaves with another write to the same
//! collection. Each applied write is announced on a broadcast channel as a
//! [`Change`] carrying the before and after images of the document.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{RwLock, broadcast};

/// Default number of buffered change notices per collection.
const DEFAULT_CHANGE_BUFFER: usize = 1024;

/// Returns the current timestamp in milliseconds since epoch.
#[must_use]
pub fn now_ms() -> u64 {
    u64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

/// A record that can live in a [`Collection`].
pub trait Document: Clone + Send + Sync + 'static {
    /// Primary key type.
    type Id: Clone + Eq + Hash + std::fmt::Display + Send + Sync + 'static;

    /// Collection name, used in errors and logs.
    const COLLECTION: &'static str;

    /// Returns the primary key of this document.
    fn id(&self) -> &Self::Id;
}

/// An applied write.
///
/// `before` is `None` for inserts, `after` is `None` for deletes.
#[derive(Debug, Clone)]
pub struct Change<D> {
    /// Document image before the write.
    pub before: Option<D>,
    /// Document image after the write.
    pub after: Option<D>,
}

/// Errors raised by the store itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No document with the given id.
    #[error("{collection} document not found: {id}")]
    NotFound {
        /// Collection that was searched.
        collection: &'static str,
        /// Rendered id.
        id: String,
    },
    /// A document with the given id already exists.
    #[error("{collection} document already exists: {id}")]
    Duplicate {
        /// Target collection.
        collection: &'static str,
        /// Rendered id.
        id: String,
    },
}

impl StoreError {
    fn not_found<D: Document>(id: &D::Id) -> Self {
        Self::NotFound {
            collection: D::COLLECTION,
            id: id.to_string(),
        }
    }
}

/// Read-only view of a collection handed to [`Collection::insert_with`].
pub struct Documents<'a, D>(&'a BTreeMap<u64, D>);

impl<D> Documents<'_, D> {
    /// Iterates documents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &D> {
        self.0.values()
    }

    /// Counts documents matching `pred`.
    pub fn count(&self, pred: impl Fn(&D) -> bool) -> usize {
        self.0.values().filter(|d| pred(d)).count()
    }
}

struct Rows<D: Document> {
    docs: BTreeMap<u64, D>,
    index: HashMap<D::Id, u64>,
    next_seq: u64,
}

/// An insertion-ordered, change-broadcasting set of documents.
pub struct Collection<D: Document> {
    rows: RwLock<Rows<D>>,
    changes: broadcast::Sender<Change<D>>,
}

impl<D: Document> Default for Collection<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Document> Collection<D> {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::with_change_buffer(DEFAULT_CHANGE_BUFFER)
    }

    /// Creates an empty collection whose change channel buffers `capacity`
    /// notices per subscriber before they lag.
    #[must_use]
    pub fn with_change_buffer(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            rows: RwLock::new(Rows {
                docs: BTreeMap::new(),
                index: HashMap::new(),
                next_seq: 0,
            }),
            changes,
        }
    }

    /// Subscribes to every write applied from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Change<D>> {
        self.changes.subscribe()
    }

    /// Returns a copy of the document with the given id.
    pub async fn get(&self, id: &D::Id) -> Option<D> {
        let rows = self.rows.read().await;
        rows.index
            .get(id)
            .and_then(|seq| rows.docs.get(seq))
            .cloned()
    }

    /// Returns copies of every document matching `pred`, in insertion order.
    pub async fn scan(&self, pred: impl Fn(&D) -> bool) -> Vec<D> {
        let rows = self.rows.read().await;
        rows.docs.values().filter(|d| pred(d)).cloned().collect()
    }

    /// Returns the number of stored documents.
    pub async fn len(&self) -> usize {
        self.rows.read().await.docs.len()
    }

    /// Returns `true` if the collection holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.docs.is_empty()
    }

    /// Inserts the document produced by `build`.
    ///
    /// `build` runs under the write lock and sees every stored document, so
    /// values derived from the collection (such as a position) are consistent
    /// with the insert.
    ///
    /// # Errors
    ///
    /// Returns whatever `build` returns, or [`StoreError::Duplicate`] if the
    /// built document's id is taken.
    pub async fn insert_with<E>(
        &self,
        build: impl FnOnce(Documents<'_, D>) -> Result<D, E>,
    ) -> Result<D, E>
    where
        E: From<StoreError>,
    {
        let mut rows = self.rows.write().await;
        let doc = build(Documents(&rows.docs))?;
        if rows.index.contains_key(doc.id()) {
            return Err(StoreError::Duplicate {
                collection: D::COLLECTION,
                id: doc.id().to_string(),
            }
            .into());
        }
        let seq = rows.next_seq;
        rows.next_seq += 1;
        rows.index.insert(doc.id().clone(), seq);
        rows.docs.insert(seq, doc.clone());
        let _ = self.changes.send(Change {
            before: None,
            after: Some(doc.clone()),
        });
        drop(rows);
        Ok(doc)
    }

    /// Inserts a ready-made document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the id is taken.
    pub async fn insert(&self, doc: D) -> Result<D, StoreError> {
        self.insert_with(|_| Ok(doc)).await
    }

    /// Applies `f` to the document with the given id as one atomic
    /// read-modify-write.
    ///
    /// `f` works on a copy; the copy replaces the stored document only when
    /// `f` returns `Ok`, so a rejected update leaves the document untouched
    /// and announces nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] (converted into `E`) if the document
    /// does not exist, or the error returned by `f`.
    pub async fn update<R, E>(
        &self,
        id: &D::Id,
        f: impl FnOnce(&mut D) -> Result<R, E>,
    ) -> Result<(R, D), E>
    where
        E: From<StoreError>,
    {
        let mut rows = self.rows.write().await;
        let Some(seq) = rows.index.get(id).copied() else {
            return Err(StoreError::not_found::<D>(id).into());
        };
        let Some(current) = rows.docs.get_mut(&seq) else {
            return Err(StoreError::not_found::<D>(id).into());
        };
        let mut next = current.clone();
        let out = f(&mut next)?;
        let before = std::mem::replace(current, next.clone());
        let _ = self.changes.send(Change {
            before: Some(before),
            after: Some(next.clone()),
        });
        drop(rows);
        Ok((out, next))
    }

    /// Applies `f` to every document matching `pred` under one write lock,
    /// returning the updated documents.
    pub async fn update_where(
        &self,
        pred: impl Fn(&D) -> bool,
        mut f: impl FnMut(&mut D),
    ) -> Vec<D> {
        let mut rows = self.rows.write().await;
        let mut updated = Vec::new();
        for doc in rows.docs.values_mut().filter(|d| pred(d)) {
            let before = doc.clone();
            f(doc);
            updated.push(doc.clone());
            let _ = self.changes.send(Change {
                before: Some(before),
                after: Some(doc.clone()),
            });
        }
        drop(rows);
        updated
    }

    /// Deletes the document with the given id, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the document does not exist.
    pub async fn delete(&self, id: &D::Id) -> Result<D, StoreError> {
        let mut rows = self.rows.write().await;
        let seq = rows
            .index
            .remove(id)
            .ok_or_else(|| StoreError::not_found::<D>(id))?;
        let doc = rows
            .docs
            .remove(&seq)
            .ok_or_else(|| StoreError::not_found::<D>(id))?;
        let _ = self.changes.send(Change {
            before: Some(doc.clone()),
            after: None,
        });
        drop(rows);
        Ok(doc)
    }

    /// Deletes every document matching `pred`, returning them.
    pub async fn delete_where(&self, pred: impl Fn(&D) -> bool) -> Vec<D> {
        let mut rows = self.rows.write().await;
        let doomed: Vec<u64> = rows
            .docs
            .iter()
            .filter(|(_, d)| pred(d))
            .map(|(seq, _)| *seq)
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for seq in doomed {
            if let Some(doc) = rows.docs.remove(&seq) {
                rows.index.remove(doc.id());
                let _ = self.changes.send(Change {
                    before: Some(doc.clone()),
                    after: None,
                });
                removed.push(doc);
            }
        }
        drop(rows);
        removed
    }
}
