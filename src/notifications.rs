//! In-app notification store.
//!
//! Holds the ordered, most-recent-first collection of transient
//! notification records with read/unread state and a capped unread
//! lifetime. Expiry is driven by a min-heap of `(expires_at, id)` pairs
//! drained by a periodic sweep rather than one timer per record; the
//! read-state check happens at fire time, so a record marked read before
//! its deadline always survives.
//!
//! The store is memory-only and reset on process restart.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::time::Clock;

/// Severity of an in-app notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationKind {
    /// Map a server-side priority string onto a notification kind.
    ///
    /// Only "high" is special-cased; everything else (including absence)
    /// renders as an informational notification.
    pub fn from_priority(priority: Option<&str>) -> Self {
        match priority {
            Some("high") => Self::Warning,
            _ => Self::Info,
        }
    }
}

/// A transient, in-memory, UI-visible alert record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppNotification {
    /// Unique within the store at any instant
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// Creation time, Unix milliseconds
    pub timestamp: i64,
    pub is_read: bool,
}

impl InAppNotification {
    /// Build an unread notification with a locally generated id
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
        action_url: Option<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            message: message.into(),
            kind,
            action_url,
            timestamp,
            is_read: false,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    /// Most-recent-first
    items: Vec<InAppNotification>,
    /// Currently scheduled expiry per id; entries in `queue` that no
    /// longer match are stale and skipped at fire time
    expiries: HashMap<String, i64>,
    /// Min-heap of (expires_at, id)
    queue: BinaryHeap<Reverse<(i64, String)>>,
}

/// Ordered collection of [`InAppNotification`] records with derived
/// unread count and sweep-based unread expiry.
pub struct NotificationStore {
    clock: Arc<dyn Clock>,
    ttl_millis: i64,
    inner: Mutex<StoreInner>,
}

impl NotificationStore {
    /// Create an empty store whose unread records expire after `ttl`
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl_millis: ttl.as_millis() as i64,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Prepend a notification and schedule its unread expiry.
    ///
    /// A notification whose `id` already exists in the store is rejected:
    /// the call logs a warning, leaves the store unchanged and returns
    /// `false`.
    pub fn add(&self, notification: InAppNotification) -> bool {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if inner.items.iter().any(|n| n.id == notification.id) {
            tracing::warn!(
                "Ignoring duplicate notification id '{}'",
                notification.id
            );
            return false;
        }

        let expires_at = self.clock.now_millis() + self.ttl_millis;
        inner.expiries.insert(notification.id.clone(), expires_at);
        inner.queue.push(Reverse((expires_at, notification.id.clone())));
        inner.items.insert(0, notification);
        true
    }

    /// Mark the matching record as read; no-op when the id is absent
    pub fn mark_read(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        match inner.items.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.is_read = true;
                true
            }
            None => false,
        }
    }

    /// Mark every record as read
    pub fn mark_all_read(&self) {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        for notification in &mut inner.items {
            notification.is_read = true;
        }
    }

    /// Delete the matching record; no-op when the id is absent
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let before = inner.items.len();
        inner.items.retain(|n| n.id != id);
        inner.expiries.remove(id);
        before != inner.items.len()
    }

    /// Empty the collection
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.items.clear();
        inner.expiries.clear();
        inner.queue.clear();
    }

    /// Count of records with `is_read == false`, recomputed on every call
    pub fn unread_count(&self) -> usize {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.items.iter().filter(|n| !n.is_read).count()
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.inner.lock().expect("store lock poisoned").items.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of the current collection, most-recent-first
    pub fn snapshot(&self) -> Vec<InAppNotification> {
        self.inner.lock().expect("store lock poisoned").items.clone()
    }

    /// Remove expired records that are still unread.
    ///
    /// Drains every queue entry whose deadline has passed. The read-state
    /// check happens here, at fire time: a record marked read before its
    /// deadline survives, a still-unread record is removed. Returns the
    /// ids of the removed records.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let mut removed = Vec::new();

        while let Some(Reverse((expires_at, _))) = inner.queue.peek() {
            if *expires_at > now {
                break;
            }
            let Reverse((expires_at, id)) = inner.queue.pop().expect("peeked entry exists");

            // Skip stale entries for ids that were removed, cleared, or
            // re-added with a newer deadline.
            if inner.expiries.get(&id) != Some(&expires_at) {
                continue;
            }
            inner.expiries.remove(&id);

            let still_unread = inner
                .items
                .iter()
                .any(|n| n.id == id && !n.is_read);
            if still_unread {
                inner.items.retain(|n| n.id != id);
                tracing::debug!("Expired unread notification '{}'", id);
                removed.push(id);
            }
        }

        removed
    }
}
