//! Volatile, time-bounded copy of recent conversation history.
//!
//! Entries expire `ttl` after their most recent write; every write pushes the
//! deadline out again. The store stays the source of truth, so an expired or
//! missing entry is always rebuilt from it.

use crate::chat::{ConversationKey, MessageView};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct CachedHistory {
    views: Vec<MessageView>,
    expires_at: Instant,
}

impl CachedHistory {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
pub struct ConversationCache {
    ttl: Duration,
    entries: DashMap<ConversationKey, CachedHistory>,
    write_locks: DashMap<ConversationKey, Arc<Mutex<()>>>,
}

impl ConversationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            write_locks: DashMap::new(),
        }
    }

    /// Cached history for `key`, or `None` on a miss or an expired entry.
    pub fn read(&self, key: &ConversationKey) -> Option<Vec<MessageView>> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_live(now) {
            Some(entry.views.clone())
        } else {
            None
        }
    }

    /// Append to a live entry, or start a fresh single-element one.
    /// Either way the entry now expires `ttl` from now. Returns whether a
    /// live entry was extended.
    pub fn append(&self, key: ConversationKey, view: MessageView) -> bool {
        let now = Instant::now();
        let expires_at = now + self.ttl;
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let cached = occupied.get_mut();
                let extended = cached.is_live(now);
                if !extended {
                    cached.views.clear();
                }
                cached.views.push(view);
                cached.expires_at = expires_at;
                extended
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedHistory {
                    views: vec![view],
                    expires_at,
                });
                false
            }
        }
    }

    /// Replace the entry for `key` with `views` loaded from the store.
    pub fn fill(&self, key: ConversationKey, views: Vec<MessageView>) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, CachedHistory { views, expires_at });
    }

    pub fn evict(&self, key: &ConversationKey) {
        self.entries.remove(key);
    }

    /// Serializes writers of one conversation. Unrelated conversations never
    /// contend on the same lock.
    pub async fn lock(&self, key: ConversationKey) -> OwnedMutexGuard<()> {
        let lock = self
            .write_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop expired entries and any write lock nobody is holding.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.is_live(now));
        let purged = before.saturating_sub(self.entries.len());

        self.write_locks
            .retain(|key, lock| self.entries.contains_key(key) || Arc::strong_count(lock) > 1);

        if purged > 0 {
            debug!(purged, remaining = self.len(), "purged expired conversation cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
