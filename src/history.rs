use crate::{
    cache::ConversationCache,
    chat::{ConversationKey, MessageView, UserId},
    error::StoreError,
    store::{MessageStore, Store},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Anything that can answer "what has been said between `a` and `b`".
///
/// `Ok(None)` means this source does not know (a volatile miss), not that
/// the conversation is empty.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Vec<MessageView>>, StoreError>;
}

#[async_trait]
impl HistoryProvider for ConversationCache {
    async fn conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Vec<MessageView>>, StoreError> {
        Ok(self.read(&ConversationKey::new(a, b)))
    }
}

#[async_trait]
impl HistoryProvider for Store {
    async fn conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Vec<MessageView>>, StoreError> {
        self.history(a, b).await.map(Some)
    }
}

/// Serves from the cache and falls back to the store, refilling the cache.
pub struct ReadThroughHistory {
    cache: Arc<ConversationCache>,
    store: Arc<dyn MessageStore>,
}

impl ReadThroughHistory {
    pub fn new(cache: Arc<ConversationCache>, store: Arc<dyn MessageStore>) -> Self {
        Self { cache, store }
    }

    pub fn cache(&self) -> &Arc<ConversationCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Cache-or-store view of a conversation. Always answers.
    pub async fn load(&self, a: UserId, b: UserId) -> Result<Vec<MessageView>, StoreError> {
        let key = ConversationKey::new(a, b);
        if let Some(views) = self.cache.read(&key) {
            return Ok(views);
        }

        let _guard = self.cache.lock(key).await;
        // Another writer may have filled it while we waited.
        if let Some(views) = self.cache.read(&key) {
            return Ok(views);
        }
        self.reload(key).await
    }

    /// Bring the cache up to date after `view` was persisted. The caller must
    /// hold the write lock for `key`.
    pub async fn record(&self, key: ConversationKey, view: MessageView) -> Result<(), StoreError> {
        if self.cache.append(key, view) {
            return Ok(());
        }
        // A fresh entry holds only `view`; seed it with the full history or
        // drop it so the next read goes to the store.
        if let Err(e) = self.reload(key).await {
            self.cache.evict(&key);
            return Err(e);
        }
        Ok(())
    }

    async fn reload(&self, key: ConversationKey) -> Result<Vec<MessageView>, StoreError> {
        let (a, b) = key.participants();
        let views = self.store.history(a, b).await?;
        debug!(conversation = %key, messages = views.len(), "filled conversation cache from store");
        self.cache.fill(key, views.clone());
        Ok(views)
    }
}

#[async_trait]
impl HistoryProvider for ReadThroughHistory {
    async fn conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Vec<MessageView>>, StoreError> {
        self.load(a, b).await.map(Some)
    }
}
