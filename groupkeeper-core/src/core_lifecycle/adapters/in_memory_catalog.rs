//! In-memory ConversationCatalog

use crate::core_lifecycle::{
    catalog::ConversationCatalog,
    errors::{LifecycleError, LifecycleResult},
    types::{Conversation, QualifiedId},
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Catalog backed by a vector, for tests and embedding
#[derive(Default)]
pub struct InMemoryCatalog {
    conversations: RwLock<Vec<Conversation>>,
    unavailable: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new(conversations: Vec<Conversation>) -> Self {
        Self { conversations: RwLock::new(conversations), unavailable: AtomicBool::new(false) }
    }

    /// Load a JSON array of conversation records
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Insert or replace a conversation by id
    pub fn upsert(&self, conversation: Conversation) {
        let mut conversations = self.write();
        match conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => conversations.push(conversation),
        }
    }

    /// Simulate the backing store being unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Conversation>> {
        self.conversations.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Conversation>> {
        self.conversations.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> LifecycleResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LifecycleError::TransientLookupFailure(
                "conversation catalog unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationCatalog for InMemoryCatalog {
    async fn snapshot(&self) -> LifecycleResult<Vec<Conversation>> {
        self.check_available()?;
        Ok(self.read().clone())
    }

    async fn conversation_by_id(&self, id: &QualifiedId) -> LifecycleResult<Option<Conversation>> {
        self.check_available()?;
        Ok(self.read().iter().find(|c| &c.id == id).cloned())
    }
}
