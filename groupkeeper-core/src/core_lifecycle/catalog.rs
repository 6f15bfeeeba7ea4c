//! ConversationCatalog trait - source of conversation records
//!
//! Conversation records are owned by the application's storage layer. This
//! core only reads point-in-time snapshots of them.

use crate::core_lifecycle::{
    errors::LifecycleResult,
    types::{Conversation, QualifiedId},
};
use async_trait::async_trait;

/// Read access to the known conversations
#[async_trait]
pub trait ConversationCatalog: Send + Sync {
    /// Point-in-time snapshot of every conversation the user is part of
    ///
    /// Later catalog changes must not leak into a returned snapshot.
    async fn snapshot(&self) -> LifecycleResult<Vec<Conversation>>;

    /// Look up a single conversation
    async fn conversation_by_id(&self, id: &QualifiedId) -> LifecycleResult<Option<Conversation>>;
}
