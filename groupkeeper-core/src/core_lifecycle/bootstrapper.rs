//! Group bootstrapper - materializes self and team groups
//!
//! Self and team conversations are created by nobody. The first device that
//! sees one at epoch 0 registers the group with itself as the only member;
//! the engine settles races between devices of the same user.

use crate::config::ReconcileConfig;
use crate::core_lifecycle::{
    classify::is_uninitialized,
    engine::GroupKeyEngine,
    errors::LifecycleResult,
    types::{Conversation, GroupConversation, LocalIdentity, RegistrationRequest},
};
use crate::metrics::{self, record_counter};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of registering one uninitialized conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub conversation: GroupConversation,
    pub result: LifecycleResult<()>,
}

pub struct GroupBootstrapper {
    engine: Arc<dyn GroupKeyEngine>,
    max_concurrent_registrations: usize,
}

impl GroupBootstrapper {
    pub fn new(engine: Arc<dyn GroupKeyEngine>, config: &ReconcileConfig) -> Self {
        Self {
            engine,
            max_concurrent_registrations: config.max_concurrent_registrations.max(1),
        }
    }

    /// Register every uninitialized self/team conversation of the snapshot
    pub async fn register_uninitialized_conversations(
        &self,
        conversations: &[Conversation],
        local: &LocalIdentity,
    ) -> Vec<BootstrapOutcome> {
        let uninitialized: Vec<GroupConversation> = conversations
            .iter()
            .filter_map(Conversation::as_group)
            .filter(is_uninitialized)
            .collect();

        self.register_all(uninitialized, local).await
    }

    /// Register already classified conversations
    ///
    /// Duplicate conversation ids are registered once.
    pub async fn register_all(
        &self,
        conversations: Vec<GroupConversation>,
        local: &LocalIdentity,
    ) -> Vec<BootstrapOutcome> {
        let mut seen = HashSet::new();
        let unique: Vec<GroupConversation> = conversations
            .into_iter()
            .filter(|c| seen.insert(c.conversation_id.clone()))
            .collect();

        stream::iter(unique)
            .map(|conversation| self.register(conversation, local))
            .buffer_unordered(self.max_concurrent_registrations)
            .collect()
            .await
    }

    async fn register(&self, conversation: GroupConversation, local: &LocalIdentity) -> BootstrapOutcome {
        let request = RegistrationRequest::for_local(&conversation, local);

        info!(
            conversation_id = %conversation.conversation_id,
            kind = ?conversation.kind,
            "Registering uninitialized MLS conversation"
        );

        let result = self.engine.register_conversation(request).await;
        match &result {
            Ok(()) => record_counter(metrics::BOOTSTRAP_REGISTERED, 1),
            Err(e) => {
                record_counter(metrics::BOOTSTRAP_FAILED, 1);
                warn!(
                    conversation_id = %conversation.conversation_id,
                    error = %e,
                    "Failed to register MLS conversation"
                );
            }
        }

        BootstrapOutcome { conversation, result }
    }
}
