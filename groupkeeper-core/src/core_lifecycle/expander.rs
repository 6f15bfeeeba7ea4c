//! Membership expander - brings the user's other devices into a group

use crate::core_lifecycle::{
    engine::GroupKeyEngine,
    errors::{LifecycleError, LifecycleResult},
    types::{ClientId, GroupConversation, KeyPackageClaimUser, QualifiedId},
};
use crate::metrics::{self, record_counter};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MembershipExpander {
    engine: Arc<dyn GroupKeyEngine>,
}

impl MembershipExpander {
    pub fn new(engine: Arc<dyn GroupKeyEngine>) -> Self {
        Self { engine }
    }

    /// Add every device of `self_user_id` except `self_client_id` to the group
    ///
    /// Fails with [`LifecycleError::MissingGroupIdentifier`] when the
    /// conversation was never materialized.
    pub async fn add_other_self_clients_to_mls_conversation(
        &self,
        conversation: &GroupConversation,
        self_user_id: &QualifiedId,
        self_client_id: &ClientId,
    ) -> LifecycleResult<()> {
        let group_id = conversation.group_id.as_ref().ok_or_else(|| {
            LifecycleError::MissingGroupIdentifier(conversation.conversation_id.clone())
        })?;

        let self_devices =
            KeyPackageClaimUser::other_devices_of(self_user_id.clone(), self_client_id.clone());

        debug!(
            conversation_id = %conversation.conversation_id,
            group_id = %group_id,
            "Adding other self clients to MLS group"
        );

        let result = self
            .engine
            .add_users_to_conversation(&conversation.conversation_id, group_id, &[self_devices])
            .await;

        match &result {
            Ok(()) => record_counter(metrics::EXPAND_SUCCEEDED, 1),
            Err(e) => {
                record_counter(metrics::EXPAND_FAILED, 1);
                warn!(
                    conversation_id = %conversation.conversation_id,
                    error = %e,
                    "Failed to add other self clients"
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_lifecycle::adapters::MockGroupKeyEngine;
    use crate::core_lifecycle::types::{ConversationKind, GroupId};

    fn expander(engine: &Arc<MockGroupKeyEngine>) -> MembershipExpander {
        let engine: Arc<dyn GroupKeyEngine> = engine.clone();
        MembershipExpander::new(engine)
    }

    #[tokio::test]
    async fn test_skips_own_client() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let me = QualifiedId::new("me", "wire.test");
        let own = ClientId::new("device-a");
        let conversation = GroupConversation::new(
            QualifiedId::new("self", "wire.test"),
            Some(GroupId::from("gs")),
            1,
            ConversationKind::SelfConversation,
        );

        expander(&engine)
            .add_other_self_clients_to_mls_conversation(&conversation, &me, &own)
            .await
            .unwrap();

        let additions = engine.additions();
        assert_eq!(additions.len(), 1);
        let (conversation_id, group_id, users) = &additions[0];
        assert_eq!(conversation_id, &conversation.conversation_id);
        assert_eq!(group_id, &GroupId::from("gs"));
        assert_eq!(users, &vec![KeyPackageClaimUser::other_devices_of(me, own.clone())]);
        assert!(users.iter().all(|u| !u.covers(&own)));
    }

    #[tokio::test]
    async fn test_missing_group_id_is_fatal() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let conversation = GroupConversation::new(
            QualifiedId::new("self", "wire.test"),
            None,
            0,
            ConversationKind::SelfConversation,
        );

        let err = expander(&engine)
            .add_other_self_clients_to_mls_conversation(
                &conversation,
                &QualifiedId::new("me", "wire.test"),
                &ClientId::new("device-a"),
            )
            .await
            .unwrap_err();

        assert_eq!(err, LifecycleError::MissingGroupIdentifier(conversation.conversation_id));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_engine_rejection_surfaces() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let conversation_id = QualifiedId::new("team", "wire.test");
        engine.reject_addition(conversation_id.clone());
        let conversation =
            GroupConversation::new(conversation_id, Some(GroupId::from("gt")), 4, ConversationKind::Team);

        let result = expander(&engine)
            .add_other_self_clients_to_mls_conversation(
                &conversation,
                &QualifiedId::new("me", "wire.test"),
                &ClientId::new("device-a"),
            )
            .await;

        assert!(matches!(result, Err(LifecycleError::EngineRejection(_))));
    }
}
