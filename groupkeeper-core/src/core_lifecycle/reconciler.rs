//! Membership reconciler - main orchestrator for a reconciliation pass
//!
//! # Responsibilities
//!
//! - **Classification**: splits the snapshot into uninitialized and
//!   possibly-stale groups, ignoring non-MLS conversations
//! - **Bootstrap**: hands uninitialized self/team groups to the bootstrapper
//! - **Join**: hands possibly-stale groups, as one batch, to the pending join
//!   coordinator
//! - **Expansion**: adds the user's other devices to freshly bootstrapped
//!   groups
//!
//! The reconciler never talks to the engine directly; every side effect goes
//! through one of the components above. Each conversation settles on its own,
//! and the pass reports every outcome instead of stopping at the first error.
//!
//! ```text
//! ┌──────────────────────┐
//! │ MembershipReconciler │
//! └──┬────────┬───────┬──┘
//!    │        │       │
//!    ▼        ▼       ▼
//! Bootstrap  Join   Expand
//! ```

use crate::config::ReconcileConfig;
use crate::core_lifecycle::{
    bootstrapper::{BootstrapOutcome, GroupBootstrapper},
    callbacks::{CatalogGroupIdResolver, MlsCallbacks},
    catalog::ConversationCatalog,
    classify::{group_conversations, partition},
    engine::GroupKeyEngine,
    errors::{LifecycleError, LifecycleResult},
    expander::MembershipExpander,
    pending_join::{JoinAttempt, JoinOutcome, PendingJoinCoordinator},
    types::{ClientId, Conversation, GroupConversation, LocalIdentity, QualifiedId},
};
use crate::metrics::{self, record_counter, Timer};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of adding the user's other devices to one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionOutcome {
    pub conversation_id: QualifiedId,
    pub result: LifecycleResult<()>,
}

/// Everything a reconciliation pass did, per conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Non-group conversations skipped
    pub ignored: usize,
    pub bootstrapped: Vec<BootstrapOutcome>,
    pub joins: Vec<JoinAttempt>,
    pub expansions: Vec<ExpansionOutcome>,
}

impl ReconcileReport {
    /// Every conversation that failed this pass, with its error
    pub fn failures(&self) -> Vec<(QualifiedId, LifecycleError)> {
        let bootstrap = self.bootstrapped.iter().filter_map(|o| {
            o.result.clone().err().map(|e| (o.conversation.conversation_id.clone(), e))
        });
        let joins = self.joins.iter().filter_map(|a| match &a.outcome {
            JoinOutcome::Failed(e) => Some((a.conversation_id.clone(), e.clone())),
            _ => None,
        });
        let expansions = self
            .expansions
            .iter()
            .filter_map(|o| o.result.clone().err().map(|e| (o.conversation_id.clone(), e)));

        bootstrap.chain(joins).chain(expansions).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }

    /// Number of external commit joins that went through
    pub fn joined(&self) -> usize {
        self.joins.iter().filter(|a| a.outcome == JoinOutcome::Joined).count()
    }
}

/// Orchestrates reconciliation passes for one local device
pub struct MembershipReconciler {
    engine: Arc<dyn GroupKeyEngine>,
    catalog: Arc<dyn ConversationCatalog>,
    bootstrapper: GroupBootstrapper,
    coordinator: PendingJoinCoordinator,
    expander: MembershipExpander,
    expand_after_bootstrap: bool,
}

impl MembershipReconciler {
    pub fn new(
        engine: Arc<dyn GroupKeyEngine>,
        catalog: Arc<dyn ConversationCatalog>,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            bootstrapper: GroupBootstrapper::new(Arc::clone(&engine), config),
            coordinator: PendingJoinCoordinator::new(Arc::clone(&engine), config),
            expander: MembershipExpander::new(Arc::clone(&engine)),
            expand_after_bootstrap: config.expand_after_bootstrap,
            engine,
            catalog,
        }
    }

    /// The join coordinator, for pending-welcome bookkeeping
    pub fn coordinator(&self) -> &PendingJoinCoordinator {
        &self.coordinator
    }

    /// Install the catalog-backed group id resolver and the remote authority
    pub fn configure_callbacks(&self) {
        let resolver = CatalogGroupIdResolver::new(Arc::clone(&self.catalog));
        self.engine.configure_callbacks(MlsCallbacks::remote_authority(Arc::new(resolver)));
    }

    /// Startup: configure engine callbacks, then join every MLS conversation
    /// this device has not established
    ///
    /// Nothing is bootstrapped or expanded here; epoch-0 self/team groups go
    /// through the join coordinator like any other group.
    pub async fn init_mls_conversations(&self, conversations: &[Conversation]) -> ReconcileReport {
        self.configure_callbacks();

        let groups = group_conversations(conversations);
        let ignored = conversations.len() - groups.len();
        info!(groups = groups.len(), ignored, "Initializing MLS conversations");

        let joins = self.coordinator.send_external_to_pending_join(&groups).await;
        ReconcileReport { ignored, joins, ..ReconcileReport::default() }
    }

    /// Reconcile a fresh catalog snapshot
    pub async fn reconcile_catalog(&self, local: &LocalIdentity) -> LifecycleResult<ReconcileReport> {
        let conversations = self.catalog.snapshot().await?;
        Ok(self.reconcile(&conversations, local).await)
    }

    /// Run one reconciliation pass over a snapshot
    pub async fn reconcile(&self, conversations: &[Conversation], local: &LocalIdentity) -> ReconcileReport {
        let timer = Timer::new(metrics::PASS_DURATION_MS);
        record_counter(metrics::PASSES, 1);

        let partition = partition(conversations);
        record_counter(metrics::CONVERSATIONS_IGNORED, partition.ignored as u64);

        info!(
            uninitialized = partition.uninitialized.len(),
            unknown = partition.unknown.len(),
            ignored = partition.ignored,
            "Reconciling MLS conversations"
        );

        let ((bootstrapped, expansions), joins) = tokio::join!(
            self.bootstrap_and_expand(partition.uninitialized, local),
            self.coordinator.send_external_to_pending_join(&partition.unknown),
        );

        let report = ReconcileReport { ignored: partition.ignored, bootstrapped, joins, expansions };
        timer.stop();

        let failures = report.failures();
        if failures.is_empty() {
            info!(joined = report.joined(), "Reconciliation pass complete");
        } else {
            warn!(
                failed = failures.len(),
                joined = report.joined(),
                "Reconciliation pass complete with failures"
            );
        }
        report
    }

    async fn bootstrap_and_expand(
        &self,
        uninitialized: Vec<GroupConversation>,
        local: &LocalIdentity,
    ) -> (Vec<BootstrapOutcome>, Vec<ExpansionOutcome>) {
        let bootstrapped = self.bootstrapper.register_all(uninitialized, local).await;
        if !self.expand_after_bootstrap {
            return (bootstrapped, Vec::new());
        }

        // Groups without an id are only known to the engine after
        // registration; they are expanded on a later pass.
        let expansions = join_all(
            bootstrapped
                .iter()
                .filter(|o| o.result.is_ok() && o.conversation.group_id.is_some())
                .map(|o| async move {
                    let result = self
                        .expander
                        .add_other_self_clients_to_mls_conversation(
                            &o.conversation,
                            &local.user_id,
                            &local.client_id,
                        )
                        .await;
                    ExpansionOutcome { conversation_id: o.conversation.conversation_id.clone(), result }
                }),
        )
        .await;

        (bootstrapped, expansions)
    }

    /// Register uninitialized self/team conversations without joining others
    pub async fn register_uninitialized_conversations(
        &self,
        conversations: &[Conversation],
        local: &LocalIdentity,
    ) -> Vec<BootstrapOutcome> {
        self.bootstrapper.register_uninitialized_conversations(conversations, local).await
    }

    /// Add every other device of the user to an established group
    pub async fn add_other_self_clients_to_mls_conversation(
        &self,
        conversation: &Conversation,
        self_user_id: &QualifiedId,
        self_client_id: &ClientId,
    ) -> LifecycleResult<()> {
        let group = conversation
            .as_group()
            .ok_or_else(|| LifecycleError::MissingGroupIdentifier(conversation.id.clone()))?;
        self.expander
            .add_other_self_clients_to_mls_conversation(&group, self_user_id, self_client_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_lifecycle::adapters::{EngineCall, InMemoryCatalog, MockGroupKeyEngine};
    use crate::core_lifecycle::callbacks::Authorizer;
    use crate::core_lifecycle::types::{ConversationKind, GroupId};

    fn local() -> LocalIdentity {
        LocalIdentity::new(QualifiedId::new("me", "wire.test"), ClientId::new("device-a"))
    }

    fn qid(id: &str) -> QualifiedId {
        QualifiedId::new(id, "wire.test")
    }

    fn reconciler(engine: &Arc<MockGroupKeyEngine>, config: ReconcileConfig) -> MembershipReconciler {
        let engine: Arc<dyn GroupKeyEngine> = engine.clone();
        MembershipReconciler::new(engine, Arc::new(InMemoryCatalog::default()), &config)
    }

    #[tokio::test]
    async fn test_proteus_only_snapshot_is_noop() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let snapshot = vec![
            Conversation::proteus(qid("a"), ConversationKind::Regular),
            Conversation::proteus(qid("b"), ConversationKind::SelfConversation),
        ];

        let report = reconciler(&engine, ReconcileConfig::default()).reconcile(&snapshot, &local()).await;

        assert_eq!(report.ignored, 2);
        assert!(report.is_clean());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_routes_by_state() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let snapshot = vec![
            Conversation::mls(qid("self"), None, 0, ConversationKind::SelfConversation),
            Conversation::mls(qid("fresh"), Some(GroupId::from("gf")), 0, ConversationKind::Regular),
            Conversation::mls(qid("old"), Some(GroupId::from("go")), 9, ConversationKind::Regular),
        ];

        let report = reconciler(&engine, ReconcileConfig::default()).reconcile(&snapshot, &local()).await;

        assert_eq!(report.bootstrapped.len(), 1);
        assert_eq!(report.bootstrapped[0].conversation.conversation_id, qid("self"));
        assert_eq!(report.joins.len(), 2);
        assert_eq!(engine.registrations().len(), 1);
        let mut joined: Vec<String> = engine.join_calls().into_iter().map(|q| q.id).collect();
        joined.sort();
        assert_eq!(joined, vec!["fresh".to_string(), "old".to_string()]);
    }

    #[tokio::test]
    async fn test_bootstrap_with_group_id_is_expanded() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let snapshot =
            vec![Conversation::mls(qid("team"), Some(GroupId::from("gt")), 0, ConversationKind::Team)];

        let report = reconciler(&engine, ReconcileConfig::default()).reconcile(&snapshot, &local()).await;

        assert_eq!(report.expansions.len(), 1);
        assert!(report.expansions[0].result.is_ok());
        let additions = engine.additions();
        assert_eq!(additions.len(), 1);
        assert!(!additions[0].2[0].covers(&local().client_id));
    }

    #[tokio::test]
    async fn test_expansion_can_be_disabled() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let config = ReconcileConfig { expand_after_bootstrap: false, ..ReconcileConfig::default() };
        let snapshot =
            vec![Conversation::mls(qid("team"), Some(GroupId::from("gt")), 0, ConversationKind::Team)];

        let report = reconciler(&engine, config).reconcile(&snapshot, &local()).await;

        assert!(report.expansions.is_empty());
        assert!(engine.additions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_bootstrap_is_not_expanded() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        engine.reject_registration(qid("team"));
        let snapshot =
            vec![Conversation::mls(qid("team"), Some(GroupId::from("gt")), 0, ConversationKind::Team)];

        let report = reconciler(&engine, ReconcileConfig::default()).reconcile(&snapshot, &local()).await;

        assert!(report.expansions.is_empty());
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].0, qid("team"));
    }

    #[tokio::test]
    async fn test_init_configures_callbacks() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let reconciler = reconciler(&engine, ReconcileConfig::default());

        reconciler.init_mls_conversations(&[]).await;

        let callbacks = engine.callbacks().expect("callbacks installed");
        assert!(callbacks.authorizer.authorize(&GroupId::from("g"), &ClientId::new("x")).await);
    }

    #[tokio::test]
    async fn test_init_only_runs_the_join_step() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let snapshot = vec![
            Conversation::mls(qid("self"), Some(GroupId::from("gs")), 0, ConversationKind::SelfConversation),
            Conversation::mls(qid("old"), Some(GroupId::from("go")), 5, ConversationKind::Regular),
            Conversation::proteus(qid("p"), ConversationKind::Regular),
        ];

        let report = reconciler(&engine, ReconcileConfig::default()).init_mls_conversations(&snapshot).await;

        assert_eq!(report.ignored, 1);
        assert_eq!(report.joins.len(), 2);
        assert!(report.bootstrapped.is_empty());
        assert!(report.expansions.is_empty());
        assert!(engine.registrations().is_empty());
        assert!(engine.additions().is_empty());
        let checks = engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, EngineCall::IsGroupEstablished(_)))
            .count();
        assert_eq!(checks, 2);
        let mut joined: Vec<String> = engine.join_calls().into_iter().map(|q| q.id).collect();
        joined.sort();
        assert_eq!(joined, vec!["old".to_string(), "self".to_string()]);
    }

    #[tokio::test]
    async fn test_add_other_self_clients_requires_mls() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let proteus = Conversation::proteus(qid("p"), ConversationKind::SelfConversation);

        let result = reconciler(&engine, ReconcileConfig::default())
            .add_other_self_clients_to_mls_conversation(&proteus, &local().user_id, &local().client_id)
            .await;

        assert_eq!(result, Err(LifecycleError::MissingGroupIdentifier(qid("p"))));
        assert!(!engine.calls().iter().any(|c| matches!(c, EngineCall::AddUsers { .. })));
    }
}
