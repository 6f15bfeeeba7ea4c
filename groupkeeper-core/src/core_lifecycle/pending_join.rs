//! Pending join coordinator - external commit joins, at most one per group
//!
//! Every group whose establishment is unknown is checked against the engine.
//! Groups the engine does not consider established get exactly one external
//! commit join.
//!
//! # De-duplication
//!
//! Two layers keep a group from being joined twice:
//! - within a batch, conversations sharing a group id produce one request
//! - across batches (startup, foreground and push triggers can overlap), an
//!   in-flight registry maps each group id to the shared future of its
//!   running attempt; later requests await that future instead of issuing a
//!   new join
//!
//! The registry lock is a plain mutex that is never held across an `.await`,
//! so "is an attempt pending" and "register a new attempt" happen as one step.
//!
//! Attempts run as spawned tasks. Dropping every caller of an attempt does
//! not stall it: it still settles within its own timeouts and leaves the
//! registry when done.

use crate::config::ReconcileConfig;
use crate::core_lifecycle::{
    engine::GroupKeyEngine,
    errors::LifecycleError,
    types::{GroupConversation, GroupId, MembershipState, QualifiedId},
};
use crate::metrics::{self, record_counter};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How a join attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Still running
    Pending,
    /// External commit accepted
    Joined,
    /// Engine already had current state; nothing issued
    AlreadyEstablished,
    /// Device is waiting for a welcome; external join skipped
    AwaitingWelcome,
    /// Check or join failed
    Failed(LifecycleError),
}

/// One join attempt as seen by one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAttempt {
    pub group_id: Option<GroupId>,
    pub conversation_id: QualifiedId,
    pub outcome: JoinOutcome,
    /// Outcome was shared with an attempt started for another request
    pub coalesced: bool,
}

impl JoinAttempt {
    /// Membership state this attempt leaves the group in
    pub fn state(&self) -> MembershipState {
        match self.outcome {
            JoinOutcome::Joined | JoinOutcome::AlreadyEstablished => MembershipState::Established,
            JoinOutcome::AwaitingWelcome => MembershipState::PendingWelcome,
            JoinOutcome::Pending | JoinOutcome::Failed(_) => MembershipState::UnknownEstablishment,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, JoinOutcome::Failed(_))
    }
}

type AttemptFuture = Shared<BoxFuture<'static, JoinOutcome>>;

struct InFlight {
    generation: u64,
    conversation_id: QualifiedId,
    attempt: AttemptFuture,
}

type Registry = Arc<Mutex<HashMap<GroupId, InFlight>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Nothing panics while holding these locks; recover the data regardless.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serializes external commit joins per group id
pub struct PendingJoinCoordinator {
    engine: Arc<dyn GroupKeyEngine>,
    in_flight: Registry,
    next_generation: AtomicU64,
    pending_welcome: Mutex<HashSet<GroupId>>,
    max_concurrent_joins: usize,
    establishment_check_timeout: Duration,
    join_timeout: Duration,
}

impl PendingJoinCoordinator {
    pub fn new(engine: Arc<dyn GroupKeyEngine>, config: &ReconcileConfig) -> Self {
        Self {
            engine,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            pending_welcome: Mutex::new(HashSet::new()),
            max_concurrent_joins: config.max_concurrent_joins.max(1),
            establishment_check_timeout: config.establishment_check_timeout,
            join_timeout: config.join_timeout,
        }
    }

    /// Join every group of the batch that this device has not established
    ///
    /// Returns one attempt per input conversation, in completion order.
    /// Failures are per group and never abort the rest of the batch.
    pub async fn send_external_to_pending_join(
        &self,
        groups: &[GroupConversation],
    ) -> Vec<JoinAttempt> {
        let mut attempts = Vec::with_capacity(groups.len());
        let mut batches: Vec<(GroupId, Vec<QualifiedId>)> = Vec::new();
        let mut index: HashMap<GroupId, usize> = HashMap::new();

        for group in groups {
            match &group.group_id {
                Some(group_id) => match index.get(group_id) {
                    Some(&i) => batches[i].1.push(group.conversation_id.clone()),
                    None => {
                        index.insert(group_id.clone(), batches.len());
                        batches.push((group_id.clone(), vec![group.conversation_id.clone()]));
                    }
                },
                None => {
                    warn!(
                        conversation_id = %group.conversation_id,
                        "Cannot join MLS conversation without group id"
                    );
                    attempts.push(JoinAttempt {
                        group_id: None,
                        conversation_id: group.conversation_id.clone(),
                        outcome: JoinOutcome::Failed(LifecycleError::MissingGroupIdentifier(
                            group.conversation_id.clone(),
                        )),
                        coalesced: false,
                    });
                }
            }
        }

        debug!(groups = batches.len(), "Checking establishment of MLS groups");

        let settled: Vec<Vec<JoinAttempt>> = stream::iter(batches)
            .map(|(group_id, conversations)| self.join_batch(group_id, conversations))
            .buffer_unordered(self.max_concurrent_joins)
            .collect()
            .await;

        attempts.extend(settled.into_iter().flatten());
        attempts
    }

    async fn join_batch(&self, group_id: GroupId, conversations: Vec<QualifiedId>) -> Vec<JoinAttempt> {
        let mut conversations = conversations.into_iter();
        let Some(first) = conversations.next() else {
            return Vec::new();
        };

        let lead = self.request_join(group_id.clone(), first).await;
        let mut attempts = Vec::new();
        for conversation_id in conversations {
            record_counter(metrics::JOINS_COALESCED, 1);
            attempts.push(JoinAttempt {
                group_id: Some(group_id.clone()),
                conversation_id,
                outcome: lead.outcome.clone(),
                coalesced: true,
            });
        }
        attempts.insert(0, lead);
        attempts
    }

    /// Join a single group unless it is established or already being joined
    pub async fn request_join(&self, group_id: GroupId, conversation_id: QualifiedId) -> JoinAttempt {
        if self.is_pending_welcome(&group_id) {
            debug!(group_id = %group_id, "Group awaits a welcome, skipping external join");
            return JoinAttempt {
                group_id: Some(group_id),
                conversation_id,
                outcome: JoinOutcome::AwaitingWelcome,
                coalesced: false,
            };
        }

        let (attempt, coalesced) = self.register_attempt(&group_id, &conversation_id);
        if coalesced {
            record_counter(metrics::JOINS_COALESCED, 1);
            debug!(group_id = %group_id, "Join already in flight, awaiting it");
        }

        let outcome = attempt.await;
        JoinAttempt { group_id: Some(group_id), conversation_id, outcome, coalesced }
    }

    fn register_attempt(&self, group_id: &GroupId, conversation_id: &QualifiedId) -> (AttemptFuture, bool) {
        let mut in_flight = lock(&self.in_flight);
        if let Some(existing) = in_flight.get(group_id) {
            return (existing.attempt.clone(), true);
        }

        // The task cannot leave the registry before this entry is inserted:
        // removal needs the lock held here.
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(run_attempt(
            Arc::clone(&self.engine),
            Arc::clone(&self.in_flight),
            generation,
            group_id.clone(),
            conversation_id.clone(),
            self.establishment_check_timeout,
            self.join_timeout,
        ));
        let attempt = async move {
            task.await.unwrap_or_else(|e| {
                JoinOutcome::Failed(LifecycleError::EngineRejection(format!(
                    "join task did not complete: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(
            group_id.clone(),
            InFlight {
                generation,
                conversation_id: conversation_id.clone(),
                attempt: attempt.clone(),
            },
        );
        (attempt, false)
    }

    /// Attempts currently registered, all with [`JoinOutcome::Pending`]
    pub fn pending_attempts(&self) -> Vec<JoinAttempt> {
        lock(&self.in_flight)
            .iter()
            .map(|(group_id, in_flight)| JoinAttempt {
                group_id: Some(group_id.clone()),
                conversation_id: in_flight.conversation_id.clone(),
                outcome: JoinOutcome::Pending,
                coalesced: false,
            })
            .collect()
    }

    /// Record that this device was invited to `group_id`
    pub fn mark_pending_welcome(&self, group_id: GroupId) {
        lock(&self.pending_welcome).insert(group_id);
    }

    /// Welcome processed or dropped; external joins allowed again
    pub fn clear_pending_welcome(&self, group_id: &GroupId) -> bool {
        lock(&self.pending_welcome).remove(group_id)
    }

    pub fn is_pending_welcome(&self, group_id: &GroupId) -> bool {
        lock(&self.pending_welcome).contains(group_id)
    }
}

async fn run_attempt(
    engine: Arc<dyn GroupKeyEngine>,
    registry: Registry,
    generation: u64,
    group_id: GroupId,
    conversation_id: QualifiedId,
    check_timeout: Duration,
    join_timeout: Duration,
) -> JoinOutcome {
    let outcome =
        check_then_join(engine.as_ref(), &group_id, &conversation_id, check_timeout, join_timeout)
            .await;

    {
        let mut in_flight = lock(&registry);
        if in_flight.get(&group_id).map(|entry| entry.generation) == Some(generation) {
            in_flight.remove(&group_id);
        }
    }

    match &outcome {
        JoinOutcome::Joined => record_counter(metrics::JOINS_SUCCEEDED, 1),
        JoinOutcome::Failed(_) => record_counter(metrics::JOINS_FAILED, 1),
        _ => {}
    }
    outcome
}

async fn check_then_join(
    engine: &dyn GroupKeyEngine,
    group_id: &GroupId,
    conversation_id: &QualifiedId,
    check_timeout: Duration,
    join_timeout: Duration,
) -> JoinOutcome {
    // A failed or timed out check counts as not established.
    let established = match timeout(check_timeout, engine.is_group_established(group_id)).await {
        Ok(Ok(established)) => established,
        Ok(Err(e)) => {
            record_counter(metrics::ESTABLISHMENT_CHECK_FAILED, 1);
            warn!(group_id = %group_id, error = %e, "Establishment check failed, joining anyway");
            false
        }
        Err(_) => {
            record_counter(metrics::ESTABLISHMENT_CHECK_FAILED, 1);
            warn!(group_id = %group_id, after = ?check_timeout, "Establishment check timed out, joining anyway");
            false
        }
    };

    if established {
        debug!(group_id = %group_id, "MLS group already established");
        return JoinOutcome::AlreadyEstablished;
    }

    record_counter(metrics::JOINS_ATTEMPTED, 1);
    info!(
        group_id = %group_id,
        conversation_id = %conversation_id,
        "Joining MLS group by external commit"
    );

    match timeout(join_timeout, engine.join_by_external_commit(conversation_id)).await {
        Ok(Ok(())) => JoinOutcome::Joined,
        Ok(Err(e)) => {
            warn!(conversation_id = %conversation_id, error = %e, "External commit join failed");
            JoinOutcome::Failed(e)
        }
        Err(_) => {
            warn!(conversation_id = %conversation_id, after = ?join_timeout, "External commit join timed out");
            JoinOutcome::Failed(LifecycleError::Timeout {
                operation: "join_by_external_commit",
                after: join_timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_lifecycle::adapters::MockGroupKeyEngine;
    use crate::core_lifecycle::types::ConversationKind;

    fn regular(id: &str, group: &str) -> GroupConversation {
        GroupConversation::new(
            QualifiedId::new(id, "wire.test"),
            Some(GroupId::from(group)),
            3,
            ConversationKind::Regular,
        )
    }

    fn coordinator(engine: &Arc<MockGroupKeyEngine>) -> PendingJoinCoordinator {
        let engine: Arc<dyn GroupKeyEngine> = engine.clone();
        PendingJoinCoordinator::new(engine, &ReconcileConfig::default())
    }

    #[tokio::test]
    async fn test_not_established_group_is_joined_once() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let attempts = coordinator(&engine).send_external_to_pending_join(&[regular("c1", "g1")]).await;

        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, JoinOutcome::Joined);
        assert_eq!(attempts[0].state(), MembershipState::Established);
        assert_eq!(engine.join_calls(), vec![QualifiedId::new("c1", "wire.test")]);
    }

    #[tokio::test]
    async fn test_established_group_is_skipped() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        engine.mark_established(GroupId::from("g1"));

        let attempts = coordinator(&engine).send_external_to_pending_join(&[regular("c1", "g1")]).await;

        assert_eq!(attempts[0].outcome, JoinOutcome::AlreadyEstablished);
        assert!(engine.join_calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_check_still_joins() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        engine.fail_establishment_check(GroupId::from("g1"));

        let attempts = coordinator(&engine).send_external_to_pending_join(&[regular("c1", "g1")]).await;

        assert_eq!(attempts[0].outcome, JoinOutcome::Joined);
        assert_eq!(engine.join_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_shared_group_id_in_batch_joins_once() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let attempts = coordinator(&engine)
            .send_external_to_pending_join(&[regular("c1", "g2"), regular("c2", "g2")])
            .await;

        assert_eq!(attempts.len(), 2);
        assert_eq!(engine.join_calls().len(), 1);
        assert_eq!(attempts.iter().filter(|a| a.coalesced).count(), 1);
        assert!(attempts.iter().all(|a| a.outcome == JoinOutcome::Joined));
    }

    #[tokio::test]
    async fn test_missing_group_id_is_reported_without_engine_call() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let group = GroupConversation::new(
            QualifiedId::new("c1", "wire.test"),
            None,
            5,
            ConversationKind::Regular,
        );

        let attempts = coordinator(&engine).send_external_to_pending_join(&[group]).await;

        assert!(matches!(
            attempts[0].outcome,
            JoinOutcome::Failed(LifecycleError::MissingGroupIdentifier(_))
        ));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pending_welcome_is_not_joined() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        let coordinator = coordinator(&engine);
        coordinator.mark_pending_welcome(GroupId::from("g1"));

        let attempts = coordinator.send_external_to_pending_join(&[regular("c1", "g1")]).await;
        assert_eq!(attempts[0].outcome, JoinOutcome::AwaitingWelcome);
        assert_eq!(attempts[0].state(), MembershipState::PendingWelcome);
        assert!(engine.calls().is_empty());

        assert!(coordinator.clear_pending_welcome(&GroupId::from("g1")));
        let attempts = coordinator.send_external_to_pending_join(&[regular("c1", "g1")]).await;
        assert_eq!(attempts[0].outcome, JoinOutcome::Joined);
    }

    #[tokio::test]
    async fn test_join_failure_is_isolated() {
        let engine = Arc::new(MockGroupKeyEngine::new());
        engine.reject_join(QualifiedId::new("c1", "wire.test"));

        let attempts = coordinator(&engine)
            .send_external_to_pending_join(&[regular("c1", "g1"), regular("c2", "g2")])
            .await;

        let failed: Vec<_> = attempts.iter().filter(|a| a.is_failure()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].conversation_id.id, "c1");
        assert_eq!(engine.join_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_coalesce() {
        let engine = Arc::new(MockGroupKeyEngine::new().with_latency(Duration::from_millis(200)));
        let coordinator = coordinator(&engine);
        let batch = [regular("c1", "g1")];

        let (first, second) = tokio::join!(
            coordinator.send_external_to_pending_join(&batch),
            coordinator.send_external_to_pending_join(&batch),
        );

        assert_eq!(engine.join_calls().len(), 1);
        assert_eq!(engine.join_overlaps(), 0);
        assert_eq!(first[0].outcome, JoinOutcome::Joined);
        assert_eq!(second[0].outcome, JoinOutcome::Joined);
        assert!(first[0].coalesced ^ second[0].coalesced);
        assert!(coordinator.pending_attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout_fails_only_that_group() {
        let engine = Arc::new(MockGroupKeyEngine::new().with_latency(Duration::from_secs(2)));
        engine.stall_join(QualifiedId::new("c1", "wire.test"), Duration::from_secs(60));
        // Only visible if the check completed; it times out instead
        engine.mark_established(GroupId::from("g2"));
        let config = ReconcileConfig {
            establishment_check_timeout: Duration::from_secs(1),
            join_timeout: Duration::from_secs(5),
            ..ReconcileConfig::default()
        };
        let dyn_engine: Arc<dyn GroupKeyEngine> = engine.clone();
        let coordinator = PendingJoinCoordinator::new(dyn_engine, &config);

        let attempts = coordinator
            .send_external_to_pending_join(&[regular("c1", "g1"), regular("c2", "g2")])
            .await;

        let outcome_of = |id: &str| {
            attempts
                .iter()
                .find(|a| a.conversation_id.id == id)
                .map(|a| a.outcome.clone())
                .unwrap()
        };
        assert_eq!(
            outcome_of("c1"),
            JoinOutcome::Failed(LifecycleError::Timeout {
                operation: "join_by_external_commit",
                after: Duration::from_secs(5),
            })
        );
        assert_eq!(outcome_of("c2"), JoinOutcome::Joined);

        let mut joined: Vec<String> = engine.join_calls().into_iter().map(|q| q.id).collect();
        joined.sort();
        assert_eq!(joined, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_request_coalesces_and_finished_attempt_leaves_registry() {
        let engine = Arc::new(MockGroupKeyEngine::new().with_latency(Duration::from_millis(50)));
        let coordinator = coordinator(&engine);
        let g1 = GroupId::from("g1");
        let c1 = QualifiedId::new("c1", "wire.test");

        let first = coordinator.request_join(g1.clone(), c1.clone());
        let second = async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            coordinator.request_join(g1.clone(), c1.clone()).await
        };
        let third = async {
            tokio::time::sleep(Duration::from_millis(210)).await;
            coordinator.request_join(g1.clone(), c1.clone()).await
        };
        let (first, second, third) = tokio::join!(first, second, third);

        assert!(!first.coalesced);
        assert!(second.coalesced);
        assert!(!third.coalesced);
        assert_eq!(engine.join_calls().len(), 2);
        assert_eq!(engine.join_overlaps(), 0);
        assert!(coordinator.pending_attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_attempt_still_settles() {
        let engine = Arc::new(MockGroupKeyEngine::new().with_latency(Duration::from_secs(2)));
        let coordinator = coordinator(&engine);
        let g1 = GroupId::from("g1");
        let c1 = QualifiedId::new("c1", "wire.test");

        let abandoned =
            timeout(Duration::from_secs(1), coordinator.request_join(g1.clone(), c1.clone())).await;
        assert!(abandoned.is_err());
        assert_eq!(coordinator.pending_attempts().len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(engine.join_calls(), vec![c1.clone()]);
        assert!(coordinator.pending_attempts().is_empty());

        let retry = coordinator.request_join(g1, c1).await;
        assert!(!retry.coalesced);
        assert_eq!(retry.outcome, JoinOutcome::Joined);
    }
}
