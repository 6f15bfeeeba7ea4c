//! Mock GroupKeyEngine for testing
//!
//! Records every call and lets tests script failures and latency without a
//! real MLS client.

use crate::core_lifecycle::{
    callbacks::MlsCallbacks,
    engine::GroupKeyEngine,
    errors::{LifecycleError, LifecycleResult},
    types::{GroupId, KeyPackageClaimUser, QualifiedId, RegistrationRequest},
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// Call observed by the mock, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    IsGroupEstablished(GroupId),
    JoinByExternalCommit(QualifiedId),
    RegisterConversation(RegistrationRequest),
    AddUsers {
        conversation_id: QualifiedId,
        group_id: GroupId,
        users: Vec<KeyPackageClaimUser>,
    },
}

#[derive(Default)]
struct MockState {
    established: HashSet<GroupId>,
    failing_checks: HashSet<GroupId>,
    rejected_joins: HashSet<QualifiedId>,
    rejected_registrations: HashSet<QualifiedId>,
    rejected_additions: HashSet<QualifiedId>,
    stalled_joins: HashMap<QualifiedId, Duration>,
    active_joins: HashMap<QualifiedId, usize>,
    join_overlaps: usize,
    calls: Vec<EngineCall>,
    callbacks: Option<MlsCallbacks>,
}

/// Mock GroupKeyEngine for testing without real MLS
#[derive(Default)]
pub struct MockGroupKeyEngine {
    state: Mutex<MockState>,
    latency: Duration,
}

impl MockGroupKeyEngine {
    /// Create a new mock engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every async call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn mark_established(&self, group_id: GroupId) {
        self.state.lock().unwrap().established.insert(group_id);
    }

    /// Make `is_group_established` fail transiently for the group
    pub fn fail_establishment_check(&self, group_id: GroupId) {
        self.state.lock().unwrap().failing_checks.insert(group_id);
    }

    pub fn reject_join(&self, conversation_id: QualifiedId) {
        self.state.lock().unwrap().rejected_joins.insert(conversation_id);
    }

    /// Hold joins for the conversation `extra` longer than the base latency
    pub fn stall_join(&self, conversation_id: QualifiedId, extra: Duration) {
        self.state.lock().unwrap().stalled_joins.insert(conversation_id, extra);
    }

    pub fn reject_registration(&self, conversation_id: QualifiedId) {
        self.state.lock().unwrap().rejected_registrations.insert(conversation_id);
    }

    pub fn reject_addition(&self, conversation_id: QualifiedId) {
        self.state.lock().unwrap().rejected_additions.insert(conversation_id);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn join_calls(&self) -> Vec<QualifiedId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::JoinByExternalCommit(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn registrations(&self) -> Vec<RegistrationRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::RegisterConversation(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn additions(&self) -> Vec<(QualifiedId, GroupId, Vec<KeyPackageClaimUser>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::AddUsers { conversation_id, group_id, users } => {
                    Some((conversation_id, group_id, users))
                }
                _ => None,
            })
            .collect()
    }

    /// Times a join started while another join for the same conversation ran
    pub fn join_overlaps(&self) -> usize {
        self.state.lock().unwrap().join_overlaps
    }

    pub fn callbacks(&self) -> Option<MlsCallbacks> {
        self.state.lock().unwrap().callbacks.clone()
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl GroupKeyEngine for MockGroupKeyEngine {
    fn configure_callbacks(&self, callbacks: MlsCallbacks) {
        self.state.lock().unwrap().callbacks = Some(callbacks);
    }

    async fn is_group_established(&self, group_id: &GroupId) -> LifecycleResult<bool> {
        self.state.lock().unwrap().calls.push(EngineCall::IsGroupEstablished(group_id.clone()));
        self.delay().await;

        let state = self.state.lock().unwrap();
        if state.failing_checks.contains(group_id) {
            return Err(LifecycleError::TransientLookupFailure(format!(
                "backend unreachable for {}",
                group_id
            )));
        }
        Ok(state.established.contains(group_id))
    }

    async fn join_by_external_commit(&self, conversation_id: &QualifiedId) -> LifecycleResult<()> {
        let stall = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(EngineCall::JoinByExternalCommit(conversation_id.clone()));
            let active = state.active_joins.entry(conversation_id.clone()).or_insert(0);
            *active += 1;
            if *active > 1 {
                state.join_overlaps += 1;
            }
            state.stalled_joins.get(conversation_id).copied()
        };

        self.delay().await;
        if let Some(extra) = stall {
            tokio::time::sleep(extra).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(active) = state.active_joins.get_mut(conversation_id) {
            *active -= 1;
        }
        if state.rejected_joins.contains(conversation_id) {
            return Err(LifecycleError::EngineRejection(format!(
                "external commit refused for {}",
                conversation_id
            )));
        }
        Ok(())
    }

    async fn register_conversation(&self, request: RegistrationRequest) -> LifecycleResult<()> {
        let conversation_id = request.conversation_id.clone();
        let group_id = request.group_id.clone();
        self.state.lock().unwrap().calls.push(EngineCall::RegisterConversation(request));
        self.delay().await;

        let mut state = self.state.lock().unwrap();
        if state.rejected_registrations.contains(&conversation_id) {
            return Err(LifecycleError::EngineRejection(format!(
                "group for {} already created by another device",
                conversation_id
            )));
        }
        if let Some(group_id) = group_id {
            state.established.insert(group_id);
        }
        Ok(())
    }

    async fn add_users_to_conversation(
        &self,
        conversation_id: &QualifiedId,
        group_id: &GroupId,
        users: &[KeyPackageClaimUser],
    ) -> LifecycleResult<()> {
        self.state.lock().unwrap().calls.push(EngineCall::AddUsers {
            conversation_id: conversation_id.clone(),
            group_id: group_id.clone(),
            users: users.to_vec(),
        });
        self.delay().await;

        if self.state.lock().unwrap().rejected_additions.contains(conversation_id) {
            return Err(LifecycleError::EngineRejection(format!(
                "key package claim refused for {}",
                conversation_id
            )));
        }
        Ok(())
    }
}
