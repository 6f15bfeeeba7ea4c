//! GroupKeyEngine trait - abstraction over the MLS implementation
//!
//! The engine owns all cryptographic group state: ratchet trees, key
//! schedule, commits. This crate only asks it questions and issues recovery
//! commands.
//!
//! # Architecture
//!
//! ```text
//! MembershipReconciler
//!   |-- GroupBootstrapper ------+
//!   |-- PendingJoinCoordinator -+--> GroupKeyEngine (trait)
//!   |-- MembershipExpander -----+        |
//!                                        +---> production MLS client
//!                                        +---> MockGroupKeyEngine (tests)
//! ```

use crate::core_lifecycle::{
    callbacks::MlsCallbacks,
    errors::LifecycleResult,
    types::{GroupId, KeyPackageClaimUser, QualifiedId, RegistrationRequest},
};
use async_trait::async_trait;

/// Operations the reconciliation core needs from the MLS engine
///
/// Implementations serialize operations per group internally; callers may
/// issue calls for distinct groups concurrently.
#[async_trait]
pub trait GroupKeyEngine: Send + Sync {
    /// Install application callbacks
    ///
    /// Called once before the first reconciliation pass.
    fn configure_callbacks(&self, callbacks: MlsCallbacks);

    /// Whether this device holds current state for the group
    ///
    /// Side-effect free. May fail transiently when the backend is unreachable.
    async fn is_group_established(&self, group_id: &GroupId) -> LifecycleResult<bool>;

    /// Join the conversation's group by committing this device externally
    ///
    /// Re-invocation on an already joined group is a no-op or safely retried.
    async fn join_by_external_commit(&self, conversation_id: &QualifiedId) -> LifecycleResult<()>;

    /// Create the group and register the initial members
    ///
    /// Must tolerate concurrent duplicate registrations coming from other
    /// devices of the same user.
    async fn register_conversation(&self, request: RegistrationRequest) -> LifecycleResult<()>;

    /// Claim key packages for `users` and commit them into the group
    ///
    /// Adding a client that is already a member is a no-op.
    async fn add_users_to_conversation(
        &self,
        conversation_id: &QualifiedId,
        group_id: &GroupId,
        users: &[KeyPackageClaimUser],
    ) -> LifecycleResult<()>;
}
