//! MLS group lifecycle reconciliation
//!
//! Decides, for every group conversation the local user belongs to, whether
//! this device's cryptographic state is current and drives the matching
//! recovery path:
//!
//! - uninitialized self/team groups are created (`bootstrapper`)
//! - groups of unknown establishment are joined by external commit
//!   (`pending_join`)
//! - the user's other devices are added to groups this device created
//!   (`expander`)
//!
//! ## Invariants
//!
//! - Membership state is recomputed every pass, never cached across passes
//! - At most one external commit join per group id is in flight
//! - A failure on one conversation never aborts the others
//! - The engine is the only component with cryptographic side effects

// Core types and errors
pub mod errors;
pub mod types;

// Boundaries to external collaborators
pub mod callbacks;
pub mod catalog;
pub mod engine;

// Reconciliation
pub mod bootstrapper;
pub mod classify;
pub mod expander;
pub mod pending_join;
pub mod reconciler;

// In-process collaborators
pub mod adapters;

// Re-exports
pub use bootstrapper::{BootstrapOutcome, GroupBootstrapper};
pub use callbacks::{Authorizer, CatalogGroupIdResolver, GroupIdResolver, MlsCallbacks, RemoteAuthority};
pub use catalog::ConversationCatalog;
pub use engine::GroupKeyEngine;
pub use errors::{LifecycleError, LifecycleResult};
pub use expander::MembershipExpander;
pub use pending_join::{JoinAttempt, JoinOutcome, PendingJoinCoordinator};
pub use reconciler::{ExpansionOutcome, MembershipReconciler, ReconcileReport};
pub use types::{
    ClientId, Conversation, ConversationKind, ConversationProtocol, GroupConversation, GroupId,
    KeyPackageClaimUser, LocalIdentity, MembershipState, QualifiedId, RegistrationContext,
    RegistrationRequest,
};
