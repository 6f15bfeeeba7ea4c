//! Callbacks installed into the group key engine at initialization
//!
//! The engine calls back into the application for two things:
//! - resolving the group id of a conversation it only knows by conversation id
//! - authorizing commits and external joins
//!
//! Authorization is enforced remotely by the backend. [`RemoteAuthority`] is
//! the local stand-in and always grants; swap in another [`Authorizer`] to
//! enforce a local policy.

use crate::core_lifecycle::{
    catalog::ConversationCatalog,
    errors::LifecycleResult,
    types::{ClientId, GroupId, QualifiedId},
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Maps a conversation id to its group id
#[async_trait]
pub trait GroupIdResolver: Send + Sync {
    async fn group_id_from_conversation_id(
        &self,
        conversation_id: &QualifiedId,
    ) -> LifecycleResult<Option<GroupId>>;
}

/// Authorization hooks consulted by the engine
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// May `client` commit to `group_id`
    async fn authorize(&self, group_id: &GroupId, client: &ClientId) -> bool;

    /// May `external_client` join `group_id` given its current members
    async fn user_authorize(
        &self,
        group_id: &GroupId,
        external_client: &ClientId,
        existing_clients: &[ClientId],
    ) -> bool;
}

/// Authorizer for deployments where the backend enforces every rule
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteAuthority;

#[async_trait]
impl Authorizer for RemoteAuthority {
    async fn authorize(&self, _group_id: &GroupId, _client: &ClientId) -> bool {
        true
    }

    async fn user_authorize(
        &self,
        _group_id: &GroupId,
        _external_client: &ClientId,
        _existing_clients: &[ClientId],
    ) -> bool {
        true
    }
}

/// Resolves group ids by looking conversations up in the catalog
pub struct CatalogGroupIdResolver<C: ?Sized> {
    catalog: Arc<C>,
}

impl<C: ConversationCatalog + ?Sized> CatalogGroupIdResolver<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl<C: ConversationCatalog + ?Sized> GroupIdResolver for CatalogGroupIdResolver<C> {
    async fn group_id_from_conversation_id(
        &self,
        conversation_id: &QualifiedId,
    ) -> LifecycleResult<Option<GroupId>> {
        let conversation = self.catalog.conversation_by_id(conversation_id).await?;
        Ok(conversation.and_then(|c| c.group_id))
    }
}

/// Callback set handed to [`GroupKeyEngine::configure_callbacks`]
///
/// [`GroupKeyEngine::configure_callbacks`]: crate::core_lifecycle::engine::GroupKeyEngine::configure_callbacks
#[derive(Clone)]
pub struct MlsCallbacks {
    pub group_id_resolver: Arc<dyn GroupIdResolver>,
    pub authorizer: Arc<dyn Authorizer>,
}

impl MlsCallbacks {
    /// Catalog-backed resolver with the always-grant authorizer
    pub fn remote_authority(group_id_resolver: Arc<dyn GroupIdResolver>) -> Self {
        Self { group_id_resolver, authorizer: Arc::new(RemoteAuthority) }
    }

    /// Replace the authorizer
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }
}

impl fmt::Debug for MlsCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MlsCallbacks").finish_non_exhaustive()
    }
}
