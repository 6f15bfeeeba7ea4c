//! Type definitions for group lifecycle reconciliation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Federated identifier for a user or a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedId {
    /// Local identifier on the owning backend
    pub id: String,
    /// Backend domain
    pub domain: String,
}

impl QualifiedId {
    /// Create a new qualified id
    pub fn new(id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self { id: id.into(), domain: domain.into() }
    }
}

impl fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.domain)
    }
}

/// Device (client) identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque cryptographic group identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub Vec<u8>);

impl GroupId {
    /// Create a new group ID from bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the bytes of the group ID
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to hex string for display
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(Self::new)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<Vec<u8>> for GroupId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl AsRef<[u8]> for GroupId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Messaging protocol a conversation runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationProtocol {
    /// Pairwise-session protocol, not handled here
    Proteus,
    /// Group-keyed protocol
    Mls,
}

/// Who owns a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// Ordinary conversation, created by one member and joined by invitation
    Regular,
    /// The user's own conversation, shared only across their devices
    SelfConversation,
    /// The team-wide conversation
    Team,
}

impl ConversationKind {
    /// Self and team conversations are created by nobody; the first device
    /// to observe them has to materialize the group.
    pub fn is_owned(&self) -> bool {
        matches!(self, ConversationKind::SelfConversation | ConversationKind::Team)
    }
}

/// Conversation record as supplied by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: QualifiedId,
    pub protocol: ConversationProtocol,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub epoch: u64,
    pub kind: ConversationKind,
}

impl Conversation {
    /// Build an MLS conversation record
    pub fn mls(
        id: QualifiedId,
        group_id: Option<GroupId>,
        epoch: u64,
        kind: ConversationKind,
    ) -> Self {
        Self { id, protocol: ConversationProtocol::Mls, group_id, epoch, kind }
    }

    /// Build a proteus conversation record
    pub fn proteus(id: QualifiedId, kind: ConversationKind) -> Self {
        Self { id, protocol: ConversationProtocol::Proteus, group_id: None, epoch: 0, kind }
    }

    pub fn is_mls(&self) -> bool {
        self.protocol == ConversationProtocol::Mls
    }

    /// Narrow to the group view, `None` for non-MLS conversations
    pub fn as_group(&self) -> Option<GroupConversation> {
        self.is_mls().then(|| GroupConversation {
            conversation_id: self.id.clone(),
            group_id: self.group_id.clone(),
            epoch: self.epoch,
            kind: self.kind,
        })
    }
}

/// MLS-only view of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConversation {
    pub conversation_id: QualifiedId,
    pub group_id: Option<GroupId>,
    pub epoch: u64,
    pub kind: ConversationKind,
}

impl GroupConversation {
    pub fn new(
        conversation_id: QualifiedId,
        group_id: Option<GroupId>,
        epoch: u64,
        kind: ConversationKind,
    ) -> Self {
        Self { conversation_id, group_id, epoch, kind }
    }
}

/// Local device's view of a group, recomputed every pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipState {
    /// Owned conversation at epoch 0 that nobody has created yet
    Uninitialized,
    /// Group exists remotely; local establishment not confirmed this pass
    UnknownEstablishment,
    /// Local state matches the group
    Established,
    /// Device was invited and still has to process the welcome
    PendingWelcome,
}

/// Local participant and device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub user_id: QualifiedId,
    pub client_id: ClientId,
}

impl LocalIdentity {
    pub fn new(user_id: QualifiedId, client_id: ClientId) -> Self {
        Self { user_id, client_id }
    }
}

/// Key package claim target: every device of `user`, optionally skipping one
///
/// `KeyPackageClaimUser::other_devices_of` yields the self-device set, i.e.
/// every device of the local user except the calling device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackageClaimUser {
    pub user: QualifiedId,
    pub skip_own_client_id: Option<ClientId>,
}

impl KeyPackageClaimUser {
    /// Claim every device of `user`
    pub fn all_devices(user: QualifiedId) -> Self {
        Self { user, skip_own_client_id: None }
    }

    /// Claim every device of `user` except `own_client`
    pub fn other_devices_of(user: QualifiedId, own_client: ClientId) -> Self {
        Self { user, skip_own_client_id: Some(own_client) }
    }

    /// Whether `client` of this claim's user is targeted
    pub fn covers(&self, client: &ClientId) -> bool {
        self.skip_own_client_id.as_ref() != Some(client)
    }
}

/// Who is registering a group, passed to the engine alongside the members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationContext {
    pub user: QualifiedId,
    pub client: ClientId,
}

/// Group creation request for an uninitialized conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub conversation_id: QualifiedId,
    /// May be absent; the engine then resolves it through the configured
    /// group id resolver.
    pub group_id: Option<GroupId>,
    pub initial_members: Vec<QualifiedId>,
    pub context: RegistrationContext,
}

impl RegistrationRequest {
    /// Request seeded with the local user/device as the only initial member
    pub fn for_local(conversation: &GroupConversation, local: &LocalIdentity) -> Self {
        Self {
            conversation_id: conversation.conversation_id.clone(),
            group_id: conversation.group_id.clone(),
            initial_members: vec![local.user_id.clone()],
            context: RegistrationContext {
                user: local.user_id.clone(),
                client: local.client_id.clone(),
            },
        }
    }
}
