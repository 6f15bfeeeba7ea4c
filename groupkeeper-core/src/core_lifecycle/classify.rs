//! Pure classification of conversations into membership states
//!
//! Only the local, field-derived states are computed here:
//! [`MembershipState::Uninitialized`] and
//! [`MembershipState::UnknownEstablishment`]. Whether an unknown group turns
//! out to be established is decided later by asking the engine.

use crate::core_lifecycle::types::{Conversation, GroupConversation, MembershipState};

/// Owned conversation that was never materialized
pub fn is_uninitialized(conversation: &GroupConversation) -> bool {
    conversation.epoch == 0 && conversation.kind.is_owned()
}

/// Derive the pre-engine membership state of a group conversation
///
/// Epoch-0 regular groups are `UnknownEstablishment`: they are created by
/// their owner and reach this device through an invitation.
pub fn membership_state(conversation: &GroupConversation) -> MembershipState {
    if is_uninitialized(conversation) {
        MembershipState::Uninitialized
    } else {
        MembershipState::UnknownEstablishment
    }
}

/// Group conversations of a snapshot, split by recovery path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Routed to the bootstrapper
    pub uninitialized: Vec<GroupConversation>,
    /// Routed to the pending join coordinator
    pub unknown: Vec<GroupConversation>,
    /// Non-group conversations skipped entirely
    pub ignored: usize,
}

/// Split a snapshot into uninitialized and possibly-stale groups
pub fn partition(conversations: &[Conversation]) -> Partition {
    let mut partition = Partition::default();

    for conversation in conversations {
        let Some(group) = conversation.as_group() else {
            partition.ignored += 1;
            continue;
        };

        match membership_state(&group) {
            MembershipState::Uninitialized => partition.uninitialized.push(group),
            _ => partition.unknown.push(group),
        }
    }

    partition
}

/// Only the MLS conversations of a snapshot
pub fn group_conversations(conversations: &[Conversation]) -> Vec<GroupConversation> {
    conversations.iter().filter_map(Conversation::as_group).collect()
}
