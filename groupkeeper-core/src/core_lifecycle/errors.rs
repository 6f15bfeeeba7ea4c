//! Error types for group lifecycle operations

use crate::core_lifecycle::types::QualifiedId;
use std::time::Duration;
use thiserror::Error;

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors that can occur while reconciling group state
///
/// Cloneable so one settled join attempt can be handed to every caller that
/// coalesced onto it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// Establishment check or catalog lookup failed (backend unreachable)
    #[error("Transient lookup failure: {0}")]
    TransientLookupFailure(String),

    /// Conversation has no materialized group yet
    #[error("No group id found for MLS conversation {0}")]
    MissingGroupIdentifier(QualifiedId),

    /// Engine refused the operation
    #[error("Engine rejected operation: {0}")]
    EngineRejection(String),

    /// Engine call did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },
}

impl LifecycleError {
    /// Whether a later pass may succeed where this one failed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LifecycleError::TransientLookupFailure(_) | LifecycleError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LifecycleError::MissingGroupIdentifier(QualifiedId::new("c1", "wire.test"));
        assert_eq!(err.to_string(), "No group id found for MLS conversation c1@wire.test");

        let err = LifecycleError::Timeout {
            operation: "join_by_external_commit",
            after: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "join_by_external_commit timed out after 3s");
    }

    #[test]
    fn test_transient_classification() {
        assert!(LifecycleError::TransientLookupFailure("down".into()).is_transient());
        assert!(LifecycleError::Timeout { operation: "x", after: Duration::ZERO }.is_transient());
        assert!(!LifecycleError::EngineRejection("no".into()).is_transient());
        assert!(!LifecycleError::MissingGroupIdentifier(QualifiedId::new("c", "d")).is_transient());
    }
}
