//! Error types for lock coordination.
//!
//! Every failure of the coordination service is folded into [`LockError`] at
//! the coordinator boundary, so callers never need to understand the
//! service's native [`ClientError`] taxonomy.

use thiserror::Error;

use crate::client::ClientError;
use crate::lock::LockState;

/// Top-level error type for lock acquisition and release.
#[derive(Debug, Error)]
pub enum LockError {
    /// The coordination-service connection could not be established or was
    /// lost mid-operation. Never retried inside the coordinator.
    #[error("coordination connection failure: {0}")]
    Connection(String),

    /// The waiting phase was interrupted before the lock was granted.
    #[error("acquisition interrupted: {0}")]
    Interrupted(String),

    /// The service state contradicts the protocol, e.g. the attempt's own
    /// marker vanished from the sibling listing.
    #[error("lock protocol violation: {0}")]
    ProtocolViolation(String),

    /// Lock keys must be a single non-empty path segment.
    #[error("invalid lock key '{0}'")]
    InvalidKey(String),

    /// `acquire` was called on a handle that is not idle.
    #[error("lock handle is {0:?}, a new attempt needs an idle handle")]
    InvalidState(LockState),
}

impl LockError {
    /// Returns true if the connection to the coordination service failed.
    pub fn is_connection(&self) -> bool {
        matches!(self, LockError::Connection(_))
    }

    /// Returns true if the waiting phase was interrupted.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, LockError::Interrupted(_))
    }

    /// Returns true if this error indicates a logic or concurrency bug.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, LockError::ProtocolViolation(_))
    }
}

impl From<ClientError> for LockError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ConnectionLoss | ClientError::SessionExpired | ClientError::Closed => {
                LockError::Connection(err.to_string())
            }
            ClientError::NoNode(_) | ClientError::NodeExists(_) | ClientError::NotEmpty(_) => {
                LockError::ProtocolViolation(err.to_string())
            }
        }
    }
}

/// Shorthand result alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let conn = LockError::Connection("gate timed out".into());
        assert!(conn.is_connection());
        assert!(!conn.is_interrupted());
        assert!(!conn.is_protocol_violation());

        let interrupted = LockError::Interrupted("cancelled".into());
        assert!(interrupted.is_interrupted());
        assert!(!interrupted.is_connection());

        let violation = LockError::ProtocolViolation("marker missing".into());
        assert!(violation.is_protocol_violation());
        assert!(!violation.is_connection());

        assert!(!LockError::InvalidKey("a/b".into()).is_connection());
        assert!(!LockError::InvalidState(LockState::Granted).is_protocol_violation());
    }

    #[test]
    fn test_client_error_wrapping() {
        assert!(LockError::from(ClientError::ConnectionLoss).is_connection());
        assert!(LockError::from(ClientError::SessionExpired).is_connection());
        assert!(LockError::from(ClientError::Closed).is_connection());
        assert!(LockError::from(ClientError::NoNode("/locks".into())).is_protocol_violation());
        assert!(LockError::from(ClientError::NodeExists("/locks/a".into())).is_protocol_violation());
        assert!(LockError::from(ClientError::NotEmpty("/locks".into())).is_protocol_violation());
    }

    #[test]
    fn test_error_display() {
        let msg = LockError::from(ClientError::NoNode("/locks/item".into())).to_string();
        assert!(msg.contains("protocol violation"));
        assert!(msg.contains("/locks/item"));

        let msg = LockError::InvalidState(LockState::Released).to_string();
        assert!(msg.contains("Released"));
    }
}
